//! Fee escalation arithmetic.
//!
//! Multipliers are applied in integer basis points so a bump is exact and
//! reproducible across restarts: 1.2 becomes 12_000 / 10_000.

use bonder_types::FeeParameters;

const BPS_DENOMINATOR: u128 = 10_000;

/// Converts a multiplier such as `1.125` to basis points.
pub fn multiplier_bps(multiplier: f64) -> u128 {
	(multiplier * BPS_DENOMINATOR as f64).round().max(0.0) as u128
}

/// `value * bps / 10_000`, at least `value + 1`, never above `ceiling`.
fn bump_component(value: u128, bps: u128, ceiling: u128) -> u128 {
	let scaled = value.saturating_mul(bps) / BPS_DENOMINATOR;
	scaled.max(value.saturating_add(1)).min(ceiling)
}

/// Next fee after one boost.
///
/// EIP-1559 bumps both the cap and the tip; the tip is kept at or below the cap.
pub fn bump(fee: FeeParameters, bps: u128, ceiling: u128) -> FeeParameters {
	match fee {
		FeeParameters::Legacy { gas_price } => FeeParameters::Legacy {
			gas_price: bump_component(gas_price, bps, ceiling),
		},
		FeeParameters::Eip1559 {
			max_fee_per_gas,
			max_priority_fee_per_gas,
		} => {
			let max_fee_per_gas = bump_component(max_fee_per_gas, bps, ceiling);
			FeeParameters::Eip1559 {
				max_fee_per_gas,
				max_priority_fee_per_gas: bump_component(max_priority_fee_per_gas, bps, ceiling)
					.min(max_fee_per_gas),
			}
		},
	}
}

/// True once boosting can no longer raise the fee.
pub fn at_ceiling(fee: &FeeParameters, ceiling: u128) -> bool {
	fee.max_fee() >= ceiling
}
