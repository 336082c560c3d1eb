//! Finality vocabulary shared by the strategy engine and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which notion of "final" a block number answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityKind {
	/// Current chain head.
	Head,
	/// Very unlikely to be reorged under normal operation.
	Safe,
	/// Irreversible under the chain's consensus rules.
	Finalized,
	/// Chain-specific safety rule (inclusion-derived or fixed confirmations).
	CustomSafe,
}

impl FinalityKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			FinalityKind::Head => "head",
			FinalityKind::Safe => "safe",
			FinalityKind::Finalized => "finalized",
			FinalityKind::CustomSafe => "custom_safe",
		}
	}
}

impl fmt::Display for FinalityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A block number together with the finality notion it satisfies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityQueryResult {
	pub block_number: u64,
	pub kind: FinalityKind,
}

/// Named family of per-chain strategies.
///
/// Different consumers of finality accept different risk: the bonder fronts
/// liquidity and wants the fastest defensible signal, collateralized flows use
/// fixed confirmation margins, and threshold flows wait for a fraction of full
/// zk finality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalityStrategySet {
	#[default]
	Default,
	Bonder,
	Collateralized,
	Threshold,
}

impl FinalityStrategySet {
	pub fn as_str(&self) -> &'static str {
		match self {
			FinalityStrategySet::Default => "default",
			FinalityStrategySet::Bonder => "bonder",
			FinalityStrategySet::Collateralized => "collateralized",
			FinalityStrategySet::Threshold => "threshold",
		}
	}
}

impl fmt::Display for FinalityStrategySet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for FinalityStrategySet {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"default" => Ok(Self::Default),
			"bonder" => Ok(Self::Bonder),
			"collateralized" => Ok(Self::Collateralized),
			"threshold" => Ok(Self::Threshold),
			other => Err(format!("Unknown finality strategy set: {}", other)),
		}
	}
}

/// Block selector understood by chain providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
	Latest,
	Pending,
	Safe,
	Finalized,
	Number(u64),
}

impl fmt::Display for BlockTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BlockTag::Latest => f.write_str("latest"),
			BlockTag::Pending => f.write_str("pending"),
			BlockTag::Safe => f.write_str("safe"),
			BlockTag::Finalized => f.write_str("finalized"),
			BlockTag::Number(n) => write!(f, "{}", n),
		}
	}
}
