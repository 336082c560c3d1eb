//! Managed transaction types.
//!
//! A [`TransactionSnapshot`] is the persisted state of one gas-boosted
//! transaction. It is written to storage on every state change and is the only
//! thing needed to resume monitoring after a restart.

use alloy_primitives::{Address, Bytes, TxHash, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ChainSlug;

/// Which transaction type a chain is priced with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
	Legacy,
	#[default]
	Eip1559,
}

impl std::str::FromStr for FeeModel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"legacy" => Ok(FeeModel::Legacy),
			"eip1559" => Ok(FeeModel::Eip1559),
			other => Err(format!("Unknown fee model: {}", other)),
		}
	}
}

/// Fee parameters for one signed variant of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeParameters {
	/// Pre-London pricing.
	Legacy { gas_price: u128 },
	/// EIP-1559 pricing.
	Eip1559 {
		max_fee_per_gas: u128,
		max_priority_fee_per_gas: u128,
	},
}

impl FeeParameters {
	/// The most the sender can pay per unit of gas.
	pub fn max_fee(&self) -> u128 {
		match self {
			FeeParameters::Legacy { gas_price } => *gas_price,
			FeeParameters::Eip1559 {
				max_fee_per_gas, ..
			} => *max_fee_per_gas,
		}
	}

	/// Returns true if every component is greater than or equal to `other`'s.
	///
	/// Parameters of different fee models are never comparable.
	pub fn is_at_least(&self, other: &FeeParameters) -> bool {
		match (self, other) {
			(
				FeeParameters::Legacy { gas_price: a },
				FeeParameters::Legacy { gas_price: b },
			) => a >= b,
			(
				FeeParameters::Eip1559 {
					max_fee_per_gas: fa,
					max_priority_fee_per_gas: ta,
				},
				FeeParameters::Eip1559 {
					max_fee_per_gas: fb,
					max_priority_fee_per_gas: tb,
				},
			) => fa >= fb && ta >= tb,
			_ => false,
		}
	}
}

/// Payload a caller wants delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
	pub to: Address,
	#[serde(default)]
	pub value: U256,
	#[serde(default)]
	pub data: Bytes,
	/// Gas limit; estimated by the provider when absent.
	pub gas_limit: Option<u64>,
	/// Initial fee; taken from the provider's estimate when absent.
	pub fee: Option<FeeParameters>,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	pub transaction_hash: TxHash,
	pub block_number: u64,
	/// Whether execution succeeded; a reverted transaction still consumed the nonce.
	pub success: bool,
}

/// Lifecycle status of a managed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
	Pending,
	Mined,
	Confirmed,
	Abandoned,
}

impl TransactionStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TransactionStatus::Confirmed | TransactionStatus::Abandoned
		)
	}
}

/// Why a transaction was given up on.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Provider rejected transaction permanently: {0}")]
	PermanentProviderError(String),
	#[error("Not mined after {boosts} fee boosts")]
	MaxBoostsExceeded { boosts: u32 },
	#[error("Not mined at fee ceiling {ceiling} within the maximum lifetime")]
	FeeCeilingReached { ceiling: u128 },
	#[error("Not mined within {lifetime_secs}s")]
	TimedOut { lifetime_secs: u64 },
	#[error("Nonce {nonce} consumed by a transaction this bonder did not broadcast")]
	NonceConsumedExternally { nonce: u64 },
}

/// One signed variant of a managed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
	pub hash: TxHash,
	pub fee: FeeParameters,
	/// Unix milliseconds at which the variant was signed and persisted.
	pub signed_at: u64,
}

/// Persisted state of a managed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
	pub id: String,
	pub chain_slug: ChainSlug,
	pub chain_id: u64,
	pub signer: Address,
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
	pub gas_limit: u64,
	pub nonce: u64,
	/// Fee of the most recent broadcast.
	pub fee: FeeParameters,
	pub boost_count: u32,
	/// Every signed variant, oldest first. Append-only.
	pub broadcasts: Vec<Broadcast>,
	/// Raw bytes of the most recent signed variant.
	pub raw_transaction: Bytes,
	pub status: TransactionStatus,
	pub abandon_reason: Option<AbandonReason>,
	pub mined_tx_hash: Option<TxHash>,
	pub mined_block_number: Option<u64>,
	pub mined_success: Option<bool>,
	/// Unix milliseconds.
	pub created_at: u64,
	/// Unix milliseconds of the last persisted state change.
	pub updated_at: u64,
}

impl TransactionSnapshot {
	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Hashes of every broadcast, oldest first.
	pub fn broadcast_hashes(&self) -> Vec<TxHash> {
		self.broadcasts.iter().map(|b| b.hash).collect()
	}

	pub fn last_broadcast(&self) -> Option<&Broadcast> {
		self.broadcasts.last()
	}

	pub fn has_broadcast(&self, hash: &TxHash) -> bool {
		self.broadcasts.iter().any(|b| &b.hash == hash)
	}
}
