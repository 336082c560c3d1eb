//! Gas-boosted transaction delivery.
//!
//! A [`GasBoostTransaction`] delivers one logical transaction at a fixed nonce,
//! re-broadcasting it with escalating fees until one of its signed variants
//! is mined and then confirmed by the chain's finality service. Every state
//! change is persisted before it takes effect on the network, so a restarted
//! process resumes exactly where the previous one stopped.

use bonder_account::AccountError;
use bonder_delivery::DeliveryError;
use bonder_finality::FinalityError;
use bonder_storage::StorageError;
use bonder_types::AbandonReason;
use std::time::Duration;
use thiserror::Error;

pub mod clock;
pub mod factory;
pub mod fees;
pub mod nonce;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::Clock;
pub use factory::{FactoryDependencies, GasBoostTransactionFactory};
pub use bonder_types::FeeModel;
pub use nonce::{NonceManager, NonceRegistry};
pub use transaction::GasBoostTransaction;

/// Errors that can occur while creating or monitoring a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GasBoostError {
	/// The initial fee is above the configured ceiling. No nonce was used.
	#[error("Fee {fee} exceeds ceiling {ceiling}")]
	FeeCeilingExceeded { fee: u128, ceiling: u128 },
	#[error("Transaction not found: {0}")]
	NotFound(String),
	/// The transaction reached `Abandoned`.
	#[error("Transaction abandoned: {0}")]
	Abandoned(AbandonReason),
	/// Monitoring was stopped before the awaited state was reached.
	#[error("Monitoring stopped: {0}")]
	Stopped(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Delivery error: {0}")]
	Delivery(String),
	#[error("Account error: {0}")]
	Account(String),
	#[error("Finality error: {0}")]
	Finality(String),
}

impl From<StorageError> for GasBoostError {
	fn from(e: StorageError) -> Self {
		GasBoostError::Storage(e.to_string())
	}
}

impl From<DeliveryError> for GasBoostError {
	fn from(e: DeliveryError) -> Self {
		GasBoostError::Delivery(e.to_string())
	}
}

impl From<AccountError> for GasBoostError {
	fn from(e: AccountError) -> Self {
		GasBoostError::Account(e.to_string())
	}
}

impl From<FinalityError> for GasBoostError {
	fn from(e: FinalityError) -> Self {
		GasBoostError::Finality(e.to_string())
	}
}

/// Options shared by every transaction a factory creates.
#[derive(Debug, Clone, PartialEq)]
pub struct GasBoostOptions {
	/// Multiplier applied to the last broadcast fee on each boost.
	pub fee_multiplier: f64,
	/// Boosts allowed before the transaction is abandoned.
	pub max_boost_count: u32,
	/// Absolute fee ceiling in wei per gas.
	pub max_fee_per_gas: u128,
	/// Time since the last persisted change after which a boost is due.
	pub boost_interval: Duration,
	pub poll_interval: Duration,
	/// Age after which a pending transaction is abandoned.
	pub max_lifetime: Duration,
	/// Consecutive polls seeing the nonce used by a foreign transaction
	/// before giving up.
	pub nonce_consumed_grace_polls: u32,
	/// Fee model used when the request carries no fee.
	pub fee_model: FeeModel,
}

impl Default for GasBoostOptions {
	fn default() -> Self {
		Self {
			fee_multiplier: 1.2,
			max_boost_count: 5,
			max_fee_per_gas: 500_000_000_000,
			boost_interval: Duration::from_secs(60),
			poll_interval: Duration::from_secs(5),
			max_lifetime: Duration::from_secs(60 * 60),
			nonce_consumed_grace_polls: 3,
			fee_model: FeeModel::Eip1559,
		}
	}
}
