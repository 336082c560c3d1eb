//! Signing accounts for the bonder.
//!
//! An account owns one key and turns fully specified unsigned transactions into
//! raw signed bytes ready for `eth_sendRawTransaction`. Nonce and fee selection
//! happen upstream; the account only signs.

use async_trait::async_trait;
use bonder_types::{
	Address, Bytes, ConfigSchema, FeeParameters, ImplementationRegistry, TxHash, U256,
};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod local;
}

/// Errors that can occur during account operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// Error that occurs when signing operations fail.
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	/// Error that occurs when a cryptographic key is invalid or malformed.
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	/// Error that occurs when interacting with the account implementation.
	#[error("Implementation error: {0}")]
	Implementation(String),
}

/// A transaction with every field fixed, ready to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
	pub chain_id: u64,
	pub nonce: u64,
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
	pub gas_limit: u64,
	pub fee: FeeParameters,
}

/// Output of signing: the network hash and the EIP-2718 encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	pub hash: TxHash,
	pub raw: Bytes,
}

/// Trait defining the interface for account implementations.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Returns the configuration schema for this account implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Retrieves the address associated with this account.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Signs a transaction and returns its raw encoding.
	///
	/// Legacy fees produce an EIP-155 legacy transaction, EIP-1559 fees a
	/// type-2 transaction.
	async fn sign_transaction(
		&self,
		tx: &UnsignedTransaction,
	) -> Result<SignedTransaction, AccountError>;
}

/// Type alias for account factory functions.
pub type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;

/// Registry trait for account implementations.
pub trait AccountRegistry: ImplementationRegistry<Factory = AccountFactory> {}

/// Get all registered account implementations.
pub fn get_all_implementations() -> Vec<(&'static str, AccountFactory)> {
	use implementations::local;

	vec![(local::Registry::NAME, local::Registry::factory())]
}

/// Service that manages account operations.
pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.implementation.address().await
	}

	pub async fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, AccountError> {
		self.implementation.sign_transaction(tx).await
	}
}
