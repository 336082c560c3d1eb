//! Chain access for the bonder.
//!
//! This crate defines [`ChainProvider`], the per-chain RPC surface used by the
//! gas-boost and finality machinery, the alloy-backed EVM implementation, and
//! the classification of raw node errors into the retry taxonomy the rest of
//! the workspace reacts to.

use async_trait::async_trait;
use bonder_types::{
	Address, BlockTag, ChainLog, ChainSlug, ConfigSchema, FeeParameters, ImplementationRegistry,
	TransactionReceipt, TransactionRequest, TxHash, B256,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
	#[cfg(any(test, feature = "testing"))]
	pub mod mock;
}

/// Errors returned by chain providers.
///
/// Everything except [`DeliveryError::InsufficientFunds`] and
/// [`DeliveryError::Rejected`] is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	#[error("Request timed out: {0}")]
	Timeout(String),
	#[error("Rate limited: {0}")]
	RateLimited(String),
	/// The node has already seen a transaction with this nonce mined.
	#[error("Nonce too low: {0}")]
	NonceTooLow(String),
	/// The exact signed payload is already in the node's pool.
	#[error("Already known: {0}")]
	AlreadyKnown(String),
	/// A pooled transaction with the same nonce pays more.
	#[error("Replacement underpriced: {0}")]
	ReplacementUnderpriced(String),
	#[error("Insufficient funds: {0}")]
	InsufficientFunds(String),
	/// The node refused the transaction and will keep refusing it.
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// No provider is configured for the requested chain.
	#[error("No provider available for {0}")]
	NoProviderAvailable(String),
}

impl DeliveryError {
	/// Maps a node's error message onto the error taxonomy.
	///
	/// Messages differ between clients, so matching is by lowercase substring.
	pub fn from_rpc_message(message: impl Into<String>) -> Self {
		let message = message.into();
		let lower = message.to_lowercase();
		let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));

		if has(&["nonce too low", "nonce has already been used", "nonce_expired"]) {
			DeliveryError::NonceTooLow(message)
		} else if has(&[
			"already known",
			"known transaction",
			"already imported",
			"already in mempool",
		]) {
			DeliveryError::AlreadyKnown(message)
		} else if has(&[
			"underpriced",
			"fee too low",
			"max fee per gas less than block base fee",
		]) {
			DeliveryError::ReplacementUnderpriced(message)
		} else if has(&["insufficient funds"]) {
			DeliveryError::InsufficientFunds(message)
		} else if has(&[
			"intrinsic gas too low",
			"invalid sender",
			"invalid signature",
			"invalid transaction",
			"exceeds block gas limit",
			"tx type not supported",
			"rlp:",
		]) {
			DeliveryError::Rejected(message)
		} else if has(&["rate limit", "too many requests", "429"]) {
			DeliveryError::RateLimited(message)
		} else if has(&["timed out", "timeout", "deadline exceeded"]) {
			DeliveryError::Timeout(message)
		} else {
			DeliveryError::Network(message)
		}
	}

	/// True when retrying the same request can never succeed.
	pub fn is_permanent(&self) -> bool {
		matches!(
			self,
			DeliveryError::InsufficientFunds(_)
				| DeliveryError::Rejected(_)
				| DeliveryError::Configuration(_)
		)
	}

	pub fn is_transient(&self) -> bool {
		!self.is_permanent()
	}
}

/// Log query over an inclusive block range.
///
/// `topics[i]` constrains topic position `i`; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
	pub address: Option<Address>,
	pub topics: [Option<B256>; 4],
	pub from_block: u64,
	pub to_block: u64,
}

impl LogFilter {
	pub fn new(from_block: u64, to_block: u64) -> Self {
		Self {
			from_block,
			to_block,
			..Default::default()
		}
	}

	pub fn address(mut self, address: Address) -> Self {
		self.address = Some(address);
		self
	}

	pub fn event_signature(mut self, topic: B256) -> Self {
		self.topics[0] = Some(topic);
		self
	}

	pub fn topic(mut self, position: usize, topic: B256) -> Self {
		if let Some(slot) = self.topics.get_mut(position) {
			*slot = Some(topic);
		}
		self
	}

	/// Whether a log satisfies this filter.
	pub fn matches(&self, log: &ChainLog) -> bool {
		if log.block_number < self.from_block || log.block_number > self.to_block {
			return false;
		}
		if self.address.is_some_and(|address| address != log.address) {
			return false;
		}
		self.topics.iter().enumerate().all(|(i, wanted)| match wanted {
			Some(topic) => log.topics.get(i) == Some(topic),
			None => true,
		})
	}
}

/// RPC surface of one chain.
#[async_trait]
pub trait ChainProvider: Send + Sync {
	/// Returns the configuration schema for this provider implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Chain id this provider talks to.
	fn chain_id(&self) -> u64;

	/// Latest block number.
	async fn get_block_number(&self) -> Result<u64, DeliveryError>;

	/// Block number for a tag; `None` when the node has no block for it.
	async fn get_block_number_by_tag(&self, tag: BlockTag) -> Result<Option<u64>, DeliveryError>;

	/// Transaction count of `address` at `tag`. `BlockTag::Pending` includes
	/// pooled transactions.
	async fn get_transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError>;

	/// Receipt of a transaction; `None` while it is not included.
	async fn get_transaction_receipt(
		&self,
		hash: TxHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	/// Broadcasts a signed EIP-2718 payload and returns its hash.
	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, DeliveryError>;

	async fn get_gas_price(&self) -> Result<u128, DeliveryError>;

	/// Suggested EIP-1559 fee cap and tip.
	async fn estimate_eip1559_fees(&self) -> Result<FeeParameters, DeliveryError>;

	async fn estimate_gas(
		&self,
		from: Address,
		request: &TransactionRequest,
	) -> Result<u64, DeliveryError>;

	async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainLog>, DeliveryError>;
}

/// Type alias for provider factory functions.
///
/// The table is one `[networks.<slug>]` section of the configuration.
pub type DeliveryFactory = fn(&toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError>;

/// Registry trait for provider implementations.
pub trait DeliveryRegistry: ImplementationRegistry<Factory = DeliveryFactory> {}

/// Get all registered provider implementations.
pub fn get_all_implementations() -> Vec<(&'static str, DeliveryFactory)> {
	use implementations::evm::alloy;

	vec![(alloy::Registry::NAME, alloy::Registry::factory())]
}

/// Providers for every configured chain.
#[derive(Clone, Default)]
pub struct DeliveryService {
	providers: HashMap<ChainSlug, Arc<dyn ChainProvider>>,
}

impl DeliveryService {
	pub fn new(providers: HashMap<ChainSlug, Arc<dyn ChainProvider>>) -> Self {
		Self { providers }
	}

	/// Provider for a chain.
	pub fn provider(&self, chain: ChainSlug) -> Result<Arc<dyn ChainProvider>, DeliveryError> {
		self.providers
			.get(&chain)
			.cloned()
			.ok_or_else(|| DeliveryError::NoProviderAvailable(chain.to_string()))
	}

	/// Configured chains, in no particular order.
	pub fn chains(&self) -> impl Iterator<Item = ChainSlug> + '_ {
		self.providers.keys().copied()
	}
}
