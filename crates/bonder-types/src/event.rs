//! Chain log records.

use alloy_primitives::{Address, Bytes, TxHash, B256};
use serde::{Deserialize, Serialize};

/// A log emitted by a contract, as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLog {
	/// Emitting contract.
	pub address: Address,
	/// Indexed topics; `topics[0]` is the event signature hash.
	pub topics: Vec<B256>,
	/// Non-indexed event data.
	pub data: Bytes,
	pub block_number: u64,
	pub log_index: u64,
	pub transaction_hash: TxHash,
}

impl ChainLog {
	/// Returns the event signature topic, if present.
	pub fn primary_topic(&self) -> Option<&B256> {
		self.topics.first()
	}
}
