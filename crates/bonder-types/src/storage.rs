//! Storage namespaces for the bonder core.

use std::str::FromStr;

/// Storage keys for different data collections.
///
/// Every record is stored under `<namespace>:<id>`; the namespace is also what
/// file-backed TTL configuration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Gas-boost transaction snapshots, keyed by transaction id.
	Transactions,
	/// `(chain id, signer, nonce)` to owning transaction id.
	NonceIndex,
	/// Chain logs keyed by primary topic.
	Logs,
	/// Secondary index of message-received logs by cross-chain message nonce.
	MessageReceived,
}

impl StorageKey {
	/// Returns the string representation of the storage key.
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Transactions => "transactions",
			StorageKey::NonceIndex => "nonce_index",
			StorageKey::Logs => "logs",
			StorageKey::MessageReceived => "message_received",
		}
	}

	/// Returns an iterator over all StorageKey variants.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Transactions,
			Self::NonceIndex,
			Self::Logs,
			Self::MessageReceived,
		]
		.into_iter()
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all().find(|key| key.as_str() == s).ok_or(())
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
