//! Common types for the bonder delivery and finality core.
//!
//! This crate defines the data types shared by every other crate in the
//! workspace: chain identities, finality vocabulary, the persisted transaction
//! snapshot, storage namespaces and configuration validation helpers.

/// Chain identities and chain-family metadata.
pub mod chain;
/// Chain log records used by the inclusion service and the log index.
pub mod event;
/// Finality kinds, strategy sets and block tags.
pub mod finality;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Zeroizing wrapper for private keys.
pub mod secret_string;
/// Storage namespaces.
pub mod storage;
/// Managed transaction snapshot and fee model.
pub mod transaction;
/// Small formatting helpers.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
pub use chain::{ChainFamily, ChainSlug};
pub use event::ChainLog;
pub use finality::{BlockTag, FinalityKind, FinalityQueryResult, FinalityStrategySet};
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::StorageKey;
pub use transaction::{
	AbandonReason, Broadcast, FeeModel, FeeParameters, TransactionReceipt, TransactionRequest,
	TransactionSnapshot, TransactionStatus,
};
pub use utils::{truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
