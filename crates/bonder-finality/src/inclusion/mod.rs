//! Correlation of L1 checkpoint transactions with the L2 blocks they attest.
//!
//! Rollups whose safety follows from an L1 checkpoint implement
//! [`InclusionService`]; the optimistic-rollup strategy uses it to derive a
//! custom safe block.

use crate::FinalityError;
use async_trait::async_trait;
use bonder_types::{BlockTag, TxHash};

pub mod output_oracle;

pub use output_oracle::{OutputOracleConfig, OutputOracleInclusion};

#[async_trait]
pub trait InclusionService: Send + Sync {
	/// Latest checkpoint transaction at or before `block_number` on L1.
	///
	/// `Ok(None)` when no checkpoint exists within the scan bound.
	async fn latest_l1_inclusion_tx_before_block_number(
		&self,
		block_number: u64,
	) -> Result<Option<TxHash>, FinalityError>;

	/// Latest checkpoint transaction at or before the L1 block `tag` resolves to.
	async fn latest_l1_inclusion_tx_before_tag(
		&self,
		tag: BlockTag,
	) -> Result<Option<TxHash>, FinalityError>;

	/// Highest L2 block attested by an L1 checkpoint transaction.
	async fn latest_l2_block_from_l1_tx(
		&self,
		l1_tx_hash: TxHash,
	) -> Result<Option<u64>, FinalityError>;

	/// Highest L2 block attested at or before L1's `safe` block.
	async fn latest_safe_l2_block(&self) -> Result<Option<u64>, FinalityError> {
		match self.latest_l1_inclusion_tx_before_tag(BlockTag::Safe).await? {
			Some(tx_hash) => self.latest_l2_block_from_l1_tx(tx_hash).await,
			None => Ok(None),
		}
	}
}
