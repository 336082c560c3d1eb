//! OP-stack rollups.
//!
//! The rollup's own `safe` tag follows the sequencer's view of L1 and can be
//! reorged, so it is never used. Safety comes from the latest L2 block
//! attested by an output checkpoint at or before L1's safe block; without
//! one, the rollup's `finalized` tag is used instead.

use super::{ChainBlocks, FinalityStrategy};
use crate::inclusion::InclusionService;
use crate::FinalityError;
use async_trait::async_trait;
use bonder_types::BlockTag;
use std::sync::Arc;

pub struct OptimisticRollupStrategy {
	blocks: ChainBlocks,
	inclusion: Option<Arc<dyn InclusionService>>,
}

impl OptimisticRollupStrategy {
	pub fn new(blocks: ChainBlocks, inclusion: Option<Arc<dyn InclusionService>>) -> Self {
		Self { blocks, inclusion }
	}
}

#[async_trait]
impl FinalityStrategy for OptimisticRollupStrategy {
	fn name(&self) -> &'static str {
		"optimistic_rollup"
	}

	async fn get_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.head().await
	}

	async fn get_safe_block_number(&self) -> Result<u64, FinalityError> {
		match self.get_custom_block_number().await? {
			Some(block) => Ok(block),
			None => {
				tracing::debug!(
					chain = %self.blocks.chain(),
					"No checkpointed L2 block, using finalized"
				);
				self.get_finalized_block_number().await
			},
		}
	}

	async fn get_finalized_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.tagged(BlockTag::Finalized).await
	}

	fn is_custom_block_number_implemented(&self) -> bool {
		true
	}

	async fn get_custom_block_number(&self) -> Result<Option<u64>, FinalityError> {
		match &self.inclusion {
			Some(inclusion) => inclusion.latest_safe_l2_block().await,
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::inclusion::output_oracle::checkpoint_log;
	use crate::inclusion::{OutputOracleConfig, OutputOracleInclusion};
	use bonder_delivery::implementations::mock::MockChainProvider;
	use bonder_types::{Address, ChainSlug, TxHash};

	const ORACLE: Address = Address::new([0x0b; 20]);

	fn setup() -> (Arc<MockChainProvider>, Arc<MockChainProvider>, OptimisticRollupStrategy) {
		let l1 = Arc::new(MockChainProvider::new(1));
		l1.set_head(20_000);
		l1.set_safe(Some(19_950));
		let l2 = Arc::new(MockChainProvider::new(10));
		l2.set_head(120_000);
		l2.set_safe(Some(119_990));
		l2.set_finalized(Some(100_000));

		let inclusion = OutputOracleInclusion::new(
			ChainSlug::Optimism,
			l1.clone(),
			OutputOracleConfig::new(ORACLE),
		);
		let strategy = OptimisticRollupStrategy::new(
			ChainBlocks::new(ChainSlug::Optimism, l2.clone()),
			Some(Arc::new(inclusion)),
		);
		(l1, l2, strategy)
	}

	#[tokio::test]
	async fn test_no_checkpoint_falls_back_to_finalized() {
		let (_l1, _l2, strategy) = setup();
		assert_eq!(strategy.get_custom_block_number().await.unwrap(), None);
		assert_eq!(strategy.get_safe_block_number().await.unwrap(), 100_000);
	}

	#[tokio::test]
	async fn test_checkpoint_defines_safe_block() {
		let (l1, _l2, strategy) = setup();
		let tx = TxHash::repeat_byte(0x33);
		l1.add_logs([checkpoint_log(ORACLE, 19_900, tx, 110_000)]);
		l1.mine(tx, 19_900, true);

		assert_eq!(strategy.get_custom_block_number().await.unwrap(), Some(110_000));
		// Never the rollup's own safe tag.
		assert_eq!(strategy.get_safe_block_number().await.unwrap(), 110_000);
	}

	#[tokio::test]
	async fn test_without_inclusion_service() {
		let l2 = Arc::new(MockChainProvider::new(8453));
		l2.set_finalized(Some(55));
		let strategy = OptimisticRollupStrategy::new(ChainBlocks::new(ChainSlug::Base, l2), None);
		assert_eq!(strategy.get_custom_block_number().await.unwrap(), None);
		assert_eq!(strategy.get_safe_block_number().await.unwrap(), 55);
	}
}
