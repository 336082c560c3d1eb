//! zk rollups: wait a fixed wall-clock window worth of blocks.

use super::{ChainBlocks, FinalityStrategy};
use crate::FinalityError;
use async_trait::async_trait;

pub struct ThresholdStrategy {
	blocks: ChainBlocks,
	safe_confirmations: u64,
	finalized_confirmations: u64,
}

impl ThresholdStrategy {
	pub fn new(blocks: ChainBlocks, safe_confirmations: u64, finalized_confirmations: u64) -> Self {
		Self {
			blocks,
			safe_confirmations,
			finalized_confirmations,
		}
	}
}

#[async_trait]
impl FinalityStrategy for ThresholdStrategy {
	fn name(&self) -> &'static str {
		"threshold"
	}

	async fn get_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.head().await
	}

	async fn get_safe_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks
			.probabilistic_block_number(self.safe_confirmations)
			.await
	}

	async fn get_finalized_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks
			.probabilistic_block_number(self.finalized_confirmations)
			.await
	}

	fn is_custom_block_number_implemented(&self) -> bool {
		true
	}

	// Custom aliases safe.
	async fn get_custom_block_number(&self) -> Result<Option<u64>, FinalityError> {
		Ok(Some(self.get_safe_block_number().await?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bonder_delivery::implementations::mock::MockChainProvider;
	use bonder_types::ChainSlug;
	use std::sync::Arc;

	#[tokio::test]
	async fn test_windows_below_head() {
		let provider = Arc::new(MockChainProvider::new(59144));
		provider.set_head(10_000);
		let strategy = ThresholdStrategy::new(ChainBlocks::new(ChainSlug::Linea, provider), 900, 3_600);

		assert_eq!(strategy.get_safe_block_number().await.unwrap(), 9_100);
		assert_eq!(strategy.get_finalized_block_number().await.unwrap(), 6_400);
		assert_eq!(strategy.get_custom_block_number().await.unwrap(), Some(9_100));
	}
}
