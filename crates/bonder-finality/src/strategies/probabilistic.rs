//! Fixed confirmation counts for chains without trustworthy safe tags.

use super::{ChainBlocks, FinalityStrategy};
use crate::FinalityError;
use async_trait::async_trait;
use bonder_types::BlockTag;

/// `safe = head - safe_confirmations`; the custom rule, when configured, is
/// `head - custom_confirmations`. Finalized still comes from the native tag.
pub struct ProbabilisticStrategy {
	blocks: ChainBlocks,
	safe_confirmations: u64,
	custom_confirmations: Option<u64>,
}

impl ProbabilisticStrategy {
	pub fn new(
		blocks: ChainBlocks,
		safe_confirmations: u64,
		custom_confirmations: Option<u64>,
	) -> Self {
		Self {
			blocks,
			safe_confirmations,
			custom_confirmations,
		}
	}
}

#[async_trait]
impl FinalityStrategy for ProbabilisticStrategy {
	fn name(&self) -> &'static str {
		"probabilistic"
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
		self.blocks.tagged(BlockTag::Finalized).await
	}

	fn is_custom_block_number_implemented(&self) -> bool {
		self.custom_confirmations.is_some()
	}

	async fn get_custom_block_number(&self) -> Result<Option<u64>, FinalityError> {
		match self.custom_confirmations {
			Some(confirmations) => Ok(Some(
				self.blocks.probabilistic_block_number(confirmations).await?,
			)),
			None => Err(FinalityError::Unsupported(format!(
				"{} has no custom confirmation rule",
				self.blocks.chain()
			))),
		}
	}
}
