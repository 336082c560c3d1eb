//! Chains whose RPC exposes trustworthy `safe` and `finalized` tags.

use super::{ChainBlocks, FinalityStrategy};
use crate::FinalityError;
use async_trait::async_trait;
use bonder_types::BlockTag;

pub struct NativeTagStrategy {
	blocks: ChainBlocks,
}

impl NativeTagStrategy {
	pub fn new(blocks: ChainBlocks) -> Self {
		Self { blocks }
	}
}

#[async_trait]
impl FinalityStrategy for NativeTagStrategy {
	fn name(&self) -> &'static str {
		"native"
	}

	async fn get_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.head().await
	}

	async fn get_safe_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.tagged(BlockTag::Safe).await
	}

	async fn get_finalized_block_number(&self) -> Result<u64, FinalityError> {
		self.blocks.tagged(BlockTag::Finalized).await
	}
}
