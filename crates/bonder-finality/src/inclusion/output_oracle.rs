//! OP-stack inclusion via the L1 `L2OutputOracle`.
//!
//! The oracle emits `OutputProposed` each time a proposer commits an L2 output
//! root; the event's indexed `l2BlockNumber` is the highest L2 block covered by
//! that checkpoint.

use super::InclusionService;
use crate::cache::TtlCache;
use crate::FinalityError;
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use bonder_delivery::{ChainProvider, LogFilter};
use bonder_types::{truncate_id, Address, BlockTag, ChainLog, ChainSlug, TxHash};
use std::sync::Arc;
use std::time::Duration;

sol! {
	event OutputProposed(
		bytes32 indexed outputRoot,
		uint256 indexed l2OutputIndex,
		uint256 indexed l2BlockNumber,
		uint256 l1Timestamp
	);
}

/// Checkpoint transactions whose L2 block is remembered.
const L2_BLOCK_CACHE_ENTRIES: usize = 4_096;

#[derive(Debug, Clone)]
pub struct OutputOracleConfig {
	/// `L2OutputOracle` contract on L1.
	pub oracle_address: Address,
	/// Blocks per `eth_getLogs` request.
	pub scan_window_blocks: u64,
	/// How far below the starting block the scan may go.
	pub max_lookback_blocks: u64,
	/// TTL for the block-tag to inclusion-tx cache.
	pub cache_ttl: Duration,
}

impl OutputOracleConfig {
	pub fn new(oracle_address: Address) -> Self {
		Self {
			oracle_address,
			scan_window_blocks: 1_000,
			max_lookback_blocks: 10_000,
			cache_ttl: Duration::from_secs(300),
		}
	}
}

pub struct OutputOracleInclusion {
	chain: ChainSlug,
	l1_provider: Arc<dyn ChainProvider>,
	config: OutputOracleConfig,
	inclusion_txs: TtlCache<(ChainSlug, BlockTag), Option<TxHash>>,
	l2_blocks: TtlCache<TxHash, u64>,
}

fn attested_l2_block(log: &ChainLog) -> Option<u64> {
	let event =
		OutputProposed::decode_raw_log(log.topics.iter().copied(), &log.data, true).ok()?;
	u64::try_from(event.l2BlockNumber).ok()
}

impl OutputOracleInclusion {
	/// `chain` is the L2 whose checkpoints `l1_provider` observes.
	pub fn new(
		chain: ChainSlug,
		l1_provider: Arc<dyn ChainProvider>,
		config: OutputOracleConfig,
	) -> Self {
		let inclusion_txs = TtlCache::new(config.cache_ttl);
		Self {
			chain,
			l1_provider,
			config,
			inclusion_txs,
			l2_blocks: TtlCache::bounded(L2_BLOCK_CACHE_ENTRIES),
		}
	}

	fn checkpoint_filter(&self, from_block: u64, to_block: u64) -> LogFilter {
		LogFilter::new(from_block, to_block)
			.address(self.config.oracle_address)
			.event_signature(OutputProposed::SIGNATURE_HASH)
	}

	/// Walks backward from `block_number` one window at a time.
	async fn scan_backward(&self, block_number: u64) -> Result<Option<TxHash>, FinalityError> {
		let window = self.config.scan_window_blocks.max(1);
		let floor = block_number.saturating_sub(self.config.max_lookback_blocks);
		let mut to_block = block_number;

		loop {
			let from_block = to_block.saturating_sub(window - 1).max(floor);
			let logs = self
				.l1_provider
				.get_logs(&self.checkpoint_filter(from_block, to_block))
				.await?;

			if let Some(latest) = logs
				.iter()
				.max_by_key(|log| (log.block_number, log.log_index))
			{
				tracing::debug!(
					chain = %self.chain,
					l1_block = latest.block_number,
					tx_hash = %truncate_id(&latest.transaction_hash.to_string()),
					"Found L1 checkpoint"
				);
				return Ok(Some(latest.transaction_hash));
			}
			if from_block <= floor {
				tracing::debug!(
					chain = %self.chain,
					from = block_number,
					lookback = self.config.max_lookback_blocks,
					"No L1 checkpoint within lookback"
				);
				return Ok(None);
			}
			to_block = from_block - 1;
		}
	}
}

#[async_trait]
impl InclusionService for OutputOracleInclusion {
	async fn latest_l1_inclusion_tx_before_block_number(
		&self,
		block_number: u64,
	) -> Result<Option<TxHash>, FinalityError> {
		self.inclusion_txs
			.get_or_try_insert_with((self.chain, BlockTag::Number(block_number)), || {
				self.scan_backward(block_number)
			})
			.await
	}

	async fn latest_l1_inclusion_tx_before_tag(
		&self,
		tag: BlockTag,
	) -> Result<Option<TxHash>, FinalityError> {
		if let BlockTag::Number(block_number) = tag {
			return self
				.latest_l1_inclusion_tx_before_block_number(block_number)
				.await;
		}
		self.inclusion_txs
			.get_or_try_insert_with((self.chain, tag), || async {
				match self.l1_provider.get_block_number_by_tag(tag).await? {
					Some(block_number) => self.scan_backward(block_number).await,
					None => Ok(None),
				}
			})
			.await
	}

	async fn latest_l2_block_from_l1_tx(
		&self,
		l1_tx_hash: TxHash,
	) -> Result<Option<u64>, FinalityError> {
		if let Some(block) = self.l2_blocks.get(&l1_tx_hash) {
			return Ok(Some(block));
		}
		let lock = self.l2_blocks.refresh_lock(&l1_tx_hash);
		let _guard = lock.lock().await;
		if let Some(block) = self.l2_blocks.get(&l1_tx_hash) {
			return Ok(Some(block));
		}

		let Some(receipt) = self.l1_provider.get_transaction_receipt(l1_tx_hash).await? else {
			return Ok(None);
		};
		let logs = self
			.l1_provider
			.get_logs(&self.checkpoint_filter(receipt.block_number, receipt.block_number))
			.await?;
		let l2_block = logs
			.iter()
			.filter(|log| log.transaction_hash == l1_tx_hash)
			.filter_map(attested_l2_block)
			.max();

		// Only hits are kept: a missing receipt may still appear later.
		if let Some(block) = l2_block {
			self.l2_blocks.insert(l1_tx_hash, block);
		}
		Ok(l2_block)
	}
}

/// Builds an `OutputProposed` log as the oracle would emit it.
#[cfg(test)]
pub(crate) fn checkpoint_log(
	oracle: Address,
	l1_block: u64,
	l1_tx_hash: TxHash,
	l2_block: u64,
) -> ChainLog {
	use alloy_primitives::U256;
	use bonder_types::{Bytes, B256};

	ChainLog {
		address: oracle,
		topics: vec![
			OutputProposed::SIGNATURE_HASH,
			B256::repeat_byte(0x0f),
			B256::from(U256::from(l1_block).to_be_bytes::<32>()),
			B256::from(U256::from(l2_block).to_be_bytes::<32>()),
		],
		data: Bytes::from(U256::from(1_700_000_000u64).to_be_bytes::<32>().to_vec()),
		block_number: l1_block,
		log_index: 0,
		transaction_hash: l1_tx_hash,
	}
}
