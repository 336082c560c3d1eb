//! Per-chain finality strategies and the registry that selects them.
//!
//! A strategy answers head / safe / finalized / custom-safe for one chain.
//! Selection is a pure function of `(FinalityStrategySet, ChainSlug)` resolved
//! once when a [`crate::FinalityService`] is built.

use crate::inclusion::InclusionService;
use crate::FinalityError;
use async_trait::async_trait;
use bonder_delivery::ChainProvider;
use bonder_types::{BlockTag, ChainFamily, ChainSlug, FinalityStrategySet};
use std::sync::Arc;
use std::time::Duration;

pub mod native;
pub mod optimistic;
pub mod probabilistic;
pub mod threshold;

pub use native::NativeTagStrategy;
pub use optimistic::OptimisticRollupStrategy;
pub use probabilistic::ProbabilisticStrategy;
pub use threshold::ThresholdStrategy;

/// Confirmation margin used as the custom rule for collateralized sidechains.
pub const COLLATERALIZED_CONFIRMATIONS: u64 = 6;
/// Window treated as "safe" on zk rollups.
pub const THRESHOLD_SAFE_WINDOW: Duration = Duration::from_secs(30 * 60);
/// Window treated as "finalized" on zk rollups.
pub const THRESHOLD_FINALIZED_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Finality rules for one chain.
///
/// Implementations must return non-decreasing numbers under normal operation;
/// the service checks this and reports regressions.
#[async_trait]
pub trait FinalityStrategy: Send + Sync {
	fn name(&self) -> &'static str;

	/// Chain head.
	async fn get_block_number(&self) -> Result<u64, FinalityError>;

	async fn get_safe_block_number(&self) -> Result<u64, FinalityError>;

	async fn get_finalized_block_number(&self) -> Result<u64, FinalityError>;

	fn is_custom_block_number_implemented(&self) -> bool {
		false
	}

	/// Chain-specific safe block. `Ok(None)` means the rule has no answer yet.
	async fn get_custom_block_number(&self) -> Result<Option<u64>, FinalityError> {
		Err(FinalityError::Unsupported(format!(
			"{} strategy has no custom block number",
			self.name()
		)))
	}
}

/// Block queries shared by every strategy.
#[derive(Clone)]
pub struct ChainBlocks {
	chain: ChainSlug,
	provider: Arc<dyn ChainProvider>,
}

impl ChainBlocks {
	pub fn new(chain: ChainSlug, provider: Arc<dyn ChainProvider>) -> Self {
		Self { chain, provider }
	}

	pub fn chain(&self) -> ChainSlug {
		self.chain
	}

	pub async fn head(&self) -> Result<u64, FinalityError> {
		Ok(self.provider.get_block_number().await?)
	}

	/// Block number behind a native tag; an absent tag is a provider error.
	pub async fn tagged(&self, tag: BlockTag) -> Result<u64, FinalityError> {
		self.provider
			.get_block_number_by_tag(tag)
			.await?
			.ok_or_else(|| {
				FinalityError::Provider(format!("{} returned no {} block", self.chain, tag))
			})
	}

	/// `head - confirmations`, saturating at genesis.
	pub async fn probabilistic_block_number(&self, confirmations: u64) -> Result<u64, FinalityError> {
		Ok(self.head().await?.saturating_sub(confirmations))
	}
}

/// Strategy variants the registry can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
	/// Provider's `safe` and `finalized` tags.
	Native,
	Probabilistic {
		safe_confirmations: u64,
		custom_confirmations: Option<u64>,
	},
	/// L1 checkpoint inclusion, falling back to `finalized`.
	OptimisticRollup,
	Threshold {
		safe_confirmations: u64,
		finalized_confirmations: u64,
	},
}

fn sidechain_safe_confirmations(chain: ChainSlug) -> u64 {
	match chain {
		ChainSlug::Polygon => 128,
		_ => 12,
	}
}

fn threshold(chain: ChainSlug) -> StrategyKind {
	StrategyKind::Threshold {
		safe_confirmations: chain.blocks_in(THRESHOLD_SAFE_WINDOW),
		finalized_confirmations: chain.blocks_in(THRESHOLD_FINALIZED_WINDOW),
	}
}

/// Looks up the strategy registered for `chain` under `set`.
pub fn registered_strategy(set: FinalityStrategySet, chain: ChainSlug) -> Option<StrategyKind> {
	let family = chain.family();
	match set {
		FinalityStrategySet::Default => Some(StrategyKind::Native),
		FinalityStrategySet::Bonder => Some(match family {
			ChainFamily::L1 | ChainFamily::ArbitrumRollup => StrategyKind::Native,
			ChainFamily::OptimisticRollup => StrategyKind::OptimisticRollup,
			ChainFamily::Sidechain => StrategyKind::Probabilistic {
				safe_confirmations: sidechain_safe_confirmations(chain),
				custom_confirmations: None,
			},
			ChainFamily::ZkRollup => threshold(chain),
		}),
		FinalityStrategySet::Collateralized => match family {
			ChainFamily::Sidechain => Some(StrategyKind::Probabilistic {
				safe_confirmations: sidechain_safe_confirmations(chain),
				custom_confirmations: Some(COLLATERALIZED_CONFIRMATIONS),
			}),
			ChainFamily::OptimisticRollup => Some(StrategyKind::OptimisticRollup),
			_ => None,
		},
		FinalityStrategySet::Threshold => match family {
			ChainFamily::ZkRollup => Some(threshold(chain)),
			_ => None,
		},
	}
}

impl StrategyKind {
	/// Instantiates the strategy for one chain.
	pub fn build(
		self,
		chain: ChainSlug,
		provider: Arc<dyn ChainProvider>,
		inclusion: Option<Arc<dyn InclusionService>>,
	) -> Box<dyn FinalityStrategy> {
		let blocks = ChainBlocks::new(chain, provider);
		match self {
			StrategyKind::Native => Box::new(NativeTagStrategy::new(blocks)),
			StrategyKind::Probabilistic {
				safe_confirmations,
				custom_confirmations,
			} => Box::new(ProbabilisticStrategy::new(
				blocks,
				safe_confirmations,
				custom_confirmations,
			)),
			StrategyKind::OptimisticRollup => {
				if inclusion.is_none() {
					tracing::warn!(
						chain = %chain,
						"No inclusion service configured, custom safe block will fall back to finalized"
					);
				}
				Box::new(OptimisticRollupStrategy::new(blocks, inclusion))
			},
			StrategyKind::Threshold {
				safe_confirmations,
				finalized_confirmations,
			} => Box::new(ThresholdStrategy::new(
				blocks,
				safe_confirmations,
				finalized_confirmations,
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_and_bonder_cover_every_chain() {
		for chain in ChainSlug::all() {
			assert!(registered_strategy(FinalityStrategySet::Default, chain).is_some());
			assert!(registered_strategy(FinalityStrategySet::Bonder, chain).is_some());
		}
	}

	#[test]
	fn test_restricted_sets() {
		assert_eq!(
			registered_strategy(FinalityStrategySet::Collateralized, ChainSlug::Gnosis),
			Some(StrategyKind::Probabilistic {
				safe_confirmations: 12,
				custom_confirmations: Some(6),
			})
		);
		assert_eq!(
			registered_strategy(FinalityStrategySet::Collateralized, ChainSlug::Base),
			Some(StrategyKind::OptimisticRollup)
		);
		assert_eq!(
			registered_strategy(FinalityStrategySet::Collateralized, ChainSlug::Ethereum),
			None
		);
		assert_eq!(
			registered_strategy(FinalityStrategySet::Threshold, ChainSlug::Optimism),
			None
		);
	}

	#[test]
	fn test_threshold_windows_scale_with_block_time() {
		// Linea: 2s blocks.
		assert_eq!(
			registered_strategy(FinalityStrategySet::Threshold, ChainSlug::Linea),
			Some(StrategyKind::Threshold {
				safe_confirmations: 900,
				finalized_confirmations: 3_600,
			})
		);
	}
}
