//! Finality tracking for the bonder.
//!
//! [`FinalityService`] answers "which block on this chain may be treated as
//! irreversible" through one strategy per chain, chosen from a
//! [`FinalityStrategySet`]. Queries are bounded by an RPC timeout, cached for a
//! short TTL, and checked for regressions before being returned.

use bonder_delivery::{ChainProvider, DeliveryError};
use bonder_types::{ChainSlug, FinalityKind, FinalityQueryResult, FinalityStrategySet};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod cache;
pub mod inclusion;
pub mod strategies;

pub use cache::TtlCache;
pub use inclusion::InclusionService;
pub use strategies::{registered_strategy, FinalityStrategy, StrategyKind};

/// Errors that can occur during finality queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinalityError {
	/// No strategy is registered for the requested chain and set.
	#[error("No strategy: {0}")]
	NoStrategy(String),
	/// The strategy has no custom rule.
	#[error("Unsupported: {0}")]
	Unsupported(String),
	/// The query did not finish within the RPC timeout. Retryable.
	#[error("Timeout: {0}")]
	Timeout(String),
	/// A safety-relevant number went backwards.
	#[error("{kind} block regressed from {previous} to {current}")]
	Regression {
		kind: FinalityKind,
		previous: u64,
		current: u64,
	},
	#[error("Provider error: {0}")]
	Provider(String),
}

impl From<DeliveryError> for FinalityError {
	fn from(e: DeliveryError) -> Self {
		match e {
			DeliveryError::Timeout(msg) => FinalityError::Timeout(msg),
			other => FinalityError::Provider(other.to_string()),
		}
	}
}

/// Tunables for [`FinalityService`].
#[derive(Debug, Clone, Copy)]
pub struct FinalityOptions {
	pub rpc_timeout: Duration,
	pub cache_ttl: Duration,
}

impl Default for FinalityOptions {
	fn default() -> Self {
		Self {
			rpc_timeout: Duration::from_secs(10),
			cache_ttl: Duration::from_secs(2),
		}
	}
}

/// Uniform finality queries for one chain.
pub struct FinalityService {
	chain: ChainSlug,
	strategy_set: FinalityStrategySet,
	strategy: Box<dyn FinalityStrategy>,
	options: FinalityOptions,
	cache: TtlCache<(ChainSlug, FinalityKind), Option<u64>>,
	/// Highest value returned per kind.
	highest: DashMap<FinalityKind, u64>,
}

impl FinalityService {
	/// Resolves the strategy registered for `(strategy_set, chain)`.
	///
	/// Fails with [`FinalityError::NoStrategy`] if none is registered.
	pub fn new(
		provider: Arc<dyn ChainProvider>,
		chain: ChainSlug,
		strategy_set: FinalityStrategySet,
		inclusion: Option<Arc<dyn InclusionService>>,
		options: FinalityOptions,
	) -> Result<Self, FinalityError> {
		let kind = registered_strategy(strategy_set, chain).ok_or_else(|| {
			FinalityError::NoStrategy(format!(
				"no {} strategy registered for {}",
				strategy_set, chain
			))
		})?;
		let strategy = kind.build(chain, provider, inclusion);
		tracing::info!(
			chain = %chain,
			strategy_set = %strategy_set,
			strategy = strategy.name(),
			"Resolved finality strategy"
		);
		Ok(Self::with_strategy(chain, strategy_set, strategy, options))
	}

	/// Wraps an already built strategy.
	pub fn with_strategy(
		chain: ChainSlug,
		strategy_set: FinalityStrategySet,
		strategy: Box<dyn FinalityStrategy>,
		options: FinalityOptions,
	) -> Self {
		Self {
			chain,
			strategy_set,
			strategy,
			cache: TtlCache::new(options.cache_ttl),
			options,
			highest: DashMap::new(),
		}
	}

	pub fn chain(&self) -> ChainSlug {
		self.chain
	}

	pub fn strategy_set(&self) -> FinalityStrategySet {
		self.strategy_set
	}

	pub fn strategy_name(&self) -> &'static str {
		self.strategy.name()
	}

	async fn bounded<T, F>(&self, kind: FinalityKind, query: F) -> Result<T, FinalityError>
	where
		F: Future<Output = Result<T, FinalityError>>,
	{
		tokio::time::timeout(self.options.rpc_timeout, query)
			.await
			.map_err(|_| {
				FinalityError::Timeout(format!(
					"{} {} query exceeded {:?}",
					self.chain, kind, self.options.rpc_timeout
				))
			})?
	}

	/// Compares `current` with the highest value returned so far.
	fn check_monotonic(&self, kind: FinalityKind, current: u64) -> Result<u64, FinalityError> {
		let mut highest = self.highest.entry(kind).or_insert(current);
		let previous = *highest;
		if current >= previous {
			*highest = current;
			return Ok(current);
		}
		match kind {
			FinalityKind::Head => {
				tracing::warn!(
					chain = %self.chain,
					previous,
					current,
					"Chain head moved backwards"
				);
				Ok(current)
			},
			_ => {
				tracing::error!(
					chain = %self.chain,
					kind = %kind,
					previous,
					current,
					"Finality regression beyond the assumed reorg depth"
				);
				Err(FinalityError::Regression {
					kind,
					previous,
					current,
				})
			},
		}
	}

	/// Runs one query through the timeout, the cache and the regression check.
	///
	/// `Ok(None)` only for a custom rule without an answer.
	pub async fn query(&self, kind: FinalityKind) -> Result<Option<FinalityQueryResult>, FinalityError> {
		if kind == FinalityKind::CustomSafe && !self.strategy.is_custom_block_number_implemented() {
			return Err(FinalityError::Unsupported(format!(
				"{} strategy for {} has no custom block number",
				self.strategy.name(),
				self.chain
			)));
		}

		let value = self
			.cache
			.get_or_try_insert_with((self.chain, kind), || {
				self.bounded(kind, async {
					match kind {
						FinalityKind::Head => self.strategy.get_block_number().await.map(Some),
						FinalityKind::Safe => self.strategy.get_safe_block_number().await.map(Some),
						FinalityKind::Finalized => {
							self.strategy.get_finalized_block_number().await.map(Some)
						},
						FinalityKind::CustomSafe => self.strategy.get_custom_block_number().await,
					}
				})
			})
			.await?;

		match value {
			Some(block_number) => Ok(Some(FinalityQueryResult {
				block_number: self.check_monotonic(kind, block_number)?,
				kind,
			})),
			None => Ok(None),
		}
	}

	async fn required(&self, kind: FinalityKind) -> Result<u64, FinalityError> {
		self.query(kind)
			.await?
			.map(|result| result.block_number)
			.ok_or_else(|| FinalityError::Provider(format!("{} has no {} block", self.chain, kind)))
	}

	pub async fn get_block_number(&self) -> Result<u64, FinalityError> {
		self.required(FinalityKind::Head).await
	}

	pub async fn get_safe_block_number(&self) -> Result<u64, FinalityError> {
		self.required(FinalityKind::Safe).await
	}

	pub async fn get_finalized_block_number(&self) -> Result<u64, FinalityError> {
		self.required(FinalityKind::Finalized).await
	}

	pub fn is_custom_block_number_implemented(&self) -> bool {
		self.strategy.is_custom_block_number_implemented()
	}

	/// Fails with [`FinalityError::Unsupported`] when the strategy has no
	/// custom rule; `Ok(None)` when it has one without an answer.
	pub async fn get_custom_block_number(&self) -> Result<Option<u64>, FinalityError> {
		Ok(self
			.query(FinalityKind::CustomSafe)
			.await?
			.map(|result| result.block_number))
	}

	/// True when `block_number` is at or below the chain's safe block.
	pub async fn is_block_safe(&self, block_number: u64) -> Result<bool, FinalityError> {
		Ok(block_number <= self.get_safe_block_number().await?)
	}
}
