//! Long-running bonder engine.
//!
//! The engine owns one finality service and one gas-boost factory per
//! configured chain. [`BonderEngine::run`] resumes persisted transactions,
//! then keeps a finality heartbeat and storage cleanup going until shutdown.

use crate::gas_boost::GasBoostTransactionFactory;
use crate::recovery::{RecoveryReport, RecoveryService};
use bonder_config::Config;
use bonder_delivery::DeliveryService;
use bonder_finality::FinalityService;
use bonder_storage::StorageService;
use bonder_types::ChainSlug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

/// One chain's finality at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalityReport {
	pub chain: ChainSlug,
	pub head: u64,
	pub safe: u64,
	pub finalized: u64,
	/// `None` when the chain has no custom rule or it has no answer yet.
	pub custom: Option<u64>,
}

pub struct BonderEngine {
	config: Config,
	storage: Arc<StorageService>,
	delivery: Arc<DeliveryService>,
	finality: HashMap<ChainSlug, Arc<FinalityService>>,
	transactions: HashMap<ChainSlug, Arc<GasBoostTransactionFactory>>,
}

impl BonderEngine {
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		delivery: Arc<DeliveryService>,
		finality: HashMap<ChainSlug, Arc<FinalityService>>,
		transactions: HashMap<ChainSlug, Arc<GasBoostTransactionFactory>>,
	) -> Self {
		Self {
			config,
			storage,
			delivery,
			finality,
			transactions,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn delivery(&self) -> &Arc<DeliveryService> {
		&self.delivery
	}

	/// Chains with both a finality service and a transaction factory.
	pub fn chains(&self) -> Vec<ChainSlug> {
		let mut chains: Vec<ChainSlug> = self.transactions.keys().copied().collect();
		chains.sort();
		chains
	}

	pub fn finality(&self, chain: ChainSlug) -> Result<Arc<FinalityService>, EngineError> {
		self.finality
			.get(&chain)
			.cloned()
			.ok_or_else(|| EngineError::Config(format!("Chain {} is not configured", chain)))
	}

	/// The factory creating and loading transactions on `chain`.
	pub fn transactions(
		&self,
		chain: ChainSlug,
	) -> Result<Arc<GasBoostTransactionFactory>, EngineError> {
		self.transactions
			.get(&chain)
			.cloned()
			.ok_or_else(|| EngineError::Config(format!("Chain {} is not configured", chain)))
	}

	/// Resumes monitoring of every persisted non-terminal transaction.
	pub async fn recover(&self) -> Result<RecoveryReport, EngineError> {
		let recovery = RecoveryService::new(self.storage.clone(), self.transactions.clone());
		let (report, _handles) = recovery
			.recover_state()
			.await
			.map_err(|e| EngineError::Service(e.to_string()))?;
		Ok(report)
	}

	/// Queries head, safe, finalized and custom block numbers for `chain`.
	pub async fn finality_report(&self, chain: ChainSlug) -> Result<FinalityReport, EngineError> {
		let finality = self.finality(chain)?;
		let service_error = |e: bonder_finality::FinalityError| EngineError::Service(e.to_string());

		let head = finality.get_block_number().await.map_err(service_error)?;
		let safe = finality.get_safe_block_number().await.map_err(service_error)?;
		let finalized = finality
			.get_finalized_block_number()
			.await
			.map_err(service_error)?;
		let custom = if finality.is_custom_block_number_implemented() {
			finality.get_custom_block_number().await.map_err(service_error)?
		} else {
			None
		};

		Ok(FinalityReport {
			chain,
			head,
			safe,
			finalized,
			custom,
		})
	}

	async fn heartbeat(&self) {
		for chain in self.chains() {
			match self.finality_report(chain).await {
				Ok(report) => tracing::info!(
					chain = %chain,
					head = report.head,
					safe = report.safe,
					finalized = report.finalized,
					custom = ?report.custom,
					live_transactions = self
						.transactions
						.get(&chain)
						.map(|f| f.live_count())
						.unwrap_or_default(),
					"Finality heartbeat"
				),
				Err(e) => tracing::warn!(chain = %chain, error = %e, "Finality heartbeat failed"),
			}
		}
	}

	/// Runs until Ctrl+C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.run_until(async {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!(error = %e, "Failed to listen for shutdown signal");
			}
		})
		.await
	}

	/// Runs until `shutdown` resolves, then stops every transaction monitor.
	///
	/// Stopped transactions keep their persisted state and are resumed by the
	/// next run.
	pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<(), EngineError> {
		let report = self.recover().await?;
		tracing::info!(
			bonder = %self.config.bonder.id,
			chains = self.transactions.len(),
			resumed = report.resumed,
			"Bonder engine running"
		);

		let storage = self.storage.clone();
		let cleanup_every = Duration::from_secs(self.config.storage.cleanup_interval_seconds);
		let cleanup_handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(cleanup_every);
			loop {
				interval.tick().await;
				match storage.cleanup_expired().await {
					Ok(count) if count > 0 => {
						tracing::debug!("Storage cleanup: removed {} expired entries", count);
					},
					Err(e) => {
						tracing::warn!("Storage cleanup failed: {}", e);
					},
					_ => {},
				}
			}
		});

		let mut heartbeat = tokio::time::interval(self.config.finality.heartbeat_interval());
		tokio::pin!(shutdown);
		loop {
			tokio::select! {
				_ = heartbeat.tick() => self.heartbeat().await,
				_ = &mut shutdown => break,
			}
		}

		cleanup_handle.abort();
		for factory in self.transactions.values() {
			factory.stop_all().await;
		}
		tracing::info!(bonder = %self.config.bonder.id, "Bonder engine stopped");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gas_boost::testing::{options, request, Harness};
	use bonder_delivery::ChainProvider;

	const CONFIG: &str = r#"
[bonder]
id = "engine-test"

[networks.optimism]
chain_id = 10
rpc_url = "http://localhost:9545"

[storage]
primary = "memory"
[storage.implementations.memory]

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[finality]
heartbeat_interval_seconds = 1
"#;

	fn engine(h: Harness) -> BonderEngine {
		let chain = h.factory.chain();
		let provider: Arc<dyn ChainProvider> = h.provider.clone();
		BonderEngine::new(
			CONFIG.parse().unwrap(),
			h.storage.clone(),
			Arc::new(DeliveryService::new(HashMap::from([(chain, provider)]))),
			HashMap::from([(chain, h.finality.clone())]),
			HashMap::from([(chain, Arc::new(h.factory))]),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn test_finality_report() {
		let h = Harness::new(options()).await;
		h.provider.set_head(1_000);
		h.provider.set_safe(Some(990));
		h.provider.set_finalized(Some(950));
		let engine = engine(h);

		let report = engine.finality_report(ChainSlug::Optimism).await.unwrap();
		assert_eq!(
			report,
			FinalityReport {
				chain: ChainSlug::Optimism,
				head: 1_000,
				safe: 990,
				finalized: 950,
				custom: None,
			}
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_unconfigured_chain() {
		let engine = engine(Harness::new(options()).await);
		assert!(matches!(
			engine.transactions(ChainSlug::Gnosis),
			Err(EngineError::Config(_))
		));
		assert!(engine.finality_report(ChainSlug::Gnosis).await.is_err());
		assert_eq!(engine.chains(), vec![ChainSlug::Optimism]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_resumes_and_stops_monitors() {
		let h = Harness::new(options()).await;
		h.provider.set_safe(Some(90));
		h.provider.set_finalized(Some(80));
		let provider = h.provider.clone();

		// Left pending by a previous process.
		let previous = h.restarted_factory().await;
		let pending = previous.create(request(), None).await.unwrap();
		pending.stop().await;
		let hash = pending.snapshot().broadcasts[0].hash;

		let engine = engine(h);
		engine
			.run_until(tokio::time::sleep(Duration::from_millis(2_500)))
			.await
			.unwrap();

		// Resent once after resuming, nothing after shutdown.
		assert_eq!(provider.sent_hashes(), vec![hash, hash]);
		let factory = engine.transactions(ChainSlug::Optimism).unwrap();
		assert_eq!(factory.live_count(), 0);

		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(provider.sent_hashes().len(), 2);

		let reloaded = factory.load(pending.id()).await.unwrap();
		assert_eq!(reloaded.snapshot().nonce, pending.snapshot().nonce);
	}
}
