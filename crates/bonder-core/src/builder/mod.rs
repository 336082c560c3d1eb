//! Builder for constructing a bonder engine from configuration.
//!
//! Storage, account and chain provider implementations are created by name
//! through factory functions, so the binary decides which implementations
//! exist and the configuration decides which are used.

use crate::engine::BonderEngine;
use crate::gas_boost::{
	FactoryDependencies, GasBoostOptions, GasBoostTransactionFactory, NonceRegistry,
};
use bonder_account::{AccountError, AccountInterface, AccountService};
use bonder_config::{Config, InclusionConfig};
use bonder_delivery::{ChainProvider, DeliveryError, DeliveryService};
use bonder_finality::inclusion::{OutputOracleConfig, OutputOracleInclusion};
use bonder_finality::{FinalityOptions, FinalityService, InclusionService};
use bonder_storage::{StorageError, StorageInterface, StorageService};
use bonder_types::ChainSlug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by implementation name.
pub struct BonderFactories<SF, AF, DF> {
	pub storage_factories: HashMap<String, SF>,
	pub account_factories: HashMap<String, AF>,
	/// Chain provider factories, selected by `networks.<chain>.implementation`.
	pub delivery_factories: HashMap<String, DF>,
}

pub struct BonderBuilder {
	config: Config,
}

impl BonderBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub async fn build<SF, AF, DF>(
		self,
		factories: BonderFactories<SF, AF, DF>,
	) -> Result<BonderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
		DF: Fn(&toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError>,
	{
		let storage = Arc::new(self.build_storage(&factories.storage_factories)?);
		let account = Arc::new(self.build_account(&factories.account_factories)?);

		let bonder_address = account.get_address().await.map_err(|e| {
			tracing::error!(component = "account", error = %e, "Failed to get bonder address");
			BuilderError::Config(format!("Failed to get bonder address: {}", e))
		})?;
		tracing::info!(component = "account", address = %bonder_address, "Bonder address");

		let delivery = Arc::new(self.build_delivery(&factories.delivery_factories)?);

		let finality_options = FinalityOptions {
			rpc_timeout: self.config.finality.rpc_timeout(),
			cache_ttl: self.config.finality.cache_ttl(),
		};
		let nonces = Arc::new(NonceRegistry::new());
		let mut finality_services = HashMap::new();
		let mut transaction_factories = HashMap::new();

		let mut chains: Vec<ChainSlug> = self.config.networks.keys().copied().collect();
		chains.sort();
		for chain in chains {
			let provider = delivery
				.provider(chain)
				.map_err(|e| BuilderError::MissingComponent(e.to_string()))?;

			let inclusion = match self.config.finality.inclusion.get(&chain) {
				Some(inclusion) => Some(self.build_inclusion(chain, inclusion, &delivery)?),
				None => None,
			};

			let finality = FinalityService::new(
				provider.clone(),
				chain,
				self.config.finality.strategy_set,
				inclusion,
				finality_options,
			)
			.map_err(|e| {
				tracing::error!(component = "finality", chain = %chain, error = %e, "No finality strategy");
				BuilderError::Config(e.to_string())
			})?;
			let finality = Arc::new(finality);

			let factory = GasBoostTransactionFactory::new(
				FactoryDependencies {
					chain,
					account: account.clone(),
					provider,
					storage: storage.clone(),
					finality: finality.clone(),
					nonces: nonces.clone(),
				},
				self.gas_boost_options(chain),
			)
			.await
			.map_err(|e| {
				BuilderError::Config(format!("Failed to create gas-boost factory for {}: {}", chain, e))
			})?;

			finality_services.insert(chain, finality);
			transaction_factories.insert(chain, Arc::new(factory));
		}

		Ok(BonderEngine::new(
			self.config,
			storage,
			delivery,
			finality_services,
			transaction_factories,
		))
	}

	fn build_storage<SF>(&self, factories: &HashMap<String, SF>) -> Result<StorageService, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let primary = &self.config.storage.primary;
		let config = self.config.storage.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Primary storage '{}' is not configured", primary))
		})?;
		let factory = factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("Unknown storage implementation '{}'", primary))
		})?;

		match factory(config) {
			Ok(implementation) => {
				tracing::info!(component = "storage", implementation = %primary, "Loaded");
				Ok(StorageService::new(implementation))
			},
			Err(e) => {
				tracing::error!(
					component = "storage",
					implementation = %primary,
					error = %e,
					"Failed to create storage implementation"
				);
				Err(BuilderError::Config(format!(
					"Failed to create storage implementation '{}': {}",
					primary, e
				)))
			},
		}
	}

	fn build_account<AF>(&self, factories: &HashMap<String, AF>) -> Result<AccountService, BuilderError>
	where
		AF: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>,
	{
		let primary = &self.config.account.primary;
		let config = self.config.account.implementations.get(primary).ok_or_else(|| {
			BuilderError::Config(format!("Primary account '{}' is not configured", primary))
		})?;
		let factory = factories.get(primary).ok_or_else(|| {
			BuilderError::MissingComponent(format!("Unknown account implementation '{}'", primary))
		})?;

		match factory(config) {
			Ok(implementation) => {
				tracing::info!(component = "account", implementation = %primary, "Loaded");
				Ok(AccountService::new(implementation))
			},
			Err(e) => {
				tracing::error!(
					component = "account",
					implementation = %primary,
					error = %e,
					"Failed to create account implementation"
				);
				Err(BuilderError::Config(format!(
					"Failed to create account implementation '{}': {}",
					primary, e
				)))
			},
		}
	}

	fn build_delivery<DF>(&self, factories: &HashMap<String, DF>) -> Result<DeliveryService, BuilderError>
	where
		DF: Fn(&toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError>,
	{
		let mut providers: HashMap<ChainSlug, Arc<dyn ChainProvider>> = HashMap::new();
		for (chain, network) in &self.config.networks {
			let factory = factories.get(&network.implementation).ok_or_else(|| {
				BuilderError::MissingComponent(format!(
					"Unknown provider implementation '{}' for {}",
					network.implementation, chain
				))
			})?;

			match factory(&network.to_provider_config()) {
				Ok(provider) => {
					if provider.chain_id() != network.chain_id {
						return Err(BuilderError::Config(format!(
							"Provider for {} reports chain id {}, expected {}",
							chain,
							provider.chain_id(),
							network.chain_id
						)));
					}
					tracing::info!(
						component = "delivery",
						implementation = %network.implementation,
						chain = %chain,
						chain_id = network.chain_id,
						"Loaded"
					);
					providers.insert(*chain, provider.into());
				},
				Err(e) => {
					tracing::error!(
						component = "delivery",
						implementation = %network.implementation,
						chain = %chain,
						error = %e,
						"Failed to create provider"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create provider for {}: {}",
						chain, e
					)));
				},
			}
		}
		Ok(DeliveryService::new(providers))
	}

	fn build_inclusion(
		&self,
		chain: ChainSlug,
		config: &InclusionConfig,
		delivery: &DeliveryService,
	) -> Result<Arc<dyn InclusionService>, BuilderError> {
		let l1_provider = delivery
			.provider(config.l1_chain)
			.map_err(|e| BuilderError::MissingComponent(e.to_string()))?;
		let oracle = OutputOracleConfig {
			oracle_address: config.oracle_address,
			scan_window_blocks: config.scan_window_blocks,
			max_lookback_blocks: config.max_lookback_blocks,
			cache_ttl: Duration::from_secs(config.cache_ttl_seconds),
		};
		tracing::info!(
			component = "inclusion",
			chain = %chain,
			l1_chain = %config.l1_chain,
			oracle = %config.oracle_address,
			"Loaded"
		);
		Ok(Arc::new(OutputOracleInclusion::new(chain, l1_provider, oracle)))
	}

	fn gas_boost_options(&self, chain: ChainSlug) -> GasBoostOptions {
		let gas_boost = &self.config.gas_boost;
		GasBoostOptions {
			fee_multiplier: gas_boost.fee_multiplier,
			max_boost_count: gas_boost.max_boost_count,
			max_fee_per_gas: gas_boost.max_fee_per_gas_wei(),
			boost_interval: gas_boost.boost_interval(),
			poll_interval: gas_boost.poll_interval(),
			max_lifetime: gas_boost.max_lifetime(),
			nonce_consumed_grace_polls: gas_boost.nonce_consumed_grace_polls,
			fee_model: self
				.config
				.network(chain)
				.map(|n| n.fee_model)
				.unwrap_or_default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bonder_account::implementations::local::create_account;
	use bonder_delivery::implementations::mock::MockChainProvider;
	use bonder_storage::implementations::memory::create_storage;
	use bonder_types::FeeModel;

	fn mock_provider(config: &toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError> {
		let chain_id = config
			.get("chain_id")
			.and_then(|v| v.as_integer())
			.ok_or_else(|| DeliveryError::Network("chain_id missing".into()))?;
		Ok(Box::new(MockChainProvider::new(chain_id as u64)))
	}

	type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;
	type AccountFactory = fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError>;
	type ProviderFactory = fn(&toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError>;

	fn factories() -> BonderFactories<StorageFactory, AccountFactory, ProviderFactory> {
		BonderFactories {
			storage_factories: HashMap::from([("memory".to_string(), create_storage as StorageFactory)]),
			account_factories: HashMap::from([("local".to_string(), create_account as AccountFactory)]),
			delivery_factories: HashMap::from([(
				"evm_alloy".to_string(),
				mock_provider as ProviderFactory,
			)]),
		}
	}

	const BASE: &str = r#"
[bonder]
id = "builder-test"

[networks.ethereum]
chain_id = 1
rpc_url = "http://localhost:8545"

[networks.optimism]
chain_id = 10
rpc_url = "http://localhost:9545"
fee_model = "legacy"

[storage]
primary = "memory"
[storage.implementations.memory]

[account]
primary = "local"
[account.implementations.local]
private_key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"

[gas_boost]
fee_multiplier = 1.25
max_boost_count = 4
"#;

	#[tokio::test]
	async fn test_builds_one_factory_per_chain() {
		let engine = BonderBuilder::new(BASE.parse().unwrap())
			.build(factories())
			.await
			.unwrap();

		assert_eq!(engine.chains(), vec![ChainSlug::Ethereum, ChainSlug::Optimism]);

		let optimism = engine.transactions(ChainSlug::Optimism).unwrap();
		assert_eq!(optimism.chain_id(), 10);
		assert_eq!(optimism.options().fee_model, FeeModel::Legacy);
		assert_eq!(optimism.options().fee_multiplier, 1.25);
		assert_eq!(optimism.options().max_boost_count, 4);

		let ethereum = engine.transactions(ChainSlug::Ethereum).unwrap();
		assert_eq!(ethereum.options().fee_model, FeeModel::Eip1559);
		// Both chains share the configured signer.
		assert_eq!(ethereum.signer(), optimism.signer());

		let finality = engine.finality(ChainSlug::Optimism).unwrap();
		assert_eq!(finality.chain(), ChainSlug::Optimism);
		assert!(!finality.is_custom_block_number_implemented());
	}

	#[tokio::test]
	async fn test_bonder_set_with_inclusion() {
		let input = format!(
			r#"{}
[finality]
strategy_set = "bonder"

[finality.inclusion.optimism]
oracle_address = "0xdfe97868233d1aa22e815a266982f2cf17685a27"
"#,
			BASE
		);
		let engine = BonderBuilder::new(input.parse().unwrap())
			.build(factories())
			.await
			.unwrap();

		let optimism = engine.finality(ChainSlug::Optimism).unwrap();
		assert!(optimism.is_custom_block_number_implemented());
		assert!(!engine
			.finality(ChainSlug::Ethereum)
			.unwrap()
			.is_custom_block_number_implemented());
	}

	#[tokio::test]
	async fn test_missing_strategy_fails_fast() {
		// The threshold set only covers zk rollups.
		let input = format!("{}\n[finality]\nstrategy_set = \"threshold\"\n", BASE);
		let result = BonderBuilder::new(input.parse().unwrap())
			.build(factories())
			.await;
		assert!(matches!(result, Err(BuilderError::Config(msg)) if msg.contains("strategy")));
	}

	#[tokio::test]
	async fn test_unknown_provider_implementation() {
		let input = BASE.replacen(
			"chain_id = 10\n",
			"chain_id = 10\nimplementation = \"websocket\"\n",
			1,
		);
		let result = BonderBuilder::new(input.parse().unwrap())
			.build(factories())
			.await;
		assert!(matches!(
			result,
			Err(BuilderError::MissingComponent(msg)) if msg.contains("websocket")
		));
	}

	#[tokio::test]
	async fn test_unknown_storage_implementation() {
		let input = BASE.replace(
			"primary = \"memory\"\n[storage.implementations.memory]",
			"primary = \"redis\"\n[storage.implementations.redis]",
		);
		let result = BonderBuilder::new(input.parse().unwrap())
			.build(factories())
			.await;
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}
}
