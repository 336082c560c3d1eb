//! Configuration for the bonder node.
//!
//! Configuration is loaded from TOML. String values may reference environment
//! variables with `${VAR}` or `${VAR:-default}`, which keeps private keys and
//! RPC credentials out of the file itself.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["networks.toml", "secrets.toml"]` to include other files
//! - Each top-level section must be unique across all files

mod loader;

use bonder_types::{Address, ChainFamily, ChainSlug, FeeModel, FinalityStrategySet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const GWEI: u128 = 1_000_000_000;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// The full error repeats the whole input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level bonder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this bonder instance.
	pub bonder: BonderConfig,
	/// RPC endpoints per chain. Every chain the node sends to or tracks
	/// finality for must be listed.
	pub networks: HashMap<ChainSlug, NetworkConfig>,
	/// Durable store selection.
	pub storage: StorageConfig,
	/// Signer selection.
	pub account: AccountConfig,
	#[serde(default)]
	pub gas_boost: GasBoostConfig,
	#[serde(default)]
	pub finality: FinalityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BonderConfig {
	/// Unique identifier for this bonder, used in logs.
	pub id: String,
}

/// One chain's RPC endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
	/// Provider implementation name.
	#[serde(default = "default_network_implementation")]
	pub implementation: String,
	pub chain_id: u64,
	pub rpc_url: String,
	/// Transaction type used when a request carries no fee.
	#[serde(default)]
	pub fee_model: FeeModel,
}

fn default_network_implementation() -> String {
	"evm_alloy".to_string()
}

impl NetworkConfig {
	/// Renders this entry as the raw table a provider factory consumes.
	pub fn to_provider_config(&self) -> toml::Value {
		let mut table = toml::map::Map::new();
		table.insert(
			"chain_id".to_string(),
			toml::Value::Integer(self.chain_id as i64),
		);
		table.insert(
			"rpc_url".to_string(),
			toml::Value::String(self.rpc_url.clone()),
		);
		let fee_model = match self.fee_model {
			FeeModel::Legacy => "legacy",
			FeeModel::Eip1559 => "eip1559",
		};
		table.insert(
			"fee_model".to_string(),
			toml::Value::String(fee_model.to_string()),
		);
		toml::Value::Table(table)
	}
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds between sweeps of expired entries.
	#[serde(default = "default_cleanup_interval_seconds")]
	pub cleanup_interval_seconds: u64,
}

fn default_cleanup_interval_seconds() -> u64 {
	3600
}

/// Configuration for the signer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of account implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Fee escalation policy shared by every managed transaction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GasBoostConfig {
	pub fee_multiplier: f64,
	pub max_boost_count: u32,
	/// Absolute fee ceiling in gwei.
	pub max_fee_per_gas_gwei: u64,
	pub boost_interval_seconds: u64,
	pub poll_interval_seconds: u64,
	pub max_lifetime_minutes: u64,
	pub nonce_consumed_grace_polls: u32,
}

impl Default for GasBoostConfig {
	fn default() -> Self {
		Self {
			fee_multiplier: 1.2,
			max_boost_count: 5,
			max_fee_per_gas_gwei: 500,
			boost_interval_seconds: 60,
			poll_interval_seconds: 5,
			max_lifetime_minutes: 60,
			nonce_consumed_grace_polls: 3,
		}
	}
}

impl GasBoostConfig {
	pub fn max_fee_per_gas_wei(&self) -> u128 {
		self.max_fee_per_gas_gwei as u128 * GWEI
	}

	pub fn boost_interval(&self) -> Duration {
		Duration::from_secs(self.boost_interval_seconds)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_seconds)
	}

	pub fn max_lifetime(&self) -> Duration {
		Duration::from_secs(self.max_lifetime_minutes * 60)
	}
}

/// Finality strategy selection and query tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FinalityConfig {
	pub strategy_set: FinalityStrategySet,
	/// Upper bound on a single finality query.
	pub rpc_timeout_seconds: u64,
	pub cache_ttl_seconds: u64,
	/// How often the service logs finality for every chain.
	pub heartbeat_interval_seconds: u64,
	/// L1 checkpoint correlation for optimistic rollups.
	pub inclusion: HashMap<ChainSlug, InclusionConfig>,
}

impl Default for FinalityConfig {
	fn default() -> Self {
		Self {
			strategy_set: FinalityStrategySet::default(),
			rpc_timeout_seconds: 10,
			cache_ttl_seconds: 2,
			heartbeat_interval_seconds: 60,
			inclusion: HashMap::new(),
		}
	}
}

impl FinalityConfig {
	pub fn rpc_timeout(&self) -> Duration {
		Duration::from_secs(self.rpc_timeout_seconds)
	}

	pub fn cache_ttl(&self) -> Duration {
		Duration::from_secs(self.cache_ttl_seconds)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_secs(self.heartbeat_interval_seconds)
	}
}

/// Where a rollup's checkpoints are posted on L1.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InclusionConfig {
	/// The L1 the checkpoints are posted to.
	#[serde(default = "default_l1_chain")]
	pub l1_chain: ChainSlug,
	/// Output oracle contract on `l1_chain`.
	pub oracle_address: Address,
	#[serde(default = "default_scan_window_blocks")]
	pub scan_window_blocks: u64,
	#[serde(default = "default_max_lookback_blocks")]
	pub max_lookback_blocks: u64,
	#[serde(default = "default_inclusion_cache_ttl_seconds")]
	pub cache_ttl_seconds: u64,
}

fn default_l1_chain() -> ChainSlug {
	ChainSlug::Ethereum
}

fn default_scan_window_blocks() -> u64 {
	1_000
}

fn default_max_lookback_blocks() -> u64 {
	10_000
}

fn default_inclusion_cache_ttl_seconds() -> u64 {
	300
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last_end = 0;

	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let var_name = var_name.as_str();

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				},
			},
		};

		result.push_str(&input[last_end..full_match.start()]);
		result.push_str(&value);
		last_end = full_match.end();
	}
	result.push_str(&input[last_end..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Network entry for `chain`, if configured.
	pub fn network(&self, chain: ChainSlug) -> Option<&NetworkConfig> {
		self.networks.get(&chain)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.bonder.id.is_empty() {
			return Err(ConfigError::Validation("Bonder ID cannot be empty".into()));
		}

		if self.networks.is_empty() {
			return Err(ConfigError::Validation(
				"Networks configuration cannot be empty".into(),
			));
		}
		for (chain, network) in &self.networks {
			if network.chain_id == 0 {
				return Err(ConfigError::Validation(format!(
					"Network {} must have a non-zero chain_id",
					chain
				)));
			}
			if network.rpc_url.is_empty() {
				return Err(ConfigError::Validation(format!(
					"Network {} must have rpc_url",
					chain
				)));
			}
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0
			|| self.storage.cleanup_interval_seconds > 86400
		{
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be between 1 and 86400".into(),
			));
		}

		if !self
			.account
			.implementations
			.contains_key(&self.account.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary account '{}' not found in implementations",
				self.account.primary
			)));
		}

		self.validate_gas_boost()?;
		self.validate_finality()
	}

	fn validate_gas_boost(&self) -> Result<(), ConfigError> {
		let gas_boost = &self.gas_boost;
		if !(gas_boost.fee_multiplier > 1.0 && gas_boost.fee_multiplier <= 3.0) {
			return Err(ConfigError::Validation(format!(
				"gas_boost.fee_multiplier must be in (1.0, 3.0], got {}",
				gas_boost.fee_multiplier
			)));
		}
		if gas_boost.max_boost_count == 0 {
			return Err(ConfigError::Validation(
				"gas_boost.max_boost_count must be at least 1".into(),
			));
		}
		if gas_boost.max_fee_per_gas_gwei == 0 {
			return Err(ConfigError::Validation(
				"gas_boost.max_fee_per_gas_gwei must be greater than 0".into(),
			));
		}
		if gas_boost.boost_interval_seconds == 0
			|| gas_boost.poll_interval_seconds == 0
			|| gas_boost.max_lifetime_minutes == 0
		{
			return Err(ConfigError::Validation(
				"gas_boost intervals must be greater than 0".into(),
			));
		}
		if gas_boost.poll_interval_seconds > gas_boost.boost_interval_seconds {
			return Err(ConfigError::Validation(
				"gas_boost.poll_interval_seconds cannot exceed boost_interval_seconds".into(),
			));
		}
		Ok(())
	}

	fn validate_finality(&self) -> Result<(), ConfigError> {
		let finality = &self.finality;
		if finality.rpc_timeout_seconds == 0 || finality.heartbeat_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"finality rpc_timeout_seconds and heartbeat_interval_seconds must be greater than 0"
					.into(),
			));
		}

		for (chain, inclusion) in &finality.inclusion {
			if chain.family() != ChainFamily::OptimisticRollup {
				return Err(ConfigError::Validation(format!(
					"Inclusion is only supported for optimistic rollups, not {}",
					chain
				)));
			}
			if !self.networks.contains_key(chain) {
				return Err(ConfigError::Validation(format!(
					"Inclusion configured for {} but the network is not configured",
					chain
				)));
			}
			if !self.networks.contains_key(&inclusion.l1_chain) {
				return Err(ConfigError::Validation(format!(
					"Inclusion for {} reads from {} which is not configured",
					chain, inclusion.l1_chain
				)));
			}
			if inclusion.scan_window_blocks == 0 {
				return Err(ConfigError::Validation(format!(
					"Inclusion scan_window_blocks for {} must be greater than 0",
					chain
				)));
			}
		}
		Ok(())
	}
}

/// Parses a configuration from a TOML string, resolving environment
/// variables first and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
