//! Main entry point for the bonder service.
//!
//! Loads configuration, builds one finality service and one gas-boost
//! transaction factory per configured chain, resumes transactions left pending
//! by a previous run and keeps a finality heartbeat until interrupted.

use bonder_config::Config;
use bonder_core::{BonderBuilder, BonderEngine, BonderFactories};
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

/// Command-line arguments for the bonder service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started bonder");

	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Config path is not valid UTF-8: {}", args.config.display()))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.bonder.id);

	let engine = build_engine(config).await?;
	engine.run().await?;

	tracing::info!("Stopped bonder");
	Ok(())
}

/// Collects a crate's registered implementations into a name-keyed map.
fn factory_map<F>(implementations: Vec<(&'static str, F)>) -> HashMap<String, F> {
	implementations
		.into_iter()
		.map(|(name, factory)| (name.to_string(), factory))
		.collect()
}

/// Builds the engine with every registered storage, account and provider
/// implementation available by name.
async fn build_engine(config: Config) -> Result<BonderEngine, Box<dyn std::error::Error>> {
	let factories = BonderFactories {
		storage_factories: factory_map(bonder_storage::get_all_implementations()),
		account_factories: factory_map(bonder_account::get_all_implementations()),
		delivery_factories: factory_map(bonder_delivery::get_all_implementations()),
	};

	Ok(BonderBuilder::new(config).build(factories).await?)
}
