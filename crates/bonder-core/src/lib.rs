//! Transaction delivery core for the bonder node.
//!
//! This crate ties the lower-level crates together: the gas-boost transaction
//! lifecycle, restart recovery, the builder that composes every service from
//! configuration and the engine that runs them.

pub mod builder;
pub mod engine;
pub mod gas_boost;
pub mod recovery;

pub use builder::{BonderBuilder, BonderFactories, BuilderError};
pub use engine::{BonderEngine, EngineError, FinalityReport};
pub use gas_boost::{
	Clock, FactoryDependencies, FeeModel, GasBoostError, GasBoostOptions, GasBoostTransaction,
	GasBoostTransactionFactory, NonceManager, NonceRegistry,
};
pub use recovery::{RecoveryError, RecoveryReport, RecoveryService};
