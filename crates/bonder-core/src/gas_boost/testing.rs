//! Shared fixtures for gas-boost tests.

use super::{
	Clock, FactoryDependencies, FeeModel, GasBoostOptions, GasBoostTransactionFactory,
	NonceRegistry,
};
use bonder_account::implementations::local::LocalWallet;
use bonder_account::AccountService;
use bonder_delivery::implementations::mock::MockChainProvider;
use bonder_finality::{FinalityOptions, FinalityService};
use bonder_storage::implementations::memory::MemoryStorage;
use bonder_storage::StorageService;
use bonder_types::{
	Address, Bytes, ChainSlug, FeeParameters, FinalityStrategySet, SecretString,
	TransactionRequest, U256,
};
use std::sync::Arc;
use std::time::Duration;

pub const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const GWEI: u128 = 1_000_000_000;
pub const CHAIN_ID: u64 = 10;

/// 1.2x every 10s, three boosts, 1s polls, legacy pricing.
pub fn options() -> GasBoostOptions {
	GasBoostOptions {
		fee_multiplier: 1.2,
		max_boost_count: 3,
		max_fee_per_gas: 500 * GWEI,
		boost_interval: Duration::from_secs(10),
		poll_interval: Duration::from_secs(1),
		max_lifetime: Duration::from_secs(3_600),
		nonce_consumed_grace_polls: 3,
		fee_model: FeeModel::Legacy,
	}
}

pub fn request() -> TransactionRequest {
	TransactionRequest {
		to: Address::repeat_byte(0x22),
		value: U256::from(1_000u64),
		data: Bytes::from_static(&[0xca, 0xfe]),
		gas_limit: Some(21_000),
		fee: Some(FeeParameters::Legacy {
			gas_price: 10 * GWEI,
		}),
	}
}

pub struct Harness {
	pub provider: Arc<MockChainProvider>,
	pub storage: Arc<StorageService>,
	pub nonces: Arc<NonceRegistry>,
	pub finality: Arc<FinalityService>,
	pub factory: GasBoostTransactionFactory,
}

impl Harness {
	pub async fn new(options: GasBoostOptions) -> Self {
		let provider = Arc::new(MockChainProvider::new(CHAIN_ID));
		provider.set_head(100);
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let nonces = Arc::new(NonceRegistry::new());
		let finality = Arc::new(
			FinalityService::new(
				provider.clone(),
				ChainSlug::Optimism,
				FinalityStrategySet::Default,
				None,
				FinalityOptions::default(),
			)
			.unwrap(),
		);
		let factory = GasBoostTransactionFactory::new(
			deps(&provider, &storage, &nonces, &finality),
			options,
		)
		.await
		.unwrap();
		Self {
			provider,
			storage,
			nonces,
			finality,
			factory,
		}
	}

	/// A second factory over the same chain and store, as after a restart.
	pub async fn restarted_factory(&self) -> GasBoostTransactionFactory {
		self.factory_with(Arc::new(NonceRegistry::new()), self.factory.clock())
			.await
	}

	pub async fn factory_with(
		&self,
		nonces: Arc<NonceRegistry>,
		clock: Clock,
	) -> GasBoostTransactionFactory {
		GasBoostTransactionFactory::with_clock(
			deps(&self.provider, &self.storage, &nonces, &self.finality),
			self.factory.options().clone(),
			clock,
		)
		.await
		.unwrap()
	}
}

pub fn deps(
	provider: &Arc<MockChainProvider>,
	storage: &Arc<StorageService>,
	nonces: &Arc<NonceRegistry>,
	finality: &Arc<FinalityService>,
) -> FactoryDependencies {
	FactoryDependencies {
		chain: ChainSlug::Optimism,
		account: Arc::new(AccountService::new(Box::new(
			LocalWallet::new(&SecretString::from(ANVIL_KEY)).unwrap(),
		))),
		provider: provider.clone(),
		storage: storage.clone(),
		finality: finality.clone(),
		nonces: nonces.clone(),
	}
}
