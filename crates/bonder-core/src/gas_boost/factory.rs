//! Construction and rehydration of gas-boosted transactions.

use super::transaction::{Monitor, TransactionContext};
use super::{
	fees, Clock, FeeModel, GasBoostError, GasBoostOptions, GasBoostTransaction, NonceRegistry,
};
use bonder_account::AccountService;
use bonder_delivery::ChainProvider;
use bonder_finality::FinalityService;
use bonder_storage::{StorageBatch, StorageService};
use bonder_types::{
	truncate_id, AbandonReason, Address, Broadcast, Bytes, ChainSlug, FeeParameters, StorageKey,
	TransactionRequest, TransactionSnapshot, TransactionStatus,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Services a factory binds its transactions to.
pub struct FactoryDependencies {
	pub chain: ChainSlug,
	pub account: Arc<AccountService>,
	pub provider: Arc<dyn ChainProvider>,
	pub storage: Arc<StorageService>,
	pub finality: Arc<FinalityService>,
	pub nonces: Arc<NonceRegistry>,
}

/// Id of the nonce index record for `(chain_id, signer, nonce)`.
///
/// The nonce is zero-padded so ids sort numerically.
pub fn nonce_index_id(chain_id: u64, signer: Address, nonce: u64) -> String {
	format!("{}:{}:{:020}", chain_id, signer, nonce)
}

/// Single construction point for the transactions of one `(chain, signer)`.
pub struct GasBoostTransactionFactory {
	ctx: Arc<TransactionContext>,
	live: DashMap<String, GasBoostTransaction>,
	id_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GasBoostTransactionFactory {
	pub async fn new(
		deps: FactoryDependencies,
		options: GasBoostOptions,
	) -> Result<Self, GasBoostError> {
		Self::with_clock(deps, options, Clock::new()).await
	}

	/// Like [`GasBoostTransactionFactory::new`] with an explicit clock, so
	/// factories sharing a store also share one notion of time.
	pub async fn with_clock(
		deps: FactoryDependencies,
		options: GasBoostOptions,
		clock: Clock,
	) -> Result<Self, GasBoostError> {
		let fee_bps = fees::multiplier_bps(options.fee_multiplier);
		if fee_bps <= 10_000 {
			return Err(GasBoostError::InvalidRequest(format!(
				"fee_multiplier must be greater than 1.0, got {}",
				options.fee_multiplier
			)));
		}
		let signer = deps.account.get_address().await?;
		let chain_id = deps.provider.chain_id();
		let nonces = deps.nonces.manager(chain_id, signer);

		tracing::info!(
			chain = %deps.chain,
			chain_id,
			signer = %signer,
			fee_multiplier = options.fee_multiplier,
			max_boost_count = options.max_boost_count,
			"Gas-boost factory ready"
		);

		Ok(Self {
			ctx: Arc::new(TransactionContext {
				chain: deps.chain,
				chain_id,
				signer,
				account: deps.account,
				provider: deps.provider,
				storage: deps.storage,
				finality: deps.finality,
				nonces,
				options,
				fee_bps,
				clock,
			}),
			live: DashMap::new(),
			id_locks: DashMap::new(),
		})
	}

	pub fn chain(&self) -> ChainSlug {
		self.ctx.chain
	}

	pub fn chain_id(&self) -> u64 {
		self.ctx.chain_id
	}

	pub fn signer(&self) -> Address {
		self.ctx.signer
	}

	pub fn clock(&self) -> Clock {
		self.ctx.clock
	}

	pub fn options(&self) -> &GasBoostOptions {
		&self.ctx.options
	}

	/// Number of tracked instances that are still being monitored.
	pub fn live_count(&self) -> usize {
		self.live
			.iter()
			.filter(|h| !h.is_stopped() && !h.status().is_terminal())
			.count()
	}

	/// Stops monitoring every live instance. Persisted state is untouched, so
	/// a later `load` resumes each of them.
	pub async fn stop_all(&self) {
		let handles: Vec<GasBoostTransaction> =
			self.live.iter().map(|h| h.value().clone()).collect();
		for handle in &handles {
			handle.stop().await;
		}
		self.live.clear();
		if !handles.is_empty() {
			tracing::info!(
				chain = %self.ctx.chain,
				stopped = handles.len(),
				"Stopped transaction monitors"
			);
		}
	}

	fn id_lock(&self, id: &str) -> Arc<Mutex<()>> {
		self.id_locks.entry(id.to_string()).or_default().clone()
	}

	fn live_instance(&self, id: &str) -> Option<GasBoostTransaction> {
		self.live
			.get(id)
			.filter(|h| !h.is_stopped())
			.map(|h| h.value().clone())
	}

	/// Forgets finished instances and unused id locks.
	fn prune(&self) {
		self.live
			.retain(|_, h| !h.is_stopped() && !h.status().is_terminal());
		self.id_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
	}

	/// Creates and broadcasts a transaction.
	///
	/// With an explicit `id` that is already live or persisted, returns that
	/// transaction instead; no nonce is allocated and nothing is broadcast.
	pub async fn create(
		&self,
		request: TransactionRequest,
		id: Option<String>,
	) -> Result<GasBoostTransaction, GasBoostError> {
		self.prune();
		let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
		let lock = self.id_lock(&id);
		let _guard = lock.lock().await;

		if let Some(existing) = self.attach(&id).await? {
			tracing::info!(
				tx_id = %truncate_id(&id),
				status = ?existing.status(),
				"Attached to existing transaction"
			);
			return Ok(existing);
		}

		let handle = self.create_new(id.clone(), request).await?;
		self.live.insert(id, handle.clone());
		Ok(handle)
	}

	/// Returns the live instance for `id` or rebuilds it from storage.
	pub async fn load(&self, id: &str) -> Result<GasBoostTransaction, GasBoostError> {
		let lock = self.id_lock(id);
		let _guard = lock.lock().await;
		self.attach(id)
			.await?
			.ok_or_else(|| GasBoostError::NotFound(id.to_string()))
	}

	/// Loads every non-terminal transaction of this chain and signer.
	pub async fn load_pending(&self) -> Result<Vec<GasBoostTransaction>, GasBoostError> {
		let snapshots = self
			.ctx
			.storage
			.list::<TransactionSnapshot>(StorageKey::Transactions.as_str())
			.await?;

		let mut handles = Vec::new();
		for (id, snapshot) in snapshots {
			if snapshot.is_terminal()
				|| snapshot.chain_id != self.ctx.chain_id
				|| snapshot.signer != self.ctx.signer
			{
				continue;
			}
			handles.push(self.load(&id).await?);
		}
		Ok(handles)
	}

	async fn attach(&self, id: &str) -> Result<Option<GasBoostTransaction>, GasBoostError> {
		if let Some(live) = self.live_instance(id) {
			return Ok(Some(live));
		}
		match self
			.ctx
			.storage
			.retrieve_optional::<TransactionSnapshot>(StorageKey::Transactions.as_str(), id)
			.await?
		{
			Some(snapshot) => Ok(Some(self.rehydrate(snapshot).await?)),
			None => Ok(None),
		}
	}

	async fn rehydrate(
		&self,
		snapshot: TransactionSnapshot,
	) -> Result<GasBoostTransaction, GasBoostError> {
		if snapshot.chain_id != self.ctx.chain_id || snapshot.signer != self.ctx.signer {
			return Err(GasBoostError::InvalidRequest(format!(
				"transaction {} belongs to chain {} and signer {}",
				snapshot.id, snapshot.chain_id, snapshot.signer
			)));
		}
		self.ctx.nonces.raise_floor(snapshot.nonce).await;

		tracing::info!(
			tx_id = %truncate_id(&snapshot.id),
			chain = %self.ctx.chain,
			nonce = snapshot.nonce,
			status = ?snapshot.status,
			broadcasts = snapshot.broadcasts.len(),
			"Rehydrated transaction"
		);

		let id = snapshot.id.clone();
		let handle = Monitor::resume(self.ctx.clone(), snapshot).start();
		self.live.insert(id, handle.clone());
		Ok(handle)
	}

	async fn estimate_fee(&self) -> Result<FeeParameters, GasBoostError> {
		let provider = &self.ctx.provider;
		Ok(match self.ctx.options.fee_model {
			FeeModel::Legacy => FeeParameters::Legacy {
				gas_price: provider.get_gas_price().await?,
			},
			FeeModel::Eip1559 => provider.estimate_eip1559_fees().await?,
		})
	}

	/// Id owning `nonce`, if that transaction is still in flight.
	async fn nonce_owner(&self, nonce: u64) -> Result<Option<String>, GasBoostError> {
		let storage = &self.ctx.storage;
		let Some(owner) = storage
			.retrieve_optional::<String>(
				StorageKey::NonceIndex.as_str(),
				&nonce_index_id(self.ctx.chain_id, self.ctx.signer, nonce),
			)
			.await?
		else {
			return Ok(None);
		};
		let snapshot = storage
			.retrieve_optional::<TransactionSnapshot>(StorageKey::Transactions.as_str(), &owner)
			.await?;
		Ok(snapshot.filter(|s| !s.is_terminal()).map(|_| owner))
	}

	async fn create_new(
		&self,
		id: String,
		request: TransactionRequest,
	) -> Result<GasBoostTransaction, GasBoostError> {
		let ctx = &self.ctx;
		let fee = match request.fee {
			Some(fee) => fee,
			None => self.estimate_fee().await?,
		};
		let ceiling = ctx.options.max_fee_per_gas;
		if fee.max_fee() > ceiling {
			return Err(GasBoostError::FeeCeilingExceeded {
				fee: fee.max_fee(),
				ceiling,
			});
		}
		let gas_limit = match request.gas_limit {
			Some(gas_limit) => gas_limit,
			None => ctx.provider.estimate_gas(ctx.signer, &request).await?,
		};

		let reservation = ctx.nonces.reserve().await;
		let mut nonce = reservation.next_nonce(ctx.provider.as_ref()).await?;
		while let Some(owner) = self.nonce_owner(nonce).await? {
			tracing::debug!(nonce, owner = %truncate_id(&owner), "Nonce held by a pending transaction");
			nonce += 1;
		}

		let now = ctx.clock.now_ms();
		let mut snapshot = TransactionSnapshot {
			id,
			chain_slug: ctx.chain,
			chain_id: ctx.chain_id,
			signer: ctx.signer,
			to: request.to,
			value: request.value,
			data: request.data,
			gas_limit,
			nonce,
			fee,
			boost_count: 0,
			broadcasts: Vec::new(),
			raw_transaction: Bytes::new(),
			status: TransactionStatus::Pending,
			abandon_reason: None,
			mined_tx_hash: None,
			mined_block_number: None,
			mined_success: None,
			created_at: now,
			updated_at: now,
		};

		let signed = ctx.sign(&snapshot, fee).await.map_err(|e| {
			tracing::error!(tx_id = %truncate_id(&snapshot.id), error = %e, "Signing failed");
			GasBoostError::Abandoned(AbandonReason::SigningFailed(e.to_string()))
		})?;
		snapshot.raw_transaction = signed.raw;
		snapshot.broadcasts.push(Broadcast {
			hash: signed.hash,
			fee,
			signed_at: now,
		});

		let batch = StorageBatch::new()
			.put(StorageKey::Transactions.as_str(), &snapshot.id, &snapshot)?
			.put(
				StorageKey::NonceIndex.as_str(),
				&nonce_index_id(ctx.chain_id, ctx.signer, nonce),
				&snapshot.id,
			)?;
		ctx.storage.commit(batch).await?;
		reservation.commit(nonce);

		tracing::info!(
			tx_id = %truncate_id(&snapshot.id),
			chain = %ctx.chain,
			nonce,
			max_fee = fee.max_fee(),
			tx_hash = %truncate_id(&signed.hash.to_string()),
			"Created transaction"
		);

		let tx_id = snapshot.id.clone();
		let mut monitor = Monitor::new(self.ctx.clone(), snapshot);
		if let Err(e) = monitor.send_current().await {
			tracing::warn!(
				tx_id = %truncate_id(&tx_id),
				error = %e,
				"Initial broadcast failed, retrying on next poll"
			);
		}
		Ok(monitor.start())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gas_boost::testing::{options, request, Harness, GWEI};
	use bonder_delivery::DeliveryError;
	use std::time::Duration;
	use tokio::time::Instant;

	fn legacy(gas_price: u128) -> FeeParameters {
		FeeParameters::Legacy { gas_price }
	}

	#[tokio::test(start_paused = true)]
	async fn test_create_persists_before_broadcast_returns() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();
		let snapshot = handle.snapshot();

		assert_eq!(snapshot.status, TransactionStatus::Pending);
		assert_eq!(snapshot.nonce, 0);
		assert_eq!(snapshot.broadcasts.len(), 1);
		assert_eq!(h.provider.sent_hashes(), snapshot.broadcast_hashes());

		let stored: TransactionSnapshot = h
			.storage
			.retrieve(StorageKey::Transactions.as_str(), handle.id())
			.await
			.unwrap();
		assert_eq!(stored, snapshot);
		let owner: String = h
			.storage
			.retrieve(
				StorageKey::NonceIndex.as_str(),
				&nonce_index_id(snapshot.chain_id, snapshot.signer, 0),
			)
			.await
			.unwrap();
		assert_eq!(owner, handle.id());
	}

	#[tokio::test(start_paused = true)]
	async fn test_same_id_twice_allocates_one_nonce() {
		let h = Harness::new(options()).await;
		let first = h
			.factory
			.create(request(), Some("bond-1".into()))
			.await
			.unwrap();
		let second = h
			.factory
			.create(request(), Some("bond-1".into()))
			.await
			.unwrap();

		assert_eq!(first.id(), second.id());
		assert_eq!(first.snapshot().nonce, second.snapshot().nonce);
		assert_eq!(h.provider.sent().len(), 1);

		let other = h.factory.create(request(), None).await.unwrap();
		assert_eq!(other.snapshot().nonce, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_stop_then_load_preserves_nonce_and_broadcasts() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();
		let before = handle.snapshot();
		handle.stop().await;
		assert!(matches!(
			handle.wait_until_mined().await,
			Err(GasBoostError::Stopped(_))
		));

		let restarted = h.restarted_factory().await;
		let loaded = restarted.load(handle.id()).await.unwrap();
		let after = loaded.snapshot();
		assert_eq!(after.nonce, before.nonce);
		assert_eq!(after.broadcasts, before.broadcasts);
		assert_eq!(after.fee, before.fee);

		// The persisted payload is sent again on the first poll.
		tokio::time::sleep(Duration::from_millis(1_500)).await;
		assert_eq!(h.provider.sent_hashes(), vec![before.broadcasts[0].hash; 2]);

		// The rehydrated nonce is not handed out again.
		let next = restarted.create(request(), None).await.unwrap();
		assert_eq!(next.snapshot().nonce, before.nonce + 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_geometric_boosts_then_abandoned() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();

		let err = handle.wait_until_mined().await.unwrap_err();
		assert_eq!(
			err,
			GasBoostError::Abandoned(AbandonReason::MaxBoostsExceeded { boosts: 3 })
		);

		let snapshot = handle.snapshot();
		let fees: Vec<FeeParameters> = snapshot.broadcasts.iter().map(|b| b.fee).collect();
		assert_eq!(
			fees,
			vec![
				legacy(10 * GWEI),
				legacy(12 * GWEI),
				legacy(14_400_000_000),
				legacy(17_280_000_000),
			]
		);
		assert!(fees.windows(2).all(|w| w[1].is_at_least(&w[0])));
		assert_eq!(snapshot.boost_count, 3);
		assert_eq!(h.provider.sent().len(), 4);

		let stored: TransactionSnapshot = h
			.storage
			.retrieve(StorageKey::Transactions.as_str(), handle.id())
			.await
			.unwrap();
		assert_eq!(stored.status, TransactionStatus::Abandoned);
		assert_eq!(stored, snapshot);
	}

	#[tokio::test(start_paused = true)]
	async fn test_underpriced_rebroadcasts_immediately() {
		let h = Harness::new(options()).await;
		h.provider.push_send_result(Err(DeliveryError::from_rpc_message(
			"replacement transaction underpriced",
		)));

		let handle = h.factory.create(request(), None).await.unwrap();
		let snapshot = handle.snapshot();
		assert_eq!(snapshot.boost_count, 1);
		assert_eq!(snapshot.broadcasts.len(), 2);
		assert_eq!(snapshot.fee, legacy(12 * GWEI));
		assert_eq!(h.provider.sent_hashes(), vec![snapshot.broadcasts[1].hash]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_nonce_too_low_then_mined_on_next_poll() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();
		let original = handle.snapshot().broadcasts[0].hash;

		// The boost at 10s is refused: the original already landed.
		h.provider
			.push_send_result(Err(DeliveryError::from_rpc_message("nonce too low")));
		tokio::time::sleep(Duration::from_millis(10_500)).await;
		assert_eq!(handle.snapshot().broadcasts.len(), 2);
		assert_eq!(handle.status(), TransactionStatus::Pending);

		h.provider.mine(original, 101, true);
		let started = Instant::now();
		assert_eq!(handle.wait_until_mined().await.unwrap(), original);
		assert!(started.elapsed() <= Duration::from_secs(1));
		assert_eq!(handle.mined_tx_hash(), Some(original));
		assert_eq!(h.provider.sent().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_confirmed_once_mined_block_is_safe() {
		let h = Harness::new(options()).await;
		h.provider.set_safe(Some(100));
		let handle = h.factory.create(request(), None).await.unwrap();
		let hash = handle.snapshot().broadcasts[0].hash;

		h.provider.mine(hash, 101, true);
		assert_eq!(handle.wait_until_mined().await.unwrap(), hash);
		tokio::time::sleep(Duration::from_secs(3)).await;
		assert_eq!(handle.status(), TransactionStatus::Mined);

		h.provider.set_safe(Some(101));
		assert_eq!(handle.wait_until_confirmed().await.unwrap(), hash);
		let stored: TransactionSnapshot = h
			.storage
			.retrieve(StorageKey::Transactions.as_str(), handle.id())
			.await
			.unwrap();
		assert_eq!(stored.status, TransactionStatus::Confirmed);
		assert_eq!(stored.mined_block_number, Some(101));
		assert_eq!(stored.mined_success, Some(true));
	}

	#[tokio::test(start_paused = true)]
	async fn test_reorged_receipt_returns_to_pending() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();
		let hash = handle.snapshot().broadcasts[0].hash;

		h.provider.mine(hash, 101, true);
		handle.wait_until_mined().await.unwrap();
		h.provider.unmine(&hash);

		tokio::time::sleep(Duration::from_millis(2_500)).await;
		let snapshot = handle.snapshot();
		assert_eq!(snapshot.status, TransactionStatus::Pending);
		assert_eq!(snapshot.mined_tx_hash, None);
		assert_eq!(h.provider.sent_hashes(), vec![hash, hash]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_fee_above_ceiling_rejected_before_nonce() {
		let h = Harness::new(options()).await;
		let mut too_expensive = request();
		too_expensive.fee = Some(legacy(600 * GWEI));

		let err = h.factory.create(too_expensive, None).await.unwrap_err();
		assert_eq!(
			err,
			GasBoostError::FeeCeilingExceeded {
				fee: 600 * GWEI,
				ceiling: 500 * GWEI,
			}
		);
		assert_eq!(h.provider.call_count("get_transaction_count"), 0);
		assert!(h.provider.sent().is_empty());

		let manager = h.nonces.manager(h.factory.chain_id(), h.factory.signer());
		assert_eq!(manager.local_next().await, None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_permanent_provider_error_abandons() {
		let h = Harness::new(options()).await;
		h.provider.push_send_result(Err(DeliveryError::from_rpc_message(
			"insufficient funds for gas * price + value",
		)));

		let handle = h.factory.create(request(), None).await.unwrap();
		assert_eq!(handle.status(), TransactionStatus::Abandoned);
		assert!(matches!(
			handle.wait_until_confirmed().await,
			Err(GasBoostError::Abandoned(
				AbandonReason::PermanentProviderError(_)
			))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn test_rejected_first_broadcast_frees_nonce() {
		let h = Harness::new(options()).await;
		h.provider.push_send_result(Err(DeliveryError::from_rpc_message(
			"insufficient funds for gas * price + value",
		)));

		let rejected = h.factory.create(request(), None).await.unwrap();
		assert_eq!(rejected.status(), TransactionStatus::Abandoned);
		assert_eq!(rejected.snapshot().nonce, 0);

		let next = h.factory.create(request(), None).await.unwrap();
		assert_eq!(next.status(), TransactionStatus::Pending);
		assert_eq!(next.snapshot().nonce, 0);
		assert_eq!(h.provider.sent_hashes(), next.snapshot().broadcast_hashes());

		let owner: String = h
			.storage
			.retrieve(
				StorageKey::NonceIndex.as_str(),
				&nonce_index_id(h.factory.chain_id(), h.factory.signer(), 0),
			)
			.await
			.unwrap();
		assert_eq!(owner, next.id());
	}

	#[tokio::test(start_paused = true)]
	async fn test_abandoned_after_acceptance_keeps_nonce() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();

		// The boost at 10s is refused outright.
		h.provider.push_send_result(Err(DeliveryError::from_rpc_message(
			"insufficient funds for gas * price + value",
		)));
		tokio::time::sleep(Duration::from_millis(10_500)).await;
		assert_eq!(handle.status(), TransactionStatus::Abandoned);

		// The original variant may still be mined at nonce 0.
		let next = h.factory.create(request(), None).await.unwrap();
		assert_eq!(next.snapshot().nonce, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_already_known_keeps_polling() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();

		h.provider
			.push_send_result(Err(DeliveryError::from_rpc_message("already known")));
		tokio::time::sleep(Duration::from_millis(10_500)).await;
		let snapshot = handle.snapshot();
		assert_eq!(snapshot.status, TransactionStatus::Pending);
		assert_eq!(snapshot.boost_count, 1);
		assert_eq!(snapshot.broadcasts.len(), 2);
		let boosted = snapshot.broadcasts[1].hash;

		// Not sent again on the following polls.
		tokio::time::sleep(Duration::from_secs(2)).await;
		assert_eq!(h.provider.sent().len(), 1);

		h.provider.mine(boosted, 102, true);
		assert_eq!(handle.wait_until_mined().await.unwrap(), boosted);
		assert_eq!(handle.mined_tx_hash(), Some(boosted));
	}

	#[tokio::test(start_paused = true)]
	async fn test_foreign_transaction_consuming_nonce() {
		let h = Harness::new(options()).await;
		let handle = h.factory.create(request(), None).await.unwrap();
		h.provider.set_transaction_count(h.factory.signer(), 1, 1);

		let started = Instant::now();
		let err = handle.wait_until_mined().await.unwrap_err();
		assert_eq!(
			err,
			GasBoostError::Abandoned(AbandonReason::NonceConsumedExternally { nonce: 0 })
		);
		// Three consecutive polls, before any boost is due.
		assert_eq!(started.elapsed(), Duration::from_secs(3));
		assert_eq!(handle.snapshot().boost_count, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_lifetime_elapsed_times_out() {
		let mut options = options();
		options.max_boost_count = 10;
		options.max_lifetime = Duration::from_secs(25);
		let h = Harness::new(options).await;
		let handle = h.factory.create(request(), None).await.unwrap();

		let err = handle.wait_until_mined().await.unwrap_err();
		assert_eq!(
			err,
			GasBoostError::Abandoned(AbandonReason::TimedOut { lifetime_secs: 25 })
		);
		assert_eq!(handle.snapshot().boost_count, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_ceiling_stops_boosting_until_lifetime() {
		let mut options = options();
		options.max_fee_per_gas = 11 * GWEI;
		options.max_lifetime = Duration::from_secs(45);
		let h = Harness::new(options).await;
		let handle = h.factory.create(request(), None).await.unwrap();

		let err = handle.wait_until_mined().await.unwrap_err();
		assert_eq!(
			err,
			GasBoostError::Abandoned(AbandonReason::FeeCeilingReached {
				ceiling: 11 * GWEI
			})
		);
		let snapshot = handle.snapshot();
		assert_eq!(snapshot.boost_count, 1);
		assert_eq!(snapshot.fee, legacy(11 * GWEI));
	}

	#[tokio::test(start_paused = true)]
	async fn test_estimates_fee_and_gas_when_absent() {
		let mut options = options();
		options.fee_model = FeeModel::Eip1559;
		let h = Harness::new(options).await;
		h.provider.set_gas_estimate(55_000);
		let mut bare = request();
		bare.fee = None;
		bare.gas_limit = None;

		let snapshot = h.factory.create(bare, None).await.unwrap().snapshot();
		assert_eq!(
			snapshot.fee,
			FeeParameters::Eip1559 {
				max_fee_per_gas: 10 * GWEI,
				max_priority_fee_per_gas: GWEI,
			}
		);
		assert_eq!(snapshot.gas_limit, 55_000);
	}

	#[tokio::test(start_paused = true)]
	async fn test_load_unknown_id() {
		let h = Harness::new(options()).await;
		assert_eq!(
			h.factory.load("missing").await.unwrap_err(),
			GasBoostError::NotFound("missing".into())
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_load_pending_skips_terminal() {
		let h = Harness::new(options()).await;
		let a = h.factory.create(request(), None).await.unwrap();
		let b = h.factory.create(request(), None).await.unwrap();
		a.stop().await;
		b.stop().await;

		let mut finished = a.snapshot();
		finished.id = "finished".into();
		finished.status = TransactionStatus::Confirmed;
		h.storage
			.store(StorageKey::Transactions.as_str(), &finished.id, &finished)
			.await
			.unwrap();

		let restarted = h.restarted_factory().await;
		let mut ids: Vec<String> = restarted
			.load_pending()
			.await
			.unwrap()
			.iter()
			.map(|t| t.id().to_string())
			.collect();
		ids.sort();
		let mut expected = vec![a.id().to_string(), b.id().to_string()];
		expected.sort();
		assert_eq!(ids, expected);
		assert_eq!(restarted.live_count(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_stop_all_halts_every_monitor() {
		let h = Harness::new(options()).await;
		let a = h.factory.create(request(), None).await.unwrap();
		let b = h.factory.create(request(), None).await.unwrap();
		assert_eq!(h.factory.live_count(), 2);

		h.factory.stop_all().await;
		assert!(a.is_stopped() && b.is_stopped());
		assert_eq!(h.factory.live_count(), 0);

		// No boosts happen once stopped.
		tokio::time::sleep(Duration::from_secs(30)).await;
		assert_eq!(h.provider.sent_hashes().len(), 2);
		assert_eq!(a.snapshot().boost_count, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_nonce_of_in_flight_transaction_is_skipped() {
		let h = Harness::new(options()).await;
		let first = h.factory.create(request(), None).await.unwrap();
		first.stop().await;

		// A fresh registry knows nothing; the nonce index still does.
		let other = h
			.factory_with(Arc::new(NonceRegistry::new()), h.factory.clock())
			.await;
		let second = other.create(request(), None).await.unwrap();
		assert_eq!(second.snapshot().nonce, first.snapshot().nonce + 1);
	}
}
