//! The live side of a gas-boosted transaction.
//!
//! One monitoring task per transaction owns the snapshot and is its only
//! writer. Handles observe it through a watch channel.

use super::{fees, Clock, GasBoostError, GasBoostOptions, NonceManager};
use bonder_account::{AccountError, AccountService, SignedTransaction, UnsignedTransaction};
use bonder_delivery::{ChainProvider, DeliveryError};
use bonder_finality::FinalityService;
use bonder_storage::StorageService;
use bonder_types::{
	truncate_id, AbandonReason, Address, BlockTag, Broadcast, ChainSlug, FeeParameters,
	StorageKey, TransactionReceipt, TransactionSnapshot, TransactionStatus, TxHash,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::instrument;

/// Everything a transaction needs besides its own snapshot.
pub(crate) struct TransactionContext {
	pub chain: ChainSlug,
	pub chain_id: u64,
	pub signer: Address,
	pub account: Arc<AccountService>,
	pub provider: Arc<dyn ChainProvider>,
	pub storage: Arc<StorageService>,
	pub finality: Arc<FinalityService>,
	pub nonces: Arc<NonceManager>,
	pub options: GasBoostOptions,
	pub fee_bps: u128,
	pub clock: Clock,
}

impl TransactionContext {
	pub async fn sign(
		&self,
		snapshot: &TransactionSnapshot,
		fee: FeeParameters,
	) -> Result<SignedTransaction, AccountError> {
		self.account
			.sign(&UnsignedTransaction {
				chain_id: snapshot.chain_id,
				nonce: snapshot.nonce,
				to: snapshot.to,
				value: snapshot.value,
				data: snapshot.data.clone(),
				gas_limit: snapshot.gas_limit,
				fee,
			})
			.await
	}

	pub async fn persist(&self, snapshot: &TransactionSnapshot) -> Result<(), GasBoostError> {
		self.storage
			.store(StorageKey::Transactions.as_str(), &snapshot.id, snapshot)
			.await?;
		Ok(())
	}
}

/// Handle to a gas-boosted transaction.
///
/// Cloning is cheap; every clone observes the same monitoring task.
#[derive(Clone, Debug)]
pub struct GasBoostTransaction {
	id: String,
	state: watch::Receiver<TransactionSnapshot>,
	task: Arc<Mutex<Option<JoinHandle<()>>>>,
	stopped: Arc<AtomicBool>,
}

fn abandoned(snapshot: &TransactionSnapshot) -> GasBoostError {
	match &snapshot.abandon_reason {
		Some(reason) => GasBoostError::Abandoned(reason.clone()),
		None => GasBoostError::Stopped(format!("{} abandoned without a reason", snapshot.id)),
	}
}

impl GasBoostTransaction {
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn status(&self) -> TransactionStatus {
		self.state.borrow().status
	}

	/// Hash of the broadcast that was included, once one was.
	pub fn mined_tx_hash(&self) -> Option<TxHash> {
		self.state.borrow().mined_tx_hash
	}

	/// Latest persisted state.
	pub fn snapshot(&self) -> TransactionSnapshot {
		self.state.borrow().clone()
	}

	/// True after [`GasBoostTransaction::stop`].
	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	async fn wait_for(
		&self,
		done: impl FnMut(&TransactionSnapshot) -> bool,
	) -> Result<TransactionSnapshot, GasBoostError> {
		let mut state = self.state.clone();
		let snapshot = state
			.wait_for(done)
			.await
			.map_err(|_| GasBoostError::Stopped(self.id.clone()))?
			.clone();
		Ok(snapshot)
	}

	/// Resolves with the included hash once any broadcast is mined.
	pub async fn wait_until_mined(&self) -> Result<TxHash, GasBoostError> {
		let snapshot = self
			.wait_for(|s| s.status != TransactionStatus::Pending)
			.await?;
		if snapshot.status == TransactionStatus::Abandoned {
			return Err(abandoned(&snapshot));
		}
		snapshot
			.mined_tx_hash
			.ok_or_else(|| GasBoostError::Stopped(format!("{} mined without a hash", self.id)))
	}

	/// Resolves once the mined block is safe on the chain.
	pub async fn wait_until_confirmed(&self) -> Result<TxHash, GasBoostError> {
		let snapshot = self.wait_for(|s| s.is_terminal()).await?;
		match snapshot.status {
			TransactionStatus::Confirmed => snapshot.mined_tx_hash.ok_or_else(|| {
				GasBoostError::Stopped(format!("{} confirmed without a hash", self.id))
			}),
			_ => Err(abandoned(&snapshot)),
		}
	}

	/// Cancels monitoring without touching persisted state.
	pub async fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
		let task = self.task.lock().await.take();
		if let Some(task) = task {
			task.abort();
			let _ = task.await;
			tracing::debug!(tx_id = %truncate_id(&self.id), "Monitoring stopped");
		}
	}
}

/// State machine driving one transaction.
pub(crate) struct Monitor {
	ctx: Arc<TransactionContext>,
	snapshot: TransactionSnapshot,
	state: watch::Sender<TransactionSnapshot>,
	/// The last signed variant still has to reach the node.
	resend: bool,
	/// Consecutive polls that saw our nonce used with none of our hashes mined.
	foreign_nonce_polls: u32,
	/// The node took one of our variants into its pool at some point.
	accepted: bool,
}

impl Monitor {
	/// A transaction that has not been broadcast yet.
	pub fn new(ctx: Arc<TransactionContext>, snapshot: TransactionSnapshot) -> Self {
		let (state, _) = watch::channel(snapshot.clone());
		Self {
			ctx,
			snapshot,
			state,
			resend: true,
			foreign_nonce_polls: 0,
			accepted: false,
		}
	}

	/// A persisted transaction. An earlier process may have broadcast it.
	pub fn resume(ctx: Arc<TransactionContext>, snapshot: TransactionSnapshot) -> Self {
		// The last variant was persisted before it was sent and may never
		// have reached the node.
		let resend =
			snapshot.status == TransactionStatus::Pending && !snapshot.raw_transaction.is_empty();
		Self {
			resend,
			accepted: true,
			..Self::new(ctx, snapshot)
		}
	}

	/// Spawns the monitoring task. Terminal snapshots get a handle only.
	pub fn start(self) -> GasBoostTransaction {
		let id = self.snapshot.id.clone();
		let state = self.state.subscribe();
		let task = if self.snapshot.is_terminal() {
			None
		} else {
			Some(tokio::spawn(self.run()))
		};
		GasBoostTransaction {
			id,
			state,
			task: Arc::new(Mutex::new(task)),
			stopped: Arc::new(AtomicBool::new(false)),
		}
	}

	#[instrument(skip_all, fields(
		tx_id = %truncate_id(&self.snapshot.id),
		chain = %self.ctx.chain,
		nonce = self.snapshot.nonce,
	))]
	async fn run(mut self) {
		tracing::debug!(status = ?self.snapshot.status, "Monitoring started");
		while !self.snapshot.is_terminal() {
			tokio::time::sleep(self.ctx.options.poll_interval).await;
			if let Err(e) = self.tick().await {
				tracing::warn!(error = %e, "Monitoring step failed, retrying on next poll");
			}
		}
		tracing::debug!(status = ?self.snapshot.status, "Monitoring finished");
	}

	async fn tick(&mut self) -> Result<(), GasBoostError> {
		if self.resend && self.snapshot.status == TransactionStatus::Pending {
			self.send_current().await?;
		}
		match self.snapshot.status {
			TransactionStatus::Pending => self.poll_pending().await,
			TransactionStatus::Mined => self.poll_mined().await,
			TransactionStatus::Confirmed | TransactionStatus::Abandoned => Ok(()),
		}
	}

	fn at_ceiling(&self) -> bool {
		fees::at_ceiling(&self.snapshot.fee, self.ctx.options.max_fee_per_gas)
	}

	fn can_boost(&self) -> bool {
		!self.at_ceiling() && self.snapshot.boost_count < self.ctx.options.max_boost_count
	}

	async fn poll_pending(&mut self) -> Result<(), GasBoostError> {
		if let Some(receipt) = self.find_receipt().await? {
			return self.mark_mined(receipt).await;
		}

		let max_lifetime = self.ctx.options.max_lifetime;
		if self.ctx.clock.elapsed_since(self.snapshot.created_at) >= max_lifetime {
			let reason = if self.at_ceiling() {
				AbandonReason::FeeCeilingReached {
					ceiling: self.ctx.options.max_fee_per_gas,
				}
			} else {
				AbandonReason::TimedOut {
					lifetime_secs: max_lifetime.as_secs(),
				}
			};
			return self.abandon(reason).await;
		}

		if self.nonce_consumed_externally().await? {
			let nonce = self.snapshot.nonce;
			return self
				.abandon(AbandonReason::NonceConsumedExternally { nonce })
				.await;
		}

		if self.ctx.clock.elapsed_since(self.snapshot.updated_at) < self.ctx.options.boost_interval
		{
			return Ok(());
		}
		if self.at_ceiling() {
			tracing::debug!(
				max_fee = self.snapshot.fee.max_fee(),
				"At fee ceiling, waiting for inclusion"
			);
			return Ok(());
		}
		if self.snapshot.boost_count >= self.ctx.options.max_boost_count {
			let boosts = self.snapshot.boost_count;
			return self
				.abandon(AbandonReason::MaxBoostsExceeded { boosts })
				.await;
		}
		if self.boost().await? {
			self.send_current().await?;
		}
		Ok(())
	}

	/// Any broadcast may be the one that lands; the newest is the likeliest.
	async fn find_receipt(&self) -> Result<Option<TransactionReceipt>, GasBoostError> {
		for broadcast in self.snapshot.broadcasts.iter().rev() {
			if let Some(receipt) = self
				.ctx
				.provider
				.get_transaction_receipt(broadcast.hash)
				.await?
			{
				return Ok(Some(receipt));
			}
		}
		Ok(None)
	}

	/// The chain's mined count passed our nonce and none of our hashes has a
	/// receipt, for enough consecutive polls.
	async fn nonce_consumed_externally(&mut self) -> Result<bool, GasBoostError> {
		let mined_count = self
			.ctx
			.provider
			.get_transaction_count(self.ctx.signer, BlockTag::Latest)
			.await?;
		if mined_count <= self.snapshot.nonce {
			self.foreign_nonce_polls = 0;
			return Ok(false);
		}
		self.foreign_nonce_polls += 1;
		tracing::debug!(
			mined_count,
			polls = self.foreign_nonce_polls,
			"Nonce used on chain without a receipt for our broadcasts"
		);
		Ok(self.foreign_nonce_polls >= self.ctx.options.nonce_consumed_grace_polls)
	}

	async fn poll_mined(&mut self) -> Result<(), GasBoostError> {
		let receipt = match self.snapshot.mined_tx_hash {
			Some(hash) => self.ctx.provider.get_transaction_receipt(hash).await?,
			None => None,
		};
		let Some(receipt) = receipt else {
			tracing::warn!(
				block = ?self.snapshot.mined_block_number,
				"Mined transaction no longer included, resuming monitoring"
			);
			let mut next = self.snapshot.clone();
			next.status = TransactionStatus::Pending;
			next.mined_tx_hash = None;
			next.mined_block_number = None;
			next.mined_success = None;
			self.transition(next).await?;
			self.resend = true;
			return Ok(());
		};

		if self.snapshot.mined_block_number != Some(receipt.block_number) {
			let mut next = self.snapshot.clone();
			next.mined_block_number = Some(receipt.block_number);
			next.mined_success = Some(receipt.success);
			self.transition(next).await?;
		}

		if self.ctx.finality.is_block_safe(receipt.block_number).await? {
			let mut next = self.snapshot.clone();
			next.status = TransactionStatus::Confirmed;
			self.transition(next).await?;
			tracing::info!(
				tx_hash = %truncate_id(&receipt.transaction_hash.to_string()),
				block = receipt.block_number,
				"Confirmed"
			);
		}
		Ok(())
	}

	async fn mark_mined(&mut self, receipt: TransactionReceipt) -> Result<(), GasBoostError> {
		let mut next = self.snapshot.clone();
		next.status = TransactionStatus::Mined;
		next.mined_tx_hash = Some(receipt.transaction_hash);
		next.mined_block_number = Some(receipt.block_number);
		next.mined_success = Some(receipt.success);
		self.transition(next).await?;
		self.resend = false;
		self.foreign_nonce_polls = 0;

		tracing::info!(
			tx_hash = %truncate_id(&receipt.transaction_hash.to_string()),
			block = receipt.block_number,
			boosts = self.snapshot.boost_count,
			"Mined"
		);
		if !receipt.success {
			tracing::warn!(
				tx_hash = %truncate_id(&receipt.transaction_hash.to_string()),
				"Transaction reverted on chain"
			);
		}
		Ok(())
	}

	/// Signs and persists the next fee variant. Returns false if signing
	/// failed and the transaction was abandoned instead.
	async fn boost(&mut self) -> Result<bool, GasBoostError> {
		let fee = fees::bump(
			self.snapshot.fee,
			self.ctx.fee_bps,
			self.ctx.options.max_fee_per_gas,
		);
		let signed = match self.ctx.sign(&self.snapshot, fee).await {
			Ok(signed) => signed,
			Err(e) => {
				self.abandon(AbandonReason::SigningFailed(e.to_string()))
					.await?;
				return Ok(false);
			},
		};

		let mut next = self.snapshot.clone();
		next.fee = fee;
		next.boost_count += 1;
		next.raw_transaction = signed.raw;
		next.broadcasts.push(Broadcast {
			hash: signed.hash,
			fee,
			signed_at: self.ctx.clock.now_ms(),
		});
		self.transition(next).await?;
		self.resend = true;

		tracing::info!(
			boost = self.snapshot.boost_count,
			max_fee = fee.max_fee(),
			tx_hash = %truncate_id(&signed.hash.to_string()),
			"Boosted fee"
		);
		Ok(true)
	}

	/// Broadcasts the latest signed variant and reacts to the node's answer.
	pub async fn send_current(&mut self) -> Result<(), GasBoostError> {
		loop {
			let raw = self.snapshot.raw_transaction.clone();
			let result = self.ctx.provider.send_raw_transaction(&raw).await;
			match result {
				Ok(hash) => {
					self.resend = false;
					self.accepted = true;
					tracing::debug!(tx_hash = %truncate_id(&hash.to_string()), "Broadcast");
					return Ok(());
				},
				Err(DeliveryError::AlreadyKnown(_)) => {
					self.resend = false;
					self.accepted = true;
					tracing::debug!("Variant already in the node's pool");
					return Ok(());
				},
				Err(DeliveryError::NonceTooLow(_)) => {
					self.resend = false;
					self.accepted = true;
					tracing::info!("Nonce already used on chain, polling receipts");
					return Ok(());
				},
				Err(DeliveryError::ReplacementUnderpriced(message)) => {
					self.resend = false;
					self.accepted = true;
					if !self.can_boost() {
						tracing::warn!(
							error = %message,
							boosts = self.snapshot.boost_count,
							"Replacement underpriced with no boost left"
						);
						return Ok(());
					}
					tracing::info!(error = %message, "Replacement underpriced, bumping fee");
					if !self.boost().await? {
						return Ok(());
					}
				},
				Err(e) if e.is_permanent() => {
					self.resend = false;
					return self
						.abandon(AbandonReason::PermanentProviderError(e.to_string()))
						.await;
				},
				Err(e) => {
					self.resend = true;
					return Err(e.into());
				},
			}
		}
	}

	async fn abandon(&mut self, reason: AbandonReason) -> Result<(), GasBoostError> {
		tracing::warn!(
			reason = %reason,
			boosts = self.snapshot.boost_count,
			"Abandoned"
		);
		let mut next = self.snapshot.clone();
		next.status = TransactionStatus::Abandoned;
		next.abandon_reason = Some(reason);
		self.transition(next).await?;

		// Nothing of ours ever reached the pool, so the nonce is free again.
		if !self.accepted {
			self.ctx.nonces.release(self.snapshot.nonce).await;
		}
		Ok(())
	}

	/// Persists `next`, then publishes it. Terminal snapshots are immutable.
	async fn transition(&mut self, mut next: TransactionSnapshot) -> Result<(), GasBoostError> {
		if self.snapshot.is_terminal() {
			return Err(GasBoostError::InvalidRequest(format!(
				"{} is {:?} and can no longer change",
				self.snapshot.id, self.snapshot.status
			)));
		}
		next.updated_at = self.ctx.clock.now_ms();
		self.ctx.persist(&next).await?;
		self.snapshot = next;
		self.state.send_replace(self.snapshot.clone());
		Ok(())
	}
}
