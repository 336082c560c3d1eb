//! Nonce allocation per signer.
//!
//! Allocation reads the chain's pending count and hands out
//! `max(local next, chain pending)`. The caller holds a [`NonceReservation`]
//! until the transaction using the nonce is persisted, then commits it. A
//! reservation dropped without commit leaves the counter untouched.

use bonder_delivery::{ChainProvider, DeliveryError};
use bonder_types::{Address, BlockTag};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Nonce counter for one `(chain_id, signer)`.
#[derive(Debug)]
pub struct NonceManager {
	chain_id: u64,
	signer: Address,
	/// Next nonce this process would hand out, once known.
	next: Mutex<Option<u64>>,
}

/// Exclusive right to allocate the next nonce.
pub struct NonceReservation<'a> {
	signer: Address,
	next: MutexGuard<'a, Option<u64>>,
}

impl NonceManager {
	pub fn new(chain_id: u64, signer: Address) -> Self {
		Self {
			chain_id,
			signer,
			next: Mutex::new(None),
		}
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn signer(&self) -> Address {
		self.signer
	}

	/// Enters the per-signer critical section.
	pub async fn reserve(&self) -> NonceReservation<'_> {
		NonceReservation {
			signer: self.signer,
			next: self.next.lock().await,
		}
	}

	/// Records that `nonce` is owned by a persisted transaction.
	pub async fn raise_floor(&self, nonce: u64) {
		let mut next = self.next.lock().await;
		let floor = nonce.saturating_add(1);
		*next = Some(next.map_or(floor, |current| current.max(floor)));
	}

	/// Hands `nonce` back when the node never took it and nothing after it
	/// was allocated. A later nonce keeps the counter where it is.
	pub async fn release(&self, nonce: u64) {
		let mut next = self.next.lock().await;
		if *next == Some(nonce.saturating_add(1)) {
			*next = Some(nonce);
			tracing::debug!(
				chain_id = self.chain_id,
				signer = %self.signer,
				nonce,
				"Released unused nonce"
			);
		}
	}

	/// Next nonce known locally, if any allocation or floor has happened.
	pub async fn local_next(&self) -> Option<u64> {
		*self.next.lock().await
	}
}

impl NonceReservation<'_> {
	/// The nonce to use: the larger of the local counter and the chain's
	/// pending transaction count.
	pub async fn next_nonce(&self, provider: &dyn ChainProvider) -> Result<u64, DeliveryError> {
		let pending = provider
			.get_transaction_count(self.signer, BlockTag::Pending)
			.await?;
		Ok(self.next.map_or(pending, |local| local.max(pending)))
	}

	/// Marks `nonce` as used and leaves the critical section.
	pub fn commit(mut self, nonce: u64) {
		let floor = nonce.saturating_add(1);
		*self.next = Some(self.next.map_or(floor, |current| current.max(floor)));
	}
}

/// Shares one [`NonceManager`] per `(chain_id, signer)` across factories.
#[derive(Debug, Default)]
pub struct NonceRegistry {
	managers: DashMap<(u64, Address), Arc<NonceManager>>,
}

impl NonceRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn manager(&self, chain_id: u64, signer: Address) -> Arc<NonceManager> {
		self.managers
			.entry((chain_id, signer))
			.or_insert_with(|| Arc::new(NonceManager::new(chain_id, signer)))
			.clone()
	}
}
