//! Restores transaction monitoring after a restart.
//!
//! Every non-terminal snapshot in storage is handed to the factory for its
//! chain and signer, which rebuilds a live instance in the persisted state.
//! Terminal snapshots are counted and left alone.

use crate::gas_boost::{GasBoostTransaction, GasBoostTransactionFactory};
use bonder_storage::StorageService;
use bonder_types::{truncate_id, ChainSlug, StorageKey, TransactionSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors that can occur during recovery operations.
#[derive(Debug, Error)]
pub enum RecoveryError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Gas boost error: {0}")]
	GasBoost(String),
}

/// Report of the recovery operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
	/// Snapshots found in storage.
	pub total_transactions: usize,
	/// Non-terminal transactions whose monitoring was resumed.
	pub resumed: usize,
	/// Confirmed or abandoned transactions, not resumed.
	pub terminal: usize,
	/// Non-terminal transactions with no factory for their chain and signer.
	pub unmatched: usize,
	/// Non-terminal transactions that could not be rebuilt.
	pub failed: usize,
}

pub struct RecoveryService {
	storage: Arc<StorageService>,
	factories: HashMap<ChainSlug, Arc<GasBoostTransactionFactory>>,
}

impl RecoveryService {
	pub fn new(
		storage: Arc<StorageService>,
		factories: HashMap<ChainSlug, Arc<GasBoostTransactionFactory>>,
	) -> Self {
		Self { storage, factories }
	}

	/// Resumes every non-terminal transaction and returns the live handles.
	///
	/// A single transaction that fails to load is logged and counted; it does
	/// not abort recovery of the others.
	#[instrument(skip_all)]
	pub async fn recover_state(
		&self,
	) -> Result<(RecoveryReport, Vec<GasBoostTransaction>), RecoveryError> {
		tracing::info!("Starting state recovery from storage");

		let snapshots = self
			.storage
			.list::<TransactionSnapshot>(StorageKey::Transactions.as_str())
			.await
			.map_err(|e| RecoveryError::Storage(e.to_string()))?;

		let mut report = RecoveryReport {
			total_transactions: snapshots.len(),
			..Default::default()
		};
		let mut handles = Vec::new();

		for (id, snapshot) in snapshots {
			if snapshot.is_terminal() {
				report.terminal += 1;
				continue;
			}

			let Some(factory) = self.factory_for(&snapshot) else {
				tracing::warn!(
					tx_id = %truncate_id(&id),
					chain = %snapshot.chain_slug,
					chain_id = snapshot.chain_id,
					signer = %snapshot.signer,
					"No factory for pending transaction"
				);
				report.unmatched += 1;
				continue;
			};

			match factory.load(&id).await {
				Ok(handle) => {
					report.resumed += 1;
					handles.push(handle);
				},
				Err(e) => {
					tracing::warn!(
						tx_id = %truncate_id(&id),
						error = %e,
						"Failed to resume transaction"
					);
					report.failed += 1;
				},
			}
		}

		tracing::info!(
			total = report.total_transactions,
			resumed = report.resumed,
			terminal = report.terminal,
			unmatched = report.unmatched,
			failed = report.failed,
			"Recovery complete"
		);

		Ok((report, handles))
	}

	fn factory_for(&self, snapshot: &TransactionSnapshot) -> Option<&Arc<GasBoostTransactionFactory>> {
		self.factories.get(&snapshot.chain_slug).filter(|factory| {
			factory.chain_id() == snapshot.chain_id && factory.signer() == snapshot.signer
		})
	}
}
