//! Event-log index on top of [`StorageService`].
//!
//! Logs are keyed by primary topic, block number and log index, so a prefix
//! scan over one topic returns them in chain order. `MessageReceived` logs also
//! get a secondary key by `(source chain id, message nonce)`.
//!
//! The engine does not build a `LogStore`. It is for the layer that watches
//! bridge contracts, which owns the `MessageReceived` topic and constructs one
//! over the shared [`StorageService`].

use crate::{StorageBatch, StorageError, StorageService};
use bonder_types::{ChainLog, StorageKey, B256, U256};
use std::sync::Arc;

/// Stores and queries chain logs.
pub struct LogStore {
	storage: Arc<StorageService>,
	message_received_topic: B256,
}

fn primary_id(topic: &B256, block_number: u64, log_index: u64) -> String {
	format!("{}:{:020}:{:010}", topic, block_number, log_index)
}

fn message_id(source_chain_id: U256, nonce: &B256) -> String {
	format!("{}:{}", source_chain_id, nonce)
}

impl LogStore {
	pub fn new(storage: Arc<StorageService>, message_received_topic: B256) -> Self {
		Self {
			storage,
			message_received_topic,
		}
	}

	/// Writes every log and its secondary keys in one batch.
	///
	/// Logs without topics are skipped.
	pub async fn put_logs(&self, logs: &[ChainLog]) -> Result<(), StorageError> {
		let mut batch = StorageBatch::new();
		for log in logs {
			let Some(topic) = log.primary_topic() else {
				tracing::debug!(block = log.block_number, "Skipping anonymous log");
				continue;
			};
			let id = primary_id(topic, log.block_number, log.log_index);
			batch = batch.put(StorageKey::Logs.as_str(), &id, log)?;

			if *topic == self.message_received_topic {
				match (log.topics.get(1), log.topics.get(2)) {
					(Some(source_chain), Some(nonce)) => {
						let source_chain_id = U256::from_be_bytes(source_chain.0);
						batch = batch.put(
							StorageKey::MessageReceived.as_str(),
							&message_id(source_chain_id, nonce),
							&id,
						)?;
					},
					_ => tracing::warn!(
						block = log.block_number,
						log_index = log.log_index,
						"MessageReceived log is missing indexed topics"
					),
				}
			}
		}
		self.storage.commit(batch).await
	}

	/// All stored logs with `topic` as their primary topic, in chain order.
	pub async fn logs_by_topic(&self, topic: &B256) -> Result<Vec<ChainLog>, StorageError> {
		let namespace = StorageKey::Logs.as_str();
		let mut logs = Vec::new();
		for id in self
			.storage
			.list_ids(namespace, &format!("{}:", topic))
			.await?
		{
			if let Some(log) = self.storage.retrieve_optional(namespace, &id).await? {
				logs.push(log);
			}
		}
		Ok(logs)
	}

	/// Looks up the `MessageReceived` log for a source chain and message nonce.
	pub async fn message_received(
		&self,
		source_chain_id: U256,
		nonce: &B256,
	) -> Result<Option<ChainLog>, StorageError> {
		let primary: Option<String> = self
			.storage
			.retrieve_optional(
				StorageKey::MessageReceived.as_str(),
				&message_id(source_chain_id, nonce),
			)
			.await?;
		match primary {
			Some(id) => {
				self.storage
					.retrieve_optional(StorageKey::Logs.as_str(), &id)
					.await
			},
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use bonder_types::{Address, Bytes, TxHash};

	fn log(topics: Vec<B256>, block_number: u64, log_index: u64) -> ChainLog {
		ChainLog {
			address: Address::repeat_byte(0x11),
			topics,
			data: Bytes::new(),
			block_number,
			log_index,
			transaction_hash: TxHash::repeat_byte(0x22),
		}
	}

	fn store(received: B256) -> LogStore {
		LogStore::new(
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			received,
		)
	}

	#[tokio::test]
	async fn test_logs_by_topic_in_chain_order() {
		let transfer = B256::repeat_byte(0xaa);
		let other = B256::repeat_byte(0xbb);
		let logs = store(B256::repeat_byte(0xcc));

		logs.put_logs(&[
			log(vec![transfer], 100, 2),
			log(vec![other], 50, 0),
			log(vec![transfer], 9, 7),
			log(vec![transfer], 100, 1),
			log(vec![], 1, 0),
		])
		.await
		.unwrap();

		let found = logs.logs_by_topic(&transfer).await.unwrap();
		let positions: Vec<(u64, u64)> = found
			.iter()
			.map(|l| (l.block_number, l.log_index))
			.collect();
		assert_eq!(positions, vec![(9, 7), (100, 1), (100, 2)]);
	}

	#[tokio::test]
	async fn test_message_received_secondary_index() {
		let received = B256::repeat_byte(0xcc);
		let logs = store(received);
		let source_chain = B256::from(U256::from(10u64).to_be_bytes::<32>());
		let nonce = B256::repeat_byte(0x05);

		logs.put_logs(&[log(vec![received, source_chain, nonce], 42, 3)])
			.await
			.unwrap();

		let found = logs
			.message_received(U256::from(10u64), &nonce)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(found.block_number, 42);
		assert!(logs
			.message_received(U256::from(1u64), &nonce)
			.await
			.unwrap()
			.is_none());
	}
}
