//! Durable key/value storage for the bonder core.
//!
//! This crate defines the storage backend interface, two backends (in-memory
//! for tests, file-backed for production) and [`StorageService`], which layers
//! typed JSON records and atomic batches on top of a backend.

use async_trait::async_trait;
use bonder_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub mod logs;

pub use logs::LogStore;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
	Put {
		key: String,
		value: Vec<u8>,
		ttl: Option<Duration>,
	},
	Delete {
		key: String,
	},
}

impl BatchOperation {
	pub fn key(&self) -> &str {
		match self {
			BatchOperation::Put { key, .. } | BatchOperation::Delete { key } => key,
		}
	}
}

/// Trait defining the low-level interface for storage backends.
///
/// Backends store opaque bytes under string keys. Writes to different keys may
/// run concurrently; callers guarantee a single writer per key.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Applies every operation or none of them.
	async fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError>;

	/// Lists live keys starting with `prefix`, in ascending order.
	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries from storage (optional operation).
	/// Returns the number of entries removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn compose_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// A set of typed writes committed atomically by [`StorageService::commit`].
#[derive(Debug, Default)]
pub struct StorageBatch {
	operations: Vec<BatchOperation>,
}

impl StorageBatch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a serialized record under `namespace:id`.
	pub fn put<T: Serialize>(
		mut self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<Self, StorageError> {
		self.operations.push(BatchOperation::Put {
			key: compose_key(namespace, id),
			value: encode(data)?,
			ttl: None,
		});
		Ok(self)
	}

	pub fn delete(mut self, namespace: &str, id: &str) -> Self {
		self.operations.push(BatchOperation::Delete {
			key: compose_key(namespace, id),
		});
		self
	}

	pub fn len(&self) -> usize {
		self.operations.len()
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic JSON serialization.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let bytes = encode(data)?;
		self.backend
			.set_bytes(&compose_key(namespace, id), bytes, ttl)
			.await
	}

	/// Stores a serializable value without time-to-live.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value from storage.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&compose_key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves a value, mapping `NotFound` to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Removes a value from storage.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&compose_key(namespace, id)).await
	}

	/// Updates an existing value in storage.
	///
	/// Returns `NotFound` if the key doesn't exist, making it semantically
	/// different from store() which will create or overwrite.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = compose_key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		let bytes = encode(data)?;
		self.backend.set_bytes(&key, bytes, None).await
	}

	/// Checks if a value exists in storage.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&compose_key(namespace, id)).await
	}

	/// Ids stored under `namespace` whose id starts with `id_prefix`.
	pub async fn list_ids(
		&self,
		namespace: &str,
		id_prefix: &str,
	) -> Result<Vec<String>, StorageError> {
		let prefix = compose_key(namespace, id_prefix);
		let strip = namespace.len() + 1;
		Ok(self
			.backend
			.keys_with_prefix(&prefix)
			.await?
			.into_iter()
			.map(|key| key[strip..].to_string())
			.collect())
	}

	/// Loads every record stored under `namespace`.
	///
	/// Records that disappear between listing and reading are skipped.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let mut records = Vec::new();
		for id in self.list_ids(namespace, "").await? {
			match self.retrieve(namespace, &id).await {
				Ok(record) => records.push((id, record)),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(records)
	}

	/// Commits every write of `batch` atomically.
	pub async fn commit(&self, batch: StorageBatch) -> Result<(), StorageError> {
		if batch.is_empty() {
			return Ok(());
		}
		self.backend.write_batch(batch.operations).await
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Record {
		value: u64,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_update_requires_existing_record() {
		let storage = service();
		let result = storage.update("transactions", "a", &Record { value: 1 }).await;
		assert!(matches!(result, Err(StorageError::NotFound)));

		storage.store("transactions", "a", &Record { value: 1 }).await.unwrap();
		storage.update("transactions", "a", &Record { value: 2 }).await.unwrap();
		let record: Record = storage.retrieve("transactions", "a").await.unwrap();
		assert_eq!(record.value, 2);
	}

	#[tokio::test]
	async fn test_list_is_scoped_to_namespace() {
		let storage = service();
		storage.store("transactions", "a", &Record { value: 1 }).await.unwrap();
		storage.store("transactions", "b", &Record { value: 2 }).await.unwrap();
		storage.store("nonce_index", "a", &Record { value: 3 }).await.unwrap();

		let records: Vec<(String, Record)> = storage.list("transactions").await.unwrap();
		assert_eq!(
			records,
			vec![
				("a".to_string(), Record { value: 1 }),
				("b".to_string(), Record { value: 2 }),
			]
		);
	}

	#[tokio::test]
	async fn test_commit_batch() {
		let storage = service();
		storage.store("transactions", "old", &Record { value: 0 }).await.unwrap();

		let batch = StorageBatch::new()
			.put("transactions", "new", &Record { value: 1 })
			.unwrap()
			.put("nonce_index", "1:0xab:5", &"new")
			.unwrap()
			.delete("transactions", "old");
		assert_eq!(batch.len(), 3);
		storage.commit(batch).await.unwrap();

		assert!(storage.exists("transactions", "new").await.unwrap());
		assert!(!storage.exists("transactions", "old").await.unwrap());
		let owner: String = storage.retrieve("nonce_index", "1:0xab:5").await.unwrap();
		assert_eq!(owner, "new");
	}

	#[tokio::test]
	async fn test_retrieve_optional() {
		let storage = service();
		let missing: Option<Record> = storage.retrieve_optional("transactions", "x").await.unwrap();
		assert!(missing.is_none());
	}
}
