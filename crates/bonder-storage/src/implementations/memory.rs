//! In-memory storage backend.
//!
//! Useful for tests and development where persistence across restarts is not
//! required. A single `MemoryStorage` shared behind an `Arc` does survive a
//! simulated restart of everything built on top of it.

use crate::{BatchOperation, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use bonder_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory storage implementation.
///
/// TTL is ignored as this is primarily for testing.
#[derive(Clone, Default)]
pub struct MemoryStorage {
	store: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
		// One write guard for the whole batch, so readers see all or nothing.
		let mut store = self.store.write().await;
		for operation in operations {
			match operation {
				BatchOperation::Put { key, value, .. } => {
					store.insert(key, value);
				},
				BatchOperation::Delete { key } => {
					store.remove(&key);
				},
			}
		}
		Ok(())
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let store = self.store.read().await;
		Ok(store
			.range(prefix.to_string()..)
			.take_while(|(key, _)| key.starts_with(prefix))
			.map(|(key, _)| key.clone())
			.collect())
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// No configuration parameters are required.
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the in-memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "test_key";
		let value = b"test_value".to_vec();
		storage.set_bytes(key, value.clone(), None).await.unwrap();
		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_keys_with_prefix_stops_at_prefix_boundary() {
		let storage = MemoryStorage::new();
		for key in ["logs:a:1", "logs:a:2", "logs:b:1", "logsx:a"] {
			storage.set_bytes(key, vec![1], None).await.unwrap();
		}

		let keys = storage.keys_with_prefix("logs:a:").await.unwrap();
		assert_eq!(keys, vec!["logs:a:1".to_string(), "logs:a:2".to_string()]);
		assert_eq!(storage.keys_with_prefix("logs:").await.unwrap().len(), 3);
	}

	#[tokio::test]
	async fn test_clones_share_contents() {
		let storage = MemoryStorage::new();
		let restarted = storage.clone();
		storage.set_bytes("k", vec![7], None).await.unwrap();
		assert_eq!(restarted.get_bytes("k").await.unwrap(), vec![7]);
	}
}
