//! File-backed storage for production use.
//!
//! Each key is one file under the storage directory. Files start with a fixed
//! 64-byte header carrying the expiry time. Single writes go through a temp file
//! and a rename. Batches are first written to a journal file; the journal is
//! the commit point and is replayed on open if the process died while applying
//! it. The directory is guarded by an advisory lock so two processes never
//! share one store.

use crate::{BatchOperation, StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use bonder_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const DATA_EXTENSION: &str = "bin";
const LOCK_FILE: &str = ".lock";
const JOURNAL_FILE: &str = "batch.journal";

fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

fn backend_err(e: impl std::fmt::Display) -> StorageError {
	StorageError::Backend(e.to_string())
}

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "BNDS"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	expires_at: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"BNDS";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn with_ttl(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			now_secs().saturating_add(ttl.as_secs())
		};
		Self { expires_at }
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::VERSION.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(backend_err("File too small for header"));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(backend_err("Unrecognized file format"));
		}
		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(backend_err(format!("Unsupported file version: {}", version)));
		}
		let mut expires = [0u8; 8];
		expires.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			expires_at: u64::from_le_bytes(expires),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && now_secs() >= self.expires_at
	}

	fn frame(&self, value: &[u8]) -> Vec<u8> {
		let mut data = Vec::with_capacity(Self::SIZE + value.len());
		data.extend_from_slice(&self.serialize());
		data.extend_from_slice(value);
		data
	}
}

/// TTL configuration per storage namespace.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();
		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(secs) = table.get(&config_key).and_then(|v| v.as_integer()) {
					ttls.insert(storage_key, Duration::from_secs(secs.max(0) as u64));
				}
			}
		}
		Self { ttls }
	}

	fn ttl_for_key(&self, key: &str) -> Duration {
		key.split(':')
			.next()
			.and_then(|namespace| namespace.parse::<StorageKey>().ok())
			.and_then(|storage_key| self.ttls.get(&storage_key).copied())
			.unwrap_or(Duration::ZERO)
	}
}

/// Journal entry; `value == None` is a delete.
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
	key: String,
	value: Option<String>,
	expires_at: u64,
}

/// Percent-encodes a key into a file-system-safe, reversible file stem.
fn encode_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len());
	for byte in key.bytes() {
		if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
			out.push(byte as char);
		} else {
			out.push_str(&format!("%{:02X}", byte));
		}
	}
	out
}

fn decode_key(stem: &str) -> Option<String> {
	let bytes = stem.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let hex = stem.get(i + 1..i + 3)?;
			out.push(u8::from_str_radix(hex, 16).ok()?);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).ok()
}

fn write_file_sync(path: &Path, data: &[u8]) -> std::io::Result<()> {
	let temp_path = path.with_extension("tmp");
	let mut file = File::create(&temp_path)?;
	file.write_all(data)?;
	file.sync_all()?;
	std::fs::rename(&temp_path, path)
}

fn remove_file_sync(path: &Path) -> std::io::Result<()> {
	match std::fs::remove_file(path) {
		Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

/// Applies journal entries. Idempotent, so replaying a partly applied journal
/// is safe.
fn apply_journal(base_path: &Path, entries: &[JournalEntry]) -> Result<(), StorageError> {
	for entry in entries {
		let path = base_path.join(format!("{}.{}", encode_key(&entry.key), DATA_EXTENSION));
		match &entry.value {
			Some(hex_value) => {
				let value = hex::decode(hex_value).map_err(backend_err)?;
				let header = FileHeader {
					expires_at: entry.expires_at,
				};
				write_file_sync(&path, &header.frame(&value)).map_err(backend_err)?;
			},
			None => remove_file_sync(&path).map_err(backend_err)?,
		}
	}
	Ok(())
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
	/// Held for the lifetime of the store; dropping it releases the lock.
	_lock: File,
	/// Serializes batches, which share one journal file.
	batch_lock: Mutex<()>,
}

impl FileStorage {
	/// Opens (creating if needed) a store rooted at `base_path`.
	///
	/// Fails if another process holds the directory, and replays a leftover
	/// batch journal before returning.
	pub fn open(base_path: PathBuf, ttl_config: TtlConfig) -> Result<Self, StorageError> {
		std::fs::create_dir_all(&base_path).map_err(backend_err)?;

		let lock = File::create(base_path.join(LOCK_FILE)).map_err(backend_err)?;
		lock.try_lock_exclusive().map_err(|e| {
			StorageError::Backend(format!(
				"Storage directory {} is locked by another process: {}",
				base_path.display(),
				e
			))
		})?;

		let journal_path = base_path.join(JOURNAL_FILE);
		if journal_path.exists() {
			let raw = std::fs::read(&journal_path).map_err(backend_err)?;
			let entries: Vec<JournalEntry> = serde_json::from_slice(&raw)
				.map_err(|e| StorageError::Serialization(e.to_string()))?;
			tracing::warn!(
				entries = entries.len(),
				"Replaying interrupted storage batch"
			);
			apply_journal(&base_path, &entries)?;
			remove_file_sync(&journal_path).map_err(backend_err)?;
		}

		Ok(Self {
			base_path,
			ttl_config,
			_lock: lock,
			batch_lock: Mutex::new(()),
		})
	}

	fn file_path(&self, key: &str) -> PathBuf {
		self.base_path
			.join(format!("{}.{}", encode_key(key), DATA_EXTENSION))
	}

	/// Reads a file, returning its payload if present and not expired.
	async fn read_live(&self, path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		let data = match fs::read(path).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(backend_err(e)),
		};
		let header = FileHeader::deserialize(&data)?;
		if header.is_expired() {
			return Ok(None);
		}
		Ok(Some(data[FileHeader::SIZE..].to_vec()))
	}

	async fn data_files(&self) -> Result<Vec<(String, PathBuf)>, StorageError> {
		let mut files = Vec::new();
		let mut entries = fs::read_dir(&self.base_path).await.map_err(backend_err)?;
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new(DATA_EXTENSION)) {
				continue;
			}
			let Some(key) = path
				.file_stem()
				.and_then(|stem| stem.to_str())
				.and_then(decode_key)
			else {
				tracing::debug!("Skipping file with undecodable name {:?}", path);
				continue;
			};
			files.push((key, path));
		}
		Ok(files)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.read_live(&self.file_path(key))
			.await?
			.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key);
		let ttl = ttl.unwrap_or_else(|| self.ttl_config.ttl_for_key(key));
		let data = FileHeader::with_ttl(ttl).frame(&value);

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		let mut file = fs::File::create(&temp_path).await.map_err(backend_err)?;
		file.write_all(&data).await.map_err(backend_err)?;
		file.sync_all().await.map_err(backend_err)?;
		fs::rename(&temp_path, &path).await.map_err(backend_err)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.read_live(&self.file_path(key)).await?.is_some())
	}

	async fn write_batch(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
		let entries: Vec<JournalEntry> = operations
			.into_iter()
			.map(|operation| match operation {
				BatchOperation::Put { key, value, ttl } => {
					let ttl = ttl.unwrap_or_else(|| self.ttl_config.ttl_for_key(&key));
					JournalEntry {
						expires_at: FileHeader::with_ttl(ttl).expires_at,
						value: Some(hex::encode(value)),
						key,
					}
				},
				BatchOperation::Delete { key } => JournalEntry {
					key,
					value: None,
					expires_at: 0,
				},
			})
			.collect();
		let journal =
			serde_json::to_vec(&entries).map_err(|e| StorageError::Serialization(e.to_string()))?;

		let _guard = self.batch_lock.lock().await;
		let base_path = self.base_path.clone();
		tokio::task::spawn_blocking(move || {
			let journal_path = base_path.join(JOURNAL_FILE);
			write_file_sync(&journal_path, &journal).map_err(backend_err)?;
			apply_journal(&base_path, &entries)?;
			remove_file_sync(&journal_path).map_err(backend_err)
		})
		.await
		.map_err(backend_err)?
	}

	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		for (key, path) in self.data_files().await? {
			if key.starts_with(prefix) && self.read_live(&path).await?.is_some() {
				keys.push(key);
			}
		}
		keys.sort();
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		for (_, path) in self.data_files().await? {
			let data = match fs::read(&path).await {
				Ok(data) => data,
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
					continue;
				},
			};
			let Ok(header) = FileHeader::deserialize(&data) else {
				continue;
			};
			if header.is_expired() {
				match fs::remove_file(&path).await {
					Ok(_) => removed += 1,
					Err(e) => tracing::warn!("Failed to remove expired file {:?}: {}", path, e),
				}
			}
		}
		Ok(removed)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}
		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/storage")
/// - `ttl_<namespace>`: TTL in seconds for a namespace, e.g. `ttl_logs` (default: 0, never)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::open(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn open(dir: &TempDir) -> FileStorage {
		FileStorage::open(dir.path().to_path_buf(), TtlConfig::default()).unwrap()
	}

	#[test]
	fn test_key_encoding_is_reversible() {
		let key = "nonce_index:10:0xAbC/1%2";
		let encoded = encode_key(key);
		assert!(!encoded.contains(':') && !encoded.contains('/'));
		assert_eq!(decode_key(&encoded).unwrap(), key);
	}

	#[tokio::test]
	async fn test_values_survive_reopen() {
		let dir = TempDir::new().unwrap();
		{
			let storage = open(&dir);
			storage
				.set_bytes("transactions:a", b"snapshot".to_vec(), None)
				.await
				.unwrap();
		}

		let storage = open(&dir);
		assert_eq!(
			storage.get_bytes("transactions:a").await.unwrap(),
			b"snapshot".to_vec()
		);
	}

	#[tokio::test]
	async fn test_second_open_is_refused_while_locked() {
		let dir = TempDir::new().unwrap();
		let _first = open(&dir);
		let second = FileStorage::open(dir.path().to_path_buf(), TtlConfig::default());
		assert!(matches!(second, Err(StorageError::Backend(_))));
	}

	#[tokio::test]
	async fn test_batch_and_prefix_scan() {
		let dir = TempDir::new().unwrap();
		let storage = open(&dir);
		storage
			.set_bytes("transactions:gone", vec![0], None)
			.await
			.unwrap();

		storage
			.write_batch(vec![
				BatchOperation::Put {
					key: "transactions:b".into(),
					value: vec![2],
					ttl: None,
				},
				BatchOperation::Put {
					key: "transactions:a".into(),
					value: vec![1],
					ttl: None,
				},
				BatchOperation::Delete {
					key: "transactions:gone".into(),
				},
				BatchOperation::Put {
					key: "nonce_index:1".into(),
					value: vec![3],
					ttl: None,
				},
			])
			.await
			.unwrap();

		assert_eq!(
			storage.keys_with_prefix("transactions:").await.unwrap(),
			vec!["transactions:a".to_string(), "transactions:b".to_string()]
		);
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[tokio::test]
	async fn test_interrupted_batch_is_replayed_on_open() {
		let dir = TempDir::new().unwrap();
		let entries = vec![
			JournalEntry {
				key: "transactions:x".into(),
				value: Some(hex::encode(b"x")),
				expires_at: 0,
			},
			JournalEntry {
				key: "nonce_index:x".into(),
				value: Some(hex::encode(b"y")),
				expires_at: 0,
			},
		];
		std::fs::write(
			dir.path().join(JOURNAL_FILE),
			serde_json::to_vec(&entries).unwrap(),
		)
		.unwrap();

		let storage = open(&dir);
		assert_eq!(storage.get_bytes("transactions:x").await.unwrap(), b"x");
		assert_eq!(storage.get_bytes("nonce_index:x").await.unwrap(), b"y");
		assert!(!dir.path().join(JOURNAL_FILE).exists());
	}

	#[tokio::test]
	async fn test_expired_entries_are_hidden_and_cleaned() {
		let dir = TempDir::new().unwrap();
		let storage = open(&dir);
		let expired = FileHeader { expires_at: 1 }.frame(b"old");
		std::fs::write(storage.file_path("logs:old"), expired).unwrap();
		storage.set_bytes("logs:new", b"new".to_vec(), None).await.unwrap();

		assert!(matches!(
			storage.get_bytes("logs:old").await,
			Err(StorageError::NotFound)
		));
		assert_eq!(
			storage.keys_with_prefix("logs:").await.unwrap(),
			vec!["logs:new".to_string()]
		);
		assert_eq!(storage.cleanup_expired().await.unwrap(), 1);
	}

	#[test]
	fn test_ttl_config_by_namespace() {
		let config: toml::Value = toml::from_str("ttl_logs = 60").unwrap();
		let ttl = TtlConfig::from_config(&config);
		assert_eq!(ttl.ttl_for_key("logs:abc"), Duration::from_secs(60));
		assert_eq!(ttl.ttl_for_key("transactions:abc"), Duration::ZERO);
	}
}
