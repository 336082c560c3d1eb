//! Alloy-backed EVM chain provider.
//!
//! Talks JSON-RPC over HTTP. Signing happens in the account layer, so the
//! provider is built without wallet or filler layers and only ever forwards
//! raw signed payloads.

use crate::{ChainProvider, DeliveryError, DeliveryFactory, DeliveryRegistry, LogFilter};
use alloy_eips::{BlockId, BlockNumberOrTag};
use alloy_primitives::U64;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{Filter, Log, TransactionRequest as RpcTransactionRequest};
use alloy_transport_http::Http;
use async_trait::async_trait;
use bonder_types::{
	Address, BlockTag, ChainLog, ConfigSchema, FeeParameters, Field, FieldType,
	ImplementationRegistry, Schema, TransactionReceipt, TransactionRequest, TxHash,
	ValidationError,
};
use serde::Deserialize;
use std::sync::Arc;

/// Alloy-based provider for one EVM chain.
pub struct AlloyProvider {
	chain_id: u64,
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
}

/// The only field of a block header the provider needs.
#[derive(Debug, Deserialize)]
struct BlockNumberOnly {
	number: U64,
}

fn rpc_err(e: impl std::fmt::Display) -> DeliveryError {
	DeliveryError::from_rpc_message(e.to_string())
}

fn to_block_number_or_tag(tag: BlockTag) -> BlockNumberOrTag {
	match tag {
		BlockTag::Latest => BlockNumberOrTag::Latest,
		BlockTag::Pending => BlockNumberOrTag::Pending,
		BlockTag::Safe => BlockNumberOrTag::Safe,
		BlockTag::Finalized => BlockNumberOrTag::Finalized,
		BlockTag::Number(n) => BlockNumberOrTag::Number(n),
	}
}

fn to_chain_log(log: Log) -> Option<ChainLog> {
	// Pending logs have no position yet.
	Some(ChainLog {
		block_number: log.block_number?,
		log_index: log.log_index?,
		transaction_hash: log.transaction_hash?,
		address: log.address(),
		topics: log.topics().to_vec(),
		data: log.data().data.clone(),
	})
}

impl AlloyProvider {
	/// Creates a provider for `rpc_url`.
	pub fn new(chain_id: u64, rpc_url: &str) -> Result<Self, DeliveryError> {
		let url = rpc_url.parse().map_err(|e| {
			DeliveryError::Configuration(format!(
				"Invalid RPC URL for chain {}: {}",
				chain_id, e
			))
		})?;
		let provider = ProviderBuilder::new().on_http(url);

		Ok(Self {
			chain_id,
			provider: Arc::new(provider) as Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
		})
	}
}

/// Configuration schema for the alloy provider.
pub struct AlloyProviderSchema;

impl ConfigSchema for AlloyProviderSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
				Field::new("rpc_url", FieldType::String).with_validator(|value| {
					let url = value.as_str().unwrap_or_default();
					if url.starts_with("http://") || url.starts_with("https://") {
						Ok(())
					} else {
						Err("rpc_url must be an http(s) URL".to_string())
					}
				}),
			],
			vec![Field::new("fee_model", FieldType::String)],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl ChainProvider for AlloyProvider {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyProviderSchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		self.provider.get_block_number().await.map_err(rpc_err)
	}

	async fn get_block_number_by_tag(&self, tag: BlockTag) -> Result<Option<u64>, DeliveryError> {
		if let BlockTag::Number(n) = tag {
			return Ok(Some(n));
		}
		let block: Option<BlockNumberOnly> = self
			.provider
			.client()
			.request("eth_getBlockByNumber", (to_block_number_or_tag(tag), false))
			.await
			.map_err(rpc_err)?;
		Ok(block.map(|b| b.number.to::<u64>()))
	}

	async fn get_transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.block_id(BlockId::Number(to_block_number_or_tag(tag)))
			.await
			.map_err(rpc_err)
	}

	async fn get_transaction_receipt(
		&self,
		hash: TxHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash)
			.await
			.map_err(rpc_err)?;

		// A receipt without a block number is not included yet.
		Ok(receipt.and_then(|receipt| {
			Some(TransactionReceipt {
				transaction_hash: receipt.transaction_hash,
				block_number: receipt.block_number?,
				success: receipt.status(),
			})
		}))
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, DeliveryError> {
		let pending = self
			.provider
			.send_raw_transaction(raw)
			.await
			.map_err(rpc_err)?;
		let tx_hash = *pending.tx_hash();
		tracing::debug!(chain_id = self.chain_id, tx_hash = %tx_hash, "Broadcast raw transaction");
		Ok(tx_hash)
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.provider.get_gas_price().await.map_err(rpc_err)
	}

	async fn estimate_eip1559_fees(&self) -> Result<FeeParameters, DeliveryError> {
		let estimate = self
			.provider
			.estimate_eip1559_fees(None)
			.await
			.map_err(rpc_err)?;
		Ok(FeeParameters::Eip1559 {
			max_fee_per_gas: estimate.max_fee_per_gas,
			max_priority_fee_per_gas: estimate.max_priority_fee_per_gas,
		})
	}

	async fn estimate_gas(
		&self,
		from: Address,
		request: &TransactionRequest,
	) -> Result<u64, DeliveryError> {
		let call = RpcTransactionRequest::default()
			.from(from)
			.to(request.to)
			.value(request.value)
			.input(request.data.clone().into());
		self.provider.estimate_gas(&call).await.map_err(rpc_err)
	}

	async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainLog>, DeliveryError> {
		let mut query = Filter::new()
			.from_block(filter.from_block)
			.to_block(filter.to_block);
		if let Some(address) = filter.address {
			query = query.address(address);
		}
		if let Some(topic) = filter.topics[0] {
			query = query.event_signature(topic);
		}
		if let Some(topic) = filter.topics[1] {
			query = query.topic1(topic);
		}
		if let Some(topic) = filter.topics[2] {
			query = query.topic2(topic);
		}
		if let Some(topic) = filter.topics[3] {
			query = query.topic3(topic);
		}

		let logs = self.provider.get_logs(&query).await.map_err(rpc_err)?;
		Ok(logs.into_iter().filter_map(to_chain_log).collect())
	}
}

/// Factory function to create an alloy provider from a network section.
///
/// Configuration parameters:
/// - `chain_id` (required)
/// - `rpc_url` (required): HTTP(S) JSON-RPC endpoint
pub fn create_provider(config: &toml::Value) -> Result<Box<dyn ChainProvider>, DeliveryError> {
	AlloyProviderSchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(format!("Invalid configuration: {}", e)))?;

	let chain_id = config
		.get("chain_id")
		.and_then(|v| v.as_integer())
		.ok_or_else(|| DeliveryError::Configuration("chain_id is required".to_string()))?;
	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::Configuration("rpc_url is required".to_string()))?;

	Ok(Box::new(AlloyProvider::new(chain_id as u64, rpc_url)?))
}

/// Registry for the alloy provider implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "evm_alloy";
	type Factory = DeliveryFactory;

	fn factory() -> Self::Factory {
		create_provider
	}
}

impl DeliveryRegistry for Registry {}
