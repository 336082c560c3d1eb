//! Local private-key account.

use crate::{
	AccountError, AccountFactory, AccountInterface, AccountRegistry, SignedTransaction,
	UnsignedTransaction,
};
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{keccak256, Bytes, TxKind};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use bonder_types::{
	Address, ConfigSchema, FeeParameters, Field, FieldType, ImplementationRegistry, Schema,
	SecretString, ValidationError,
};

/// Account backed by an in-process secp256k1 key.
#[derive(Debug)]
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	pub fn new(private_key: &SecretString) -> Result<Self, AccountError> {
		let signer = private_key.with_exposed(|key| {
			key.parse::<PrivateKeySigner>()
				.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))
		})?;
		Ok(Self { signer })
	}

	fn sign_envelope(&self, tx: &UnsignedTransaction) -> Result<TxEnvelope, AccountError> {
		let to = TxKind::Call(tx.to);
		let envelope = match tx.fee {
			FeeParameters::Legacy { gas_price } => {
				let mut unsigned = TxLegacy {
					chain_id: Some(tx.chain_id),
					nonce: tx.nonce,
					gas_price,
					gas_limit: tx.gas_limit,
					to,
					value: tx.value,
					input: tx.data.clone(),
				};
				let signature = self
					.signer
					.sign_transaction_sync(&mut unsigned)
					.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
				TxEnvelope::from(unsigned.into_signed(signature))
			},
			FeeParameters::Eip1559 {
				max_fee_per_gas,
				max_priority_fee_per_gas,
			} => {
				let mut unsigned = TxEip1559 {
					chain_id: tx.chain_id,
					nonce: tx.nonce,
					gas_limit: tx.gas_limit,
					max_fee_per_gas,
					max_priority_fee_per_gas,
					to,
					value: tx.value,
					input: tx.data.clone(),
					..Default::default()
				};
				let signature = self
					.signer
					.sign_transaction_sync(&mut unsigned)
					.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
				TxEnvelope::from(unsigned.into_signed(signature))
			},
		};
		Ok(envelope)
	}
}

/// Configuration schema for the local wallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![
				Field::new("private_key", FieldType::String).with_validator(|value| {
					let key = value.as_str().unwrap_or_default();
					let key = key.strip_prefix("0x").unwrap_or(key);
					if key.len() != 64 {
						return Err("Private key must be 64 hex characters (32 bytes)".to_string());
					}
					if !key.chars().all(|c| c.is_ascii_hexdigit()) {
						return Err("Private key must contain only hex characters".to_string());
					}
					Ok(())
				}),
			],
			vec![],
		);
		schema.validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	async fn sign_transaction(
		&self,
		tx: &UnsignedTransaction,
	) -> Result<SignedTransaction, AccountError> {
		let envelope = self.sign_envelope(tx)?;
		let raw = Bytes::from(envelope.encoded_2718());
		Ok(SignedTransaction {
			hash: keccak256(&raw),
			raw,
		})
	}
}

/// Factory function to create a local wallet from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded secp256k1 key, with or without `0x`
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::Implementation(format!("Invalid configuration: {}", e)))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.map(SecretString::from)
		.ok_or_else(|| AccountError::InvalidKey("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(&private_key)?))
}

/// Registry for the local wallet implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "local";
	type Factory = AccountFactory;

	fn factory() -> Self::Factory {
		create_account
	}
}

impl AccountRegistry for Registry {}
