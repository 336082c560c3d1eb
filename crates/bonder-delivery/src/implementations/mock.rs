//! Scriptable in-process chain used by tests.
//!
//! Every piece of chain state is set directly by the test; broadcasts are
//! recorded and answered from a script of results.

use crate::{ChainProvider, DeliveryError, LogFilter};
use alloy_primitives::keccak256;
use async_trait::async_trait;
use bonder_types::{
	Address, BlockTag, Bytes, ChainLog, ConfigSchema, FeeParameters, Schema, TransactionReceipt,
	TransactionRequest, TxHash, ValidationError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

struct MockState {
	head: u64,
	safe: Option<u64>,
	finalized: Option<u64>,
	nonces: HashMap<Address, (u64, u64)>,
	receipts: HashMap<TxHash, TransactionReceipt>,
	send_script: VecDeque<Result<(), DeliveryError>>,
	sent: Vec<Bytes>,
	gas_price: u128,
	eip1559_fees: FeeParameters,
	gas_estimate: u64,
	logs: Vec<ChainLog>,
	failing_reads: u32,
	latency: Duration,
	calls: HashMap<&'static str, usize>,
}

pub struct MockChainProvider {
	chain_id: u64,
	state: Mutex<MockState>,
}

impl MockChainProvider {
	pub fn new(chain_id: u64) -> Self {
		Self {
			chain_id,
			state: Mutex::new(MockState {
				head: 0,
				safe: None,
				finalized: None,
				nonces: HashMap::new(),
				receipts: HashMap::new(),
				send_script: VecDeque::new(),
				sent: Vec::new(),
				gas_price: 10_000_000_000,
				eip1559_fees: FeeParameters::Eip1559 {
					max_fee_per_gas: 10_000_000_000,
					max_priority_fee_per_gas: 1_000_000_000,
				},
				gas_estimate: 21_000,
				logs: Vec::new(),
				failing_reads: 0,
				latency: Duration::ZERO,
				calls: HashMap::new(),
			}),
		}
	}

	fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
		let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
		f(&mut state)
	}

	pub fn set_head(&self, head: u64) {
		self.with_state(|s| s.head = head);
	}

	pub fn set_safe(&self, safe: Option<u64>) {
		self.with_state(|s| s.safe = safe);
	}

	pub fn set_finalized(&self, finalized: Option<u64>) {
		self.with_state(|s| s.finalized = finalized);
	}

	/// Sets the mined (`latest`) and pool-inclusive (`pending`) counts.
	pub fn set_transaction_count(&self, address: Address, latest: u64, pending: u64) {
		self.with_state(|s| {
			s.nonces.insert(address, (latest, pending));
		});
	}

	/// Makes `hash` included at `block_number`.
	pub fn mine(&self, hash: TxHash, block_number: u64, success: bool) {
		self.with_state(|s| {
			s.receipts.insert(
				hash,
				TransactionReceipt {
					transaction_hash: hash,
					block_number,
					success,
				},
			);
		});
	}

	/// Drops a receipt, as a reorg would.
	pub fn unmine(&self, hash: &TxHash) {
		self.with_state(|s| {
			s.receipts.remove(hash);
		});
	}

	/// Queues the outcome of the next broadcast. Unscripted broadcasts succeed.
	pub fn push_send_result(&self, result: Result<(), DeliveryError>) {
		self.with_state(|s| s.send_script.push_back(result));
	}

	/// Payloads the node accepted, oldest first.
	pub fn sent(&self) -> Vec<Bytes> {
		self.with_state(|s| s.sent.clone())
	}

	pub fn sent_hashes(&self) -> Vec<TxHash> {
		self.sent().iter().map(keccak256).collect()
	}

	pub fn set_gas_price(&self, gas_price: u128) {
		self.with_state(|s| s.gas_price = gas_price);
	}

	pub fn set_eip1559_fees(&self, fees: FeeParameters) {
		self.with_state(|s| s.eip1559_fees = fees);
	}

	pub fn set_gas_estimate(&self, gas: u64) {
		self.with_state(|s| s.gas_estimate = gas);
	}

	pub fn add_logs(&self, logs: impl IntoIterator<Item = ChainLog>) {
		self.with_state(|s| s.logs.extend(logs));
	}

	/// The next `count` read calls fail with a network error.
	pub fn fail_next_reads(&self, count: u32) {
		self.with_state(|s| s.failing_reads = count);
	}

	/// Delay applied to every call.
	pub fn set_latency(&self, latency: Duration) {
		self.with_state(|s| s.latency = latency);
	}

	/// How many times `method` was called.
	pub fn call_count(&self, method: &str) -> usize {
		self.with_state(|s| s.calls.get(method).copied().unwrap_or(0))
	}

	async fn enter(&self, method: &'static str, read: bool) -> Result<(), DeliveryError> {
		let (latency, fail) = self.with_state(|s| {
			*s.calls.entry(method).or_default() += 1;
			let fail = read && s.failing_reads > 0;
			if fail {
				s.failing_reads -= 1;
			}
			(s.latency, fail)
		});
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
		if fail {
			return Err(DeliveryError::Network(format!(
				"{} failed: connection reset",
				method
			)));
		}
		Ok(())
	}
}

struct MockSchema;

impl ConfigSchema for MockSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl ChainProvider for MockChainProvider {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockSchema)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	async fn get_block_number(&self) -> Result<u64, DeliveryError> {
		self.enter("get_block_number", true).await?;
		Ok(self.with_state(|s| s.head))
	}

	async fn get_block_number_by_tag(&self, tag: BlockTag) -> Result<Option<u64>, DeliveryError> {
		self.enter("get_block_number_by_tag", true).await?;
		Ok(self.with_state(|s| match tag {
			BlockTag::Latest | BlockTag::Pending => Some(s.head),
			BlockTag::Safe => s.safe,
			BlockTag::Finalized => s.finalized,
			BlockTag::Number(n) => (n <= s.head).then_some(n),
		}))
	}

	async fn get_transaction_count(
		&self,
		address: Address,
		tag: BlockTag,
	) -> Result<u64, DeliveryError> {
		self.enter("get_transaction_count", true).await?;
		let (latest, pending) =
			self.with_state(|s| s.nonces.get(&address).copied().unwrap_or((0, 0)));
		Ok(match tag {
			BlockTag::Pending => pending.max(latest),
			_ => latest,
		})
	}

	async fn get_transaction_receipt(
		&self,
		hash: TxHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.enter("get_transaction_receipt", true).await?;
		Ok(self.with_state(|s| s.receipts.get(&hash).cloned()))
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, DeliveryError> {
		self.enter("send_raw_transaction", false).await?;
		self.with_state(|s| -> Result<TxHash, DeliveryError> {
			s.send_script.pop_front().unwrap_or(Ok(()))?;
			s.sent.push(Bytes::copy_from_slice(raw));
			Ok(keccak256(raw))
		})
	}

	async fn get_gas_price(&self) -> Result<u128, DeliveryError> {
		self.enter("get_gas_price", true).await?;
		Ok(self.with_state(|s| s.gas_price))
	}

	async fn estimate_eip1559_fees(&self) -> Result<FeeParameters, DeliveryError> {
		self.enter("estimate_eip1559_fees", true).await?;
		Ok(self.with_state(|s| s.eip1559_fees))
	}

	async fn estimate_gas(
		&self,
		_from: Address,
		_request: &TransactionRequest,
	) -> Result<u64, DeliveryError> {
		self.enter("estimate_gas", true).await?;
		Ok(self.with_state(|s| s.gas_estimate))
	}

	async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<ChainLog>, DeliveryError> {
		self.enter("get_logs", true).await?;
		Ok(self.with_state(|s| {
			s.logs
				.iter()
				.filter(|log| filter.matches(log))
				.cloned()
				.collect()
		}))
	}
}
