#![allow(dead_code)]

use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex, PoisonError,
	},
	time::Duration,
};

use wb_core::{
	BindingConfig, BufferedNotifications, Context, ParameterSnapshot, QueryDescriptor,
	QueryTransport, RecordHandle, RecordId, RecordUpdateChannel, RecordWriteTransport, Row,
	RowSet, TransportError,
};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;

/// Store whose fetches can be held back and failed per query, so tests decide in which
/// order things complete.
#[derive(Default)]
pub struct ScriptedStore {
	calls: AtomicUsize,
	gates: Mutex<HashMap<String, VecDeque<oneshot::Receiver<()>>>>,
	failing: Mutex<HashSet<String>>,
	failing_records: Mutex<HashSet<String>>,
	fail_writes: AtomicBool,
	written: Mutex<Vec<RecordHandle>>,
	announced: Mutex<Vec<Vec<RecordId>>>,
}

impl ScriptedStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// The next fetch of `query` waits until the returned sender fires (or is dropped).
	pub fn gate(&self, query: &str) -> oneshot::Sender<()> {
		let (tx, rx) = oneshot::channel();
		self.gates
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.entry(query.to_string())
			.or_default()
			.push_back(rx);
		tx
	}

	pub fn fail_query(&self, query: &str) {
		self.failing
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(query.to_string());
	}

	/// Fetches whose `recordId` variable is `record_id` fail, whatever the query.
	pub fn fail_record(&self, record_id: &str) {
		self.failing_records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(record_id.to_string());
	}

	pub fn fail_writes(&self) {
		self.fail_writes.store(true, Ordering::SeqCst);
	}

	pub fn revision(&self) -> usize {
		self.written
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	pub fn announced(&self) -> Vec<Vec<RecordId>> {
		self.announced
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// What a fetch of `query` with `variables` returns right now.
	pub fn rows(&self, query: &str, variables: &ParameterSnapshot) -> RowSet {
		let mut row = Row::new();
		row.insert("query".to_string(), json!(query));
		row.insert(
			"recordId".to_string(),
			variables.get("recordId").cloned().unwrap_or_default(),
		);
		row.insert("revision".to_string(), json!(self.revision()));
		vec![row]
	}

	/// Polls until `n` fetches were issued.
	pub async fn wait_for_calls(&self, n: usize) {
		tokio::time::timeout(Duration::from_secs(5), async {
			while self.calls() < n {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("fetches were issued");
	}
}

#[async_trait]
impl QueryTransport for ScriptedStore {
	async fn execute(
		&self,
		query: &QueryDescriptor,
		variables: &ParameterSnapshot,
	) -> Result<RowSet, TransportError> {
		let name = query.label();
		self.calls.fetch_add(1, Ordering::SeqCst);

		let gate = self
			.gates
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get_mut(&name)
			.and_then(VecDeque::pop_front);
		if let Some(gate) = gate {
			gate.await.ok();
		}

		if self
			.failing
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.contains(&name)
		{
			return Err(TransportError::unreachable(format!("{name} is down")));
		}

		if let Some(record_id) = variables.get_str("recordId") {
			if self
				.failing_records
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.contains(record_id)
			{
				return Err(TransportError::unreachable(format!("{record_id} is down")));
			}
		}

		Ok(self.rows(&name, variables))
	}
}

#[async_trait]
impl RecordWriteTransport for ScriptedStore {
	async fn write(
		&self,
		object_type: &str,
		fields: Map<String, Value>,
	) -> Result<RecordHandle, TransportError> {
		if self.fail_writes.load(Ordering::SeqCst) {
			return Err(TransportError::rejected(
				400,
				"Required fields are missing: [LastName]",
			));
		}

		let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
		let record = RecordHandle {
			id: format!("003{:012}", written.len() + 1).into(),
			object_type: object_type.to_string(),
			fields,
		};
		written.push(record.clone());

		Ok(record)
	}
}

#[async_trait]
impl RecordUpdateChannel for ScriptedStore {
	async fn record_updates_available(&self, ids: &[RecordId]) -> Result<(), TransportError> {
		self.announced
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(ids.to_vec());
		Ok(())
	}
}

pub fn context(
	store: &Arc<ScriptedStore>,
	config: BindingConfig,
) -> (Context, Arc<BufferedNotifications>) {
	let notifications = Arc::new(BufferedNotifications::new());
	let ctx = Context::with_store(Arc::clone(store), config)
		.with_notifications(notifications.clone());

	(ctx, notifications)
}
