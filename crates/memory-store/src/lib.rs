#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! A record store living in memory, serving the wirebind transports.
//!
//! Named queries are answered by resolver functions registered up front; related list
//! batches are answered from the declared [`Relationship`]s. Faults can be injected per
//! query, for writes, or for the whole store.

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex, PoisonError, RwLock},
	time::Duration,
};

use wb_core::{
	ParameterSnapshot, QueryDescriptor, QueryTransport, RecordHandle, RecordId,
	RecordUpdateChannel, RecordWriteTransport, Row, RowSet, TransportError,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

mod records;

pub use records::{Records, Relationship};

use records::Record;

/// Answers a named query from the current records.
pub type Resolver = dyn Fn(&Records, &ParameterSnapshot) -> Result<RowSet, TransportError> + Send + Sync;

#[derive(Debug, Default)]
struct Faults {
	unreachable: bool,
	failing_queries: HashSet<String>,
	failing_writes: Option<TransportError>,
}

pub struct MemoryStore {
	records: RwLock<Records>,
	resolvers: RwLock<HashMap<String, Arc<Resolver>>>,
	relationships: RwLock<HashMap<String, Relationship>>,
	required_fields: RwLock<HashMap<String, Vec<String>>>,
	faults: Mutex<Faults>,
	latency: Option<Duration>,
	updates_tx: broadcast::Sender<Vec<RecordId>>,
}

impl MemoryStore {
	#[must_use]
	pub fn new() -> Self {
		Self {
			records: RwLock::default(),
			resolvers: RwLock::default(),
			relationships: RwLock::default(),
			required_fields: RwLock::default(),
			faults: Mutex::default(),
			latency: None,
			updates_tx: broadcast::channel(64).0,
		}
	}

	/// Every call waits this long before answering, like a remote store would.
	#[must_use]
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);
		self
	}

	pub fn register_query(
		&self,
		name: impl Into<String>,
		resolver: impl Fn(&Records, &ParameterSnapshot) -> Result<RowSet, TransportError>
			+ Send
			+ Sync
			+ 'static,
	) {
		self.resolvers
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(name.into(), Arc::new(resolver));
	}

	/// Declares the related list `related_list_id`, e.g. `Contacts` of an account.
	pub fn register_related_list(
		&self,
		related_list_id: impl Into<String>,
		relationship: Relationship,
	) {
		self.relationships
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(related_list_id.into(), relationship);
	}

	/// Writes of `object_type` are rejected unless they carry all of `fields`.
	pub fn require_fields(
		&self,
		object_type: impl Into<String>,
		fields: impl IntoIterator<Item = impl Into<String>>,
	) {
		self.required_fields
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(
				object_type.into(),
				fields.into_iter().map(Into::into).collect(),
			);
	}

	/// Adds a record directly, without going through the write path.
	pub fn insert(&self, object_type: impl Into<String>, fields: Map<String, Value>) -> RecordId {
		let record = new_record(object_type.into(), fields);
		let id = record.id.clone();
		self.records
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(record);
		id
	}

	/// Inserts a record under a known id.
	pub fn insert_with_id(
		&self,
		id: impl Into<RecordId>,
		object_type: impl Into<String>,
		fields: Map<String, Value>,
	) {
		let mut record = new_record(object_type.into(), fields);
		record.id = id.into();
		self.records
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(record);
	}

	#[must_use]
	pub fn record(&self, id: &RecordId) -> Option<Row> {
		self.records
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(id)
	}

	/// Receives every batch of ids announced through [`RecordUpdateChannel`].
	#[must_use]
	pub fn record_updates(&self) -> broadcast::Receiver<Vec<RecordId>> {
		self.updates_tx.subscribe()
	}

	pub fn set_unreachable(&self, unreachable: bool) {
		self.faults().unreachable = unreachable;
	}

	pub fn fail_query(&self, query: impl Into<String>) {
		self.faults().failing_queries.insert(query.into());
	}

	pub fn heal_query(&self, query: &str) {
		self.faults().failing_queries.remove(query);
	}

	/// Rejects every write with `error` until healed with `None`.
	pub fn fail_writes(&self, error: Option<TransportError>) {
		self.faults().failing_writes = error;
	}

	fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
		self.faults.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn round_trip(&self) -> Result<(), TransportError> {
		if let Some(latency) = self.latency {
			tokio::time::sleep(latency).await;
		}

		if self.faults().unreachable {
			return Err(TransportError::unreachable("connection refused"));
		}

		Ok(())
	}

	fn resolve(
		&self,
		query: &QueryDescriptor,
		variables: &ParameterSnapshot,
	) -> Result<RowSet, TransportError> {
		match query {
			QueryDescriptor::Named { name } => {
				let resolver = self
					.resolvers
					.read()
					.unwrap_or_else(PoisonError::into_inner)
					.get(name)
					.cloned()
					.ok_or_else(|| {
						TransportError::rejected(400, format!("Unknown query: {name}"))
					})?;

				resolver(
					&self.records.read().unwrap_or_else(PoisonError::into_inner),
					variables,
				)
			}

			QueryDescriptor::RelatedListBatch {
				parent_variable,
				lists,
			} => {
				let parent = variables.get_str(parent_variable).ok_or_else(|| {
					TransportError::rejected(
						400,
						format!("Missing required variable: {parent_variable}"),
					)
				})?;

				let relationships = self
					.relationships
					.read()
					.unwrap_or_else(PoisonError::into_inner);

				let lists = lists
					.iter()
					.map(|spec| {
						relationships
							.get(&spec.related_list_id)
							.map(|relationship| (relationship.clone(), spec))
							.ok_or_else(|| {
								TransportError::rejected(
									400,
									format!("Unknown related list: {}", spec.related_list_id),
								)
							})
					})
					.collect::<Result<Vec<_>, _>>()?;

				Ok(records::related_lists(
					&self.records.read().unwrap_or_else(PoisonError::into_inner),
					parent,
					&lists,
				))
			}
		}
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryStore")
			.field(
				"records",
				&self.records.read().unwrap_or_else(PoisonError::into_inner).len(),
			)
			.field("latency", &self.latency)
			.finish_non_exhaustive()
	}
}

fn new_record(object_type: String, mut fields: Map<String, Value>) -> Record {
	// Compound name, as the store derives it for people
	if !fields.contains_key("Name") {
		let name = ["FirstName", "LastName"]
			.into_iter()
			.filter_map(|field| fields.get(field).and_then(Value::as_str))
			.collect::<Vec<_>>()
			.join(" ");

		if !name.is_empty() {
			fields.insert("Name".to_string(), Value::String(name));
		}
	}

	Record {
		id: Uuid::new_v4().to_string().into(),
		object_type,
		fields,
	}
}

#[async_trait]
impl QueryTransport for MemoryStore {
	#[instrument(skip_all, fields(query = %query.label()))]
	async fn execute(
		&self,
		query: &QueryDescriptor,
		variables: &ParameterSnapshot,
	) -> Result<RowSet, TransportError> {
		self.round_trip().await?;

		let label = query.label();
		if self.faults().failing_queries.contains(&label) {
			warn!("Injected failure");
			return Err(TransportError::rejected(500, format!("{label} failed")));
		}

		let rows = self.resolve(query, variables)?;
		trace!(rows = rows.len(), "Resolved query");

		Ok(rows)
	}
}

#[async_trait]
impl RecordWriteTransport for MemoryStore {
	#[instrument(skip(self, fields))]
	async fn write(
		&self,
		object_type: &str,
		fields: Map<String, Value>,
	) -> Result<RecordHandle, TransportError> {
		self.round_trip().await?;

		if let Some(e) = self.faults().failing_writes.clone() {
			return Err(e);
		}

		let missing = self
			.required_fields
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(object_type)
			.into_iter()
			.flatten()
			.filter(|field| {
				fields
					.get(field.as_str())
					.map_or(true, |value| value.is_null() || value == "")
			})
			.cloned()
			.collect::<Vec<_>>();

		if !missing.is_empty() {
			return Err(TransportError::rejected(
				400,
				format!("Required fields are missing: [{}]", missing.join(", ")),
			));
		}

		let record = new_record(object_type.to_string(), fields);
		let handle = RecordHandle {
			id: record.id.clone(),
			object_type: record.object_type.clone(),
			fields: record.fields.clone(),
		};

		self.records
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(record);

		debug!(record_id = %handle.id, "Record written");

		Ok(handle)
	}
}

#[async_trait]
impl RecordUpdateChannel for MemoryStore {
	async fn record_updates_available(&self, ids: &[RecordId]) -> Result<(), TransportError> {
		self.round_trip().await?;

		// Nobody listening is fine
		if self.updates_tx.send(ids.to_vec()).is_err() {
			trace!(?ids, "No list listening for record updates");
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tracing_test::traced_test;
	use wb_core::RelatedListSpec;

	use super::*;

	fn fields(value: Value) -> Map<String, Value> {
		match value {
			Value::Object(map) => map,
			_ => Map::new(),
		}
	}

	fn store() -> MemoryStore {
		let store = MemoryStore::new();
		store.insert_with_id("001A", "Account", fields(json!({ "Name": "Acme" })));
		store.register_related_list("Contacts", Relationship::new("Contact", "AccountId"));
		store.require_fields("Contact", ["LastName"]);
		store.register_query("accountName", |records, variables| {
			let id = RecordId::from(variables.get_str("recordId").unwrap_or_default());
			Ok(records.get(&id).into_iter().collect())
		});
		store
	}

	#[tokio::test]
	#[traced_test]
	async fn named_query_uses_its_resolver() {
		let store = store();

		let rows = store
			.execute(
				&QueryDescriptor::named("accountName"),
				&ParameterSnapshot::new().with("recordId", "001A"),
			)
			.await
			.expect("resolved");

		assert_eq!(rows[0]["Name"], json!("Acme"));

		assert!(matches!(
			store
				.execute(&QueryDescriptor::named("nope"), &ParameterSnapshot::new())
				.await,
			Err(TransportError::Rejected { status: 400, .. })
		));
	}

	#[tokio::test]
	#[traced_test]
	async fn written_contact_shows_in_related_list() {
		let store = store();
		let query = QueryDescriptor::related_lists(
			"recordId",
			[RelatedListSpec::new("Contacts", ["Contact.Name"])],
		);
		let variables = ParameterSnapshot::new().with("recordId", "001A");

		let record = store
			.write(
				"Contact",
				fields(json!({
					"FirstName": "ab12c",
					"LastName": "Last Name",
					"AccountId": "001A",
				})),
			)
			.await
			.expect("written");

		assert_eq!(record.display_name(), "ab12c Last Name");

		let rows = store.execute(&query, &variables).await.expect("resolved");
		assert_eq!(rows[0]["relatedListId"], json!("Contacts"));
		assert_eq!(rows[0]["count"], json!(1));
		assert_eq!(
			rows[0]["records"][0],
			json!({ "Id": record.id, "Name": "ab12c Last Name" })
		);
	}

	#[tokio::test]
	#[traced_test]
	async fn missing_required_field_is_rejected() {
		let store = store();

		let err = store
			.write("Contact", fields(json!({ "FirstName": "x" })))
			.await
			.expect_err("rejected");

		assert_eq!(err.message(), "Required fields are missing: [LastName]");
		assert_eq!(
			store
				.records
				.read()
				.unwrap_or_else(PoisonError::into_inner)
				.len(),
			1
		);
	}

	#[tokio::test]
	#[traced_test]
	async fn injected_faults() {
		let store = store();
		let query = QueryDescriptor::named("accountName");
		let variables = ParameterSnapshot::new().with("recordId", "001A");

		store.fail_query("accountName");
		assert!(store.execute(&query, &variables).await.is_err());
		store.heal_query("accountName");
		assert!(store.execute(&query, &variables).await.is_ok());

		store.set_unreachable(true);
		assert!(matches!(
			store.execute(&query, &variables).await,
			Err(TransportError::Unreachable { .. })
		));
	}

	#[tokio::test]
	#[traced_test]
	async fn record_updates_reach_listeners() {
		let store = store();
		let mut updates = store.record_updates();

		store
			.record_updates_available(&["003A".into(), "001A".into()])
			.await
			.expect("announced");

		assert_eq!(
			updates.recv().await.expect("announcement"),
			vec![RecordId::from("003A"), RecordId::from("001A")]
		);
	}
}
