//! Boundary with the remote record store.
//!
//! The layer never talks to the network itself: queries, writes and record update
//! announcements go through these traits, so any store (or a test double) can sit
//! behind a subscription.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{envelope::RowSet, error::TransportError, params::ParameterSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RecordId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl From<String> for RecordId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

/// One related list to read in a batch: which list hangs off the parent, which fields
/// to return and how to order the rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedListSpec {
	pub related_list_id: String,
	pub fields: Vec<String>,
	#[serde(default)]
	pub sort_by: Vec<String>,
}

impl RelatedListSpec {
	pub fn new(
		related_list_id: impl Into<String>,
		fields: impl IntoIterator<Item = impl Into<String>>,
	) -> Self {
		Self {
			related_list_id: related_list_id.into(),
			fields: fields.into_iter().map(Into::into).collect(),
			sort_by: Vec::new(),
		}
	}

	#[must_use]
	pub fn sorted_by(mut self, sort_by: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.sort_by = sort_by.into_iter().map(Into::into).collect();
		self
	}
}

/// What a subscription reads. Together with a [`ParameterSnapshot`] it is everything
/// needed to re-run the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueryDescriptor {
	/// A query the store knows by name; the snapshot provides its variables.
	Named { name: String },
	/// Several related lists of the record whose id is in `parent_variable`.
	#[serde(rename_all = "camelCase")]
	RelatedListBatch {
		parent_variable: String,
		lists: Vec<RelatedListSpec>,
	},
}

impl QueryDescriptor {
	pub fn named(name: impl Into<String>) -> Self {
		Self::Named { name: name.into() }
	}

	pub fn related_lists(
		parent_variable: impl Into<String>,
		lists: impl IntoIterator<Item = RelatedListSpec>,
	) -> Self {
		Self::RelatedListBatch {
			parent_variable: parent_variable.into(),
			lists: lists.into_iter().collect(),
		}
	}

	/// Short label for logs.
	#[must_use]
	pub fn label(&self) -> String {
		match self {
			Self::Named { name } => name.clone(),
			Self::RelatedListBatch { lists, .. } => format!(
				"relatedLists[{}]",
				lists
					.iter()
					.map(|list| list.related_list_id.as_str())
					.collect::<Vec<_>>()
					.join(",")
			),
		}
	}
}

/// A record as confirmed by the store after a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHandle {
	pub id: RecordId,
	pub object_type: String,
	pub fields: Map<String, Value>,
}

impl RecordHandle {
	#[must_use]
	pub fn field_str(&self, field: &str) -> Option<&str> {
		self.fields.get(field).and_then(Value::as_str)
	}

	/// `Name` when the record has one, else `FirstName LastName`, else the id.
	#[must_use]
	pub fn display_name(&self) -> String {
		if let Some(name) = self.field_str("Name") {
			return name.to_string();
		}

		let parts = [self.field_str("FirstName"), self.field_str("LastName")]
			.into_iter()
			.flatten()
			.collect::<Vec<_>>();

		if parts.is_empty() {
			self.id.to_string()
		} else {
			parts.join(" ")
		}
	}
}

#[async_trait]
pub trait QueryTransport: Send + Sync + 'static {
	async fn execute(
		&self,
		query: &QueryDescriptor,
		variables: &ParameterSnapshot,
	) -> Result<RowSet, TransportError>;
}

#[async_trait]
pub trait RecordWriteTransport: Send + Sync + 'static {
	async fn write(
		&self,
		object_type: &str,
		fields: Map<String, Value>,
	) -> Result<RecordHandle, TransportError>;
}

/// Tells list UIs that are not driven by a subscription that records changed, so
/// they can reload them on their own terms.
#[async_trait]
pub trait RecordUpdateChannel: Send + Sync + 'static {
	async fn record_updates_available(&self, ids: &[RecordId]) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn handle(fields: Value) -> RecordHandle {
		RecordHandle {
			id: "003000000000001".into(),
			object_type: "Contact".to_string(),
			fields: match fields {
				Value::Object(map) => map,
				_ => Map::new(),
			},
		}
	}

	#[test]
	fn display_name_prefers_name_then_first_last() {
		assert_eq!(
			handle(json!({ "Name": "Acme", "FirstName": "x" })).display_name(),
			"Acme"
		);
		assert_eq!(
			handle(json!({ "FirstName": "ab12c", "LastName": "Last Name" })).display_name(),
			"ab12c Last Name"
		);
		assert_eq!(handle(json!({})).display_name(), "003000000000001");
	}

	#[test]
	fn related_list_batch_wire_shape() {
		let query = QueryDescriptor::related_lists(
			"recordId",
			[RelatedListSpec::new("Contacts", ["Contact.Name"]).sorted_by(["Name"])],
		);

		assert_eq!(
			serde_json::to_value(&query).expect("serializable"),
			json!({
				"kind": "relatedListBatch",
				"parentVariable": "recordId",
				"lists": [{
					"relatedListId": "Contacts",
					"fields": ["Contact.Name"],
					"sortBy": ["Name"],
				}],
			})
		);
		assert_eq!(query.label(), "relatedLists[Contacts]");
	}
}
