use std::{cmp::Ordering, collections::BTreeMap};

use wb_core::{RecordId, RelatedListSpec, Row, RowSet};

use serde_json::{json, Value};

/// How a related list hangs off its parent: records of `object_type` whose
/// `lookup_field` holds the parent id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
	pub object_type: String,
	pub lookup_field: String,
}

impl Relationship {
	pub fn new(object_type: impl Into<String>, lookup_field: impl Into<String>) -> Self {
		Self {
			object_type: object_type.into(),
			lookup_field: lookup_field.into(),
		}
	}
}

#[derive(Debug, Clone)]
pub(crate) struct Record {
	pub(crate) id: RecordId,
	pub(crate) object_type: String,
	pub(crate) fields: Row,
}

/// Every record of the store, grouped by object type in insertion order.
#[derive(Debug, Default)]
pub struct Records {
	by_type: BTreeMap<String, Vec<Record>>,
}

impl Records {
	pub(crate) fn insert(&mut self, record: Record) {
		self.by_type
			.entry(record.object_type.clone())
			.or_default()
			.push(record);
	}

	/// Fields of every record of `object_type`, each including its `Id`.
	pub fn of_type<'a>(&'a self, object_type: &str) -> impl Iterator<Item = Row> + 'a {
		self.by_type
			.get(object_type)
			.into_iter()
			.flatten()
			.map(Record::row)
	}

	#[must_use]
	pub fn get(&self, id: &RecordId) -> Option<Row> {
		self.by_type
			.values()
			.flatten()
			.find(|record| &record.id == id)
			.map(Record::row)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.by_type.values().map(Vec::len).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// One row per list: `relatedListId`, `count` and the matching `records`, with only
	/// the requested fields, ordered by `sortBy`.
	pub(crate) fn related_list(
		&self,
		parent: &str,
		relationship: &Relationship,
		spec: &RelatedListSpec,
	) -> Row {
		let mut records = self
			.by_type
			.get(&relationship.object_type)
			.into_iter()
			.flatten()
			.filter(|record| {
				record.fields.get(&relationship.lookup_field).and_then(Value::as_str)
					== Some(parent)
			})
			.collect::<Vec<_>>();

		records.sort_by(|a, b| compare_by(&spec.sort_by, &a.fields, &b.fields));

		let records = records
			.into_iter()
			.map(|record| {
				let mut row = Row::new();
				row.insert("Id".to_string(), json!(record.id));
				for field in &spec.fields {
					let name = field_name(field);
					if name == "Id" {
						continue;
					}
					row.insert(
						name.to_string(),
						record.fields.get(name).cloned().unwrap_or(Value::Null),
					);
				}
				Value::Object(row)
			})
			.collect::<Vec<_>>();

		let mut row = Row::new();
		row.insert("relatedListId".to_string(), json!(spec.related_list_id));
		row.insert("count".to_string(), json!(records.len()));
		row.insert("records".to_string(), Value::Array(records));
		row
	}
}

impl Record {
	fn row(&self) -> Row {
		let mut row = Row::new();
		row.insert("Id".to_string(), json!(self.id));
		row.extend(self.fields.clone());
		row
	}
}

/// `Contact.Name` and `Name` both name the `Name` field.
fn field_name(field: &str) -> &str {
	field.rsplit_once('.').map_or(field, |(_, name)| name)
}

/// Compares on each sort key in turn; a `-` prefix sorts that key descending.
fn compare_by(sort_by: &[String], a: &Row, b: &Row) -> Ordering {
	sort_by
		.iter()
		.map(|key| {
			let (key, descending) = key
				.strip_prefix('-')
				.map_or((key.as_str(), false), |key| (key, true));
			let key = field_name(key);
			let ordering = compare_values(a.get(key), b.get(key));

			if descending {
				ordering.reverse()
			} else {
				ordering
			}
		})
		.find(|ordering| ordering.is_ne())
		.unwrap_or(Ordering::Equal)
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a, b) {
		(Some(Value::Number(a)), Some(Value::Number(b))) => a
			.as_f64()
			.partial_cmp(&b.as_f64())
			.unwrap_or(Ordering::Equal),
		(Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
		// Missing values go last
		(None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
		(None | Some(Value::Null), _) => Ordering::Greater,
		(_, None | Some(Value::Null)) => Ordering::Less,
		(Some(a), Some(b)) => a.to_string().cmp(&b.to_string()),
	}
}

/// Rows of one related list batch, in the order the lists were requested.
pub(crate) fn related_lists(
	records: &Records,
	parent: &str,
	lists: &[(Relationship, &RelatedListSpec)],
) -> RowSet {
	lists
		.iter()
		.map(|(relationship, spec)| records.related_list(parent, relationship, spec))
		.collect()
}
