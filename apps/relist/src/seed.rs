use wb_core::{RecordId, RowSet};
use wb_memory_store::{MemoryStore, Relationship};

use serde_json::{json, Map, Value};

pub const ACCOUNT_SUMMARY: &str = "accountSummary";

fn fields(value: Value) -> Map<String, Value> {
	match value {
		Value::Object(map) => map,
		_ => Map::new(),
	}
}

/// A store with one account, a few contacts and cases, and the queries the account
/// page reads.
pub fn store(account: &RecordId) -> MemoryStore {
	let store = MemoryStore::new();

	store.insert_with_id(
		account.clone(),
		"Account",
		fields(json!({ "Name": "Acme Corporation", "Industry": "Manufacturing" })),
	);

	for (first, last) in [("Rose", "Gonzalez"), ("Sean", "Forbes"), ("Jack", "Rogers")] {
		store.insert(
			"Contact",
			fields(json!({ "FirstName": first, "LastName": last, "AccountId": account })),
		);
	}

	for (subject, priority) in [("Seeking guidance on electrical wiring", 2), ("Power outage", 1)] {
		store.insert(
			"Case",
			fields(json!({ "Subject": subject, "Priority": priority, "AccountId": account })),
		);
	}

	store.register_related_list("Contacts", Relationship::new("Contact", "AccountId"));
	store.register_related_list("Cases", Relationship::new("Case", "AccountId"));
	store.require_fields("Contact", ["LastName"]);

	store.register_query(ACCOUNT_SUMMARY, |records, variables| {
		let id = RecordId::from(variables.get_str("recordId").unwrap_or_default());

		let Some(mut account) = records.get(&id) else {
			return Ok(RowSet::new());
		};

		let contacts = records
			.of_type("Contact")
			.filter(|contact| contact.get("AccountId").and_then(Value::as_str) == Some(id.as_str()))
			.count();
		account.insert("ContactCount".to_string(), json!(contacts));

		Ok(vec![account])
	});

	store
}
