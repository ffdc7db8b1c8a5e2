//! The account record page: a summary card and the related lists under it.

use wb_core::{
	select_attributes, Attributes, Context, HostNode, HostScope, QueryDescriptor,
	ReactiveBinding, RecordId, RelatedListSpec, ResultEnvelope, Subscription,
};

use serde_json::{json, Value};

use crate::seed::ACCOUNT_SUMMARY;

pub struct AccountPage {
	pub host: HostNode,
	pub attributes: Attributes,
	pub summary: Subscription,
	pub related: Subscription,
}

impl AccountPage {
	/// Mounts both components of the page, each in its own node of the page.
	pub async fn mount(ctx: &Context, account: &RecordId) -> Self {
		let host = HostNode::root(HostScope::new(format!("account:{account}")));
		let attributes = Attributes::new([("recordId", json!(account))]);

		let summary = ReactiveBinding::new(
			QueryDescriptor::named(ACCOUNT_SUMMARY),
			select_attributes(&["recordId"]),
		)
		.mount(ctx, &host.child(), &attributes)
		.await;

		let related = ReactiveBinding::new(
			QueryDescriptor::related_lists(
				"recordId",
				[
					RelatedListSpec::new("Contacts", ["Contact.Name", "Contact.Email"])
						.sorted_by(["Contact.Name"]),
					RelatedListSpec::new("Cases", ["Case.Subject", "Case.Priority"])
						.sorted_by(["Case.Priority"]),
				],
			),
			select_attributes(&["recordId"]),
		)
		.mount(ctx, &host.child(), &attributes)
		.await;

		Self {
			host,
			attributes,
			summary,
			related,
		}
	}

	pub fn account(&self) -> RecordId {
		self.attributes
			.get("recordId")
			.and_then(|id| id.as_str().map(RecordId::from))
			.unwrap_or_else(|| RecordId::from(""))
	}

	pub fn render(&self) -> String {
		let mut out = String::new();

		match &*self.summary.current_result() {
			ResultEnvelope::Success(rows) => {
				for row in rows {
					out.push_str(&format!(
						"{} ({}), {} contacts\n",
						text(row.get("Name")),
						text(row.get("Industry")),
						text(row.get("ContactCount")),
					));
				}
			}
			ResultEnvelope::Failure(e) => out.push_str(&format!("Account unavailable: {e}\n")),
		}

		match &*self.related.current_result() {
			ResultEnvelope::Success(lists) => {
				for list in lists {
					out.push_str(&format!(
						"\n{} ({})\n",
						text(list.get("relatedListId")),
						text(list.get("count")),
					));

					for record in list
						.get("records")
						.and_then(Value::as_array)
						.into_iter()
						.flatten()
					{
						let label = record
							.get("Name")
							.or_else(|| record.get("Subject"))
							.map_or_else(String::new, |value| text(Some(value)));
						out.push_str(&format!("  - {label}\n"));
					}
				}
			}
			ResultEnvelope::Failure(e) => {
				out.push_str(&format!("\nRelated lists unavailable: {e}\n"));
			}
		}

		out
	}
}

fn text(value: Option<&Value>) -> String {
	match value {
		Some(Value::String(s)) => s.clone(),
		Some(Value::Null) | None => "-".to_string(),
		Some(value) => value.to_string(),
	}
}
