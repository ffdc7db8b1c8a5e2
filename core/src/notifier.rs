//! Propagation of local writes to everything that shows the written records.

use std::{
	future::Future,
	pin::Pin,
	sync::{Arc, Weak},
	task::{Context as TaskContext, Poll},
};

use wb_utils::error::report_error;

use futures::{
	future::{join, join_all, BoxFuture, Shared},
	FutureExt,
};
use pin_project_lite::pin_project;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};

use crate::{
	binding::Subscription,
	cache::ResultCache,
	context::Context,
	error::TransportError,
	notifications::{Notification, NotificationKind},
	refresh::{HostNode, RefreshOutcome},
	transport::{RecordHandle, RecordId},
};

/// A record to create, optionally linked to the record it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
	pub object_type: String,
	pub fields: Map<String, Value>,
	pub parent: Option<RecordId>,
}

impl RecordDraft {
	pub fn new(object_type: impl Into<String>) -> Self {
		Self {
			object_type: object_type.into(),
			fields: Map::new(),
			parent: None,
		}
	}

	#[must_use]
	pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	/// Links the record to `parent` through the lookup field `field`, like `AccountId`
	/// on a contact.
	#[must_use]
	pub fn parent(mut self, field: impl Into<String>, parent: impl Into<RecordId>) -> Self {
		let parent = parent.into();
		self.fields
			.insert(field.into(), Value::String(parent.to_string()));
		self.parent = Some(parent);
		self
	}
}

pin_project! {
	/// Resolves to the aggregate outcome of every refresh path a write triggered.
	///
	/// The paths run on their own, dropping the handle doesn't cancel them.
	#[derive(Clone)]
	pub struct RefreshHandle {
		#[pin]
		outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
	}
}

impl RefreshHandle {
	fn spawn(paths: impl Future<Output = RefreshOutcome> + Send + 'static) -> Self {
		let handle = tokio::spawn(paths);

		Self {
			outcome: async move {
				handle.await.unwrap_or_else(|e| {
					error!("Refresh paths task ended abnormally: {e:#?}");
					RefreshOutcome::Error
				})
			}
			.boxed()
			.shared(),
		}
	}
}

impl Future for RefreshHandle {
	type Output = RefreshOutcome;

	fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
		self.project().outcome.poll(cx)
	}
}

impl std::fmt::Debug for RefreshHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RefreshHandle")
			.field("outcome", &self.outcome.peek())
			.finish()
	}
}

/// A confirmed write, plus the refreshes it set off.
#[derive(Debug)]
pub struct CreatedRecord {
	pub record: RecordHandle,
	pub refresh: RefreshHandle,
}

/// Writes records and makes sure every view of them catches up.
#[derive(Debug, Clone)]
pub struct MutationNotifier {
	ctx: Context,
}

impl MutationNotifier {
	#[must_use]
	pub const fn new(ctx: Context) -> Self {
		Self { ctx }
	}

	/// Creates a record, then refreshes whatever shows it.
	///
	/// Refreshes start only once the store confirmed the write. They are not awaited
	/// here: the success notification goes out first and the returned
	/// [`RefreshHandle`] resolves once they are done. A failed write notifies the
	/// error and refreshes nothing.
	#[instrument(skip_all, fields(scope = %host.scope(), object_type = %draft.object_type))]
	pub async fn create_record<'a>(
		&self,
		host: &HostNode,
		draft: RecordDraft,
		targets: impl IntoIterator<Item = &'a Subscription>,
	) -> Result<CreatedRecord, TransportError> {
		let RecordDraft {
			object_type,
			fields,
			parent,
		} = draft;

		let record = match report_error(
			"Failed to create record",
			self.ctx.writer.write(&object_type, fields).await,
		) {
			Ok(record) => record,
			Err(e) => {
				self.ctx
					.notifications
					.notify(Notification::error("Error creating record", e.message()));
				return Err(e);
			}
		};

		debug!(record_id = %record.id, "Record created");
		self.ctx.notifications.notify(Notification::success(
			"Success",
			format!(
				"{} created \"{}\"",
				record.object_type,
				record.display_name()
			),
		));

		let records = std::iter::once(record.id.clone()).chain(parent).collect();
		let refresh = self.trigger(
			host,
			records,
			targets.into_iter().map(Subscription::cache).collect(),
			self.ctx.config.notifier.broadcast_on_write,
		);

		Ok(CreatedRecord { record, refresh })
	}

	/// Refreshes everything on the host: announces `records` as updated, broadcasts
	/// on the host's scope and refreshes `targets` directly.
	#[instrument(skip_all, fields(scope = %host.scope()))]
	pub async fn refresh<'a>(
		&self,
		host: &HostNode,
		records: impl IntoIterator<Item = RecordId>,
		targets: impl IntoIterator<Item = &'a Subscription>,
	) -> RefreshOutcome {
		self.trigger(
			host,
			records.into_iter().collect(),
			targets.into_iter().map(Subscription::cache).collect(),
			true,
		)
		.await
	}

	fn trigger(
		&self,
		host: &HostNode,
		records: Vec<RecordId>,
		targets: Vec<Weak<ResultCache>>,
		broadcast: bool,
	) -> RefreshHandle {
		let config = &self.ctx.config.notifier;

		// Started right away so it runs alongside the other paths
		let broadcast = broadcast.then(|| {
			let coordinator = self.ctx.coordinator.clone();
			let scope = host.scope().clone();
			tokio::spawn(async move { coordinator.dispatch_refresh(&scope).await })
		});

		let record_updates = self
			.ctx
			.record_updates
			.clone()
			.filter(|_| config.notify_record_updates && !records.is_empty());

		let notifications = Arc::clone(&self.ctx.notifications);
		let await_then_notify = config.await_then_notify;

		RefreshHandle::spawn(async move {
			let direct = join_all(
				targets
					.iter()
					.filter_map(Weak::upgrade)
					.map(|cache| async move { RefreshOutcome::from(&*cache.refresh().await) }),
			);

			let announced = async {
				let channel = record_updates?;
				Some(match channel.record_updates_available(&records).await {
					Ok(()) => RefreshOutcome::Complete,
					Err(e) => {
						warn!(?records, "Failed to announce record updates: {e:#}");
						RefreshOutcome::Error
					}
				})
			};

			let (direct, announced) = join(direct, announced).await;
			let ran = !direct.is_empty() || announced.is_some();
			let awaited = RefreshOutcome::aggregate(direct.into_iter().chain(announced));

			// Nothing refreshed, nothing to report
			if await_then_notify && ran {
				notifications.notify(completion_notification(awaited));
			}

			let broadcast = match broadcast {
				Some(handle) => Some(handle.await.unwrap_or_else(|e| {
					error!("Refresh broadcast task ended abnormally: {e:#?}");
					RefreshOutcome::Error
				})),
				None => None,
			};

			RefreshOutcome::aggregate(std::iter::once(awaited).chain(broadcast))
		})
	}
}

fn completion_notification(outcome: RefreshOutcome) -> Notification {
	match outcome {
		RefreshOutcome::Complete => {
			Notification::success("Success", format!("Refresh Completed: {outcome}"))
		}
		RefreshOutcome::CompleteWithErrors => Notification::new(
			NotificationKind::Warning,
			"Warning",
			format!("Refresh Completed: {outcome}"),
		),
		RefreshOutcome::Error => Notification::error("Error", format!("Error: {outcome}")),
	}
}
