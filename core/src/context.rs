//! Shared context providing access to the binding layer's collaborators.

use std::sync::Arc;

use crate::{
	config::BindingConfig,
	fetcher::DataFetcher,
	notifications::{NotificationChannel, TracingNotifications},
	refresh::RefreshCoordinator,
	transport::{QueryTransport, RecordUpdateChannel, RecordWriteTransport},
};

/// Everything a host hands to its subscriptions and notifiers. Cheap to clone.
#[derive(Clone)]
pub struct Context {
	pub fetcher: DataFetcher,
	pub coordinator: RefreshCoordinator,
	pub writer: Arc<dyn RecordWriteTransport>,
	// Only hosts with list UIs outside of subscriptions have one
	pub record_updates: Option<Arc<dyn RecordUpdateChannel>>,
	pub notifications: Arc<dyn NotificationChannel>,
	pub config: Arc<BindingConfig>,
}

impl Context {
	/// Create a new context with a fresh coordinator, logging notifications through
	/// `tracing`.
	pub fn new(
		queries: Arc<dyn QueryTransport>,
		writer: Arc<dyn RecordWriteTransport>,
		config: BindingConfig,
	) -> Self {
		Self {
			fetcher: DataFetcher::new(queries),
			coordinator: RefreshCoordinator::new(),
			writer,
			record_updates: None,
			notifications: Arc::new(TracingNotifications),
			config: Arc::new(config),
		}
	}

	/// Context backed by a single store serving queries, writes and record updates.
	pub fn with_store<S>(store: Arc<S>, config: BindingConfig) -> Self
	where
		S: QueryTransport + RecordWriteTransport + RecordUpdateChannel,
	{
		let queries: Arc<dyn QueryTransport> = store.clone();
		let writer: Arc<dyn RecordWriteTransport> = store.clone();

		Self::new(queries, writer, config).with_record_updates(store)
	}

	#[must_use]
	pub fn with_notifications(mut self, notifications: Arc<dyn NotificationChannel>) -> Self {
		self.notifications = notifications;
		self
	}

	#[must_use]
	pub fn with_record_updates(mut self, record_updates: Arc<dyn RecordUpdateChannel>) -> Self {
		self.record_updates = Some(record_updates);
		self
	}

	#[must_use]
	pub fn with_coordinator(mut self, coordinator: RefreshCoordinator) -> Self {
		self.coordinator = coordinator;
		self
	}
}

impl std::fmt::Debug for Context {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Context")
			.field("coordinator", &self.coordinator)
			.field("record_updates", &self.record_updates.is_some())
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}
