//! Reactive query bindings.
//!
//! A [`ReactiveBinding`] declares what a component reads: a query and a function from
//! the component's [`Attributes`] to the query variables. Mounting it in a host node
//! yields a [`Subscription`], which keeps its envelope current as attributes change and
//! takes part in every refresh broadcast on the host's scope.

use std::sync::{Arc, Weak};

use wb_utils::AbortOnDrop;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
	cache::ResultCache,
	context::Context,
	envelope::ResultEnvelope,
	error::RegistrationError,
	params::{AttributeMap, Attributes, ParameterSnapshot, VariablesFn},
	refresh::{
		HostNode, PendingRefresh, RefreshCoordinator, RefreshHandler, RefreshOutcome,
		RefreshRegistration, RefreshToken,
	},
	transport::QueryDescriptor,
};

/// A data requirement, not yet tied to any component instance.
#[derive(Clone)]
pub struct ReactiveBinding {
	query: QueryDescriptor,
	variables: Arc<VariablesFn>,
}

impl ReactiveBinding {
	pub fn new(
		query: QueryDescriptor,
		variables: impl Fn(&AttributeMap) -> ParameterSnapshot + Send + Sync + 'static,
	) -> Self {
		Self {
			query,
			variables: Arc::new(variables),
		}
	}

	#[must_use]
	pub const fn query(&self) -> &QueryDescriptor {
		&self.query
	}

	/// Fetches the query for the current attributes, then keeps following them.
	///
	/// Returns once the first envelope is committed, so the subscription always has a
	/// result to render. Failing to register with the coordinator does not fail the
	/// mount: the subscription still works, but broadcasts won't reach it until
	/// [`Subscription::retry_registration`] succeeds.
	#[instrument(skip_all, fields(query = %self.query.label(), host_id = %host.id()))]
	pub async fn mount(self, ctx: &Context, host: &HostNode, attributes: &Attributes) -> Subscription {
		let Self { query, variables } = self;

		// Subscribe before reading, a change landing during the first fetch must not be missed
		let mut attributes_rx = attributes.subscribe();
		let snapshot = variables(&attributes_rx.borrow_and_update());

		let cache = Arc::new(ResultCache::load(ctx.fetcher.clone(), query, snapshot).await);

		let watcher = AbortOnDrop(tokio::spawn({
			let cache = Arc::clone(&cache);
			async move {
				while attributes_rx.changed().await.is_ok() {
					let snapshot = variables(&attributes_rx.borrow_and_update());
					if cache.update_variables(snapshot).await.is_some() {
						debug!(query = %cache.query().label(), "Attributes changed, fetching again");
					}
				}

				debug!(query = %cache.query().label(), "Attributes gone, watcher stopped");
			}
		}));

		let mut subscription = Subscription {
			id: Uuid::new_v4(),
			host: host.clone(),
			coordinator: ctx.coordinator.clone(),
			log_outcomes: ctx.config.refresh.log_outcomes,
			cache,
			registration: None,
			_watcher: watcher,
		};

		if let Err(e) = subscription.retry_registration() {
			warn!("Subscription mounted without refresh registration: {e}");
		}

		subscription
	}
}

impl std::fmt::Debug for ReactiveBinding {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReactiveBinding")
			.field("query", &self.query)
			.finish_non_exhaustive()
	}
}

/// Refresh handler of one subscription. Holds the cache weakly: the coordinator never
/// keeps an unmounted subscription's state alive.
struct SubscriptionHandler {
	subscription_id: Uuid,
	cache: Weak<ResultCache>,
	log_outcomes: bool,
}

#[async_trait]
impl RefreshHandler for SubscriptionHandler {
	async fn refresh(&self, pending: PendingRefresh) -> RefreshOutcome {
		let Some(cache) = self.cache.upgrade() else {
			return RefreshOutcome::Error;
		};

		if self.log_outcomes {
			tokio::spawn(log_outcome(self.subscription_id, pending));
		}

		RefreshOutcome::from(&*cache.refresh().await)
	}
}

async fn log_outcome(subscription_id: Uuid, pending: PendingRefresh) {
	let scope = pending.scope().clone();

	match pending.outcome().await {
		RefreshOutcome::Complete => info!(%subscription_id, %scope, "Done!"),
		RefreshOutcome::CompleteWithErrors => {
			warn!(%subscription_id, %scope, "Refresh completed with errors");
		}
		RefreshOutcome::Error => error!(%subscription_id, %scope, "Refresh failed"),
	}
}

/// One live query instance, owned by the component that mounted it.
///
/// Dropping it unregisters it from the coordinator and stops following attributes. A
/// fetch already running completes, but nobody sees its result.
pub struct Subscription {
	id: Uuid,
	host: HostNode,
	coordinator: RefreshCoordinator,
	log_outcomes: bool,
	cache: Arc<ResultCache>,
	registration: Option<RefreshRegistration>,
	_watcher: AbortOnDrop<()>,
}

impl Subscription {
	/// Identity of the owning component instance.
	#[must_use]
	pub const fn id(&self) -> Uuid {
		self.id
	}

	#[must_use]
	pub const fn host(&self) -> &HostNode {
		&self.host
	}

	#[must_use]
	pub fn query(&self) -> &QueryDescriptor {
		self.cache.query()
	}

	pub(crate) fn cache(&self) -> Weak<ResultCache> {
		Arc::downgrade(&self.cache)
	}

	/// Last known envelope, without waiting.
	#[must_use]
	pub fn current_result(&self) -> Arc<ResultEnvelope> {
		self.cache.current()
	}

	/// Variables the latest fetch was issued with.
	pub async fn variables(&self) -> ParameterSnapshot {
		self.cache.variables().await
	}

	/// Re-runs the query with its current variables, joining a fetch already running.
	#[instrument(skip(self), fields(subscription_id = %self.id, query = %self.query().label()))]
	pub async fn refresh(&self) -> Arc<ResultEnvelope> {
		self.cache.refresh().await
	}

	/// Waits for the next envelope to be committed and returns it.
	pub async fn changed(&self) -> Arc<ResultEnvelope> {
		let mut rx = self.cache.watch();
		// The cache, and so the sender, lives as long as `self`
		rx.changed().await.ok();
		let envelope = Arc::clone(&rx.borrow());
		envelope
	}

	/// Receiver woken on every committed envelope, for renderers driving their own loop.
	#[must_use]
	pub fn watch(&self) -> watch::Receiver<Arc<ResultEnvelope>> {
		self.cache.watch()
	}

	#[must_use]
	pub fn registration_token(&self) -> Option<RefreshToken> {
		self.registration.as_ref().map(RefreshRegistration::token)
	}

	#[must_use]
	pub fn is_registered(&self) -> bool {
		self.registration_token()
			.is_some_and(|token| self.coordinator.is_registered(token))
	}

	/// Registers with the coordinator, unless already registered.
	pub fn retry_registration(&mut self) -> Result<RefreshToken, RegistrationError> {
		if let Some(token) = self.registration_token() {
			if self.coordinator.is_registered(token) {
				return Ok(token);
			}
		}

		let registration = self.coordinator.register(
			&self.host,
			Arc::new(SubscriptionHandler {
				subscription_id: self.id,
				cache: Arc::downgrade(&self.cache),
				log_outcomes: self.log_outcomes,
			}),
		)?;

		let token = registration.token();
		self.registration = Some(registration);

		Ok(token)
	}

	/// Same as dropping, spelled out.
	pub fn unmount(self) {
		debug!(subscription_id = %self.id, "Unmounting subscription");
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("query", self.query())
			.field("registration", &self.registration_token())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use serde_json::{json, Map};

	use super::*;
	use crate::{
		config::BindingConfig,
		envelope::RowSet,
		error::TransportError,
		params::select_attributes,
		refresh::HostScope,
		transport::{QueryTransport, RecordHandle, RecordWriteTransport},
	};

	/// Echoes the `recordId` variable back as a single row.
	#[derive(Default)]
	struct EchoStore {
		calls: AtomicUsize,
	}

	#[async_trait]
	impl QueryTransport for EchoStore {
		async fn execute(
			&self,
			_: &QueryDescriptor,
			variables: &ParameterSnapshot,
		) -> Result<RowSet, TransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			let mut row = Map::new();
			row.insert(
				"recordId".to_string(),
				variables.get("recordId").cloned().unwrap_or_default(),
			);
			Ok(vec![row])
		}
	}

	#[async_trait]
	impl RecordWriteTransport for EchoStore {
		async fn write(
			&self,
			_: &str,
			_: Map<String, serde_json::Value>,
		) -> Result<RecordHandle, TransportError> {
			Err(TransportError::rejected(400, "read only"))
		}
	}

	fn ctx(store: &Arc<EchoStore>) -> Context {
		Context::new(
			Arc::clone(store) as Arc<dyn QueryTransport>,
			Arc::clone(store) as Arc<dyn RecordWriteTransport>,
			BindingConfig::default(),
		)
	}

	fn binding() -> ReactiveBinding {
		ReactiveBinding::new(
			QueryDescriptor::named("relatedRecords"),
			select_attributes(&["recordId"]),
		)
	}

	#[tokio::test]
	async fn mount_fetches_and_registers() {
		let store = Arc::new(EchoStore::default());
		let ctx = ctx(&store);
		let host = HostNode::root(HostScope::new("account:001A"));
		let attributes = Attributes::new([("recordId", json!("001A"))]);

		let subscription = binding().mount(&ctx, &host, &attributes).await;

		assert_eq!(
			subscription.current_result().data().expect("success")[0]["recordId"],
			json!("001A")
		);
		assert!(subscription.is_registered());
		assert_eq!(ctx.coordinator.registrations(host.scope()), 1);
		assert_eq!(store.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn attribute_change_refetches() {
		let store = Arc::new(EchoStore::default());
		let ctx = ctx(&store);
		let host = HostNode::root(HostScope::new("account:001A"));
		let attributes = Attributes::new([("recordId", json!("001A"))]);

		let subscription = binding().mount(&ctx, &host, &attributes).await;

		let mut rx = subscription.watch();
		assert!(attributes.set("recordId", json!("001B")));
		rx.changed().await.expect("cache alive");

		assert_eq!(
			rx.borrow().data().expect("success")[0]["recordId"],
			json!("001B")
		);
		assert_eq!(
			subscription.variables().await,
			ParameterSnapshot::new().with("recordId", "001B")
		);
	}

	#[tokio::test]
	async fn unrelated_attribute_does_not_refetch() {
		let store = Arc::new(EchoStore::default());
		let ctx = ctx(&store);
		let host = HostNode::root(HostScope::new("account:001A"));
		let attributes = Attributes::new([("recordId", json!("001A"))]);

		let _subscription = binding().mount(&ctx, &host, &attributes).await;

		attributes.set("theme", json!("dark"));
		for _ in 0..10 {
			tokio::task::yield_now().await;
		}

		assert_eq!(store.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn detached_mount_still_fetches_and_can_retry() {
		let store = Arc::new(EchoStore::default());
		let ctx = ctx(&store);
		let host = HostNode::root(HostScope::new("account:001A"));
		let attributes = Attributes::new([("recordId", json!("001A"))]);
		host.detach();

		let mut subscription = binding().mount(&ctx, &host, &attributes).await;

		assert!(subscription.current_result().is_success());
		assert!(!subscription.is_registered());
		assert_eq!(
			subscription.retry_registration(),
			Err(RegistrationError::HostDetached)
		);

		host.attach();
		let token = subscription.retry_registration().expect("live host");
		assert_eq!(subscription.retry_registration(), Ok(token));
		assert_eq!(ctx.coordinator.registrations(host.scope()), 1);
	}

	#[tokio::test]
	async fn unmount_unregisters() {
		let store = Arc::new(EchoStore::default());
		let ctx = ctx(&store);
		let host = HostNode::root(HostScope::new("account:001A"));
		let attributes = Attributes::new([("recordId", json!("001A"))]);

		let subscription = binding().mount(&ctx, &host, &attributes).await;
		subscription.unmount();

		assert_eq!(ctx.coordinator.registrations(host.scope()), 0);
		assert_eq!(
			ctx.coordinator.dispatch_refresh(host.scope()).await,
			RefreshOutcome::Complete
		);
		assert_eq!(store.calls.load(Ordering::SeqCst), 1);
	}
}
