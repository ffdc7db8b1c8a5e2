//! Host wide refresh broadcasting.
//!
//! Subscriptions register a handler under the scope of the host node they are mounted
//! in. A dispatch on a scope runs every handler registered there exactly once, each
//! isolated from the others, and folds their contributions into one
//! [`RefreshOutcome`]. Registrations are capabilities: dropping the
//! [`RefreshRegistration`] guard unregisters the handler.

use std::{
	collections::HashMap,
	fmt,
	future::Future,
	panic::AssertUnwindSafe,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex, MutexGuard, PoisonError, Weak,
	},
};

use async_trait::async_trait;
use futures::{future::join_all, FutureExt};
use tokio::sync::watch;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::error::RegistrationError;

mod host;
mod outcome;

pub use host::{HostNode, HostScope};
pub use outcome::{PendingRefresh, RefreshOutcome};

/// Reacts to a broadcast refresh and reports how it went.
#[async_trait]
pub trait RefreshHandler: Send + Sync + 'static {
	async fn refresh(&self, pending: PendingRefresh) -> RefreshOutcome;
}

#[async_trait]
impl<F, Fut> RefreshHandler for F
where
	F: Fn(PendingRefresh) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = RefreshOutcome> + Send + 'static,
{
	async fn refresh(&self, pending: PendingRefresh) -> RefreshOutcome {
		self(pending).await
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefreshToken(u64);

impl fmt::Display for RefreshToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "refresh#{}", self.0)
	}
}

struct Registration {
	scope: HostScope,
	host_id: Uuid,
	handler: Arc<dyn RefreshHandler>,
}

struct Inner {
	registrations: Mutex<HashMap<RefreshToken, Registration>>,
	next_token: AtomicU64,
	closed: AtomicBool,
}

impl Inner {
	fn registrations(&self) -> MutexGuard<'_, HashMap<RefreshToken, Registration>> {
		self.registrations
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	fn is_registered(&self, token: RefreshToken) -> bool {
		self.registrations().contains_key(&token)
	}

	fn unregister(&self, token: RefreshToken) -> bool {
		let removed = self.registrations().remove(&token);

		if let Some(Registration { scope, host_id, .. }) = &removed {
			debug!(%token, %scope, %host_id, "Unregistered refresh handler");
		}

		removed.is_some()
	}
}

/// The host level refresh broadcaster. Cheap to clone, all clones share the same
/// registrations.
#[derive(Clone)]
pub struct RefreshCoordinator {
	inner: Arc<Inner>,
}

impl RefreshCoordinator {
	#[must_use]
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				registrations: Mutex::new(HashMap::new()),
				next_token: AtomicU64::new(1),
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Registers `handler` under the scope of `host`.
	///
	/// Fails when `host` is not part of a live tree or the coordinator was closed; no
	/// broadcast will reach the handler in that case.
	pub fn register(
		&self,
		host: &HostNode,
		handler: Arc<dyn RefreshHandler>,
	) -> Result<RefreshRegistration, RegistrationError> {
		if self.inner.closed.load(Ordering::Acquire) {
			return Err(RegistrationError::CoordinatorClosed);
		}

		if !host.is_live() {
			warn!(host_id = %host.id(), scope = %host.scope(), "Refusing registration for detached host node");
			return Err(RegistrationError::HostDetached);
		}

		let token = RefreshToken(self.inner.next_token.fetch_add(1, Ordering::Relaxed));

		self.inner.registrations().insert(
			token,
			Registration {
				scope: host.scope().clone(),
				host_id: host.id(),
				handler,
			},
		);

		debug!(%token, scope = %host.scope(), host_id = %host.id(), "Registered refresh handler");

		Ok(RefreshRegistration {
			token,
			coordinator: Arc::downgrade(&self.inner),
		})
	}

	/// Returns whether `token` was still registered. Calling it again is a no-op.
	pub fn unregister(&self, token: RefreshToken) -> bool {
		self.inner.unregister(token)
	}

	#[must_use]
	pub fn is_registered(&self, token: RefreshToken) -> bool {
		self.inner.is_registered(token)
	}

	/// Number of live registrations under `scope`.
	#[must_use]
	pub fn registrations(&self, scope: &HostScope) -> usize {
		self.inner
			.registrations()
			.values()
			.filter(|registration| &registration.scope == scope)
			.count()
	}

	/// Runs every handler registered under `scope` and aggregates their outcomes.
	///
	/// Handlers run concurrently. A panicking handler counts as an Error contribution
	/// without affecting its siblings. A handler unregistered before its turn is not
	/// invoked; one unregistered while running still finishes, but its contribution
	/// is dropped.
	#[instrument(skip_all, fields(%scope))]
	pub async fn dispatch_refresh(&self, scope: &HostScope) -> RefreshOutcome {
		if self.inner.closed.load(Ordering::Acquire) {
			error!("Refresh dispatched on a closed coordinator");
			return RefreshOutcome::Error;
		}

		let targets = self
			.inner
			.registrations()
			.iter()
			.filter(|(_, registration)| &registration.scope == scope)
			.map(|(token, registration)| (*token, Arc::clone(&registration.handler)))
			.collect::<Vec<_>>();

		if targets.is_empty() {
			debug!("No handlers registered, nothing to refresh");
			return RefreshOutcome::Complete;
		}

		let (outcome_tx, outcome_rx) = watch::channel(None);

		let contributions = join_all(targets.into_iter().map(|(token, handler)| {
			let pending = PendingRefresh::new(scope.clone(), outcome_rx.clone());
			let inner = Arc::clone(&self.inner);

			async move {
				if !inner.is_registered(token) {
					debug!(%token, "Handler unregistered before its turn, skipping");
					return None;
				}

				let contribution = AssertUnwindSafe(handler.refresh(pending))
					.catch_unwind()
					.await
					.unwrap_or_else(|_| {
						error!(%token, "Refresh handler panicked");
						RefreshOutcome::Error
					});

				if inner.is_registered(token) {
					Some(contribution)
				} else {
					debug!(%token, %contribution, "Handler unregistered while refreshing, dropping its outcome");
					None
				}
			}
		}))
		.await;

		let outcome = RefreshOutcome::aggregate(contributions.into_iter().flatten());

		match outcome {
			RefreshOutcome::Complete => debug!("Refresh complete"),
			RefreshOutcome::CompleteWithErrors => warn!("Refresh complete with errors"),
			RefreshOutcome::Error => error!("Refresh failed for every handler"),
		}

		outcome_tx.send_replace(Some(outcome));

		outcome
	}

	/// Makes the broadcaster unavailable: registrations are dropped, later dispatches
	/// report [`RefreshOutcome::Error`] and later registrations fail.
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::Release);
		self.inner.registrations().clear();
	}

	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}
}

impl Default for RefreshCoordinator {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RefreshCoordinator")
			.field("registrations", &self.inner.registrations().len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Scoped registration of a refresh handler; unregisters when dropped.
#[derive(Debug)]
#[must_use = "dropping the registration unregisters the handler"]
pub struct RefreshRegistration {
	token: RefreshToken,
	coordinator: Weak<Inner>,
}

impl RefreshRegistration {
	pub const fn token(&self) -> RefreshToken {
		self.token
	}

	/// Same as dropping, spelled out.
	pub fn unregister(self) {
		drop(self);
	}
}

impl Drop for RefreshRegistration {
	fn drop(&mut self) {
		if let Some(inner) = self.coordinator.upgrade() {
			inner.unregister(self.token);
		}
	}
}
