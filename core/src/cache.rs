use std::sync::Arc;

use futures::{
	future::{BoxFuture, Shared},
	FutureExt,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, trace};

use crate::{
	envelope::ResultEnvelope, error::TransportError, fetcher::DataFetcher,
	params::ParameterSnapshot, transport::QueryDescriptor,
};

type SharedFetch = Shared<BoxFuture<'static, Arc<ResultEnvelope>>>;

struct InFlight {
	generation: u64,
	fetch: SharedFetch,
}

struct Slot {
	variables: ParameterSnapshot,
	/// Bumped for every fetch issued; only the fetch holding the latest generation may
	/// commit its result.
	generation: u64,
	in_flight: Option<InFlight>,
}

/// The envelope of one subscription, plus everything needed to produce it again.
///
/// At most one fetch is in flight at a time: refreshing while a fetch runs joins it,
/// and changing variables supersedes it. Fetches run on their own task so they finish
/// even when nobody awaits them anymore.
pub struct ResultCache {
	query: QueryDescriptor,
	fetcher: DataFetcher,
	slot: Arc<Mutex<Slot>>,
	current: Arc<watch::Sender<Arc<ResultEnvelope>>>,
}

impl ResultCache {
	/// Performs the first fetch and builds the cache around its result.
	pub async fn load(
		fetcher: DataFetcher,
		query: QueryDescriptor,
		variables: ParameterSnapshot,
	) -> Self {
		let envelope = fetcher.fetch(&query, &variables).await;
		let (current, _) = watch::channel(Arc::new(envelope));

		Self {
			query,
			fetcher,
			slot: Arc::new(Mutex::new(Slot {
				variables,
				generation: 0,
				in_flight: None,
			})),
			current: Arc::new(current),
		}
	}

	#[must_use]
	pub const fn query(&self) -> &QueryDescriptor {
		&self.query
	}

	/// The last committed envelope.
	#[must_use]
	pub fn current(&self) -> Arc<ResultEnvelope> {
		Arc::clone(&self.current.borrow())
	}

	/// Receiver woken on every committed envelope.
	#[must_use]
	pub fn watch(&self) -> watch::Receiver<Arc<ResultEnvelope>> {
		self.current.subscribe()
	}

	/// Variables of the latest fetch issued.
	pub async fn variables(&self) -> ParameterSnapshot {
		self.slot.lock().await.variables.clone()
	}

	/// Issues a fetch for `variables` unless they equal the ones of the latest fetch.
	///
	/// Returns immediately; the returned future resolves once that fetch completes.
	/// A fetch already in flight keeps running but its result will not be committed.
	pub async fn update_variables(&self, variables: ParameterSnapshot) -> Option<SharedFetch> {
		let mut slot = self.slot.lock().await;

		if slot.variables == variables {
			trace!(query = %self.query.label(), "Variables unchanged, skipping fetch");
			return None;
		}

		if let Some(superseded) = &slot.in_flight {
			debug!(
				query = %self.query.label(),
				generation = superseded.generation,
				"Superseding in flight fetch with new variables"
			);
		}

		slot.variables = variables;
		Some(self.spawn_fetch(&mut slot))
	}

	/// Re-runs the query with the variables of the latest fetch.
	///
	/// Joins the fetch in flight instead of issuing a new one. If that fetch gets
	/// superseded while waiting, follows the newer one, so the returned envelope is
	/// always the one that ended up committed.
	pub async fn refresh(&self) -> Arc<ResultEnvelope> {
		let (mut generation, mut fetch) = {
			let mut slot = self.slot.lock().await;
			let joined = slot
				.in_flight
				.as_ref()
				.map(|in_flight| (in_flight.generation, in_flight.fetch.clone()));

			match joined {
				Some(joined) => {
					debug!(query = %self.query.label(), "Joining in flight fetch");
					joined
				}
				None => {
					let fetch = self.spawn_fetch(&mut slot);
					(slot.generation, fetch)
				}
			}
		};

		loop {
			let envelope = fetch.await;

			let mut slot = self.slot.lock().await;
			let newer = slot
				.in_flight
				.as_ref()
				.map(|in_flight| (in_flight.generation, in_flight.fetch.clone()));

			match newer {
				Some((newer_generation, newer_fetch)) if newer_generation != generation => {
					generation = newer_generation;
					fetch = newer_fetch;
				}
				Some(_) => {
					// The fetch task died before committing, don't let it block the next one
					slot.in_flight = None;
					return envelope;
				}
				// A newer fetch committed while this one was running
				None if slot.generation != generation => {
					let committed = Arc::clone(&self.current.borrow());
					return committed;
				}
				None => return envelope,
			}
		}
	}

	fn spawn_fetch(&self, slot: &mut Slot) -> SharedFetch {
		slot.generation += 1;
		let generation = slot.generation;

		let handle = tokio::spawn({
			let fetcher = self.fetcher.clone();
			let query = self.query.clone();
			let variables = slot.variables.clone();
			let slot = Arc::clone(&self.slot);
			let current = Arc::clone(&self.current);

			async move {
				let envelope = Arc::new(fetcher.fetch(&query, &variables).await);

				let mut slot = slot.lock().await;
				if slot.generation == generation {
					slot.in_flight = None;
					current.send_replace(Arc::clone(&envelope));
				} else {
					debug!(
						query = %query.label(),
						generation,
						latest = slot.generation,
						"Discarding result of superseded fetch"
					);
				}

				envelope
			}
		});

		let fetch = async move {
			handle.await.unwrap_or_else(|e| {
				error!("Fetch task ended abnormally: {e:#?}");
				Arc::new(ResultEnvelope::Failure(TransportError::unreachable(
					format!("fetch task ended abnormally: {e}"),
				)))
			})
		}
		.boxed()
		.shared();

		slot.in_flight = Some(InFlight {
			generation,
			fetch: fetch.clone(),
		});

		fetch
	}
}

impl std::fmt::Debug for ResultCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResultCache")
			.field("query", &self.query)
			.field("current", &*self.current.borrow())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

	use async_trait::async_trait;
	use serde_json::json;
	use tokio::sync::Notify;

	use super::*;
	use crate::{envelope::RowSet, transport::QueryTransport};

	/// Answers with the `recordId` variable, holding every call until released.
	#[derive(Default)]
	struct GatedTransport {
		calls: AtomicUsize,
		release: Notify,
		gated: AtomicBool,
	}

	#[async_trait]
	impl QueryTransport for GatedTransport {
		async fn execute(
			&self,
			_: &QueryDescriptor,
			variables: &ParameterSnapshot,
		) -> Result<RowSet, TransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if self.gated.load(Ordering::SeqCst) {
				self.release.notified().await;
			}

			let mut row = serde_json::Map::new();
			row.insert(
				"recordId".to_string(),
				variables.get("recordId").cloned().unwrap_or_default(),
			);
			Ok(vec![row])
		}
	}

	async fn cache(transport: &Arc<GatedTransport>) -> ResultCache {
		ResultCache::load(
			DataFetcher::new(Arc::clone(transport) as Arc<dyn QueryTransport>),
			QueryDescriptor::named("relatedRecords"),
			ParameterSnapshot::new().with("recordId", "001A"),
		)
		.await
	}

	#[tokio::test]
	async fn load_commits_first_fetch() {
		let transport = Arc::new(GatedTransport::default());
		let cache = cache(&transport).await;

		assert_eq!(
			cache.current().data().expect("success")[0]["recordId"],
			json!("001A")
		);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unchanged_variables_do_not_fetch() {
		let transport = Arc::new(GatedTransport::default());
		let cache = cache(&transport).await;

		assert!(cache
			.update_variables(ParameterSnapshot::new().with("recordId", "001A"))
			.await
			.is_none());
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn concurrent_refreshes_share_one_fetch() {
		let transport = Arc::new(GatedTransport::default());
		let cache = cache(&transport).await;
		transport.gated.store(true, Ordering::SeqCst);

		let first = cache.refresh();
		let second = cache.refresh();
		let release = async {
			while transport.calls.load(Ordering::SeqCst) < 2 {
				tokio::task::yield_now().await;
			}
			// Give the second refresh a chance to issue a duplicate, if it were to.
			for _ in 0..10 {
				tokio::task::yield_now().await;
			}
			transport.release.notify_waiters();
		};

		let (a, b, ()) = tokio::join!(first, second, release);

		assert_eq!(a, b);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
	}
}
