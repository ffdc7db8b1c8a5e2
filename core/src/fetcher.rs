use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::{
	envelope::ResultEnvelope,
	params::ParameterSnapshot,
	transport::{QueryDescriptor, QueryTransport},
};

/// Runs one read against the remote store and folds the answer into an envelope.
///
/// Holds no state between calls; a transport failure comes back as
/// [`ResultEnvelope::Failure`] and never as an error.
#[derive(Clone)]
pub struct DataFetcher {
	transport: Arc<dyn QueryTransport>,
}

impl DataFetcher {
	pub fn new(transport: Arc<dyn QueryTransport>) -> Self {
		Self { transport }
	}

	#[instrument(skip_all, fields(query = %query.label()))]
	pub async fn fetch(
		&self,
		query: &QueryDescriptor,
		variables: &ParameterSnapshot,
	) -> ResultEnvelope {
		match self.transport.execute(query, variables).await {
			Ok(rows) => {
				debug!(rows = rows.len(), "Fetched rows");
				ResultEnvelope::Success(rows)
			}
			Err(e) => {
				warn!(?variables, "Fetch failed: {e:#}");
				ResultEnvelope::Failure(e)
			}
		}
	}
}

impl std::fmt::Debug for DataFetcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DataFetcher").finish_non_exhaustive()
	}
}
