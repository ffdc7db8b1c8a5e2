use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::envelope::ResultEnvelope;

use super::host::HostScope;

/// Status of a coordinated refresh, either one handler's contribution or the
/// aggregate of a whole dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshOutcome {
	Complete,
	CompleteWithErrors,
	Error,
}

impl RefreshOutcome {
	/// Folds contributions into one status, regardless of their order.
	///
	/// Complete when everything succeeded (including when there was nothing to
	/// refresh), Error when everything failed, CompleteWithErrors otherwise.
	pub fn aggregate(contributions: impl IntoIterator<Item = Self>) -> Self {
		let (mut total, mut failed, mut partial) = (0_usize, 0_usize, false);

		for contribution in contributions {
			total += 1;
			match contribution {
				Self::Complete => {}
				Self::CompleteWithErrors => partial = true,
				Self::Error => failed += 1,
			}
		}

		if total > 0 && failed == total {
			Self::Error
		} else if failed > 0 || partial {
			Self::CompleteWithErrors
		} else {
			Self::Complete
		}
	}

	#[must_use]
	pub const fn is_complete(self) -> bool {
		matches!(self, Self::Complete)
	}
}

impl From<&ResultEnvelope> for RefreshOutcome {
	fn from(envelope: &ResultEnvelope) -> Self {
		if envelope.is_success() {
			Self::Complete
		} else {
			Self::Error
		}
	}
}

impl fmt::Display for RefreshOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Complete => "complete",
			Self::CompleteWithErrors => "complete with errors",
			Self::Error => "error",
		})
	}
}

/// Handed to every handler of a dispatch; resolves to the aggregate outcome once all
/// handlers of that dispatch are done.
///
/// A handler must not await it from within its own contribution, that would wait on
/// itself. Spawn a task instead.
#[derive(Debug, Clone)]
pub struct PendingRefresh {
	scope: HostScope,
	rx: watch::Receiver<Option<RefreshOutcome>>,
}

impl PendingRefresh {
	pub(super) const fn new(scope: HostScope, rx: watch::Receiver<Option<RefreshOutcome>>) -> Self {
		Self { scope, rx }
	}

	#[must_use]
	pub const fn scope(&self) -> &HostScope {
		&self.scope
	}

	/// Resolves to [`RefreshOutcome::Error`] if the dispatch was dropped before
	/// finishing.
	pub async fn outcome(mut self) -> RefreshOutcome {
		self.rx
			.wait_for(Option::is_some)
			.await
			.map_or(RefreshOutcome::Error, |outcome| {
				(*outcome).unwrap_or(RefreshOutcome::Error)
			})
	}
}
