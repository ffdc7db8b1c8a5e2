use crate::error::TransportError;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record as returned by the remote store, field name to value, in the order the
/// store produced them.
pub type Row = Map<String, Value>;

pub type RowSet = Vec<Row>;

/// The last known result of a subscription's query.
///
/// Exactly one of data or error is ever set, so anything rendering from an envelope
/// gets `data()` or `error()`, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ResultEnvelope {
	Success(RowSet),
	Failure(TransportError),
}

impl ResultEnvelope {
	#[must_use]
	pub const fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}

	#[must_use]
	pub fn data(&self) -> Option<&[Row]> {
		match self {
			Self::Success(rows) => Some(rows),
			Self::Failure(_) => None,
		}
	}

	#[must_use]
	pub const fn error(&self) -> Option<&TransportError> {
		match self {
			Self::Success(_) => None,
			Self::Failure(e) => Some(e),
		}
	}
}

impl From<Result<RowSet, TransportError>> for ResultEnvelope {
	fn from(res: Result<RowSet, TransportError>) -> Self {
		match res {
			Ok(rows) => Self::Success(rows),
			Err(e) => Self::Failure(e),
		}
	}
}
