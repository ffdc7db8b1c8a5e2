use wb_utils::error::FileIOError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fetch, write or refresh call to the remote store failed.
///
/// Cloneable because a failure is stored inside the shared [`ResultEnvelope`] of a
/// subscription and handed to every reader.
///
/// [`ResultEnvelope`]: crate::ResultEnvelope
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransportError {
	#[error("remote store rejected the request <status={status}>: {message}")]
	Rejected { status: u16, message: String },
	#[error("remote store unreachable: {message}")]
	Unreachable { message: String },
	#[error("malformed response from remote store: {message}")]
	Malformed { message: String },
}

impl TransportError {
	pub fn rejected(status: u16, message: impl Into<String>) -> Self {
		Self::Rejected {
			status,
			message: message.into(),
		}
	}

	pub fn unreachable(message: impl Into<String>) -> Self {
		Self::Unreachable {
			message: message.into(),
		}
	}

	pub fn malformed(message: impl Into<String>) -> Self {
		Self::Malformed {
			message: message.into(),
		}
	}

	/// The human readable cause, without the variant prefix. This is what ends up in
	/// user facing notifications.
	#[must_use]
	pub fn message(&self) -> &str {
		match self {
			Self::Rejected { message, .. }
			| Self::Unreachable { message }
			| Self::Malformed { message } => message,
		}
	}
}

/// Registering a refresh handler failed. Only that registration attempt is affected;
/// the caller may retry later, e.g. on re-mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistrationError {
	#[error("host node is not attached to a live tree")]
	HostDetached,
	#[error("refresh coordinator is closed")]
	CoordinatorClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("config version {found} is newer than the supported version {supported}")]
	UnsupportedVersion { found: u32, supported: u32 },
	#[error("failed to (de)serialize config: {0}")]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
