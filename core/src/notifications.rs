use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
	Info,
	Success,
	Warning,
	Error,
}

/// Represents a single user facing notification, what a host would show as a toast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
	pub kind: NotificationKind,
	pub title: String,
	pub message: String,
}

impl Notification {
	pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind,
			title: title.into(),
			message: message.into(),
		}
	}

	pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
		Self::new(NotificationKind::Success, title, message)
	}

	pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
		Self::new(NotificationKind::Error, title, message)
	}
}

/// Fire and forget delivery of notifications to whatever presents them.
pub trait NotificationChannel: Send + Sync + 'static {
	fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifications;

impl NotificationChannel for TracingNotifications {
	fn notify(&self, Notification { kind, title, message }: Notification) {
		match kind {
			NotificationKind::Info | NotificationKind::Success => {
				info!(?kind, %title, "{message}");
			}
			NotificationKind::Warning => warn!(%title, "{message}"),
			NotificationKind::Error => error!(%title, "{message}"),
		}
	}
}

/// Keeps every notification in arrival order until drained.
#[derive(Debug, Default)]
pub struct BufferedNotifications {
	buf: Mutex<Vec<Notification>>,
}

impl BufferedNotifications {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn drain(&self) -> Vec<Notification> {
		std::mem::take(&mut *self.buf.lock().unwrap_or_else(PoisonError::into_inner))
	}

	#[must_use]
	pub fn snapshot(&self) -> Vec<Notification> {
		self.buf
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}
}

impl NotificationChannel for BufferedNotifications {
	fn notify(&self, notification: Notification) {
		self.buf
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(notification);
	}
}
