use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use tokio::task::{JoinError, JoinHandle};

/// A [`JoinHandle`] that aborts its task when dropped.
///
/// Used for background tasks whose lifetime is tied to an owning value, like the
/// attribute watcher of a mounted subscription.
#[derive(Debug)]
pub struct AbortOnDrop<T>(pub JoinHandle<T>);

impl<T> AbortOnDrop<T> {
	pub fn abort(&self) {
		self.0.abort();
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.0.is_finished()
	}
}

impl<T> Drop for AbortOnDrop<T> {
	fn drop(&mut self) {
		self.0.abort();
	}
}

impl<T> Future for AbortOnDrop<T> {
	type Output = Result<T, JoinError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.0).poll(cx)
	}
}
