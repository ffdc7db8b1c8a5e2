use std::{
	fmt::Display,
	io,
	path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::error;

/// Logs the error of `res`, prefixed with `context`, and hands `res` back untouched.
pub fn report_error<T, E: Display>(context: &str, res: Result<T, E>) -> Result<T, E> {
	if let Err(e) = &res {
		error!("{context}: {e:#}");
	}

	res
}

/// An I/O error on a file, with the path it happened on and what we were doing.
#[derive(Error, Debug)]
#[error("{}: {source}; path: '{}'", .action.as_deref().unwrap_or("file I/O error"), .path.display())]
pub struct FileIOError {
	pub path: PathBuf,
	#[source]
	pub source: io::Error,
	pub action: Option<String>,
}

impl FileIOError {
	pub fn new(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
			source,
			action: None,
		}
	}

	#[must_use]
	pub fn while_doing(mut self, action: impl Into<String>) -> Self {
		self.action = Some(action.into());
		self
	}
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self::new(path, source)
	}
}

impl<P: AsRef<Path>> From<(P, io::Error, &str)> for FileIOError {
	fn from((path, source, action): (P, io::Error, &str)) -> Self {
		Self::new(path, source).while_doing(action)
	}
}
