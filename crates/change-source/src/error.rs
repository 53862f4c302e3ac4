use std::path::Path;

use wk_utils::error::FileIOError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
	#[error("failed to register watcher <path='{}'>: {source}", .path.display())]
	Registration {
		path: Box<Path>,
		#[source]
		source: notify::Error,
	},
	#[error("watch root is not a directory <path='{}'>", .0.display())]
	NotADirectory(Box<Path>),
	#[error("not a git repository <path='{}'>", .0.display())]
	InvalidRepository(Box<Path>),
	#[error("enumeration failed: {0}")]
	Enumeration(String),
	#[error("enumeration task failed to join: {0}")]
	Join(#[from] tokio::task::JoinError),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

impl SourceError {
	pub(crate) fn registration(path: impl AsRef<Path>, source: notify::Error) -> Self {
		Self::Registration {
			path: path.as_ref().into(),
			source,
		}
	}
}
