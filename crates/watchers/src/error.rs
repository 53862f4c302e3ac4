use std::path::Path;

use thiserror::Error;
use wk_utils::error::FileIOError;

#[derive(Debug, Error)]
pub enum LibraryError {
	#[error("library name is empty")]
	EmptyName,
	#[error("library name contains restricted characters <name='{0}'>")]
	RestrictedCharacters(String),
	#[error("library name is reserved by the system <name='{0}'>")]
	RestrictedName(String),
	#[error("a library with this name already exists <name='{0}'>")]
	AlreadyExists(String),
	#[error("not a library definition <path='{}'>", .0.display())]
	NotALibrary(Box<Path>),
	#[error("malformed library definition <path='{}'>: {source}", .path.display())]
	Malformed {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

#[derive(Debug, Error)]
pub enum QuickAccessError {
	#[error("malformed quick access list <path='{}'>: {source}", .path.display())]
	Malformed {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

#[derive(Debug, Error)]
pub enum RecentError {
	#[error("not an entry of the recent items folder <path='{}'>", .0.display())]
	NotRecentItem(Box<Path>),

	#[error(transparent)]
	FileIO(#[from] FileIOError),
}
