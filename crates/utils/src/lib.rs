pub mod error;

use std::path::Path;

/// Stable string key for a filesystem path, as used by watchers and collections.
pub fn path_key(path: impl AsRef<Path>) -> String {
	path.as_ref().to_string_lossy().into_owned()
}

/// Whether the final component of `path` starts with a dot
pub fn is_hidden(path: impl AsRef<Path>) -> bool {
	path.as_ref()
		.file_name()
		.is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
