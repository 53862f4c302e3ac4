use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which sidebar section an [`Entity`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	Drive,
	Library,
	RecentItem,
	PinnedFolder,
	Repository,
	Other,
}

impl EntityKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Drive => "drive",
			Self::Library => "library",
			Self::RecentItem => "recent_item",
			Self::PinnedFolder => "pinned_folder",
			Self::Repository => "repository",
			Self::Other => "other",
		}
	}
}

/// A discovered external resource, unique by `key` within its collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
	pub key: String,
	pub path: PathBuf,
	pub name: String,
	pub kind: EntityKind,
	/// Default entries, always ordered ahead of everything else
	pub pinned: bool,
	pub metadata: Value,
}

impl Entity {
	/// Name defaults to the final path component, or the whole path for roots like `C:\`
	pub fn new(key: impl Into<String>, kind: EntityKind, path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let name = display_name(&path);

		Self {
			key: key.into(),
			path,
			name,
			kind,
			pinned: false,
			metadata: Value::Null,
		}
	}

	#[must_use]
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	#[must_use]
	pub const fn with_pinned(mut self, pinned: bool) -> Self {
		self.pinned = pinned;
		self
	}

	#[must_use]
	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = metadata;
		self
	}

	pub fn metadata_field(&self, field: &str) -> Option<&Value> {
		self.metadata.get(field)
	}
}

fn display_name(path: &Path) -> String {
	path.file_name().map_or_else(
		|| path.to_string_lossy().into_owned(),
		|name| name.to_string_lossy().into_owned(),
	)
}
