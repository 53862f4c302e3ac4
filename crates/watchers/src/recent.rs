//! The recent items folder: one file or link per recently opened item

use std::{
	io,
	path::{Path, PathBuf},
	sync::Arc,
	time::UNIX_EPOCH,
};

use async_trait::async_trait;
use serde_json::json;
use tokio::fs;
use tracing::{debug, instrument, warn};
use wk_change_source::{DirectoryOptions, DirectorySource};
use wk_reconcile::{
	EnrichError, Enricher, Entity, EntityKind, ReconciledCollection, Reconciler, ReconcilerConfig,
	SortOrder,
};
use wk_utils::{error::FileIOError, path_key};

use crate::RecentError;

pub type RecentReconciler = Reconciler<DirectorySource, RecentEnricher>;

/// Shortcut files are listed under the name of what they point to
const SHORTCUT_EXTENSION: &str = "lnk";

fn item_name(path: &Path) -> String {
	let is_shortcut = path
		.extension()
		.is_some_and(|extension| extension.eq_ignore_ascii_case(SHORTCUT_EXTENSION));

	let name = if is_shortcut {
		path.file_stem()
	} else {
		path.file_name()
	};

	name.map_or_else(
		|| path_key(path),
		|name| name.to_string_lossy().into_owned(),
	)
}

/// Describes an entry with its modification time, following symbolic links to their target
#[derive(Debug, Clone, Copy, Default)]
pub struct RecentEnricher;

#[async_trait]
impl Enricher<PathBuf> for RecentEnricher {
	async fn enrich(&self, key: &str, path: PathBuf) -> Result<Option<Entity>, EnrichError> {
		let metadata = match fs::symlink_metadata(&path).await {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(FileIOError::from((&path, e, "reading recent item")).into()),
		};

		let target = if metadata.is_symlink() {
			match fs::read_link(&path).await {
				Ok(target) => Some(target),
				Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
				Err(e) => return Err(FileIOError::from((&path, e, "resolving recent item")).into()),
			}
		} else {
			None
		};

		let modified = metadata
			.modified()
			.ok()
			.and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
			.map_or(0, |since_epoch| since_epoch.as_secs());

		Ok(Some(
			Entity::new(key, EntityKind::RecentItem, &path)
				.with_name(item_name(&path))
				.with_metadata(json!({
					"modified": modified,
					"target": target.as_deref().map(path_key),
					"size": metadata.len(),
				})),
		))
	}
}

fn modified(entity: &Entity) -> u64 {
	entity
		.metadata_field("modified")
		.and_then(serde_json::Value::as_u64)
		.unwrap_or_default()
}

/// Most recently modified first
pub fn order() -> SortOrder {
	SortOrder::custom(|a, b| modified(b).cmp(&modified(a)))
}

/// Removes entries from the recent items folder. The watcher reports the removals.
#[derive(Debug, Clone)]
pub struct RecentItems {
	dir: PathBuf,
}

impl RecentItems {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Deletes one entry. Entries already gone are not an error.
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn forget(&self, path: impl AsRef<Path>) -> Result<(), RecentError> {
		let path = path.as_ref();

		if path.parent() != Some(self.dir.as_path()) {
			return Err(RecentError::NotRecentItem(path.into()));
		}

		match fs::remove_file(path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(FileIOError::from((path, e, "removing recent item")).into()),
		}
	}

	/// Deletes every file in the folder, returning how many went away.
	///
	/// Entries that can't be removed are logged and left in place.
	#[instrument(skip(self), fields(dir = %self.dir.display()), err)]
	pub async fn clear(&self) -> Result<usize, RecentError> {
		let mut entries = fs::read_dir(&self.dir)
			.await
			.map_err(|e| FileIOError::from((&self.dir, e, "reading recent items folder")))?;

		let mut removed = 0;

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((&self.dir, e, "reading recent items folder")))?
		{
			let path = entry.path();

			match entry.file_type().await {
				Ok(file_type) if file_type.is_dir() => continue,
				Ok(_) => {}
				Err(e) => {
					warn!(path = %path.display(), ?e, "Unable to inspect recent item;");
					continue;
				}
			}

			match fs::remove_file(&path).await {
				Ok(()) => removed += 1,
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => warn!(path = %path.display(), ?e, "Unable to remove recent item;"),
			}
		}

		debug!(removed, "Recent items cleared;");

		Ok(removed)
	}
}

pub fn reconciler(
	collection: Arc<ReconciledCollection>,
	dir: impl Into<PathBuf>,
	config: ReconcilerConfig,
) -> RecentReconciler {
	Reconciler::new(
		Arc::new(DirectorySource::new(
			"recent",
			dir,
			DirectoryOptions::default(),
		)),
		RecentEnricher,
		collection,
		config.with_scope(EntityKind::RecentItem),
	)
}
