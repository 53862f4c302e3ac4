//! Folders pinned to quick access, persisted as a JSON list and polled for changes

use std::{
	collections::HashSet,
	io,
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{fs, sync::Mutex};
use tracing::{debug, instrument};
use wk_change_source::{Enumeration, Enumerator, PollingSource, SourceError};
use wk_reconcile::{
	EnrichError, Enricher, Entity, EntityKind, ReconciledCollection, Reconciler, ReconcilerConfig,
	SortOrder,
};
use wk_utils::{error::FileIOError, path_key};

use crate::QuickAccessError;

pub type QuickAccessSource = PollingSource<PinnedFolders>;
pub type QuickAccessReconciler = Reconciler<QuickAccessSource, PinnedFolderEnricher>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickAccessFile {
	pub pinned: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedFolder {
	pub path: PathBuf,
	pub position: usize,
}

fn same_path(a: &Path, b: &Path) -> bool {
	path_key(a).to_lowercase() == path_key(b).to_lowercase()
}

/// A missing file is an empty list
async fn read_file(path: &Path) -> Result<QuickAccessFile, QuickAccessError> {
	let bytes = match fs::read(path).await {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(QuickAccessFile::default()),
		Err(e) => return Err(FileIOError::from((path, e, "reading quick access list")).into()),
	};

	serde_json::from_slice(&bytes).map_err(|source| QuickAccessError::Malformed {
		path: path.into(),
		source,
	})
}

/// Writes next to the target then renames, so pollers never read half a file
async fn write_file(path: &Path, file: &QuickAccessFile) -> Result<(), QuickAccessError> {
	let bytes = serde_json::to_vec_pretty(file).map_err(|source| QuickAccessError::Malformed {
		path: path.into(),
		source,
	})?;

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.await
			.map_err(|e| FileIOError::from((parent, e, "creating quick access folder")))?;
	}

	let temporary = path.with_extension("json.tmp");

	fs::write(&temporary, bytes)
		.await
		.map_err(|e| FileIOError::from((&temporary, e, "writing quick access list")))?;

	fs::rename(&temporary, path)
		.await
		.map_err(|e| FileIOError::from((path, e, "replacing quick access list")))?;

	Ok(())
}

/// Reads the pinned list, keyed by path. Repeated entries keep their first position.
#[derive(Debug, Clone)]
pub struct PinnedFolders {
	file: PathBuf,
}

impl PinnedFolders {
	pub fn new(file: impl Into<PathBuf>) -> Self {
		Self { file: file.into() }
	}

	pub fn file(&self) -> &Path {
		&self.file
	}
}

#[async_trait]
impl Enumerator for PinnedFolders {
	type Item = PinnedFolder;

	async fn enumerate(&self) -> Result<Enumeration<PinnedFolder>, SourceError> {
		let file = read_file(&self.file).await.map_err(|e| match e {
			QuickAccessError::FileIO(e) => SourceError::FileIO(e),
			e @ QuickAccessError::Malformed { .. } => SourceError::Enumeration(e.to_string()),
		})?;

		let mut seen = HashSet::new();

		let items = file
			.pinned
			.into_iter()
			.filter(|path| seen.insert(path_key(path).to_lowercase()))
			.enumerate()
			.map(|(position, path)| (path_key(&path), PinnedFolder { path, position }))
			.collect();

		Ok(Enumeration::complete(items))
	}
}

/// Keeps pinned folders that still exist as directories
#[derive(Debug, Clone, Copy, Default)]
pub struct PinnedFolderEnricher;

#[async_trait]
impl Enricher<PinnedFolder> for PinnedFolderEnricher {
	async fn enrich(&self, key: &str, folder: PinnedFolder) -> Result<Option<Entity>, EnrichError> {
		let metadata = match fs::metadata(&folder.path).await {
			Ok(metadata) => metadata,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
				return Err(EnrichError::inaccessible(key));
			}
			Err(e) => {
				return Err(FileIOError::from((&folder.path, e, "reading pinned folder")).into());
			}
		};

		if !metadata.is_dir() {
			return Ok(None);
		}

		Ok(Some(
			Entity::new(key, EntityKind::PinnedFolder, folder.path)
				.with_pinned(true)
				.with_metadata(json!({ "position": folder.position })),
		))
	}
}

fn position(entity: &Entity) -> u64 {
	entity
		.metadata_field("position")
		.and_then(serde_json::Value::as_u64)
		.unwrap_or(u64::MAX)
}

/// The order folders were pinned in
pub fn order() -> SortOrder {
	SortOrder::custom(|a, b| position(a).cmp(&position(b)))
}

/// Edits the pinned list and has the source pick the change up right away
pub struct QuickAccess {
	source: Arc<QuickAccessSource>,
	edits: Mutex<()>,
}

impl QuickAccess {
	pub fn new(source: Arc<QuickAccessSource>) -> Self {
		Self {
			source,
			edits: Mutex::new(()),
		}
	}

	pub fn file(&self) -> &Path {
		self.source.enumerator().file()
	}

	pub async fn pinned(&self) -> Result<Vec<PathBuf>, QuickAccessError> {
		read_file(self.file()).await.map(|file| file.pinned)
	}

	/// Appends `path` to the list. Returns `false` if it was already pinned.
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn pin(&self, path: impl AsRef<Path>) -> Result<bool, QuickAccessError> {
		let path = path.as_ref();
		let _edit = self.edits.lock().await;

		let mut file = read_file(self.file()).await?;
		if file.pinned.iter().any(|pinned| same_path(pinned, path)) {
			return Ok(false);
		}

		file.pinned.push(path.to_path_buf());
		write_file(self.file(), &file).await?;
		self.source.poll_now();

		debug!("Folder pinned;");

		Ok(true)
	}

	/// Returns `false` if `path` wasn't pinned
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn unpin(&self, path: impl AsRef<Path>) -> Result<bool, QuickAccessError> {
		let path = path.as_ref();
		let _edit = self.edits.lock().await;

		let mut file = read_file(self.file()).await?;
		let before = file.pinned.len();
		file.pinned.retain(|pinned| !same_path(pinned, path));

		if file.pinned.len() == before {
			return Ok(false);
		}

		write_file(self.file(), &file).await?;
		self.source.poll_now();

		debug!("Folder unpinned;");

		Ok(true)
	}
}

pub fn reconciler(
	collection: Arc<ReconciledCollection>,
	file: impl Into<PathBuf>,
	poll_interval: Duration,
	config: ReconcilerConfig,
) -> QuickAccessReconciler {
	Reconciler::new(
		Arc::new(PollingSource::new(
			"quick_access",
			PinnedFolders::new(file),
			poll_interval,
		)),
		PinnedFolderEnricher,
		collection,
		config.with_scope(EntityKind::PinnedFolder),
	)
}
