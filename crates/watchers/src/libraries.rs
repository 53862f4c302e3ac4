//! User libraries: `<name>.library` definition files in a single folder

use std::{
	io,
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, instrument};
use wk_change_source::{DirectoryOptions, DirectorySource};
use wk_reconcile::{
	CollectionSnapshot, EnrichError, Enricher, Entity, EntityKind, ReconciledCollection,
	Reconciler, ReconcilerConfig, SortOrder,
};
use wk_utils::{error::FileIOError, path_key};

use crate::LibraryError;

pub const LIBRARY_EXTENSION: &str = "library";

/// Libraries every user starts with, listed ahead of the ones they create
pub const DEFAULT_LIBRARIES: [&str; 6] = [
	"CameraRoll",
	"Documents",
	"Music",
	"Pictures",
	"SavedPictures",
	"Videos",
];

const RESTRICTED_CHARACTERS: [char; 9] = ['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

const RESTRICTED_NAMES: [&str; 22] = [
	"CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
	"COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

pub type LibrariesReconciler = Reconciler<DirectorySource, LibraryEnricher>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryDefinition {
	pub folders: Vec<PathBuf>,
	pub default_save_folder: Option<PathBuf>,
	pub pinned_to_sidebar: bool,
}

/// Fields left as `None` keep their current value
#[derive(Debug, Clone, Default)]
pub struct LibraryUpdate {
	/// An empty list is ignored, a library always keeps at least one folder
	pub folders: Option<Vec<PathBuf>>,
	pub default_save_folder: Option<PathBuf>,
	pub pinned_to_sidebar: Option<bool>,
}

impl LibraryUpdate {
	const fn is_empty(&self) -> bool {
		self.folders.is_none()
			&& self.default_save_folder.is_none()
			&& self.pinned_to_sidebar.is_none()
	}
}

pub fn is_library_path(path: impl AsRef<Path>) -> bool {
	path.as_ref()
		.extension()
		.is_some_and(|extension| extension.eq_ignore_ascii_case(LIBRARY_EXTENSION))
}

pub fn library_name(path: impl AsRef<Path>) -> String {
	path.as_ref()
		.file_stem()
		.map(|stem| stem.to_string_lossy().into_owned())
		.unwrap_or_default()
}

pub fn is_default_library(path: impl AsRef<Path>) -> bool {
	let name = library_name(path);
	DEFAULT_LIBRARIES.contains(&name.as_str())
}

fn same_path(a: &Path, b: &Path) -> bool {
	path_key(a).to_lowercase() == path_key(b).to_lowercase()
}

fn is_restricted_name(name: &str) -> bool {
	RESTRICTED_NAMES.iter().any(|restricted| {
		name.get(..restricted.len())
			.is_some_and(|prefix| prefix.eq_ignore_ascii_case(restricted))
			&& matches!(name.as_bytes().get(restricted.len()), None | Some(b'.'))
	})
}

pub async fn read_definition(path: impl AsRef<Path>) -> Result<LibraryDefinition, LibraryError> {
	let path = path.as_ref();

	let bytes = fs::read(path)
		.await
		.map_err(|e| FileIOError::from((path, e, "reading library definition")))?;

	serde_json::from_slice(&bytes).map_err(|source| LibraryError::Malformed {
		path: path.into(),
		source,
	})
}

fn encode(path: &Path, definition: &LibraryDefinition) -> Result<Vec<u8>, LibraryError> {
	serde_json::to_vec_pretty(definition).map_err(|source| LibraryError::Malformed {
		path: path.into(),
		source,
	})
}

/// Describes a `.library` file. Files removed before they could be read yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryEnricher;

#[async_trait]
impl Enricher<PathBuf> for LibraryEnricher {
	async fn enrich(&self, key: &str, path: PathBuf) -> Result<Option<Entity>, EnrichError> {
		let definition = match read_definition(&path).await {
			Ok(definition) => definition,
			Err(LibraryError::FileIO(e)) if e.is_not_found() => return Ok(None),
			Err(LibraryError::FileIO(e)) => return Err(e.into()),
			Err(e) => return Err(EnrichError::Other(e.to_string())),
		};

		let metadata =
			serde_json::to_value(&definition).map_err(|e| EnrichError::Other(e.to_string()))?;

		Ok(Some(
			Entity::new(key, EntityKind::Library, &path)
				.with_name(library_name(&path))
				.with_pinned(is_default_library(&path))
				.with_metadata(metadata),
		))
	}
}

/// Creates and edits library definitions. The watcher picks the changes up from disk.
#[derive(Debug, Clone)]
pub struct LibraryStore {
	dir: PathBuf,
}

impl LibraryStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn path_for(&self, name: &str) -> PathBuf {
		self.dir.join(format!("{name}.{LIBRARY_EXTENSION}"))
	}

	pub async fn ensure_dir(&self) -> Result<(), LibraryError> {
		fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| FileIOError::from((&self.dir, e, "creating libraries folder")).into())
	}

	/// Checks `name` against restricted characters, reserved device names and the libraries
	/// already in `snapshot`
	pub fn can_create(&self, name: &str, snapshot: &CollectionSnapshot) -> Result<(), LibraryError> {
		if name.trim().is_empty() {
			return Err(LibraryError::EmptyName);
		}

		if name.contains(RESTRICTED_CHARACTERS) {
			return Err(LibraryError::RestrictedCharacters(name.to_string()));
		}

		if is_restricted_name(name) {
			return Err(LibraryError::RestrictedName(name.to_string()));
		}

		let lowercase = name.to_lowercase();
		if snapshot.iter().any(|entity| {
			entity.kind == EntityKind::Library
				&& (entity.name.to_lowercase() == lowercase
					|| library_name(&entity.path).to_lowercase() == lowercase)
		}) {
			return Err(LibraryError::AlreadyExists(name.to_string()));
		}

		Ok(())
	}

	/// Writes a new definition holding `folders`, failing when the file already exists
	#[instrument(skip(self, snapshot, folders), err)]
	pub async fn create(
		&self,
		name: &str,
		snapshot: &CollectionSnapshot,
		folders: Vec<PathBuf>,
	) -> Result<PathBuf, LibraryError> {
		self.can_create(name, snapshot)?;
		self.ensure_dir().await?;

		let path = self.path_for(name);
		let bytes = encode(
			&path,
			&LibraryDefinition {
				default_save_folder: folders.first().cloned(),
				folders,
				pinned_to_sidebar: true,
			},
		)?;

		let mut file = match fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&path)
			.await
		{
			Ok(file) => file,
			Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
				return Err(LibraryError::AlreadyExists(name.to_string()));
			}
			Err(e) => return Err(FileIOError::from((&path, e, "creating library")).into()),
		};

		file.write_all(&bytes)
			.await
			.map_err(|e| FileIOError::from((&path, e, "writing library")))?;
		file.flush()
			.await
			.map_err(|e| FileIOError::from((&path, e, "writing library")))?;

		debug!(path = %path.display(), "Library created;");

		Ok(path)
	}

	/// Returns the new definition, or `None` when there was nothing to update
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub async fn update(
		&self,
		path: impl AsRef<Path>,
		update: LibraryUpdate,
	) -> Result<Option<LibraryDefinition>, LibraryError> {
		let path = path.as_ref();

		if !is_library_path(path) {
			return Err(LibraryError::NotALibrary(path.into()));
		}

		if update.is_empty() {
			return Ok(None);
		}

		let mut definition = read_definition(path).await?;
		let mut updated = false;

		if let Some(folders) = update.folders.filter(|folders| !folders.is_empty()) {
			let mut merged = definition
				.folders
				.iter()
				.filter(|existing| folders.iter().any(|folder| same_path(folder, existing)))
				.cloned()
				.collect::<Vec<_>>();

			for folder in folders {
				if !merged.iter().any(|existing| same_path(existing, &folder)) {
					merged.push(folder);
				}
			}

			if merged != definition.folders {
				definition.folders = merged;
				updated = true;
			}
		}

		if let Some(default_save_folder) = update.default_save_folder {
			definition.default_save_folder = Some(default_save_folder);
			updated = true;
		}

		if let Some(pinned) = update.pinned_to_sidebar {
			definition.pinned_to_sidebar = pinned;
			updated = true;
		}

		if !updated {
			return Ok(None);
		}

		fs::write(path, encode(path, &definition)?)
			.await
			.map_err(|e| FileIOError::from((path, e, "writing library")))?;

		Ok(Some(definition))
	}

	/// Case-insensitive lookup of a library by its definition path
	pub fn find<'a>(snapshot: &'a CollectionSnapshot, path: impl AsRef<Path>) -> Option<&'a Entity> {
		let path = path.as_ref();

		if !is_library_path(path) {
			return None;
		}

		snapshot
			.iter()
			.find(|entity| entity.kind == EntityKind::Library && same_path(&entity.path, path))
	}
}

pub fn order() -> SortOrder {
	SortOrder::DisplayName
}

pub fn reconciler(
	collection: Arc<ReconciledCollection>,
	dir: impl Into<PathBuf>,
	config: ReconcilerConfig,
) -> LibrariesReconciler {
	Reconciler::new(
		Arc::new(DirectorySource::new(
			"libraries",
			dir,
			DirectoryOptions::default().with_extension(LIBRARY_EXTENSION),
		)),
		LibraryEnricher,
		collection,
		config.with_scope(EntityKind::Library),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reserved_device_names() {
		assert!(is_restricted_name("CON"));
		assert!(is_restricted_name("con.txt"));
		assert!(is_restricted_name("Lpt9"));
		assert!(!is_restricted_name("Console"));
		assert!(!is_restricted_name("COM10"));
		assert!(!is_restricted_name("Music"));
	}

	#[test]
	fn library_paths() {
		assert!(is_library_path("/libs/Music.library"));
		assert!(is_library_path("/libs/Music.LIBRARY"));
		assert!(!is_library_path("/libs/Music.txt"));
		assert!(is_default_library("/libs/Documents.library"));
		assert!(!is_default_library("/libs/Projects.library"));
		assert_eq!(library_name("/libs/Projects.library"), "Projects");
	}
}
