use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use async_trait::async_trait;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::fs;
use tracing::{debug, error, instrument, trace, warn};
use wk_utils::{error::FileIOError, is_hidden, path_key};

use crate::{ChangeSignal, ChangeSource, SignalSink, SourceError, SourceState};

mod translate;

use translate::translate;

/// Which entries of a watched directory become signals
#[derive(Debug, Clone, Default)]
pub struct DirectoryOptions {
	pub recursive: bool,
	/// Extensions to keep, without the leading dot and matched case-insensitively.
	/// Empty keeps every extension.
	pub extensions: Vec<String>,
	pub include_directories: bool,
	pub include_hidden: bool,
}

impl DirectoryOptions {
	#[must_use]
	pub fn recursive(mut self) -> Self {
		self.recursive = true;
		self
	}

	#[must_use]
	pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
		self.extensions
			.push(extension.into().trim_start_matches('.').to_lowercase());
		self
	}

	#[must_use]
	pub fn include_directories(mut self) -> Self {
		self.include_directories = true;
		self
	}

	#[must_use]
	pub fn include_hidden(mut self) -> Self {
		self.include_hidden = true;
		self
	}

	fn accepts_name(&self, path: &Path) -> bool {
		if !self.include_hidden && is_hidden(path) {
			return false;
		}

		self.extensions.is_empty()
			|| path.extension().is_some_and(|extension| {
				let extension = extension.to_string_lossy().to_lowercase();
				self.extensions.iter().any(|wanted| *wanted == extension)
			})
	}

	fn accepts(&self, signal: &ChangeSignal<PathBuf>) -> bool {
		match signal {
			// Already gone, so there is nothing left to stat
			ChangeSignal::Removed { key } => self.accepts_name(Path::new(key)),
			ChangeSignal::Added { payload, .. } | ChangeSignal::Modified { payload, .. } => {
				self.accepts_name(payload) && (self.include_directories || !payload.is_dir())
			}
			ChangeSignal::EnumerationCompleted { .. } => true,
		}
	}
}

struct Registration {
	// Dropping the watcher releases its OS handles
	_watcher: RecommendedWatcher,
	sink: SignalSink<PathBuf>,
}

/// Watches one directory and reports its entries keyed by their full path.
///
/// Starting enumerates the directory once (followed by
/// [`ChangeSignal::EnumerationCompleted`]), after which create, modify, remove and rename
/// notifications flow as they arrive.
pub struct DirectorySource {
	name: String,
	root: PathBuf,
	options: Arc<DirectoryOptions>,
	registration: Mutex<Option<Registration>>,
}

impl DirectorySource {
	pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, options: DirectoryOptions) -> Self {
		Self {
			name: name.into(),
			root: root.into(),
			options: Arc::new(options),
			registration: Mutex::new(None),
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn options(&self) -> &DirectoryOptions {
		&self.options
	}

	async fn register(&self, sink: SignalSink<PathBuf>) -> Result<RecommendedWatcher, SourceError> {
		let metadata = fs::metadata(&self.root)
			.await
			.map_err(|e| FileIOError::from((&self.root, e, "reading watch root")))?;

		if !metadata.is_dir() {
			return Err(SourceError::NotADirectory(self.root.as_path().into()));
		}

		let options = Arc::clone(&self.options);

		let mut watcher = RecommendedWatcher::new(
			move |result: notify::Result<Event>| match result {
				Ok(event) => {
					for signal in translate(event) {
						if options.accepts(&signal) && !sink.emit(signal) {
							trace!("Signal receiver is gone, discarding directory event;");
							return;
						}
					}
				}
				Err(e) => error!(?e, "Directory watcher error;"),
			},
			Config::default(),
		)
		.map_err(|e| SourceError::registration(&self.root, e))?;

		let mode = if self.options.recursive {
			RecursiveMode::Recursive
		} else {
			RecursiveMode::NonRecursive
		};

		watcher
			.watch(&self.root, mode)
			.map_err(|e| SourceError::registration(&self.root, e))?;

		Ok(watcher)
	}
}

#[async_trait]
impl ChangeSource for DirectorySource {
	type Payload = PathBuf;

	fn name(&self) -> &str {
		&self.name
	}

	fn state(&self) -> SourceState {
		if self.registration.lock().is_some() {
			SourceState::Watching
		} else {
			SourceState::Idle
		}
	}

	#[instrument(skip_all, fields(source = %self.name, root = %self.root.display()))]
	async fn start(&self, sink: SignalSink<PathBuf>) {
		if self.registration.lock().is_some() {
			debug!("Directory source already watching;");
			return;
		}

		let watcher = match self.register(sink.clone()).await {
			Ok(watcher) => watcher,
			Err(e) => {
				warn!(?e, "Unable to watch directory, source will stay idle;");
				return;
			}
		};

		{
			let mut registration = self.registration.lock();
			if registration.is_some() {
				// A concurrent start won the race, ours gets dropped here
				return;
			}

			*registration = Some(Registration {
				_watcher: watcher,
				sink: sink.clone(),
			});
		}

		debug!("Now watching directory;");

		enumerate(&self.root, &self.options, &sink).await;
	}

	#[instrument(skip_all, fields(source = %self.name, root = %self.root.display()))]
	async fn stop(&self) {
		let registration = self.registration.lock().take();
		if registration.is_some() {
			drop(registration);
			debug!("Stopped watching directory;");
		}
	}

	async fn rescan(&self) {
		let sink = self
			.registration
			.lock()
			.as_ref()
			.map(|registration| registration.sink.clone());

		if let Some(sink) = sink {
			enumerate(&self.root, &self.options, &sink).await;
		}
	}
}

/// Announces every accepted entry under `root`, closing the pass with
/// [`ChangeSignal::EnumerationCompleted`]
async fn enumerate(root: &Path, options: &DirectoryOptions, sink: &SignalSink<PathBuf>) {
	let mut partial = false;
	let mut pending = vec![root.to_path_buf()];

	while let Some(dir) = pending.pop() {
		let mut read_dir = match fs::read_dir(&dir).await {
			Ok(read_dir) => read_dir,
			Err(e) => {
				warn!(?e, dir = %dir.display(), "Failed to read directory during enumeration;");
				partial = true;
				continue;
			}
		};

		let mut entries = Vec::new();
		loop {
			match read_dir.next_entry().await {
				Ok(Some(entry)) => match entry.file_type().await {
					Ok(file_type) => entries.push((entry.path(), file_type.is_dir())),
					Err(e) => {
						warn!(?e, path = %entry.path().display(), "Failed to stat entry;");
						partial = true;
					}
				},
				Ok(None) => break,
				Err(e) => {
					warn!(?e, dir = %dir.display(), "Failed to read directory entry;");
					partial = true;
					break;
				}
			}
		}

		entries.sort_unstable();

		for (path, is_dir) in entries {
			if is_dir && options.recursive && (options.include_hidden || !is_hidden(&path)) {
				pending.push(path.clone());
			}

			if (options.include_directories || !is_dir)
				&& options.accepts_name(&path)
				&& !sink.emit(ChangeSignal::added(path_key(&path), path))
			{
				return;
			}
		}
	}

	sink.emit(ChangeSignal::enumeration_completed(partial));
}
