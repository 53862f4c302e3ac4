use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::{fs, spawn, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn, Instrument};
use wk_utils::{error::FileIOError, path_key};

use crate::{ChangeSignal, ChangeSource, SignalSink, SourceError, SourceState};

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Files directly under the git directory whose changes alter what a repository looks like
const TRACKED_FILES: [&str; 6] = [
	"HEAD",
	"index",
	"ORIG_HEAD",
	"FETCH_HEAD",
	"MERGE_HEAD",
	"packed-refs",
];

struct Watch {
	repository: PathBuf,
	// Dropping the watcher releases its OS handles
	_watcher: RecommendedWatcher,
	handle: JoinHandle<()>,
}

struct Active {
	watches: Vec<Watch>,
	token: CancellationToken,
	sink: SignalSink<PathBuf>,
	/// Some repositories could not be watched
	partial: bool,
}

/// Reports a set of repositories, re-announcing one as [`ChangeSignal::Modified`] whenever its
/// HEAD, index or refs change. Bursts (a checkout touches dozens of files) collapse into one
/// signal per debounce window.
///
/// Repositories that can't be located are logged and left out, marking the enumeration as
/// partial. The source stays idle only when none of them can be watched.
pub struct GitRepositorySource {
	name: String,
	repositories: Vec<PathBuf>,
	debounce: Duration,
	active: Mutex<Option<Active>>,
}

impl GitRepositorySource {
	pub fn new(
		name: impl Into<String>,
		repositories: impl IntoIterator<Item = impl Into<PathBuf>>,
	) -> Self {
		Self {
			name: name.into(),
			repositories: repositories.into_iter().map(Into::into).collect(),
			debounce: DEFAULT_DEBOUNCE,
			active: Mutex::new(None),
		}
	}

	#[must_use]
	pub const fn with_debounce(mut self, debounce: Duration) -> Self {
		self.debounce = debounce;
		self
	}

	pub fn repositories(&self) -> &[PathBuf] {
		&self.repositories
	}

	fn watch(git_dir: &Path, raw_tx: chan::Sender<()>) -> Result<RecommendedWatcher, SourceError> {
		let refs_dir = git_dir.join("refs");
		let filter_refs_dir = refs_dir.clone();

		let mut watcher = RecommendedWatcher::new(
			move |result: notify::Result<Event>| match result {
				Ok(event) => {
					if matches!(event.kind, EventKind::Access(_)) {
						return;
					}

					if event
						.paths
						.iter()
						.any(|path| is_tracked(path, &filter_refs_dir))
					{
						// Unbounded, so this never blocks the notify thread
						let _ = raw_tx.try_send(());
					}
				}
				Err(e) => error!(?e, "Repository watcher error;"),
			},
			Config::default(),
		)
		.map_err(|e| SourceError::registration(git_dir, e))?;

		watcher
			.watch(git_dir, RecursiveMode::NonRecursive)
			.map_err(|e| SourceError::registration(git_dir, e))?;

		if refs_dir.is_dir() {
			if let Err(e) = watcher.watch(&refs_dir, RecursiveMode::Recursive) {
				warn!(?e, "Unable to watch refs, branch updates will be missed;");
			}
		}

		Ok(watcher)
	}

	async fn watch_repository(
		&self,
		repository: &Path,
		sink: &SignalSink<PathBuf>,
		token: &CancellationToken,
	) -> Result<Watch, SourceError> {
		let git_dir = resolve_git_dir(repository).await?;

		let (raw_tx, raw_rx) = chan::unbounded();
		let watcher = Self::watch(&git_dir, raw_tx)?;

		let handle = spawn(
			debounce(
				path_key(repository),
				repository.to_path_buf(),
				self.debounce,
				raw_rx,
				sink.clone(),
				token.clone(),
			)
			.in_current_span(),
		);

		debug!(
			repository = %repository.display(),
			git_dir = %git_dir.display(),
			"Now watching repository;"
		);

		Ok(Watch {
			repository: repository.to_path_buf(),
			_watcher: watcher,
			handle,
		})
	}
}

fn announce<'a>(
	repositories: impl IntoIterator<Item = &'a PathBuf>,
	partial: bool,
	sink: &SignalSink<PathBuf>,
) {
	for repository in repositories {
		if !sink.emit(ChangeSignal::added(path_key(repository), repository.clone())) {
			return;
		}
	}

	sink.emit(ChangeSignal::enumeration_completed(partial));
}

fn is_tracked(path: &Path, refs_dir: &Path) -> bool {
	if path.extension().is_some_and(|extension| extension == "lock") {
		return false;
	}

	path.starts_with(refs_dir)
		|| path
			.file_name()
			.is_some_and(|name| TRACKED_FILES.iter().any(|tracked| name == *tracked))
}

/// Finds the git directory of `repository`, following the `gitdir:` pointer that worktrees and
/// submodules keep in a `.git` file.
pub async fn resolve_git_dir(repository: &Path) -> Result<PathBuf, SourceError> {
	let dot_git = repository.join(".git");

	let metadata = fs::metadata(&dot_git)
		.await
		.map_err(|e| FileIOError::from((&dot_git, e, "looking for git directory")))?;

	if metadata.is_dir() {
		return Ok(dot_git);
	}

	let contents = fs::read_to_string(&dot_git)
		.await
		.map_err(|e| FileIOError::from((&dot_git, e, "reading gitdir pointer")))?;

	let git_dir = contents
		.lines()
		.find_map(|line| line.strip_prefix("gitdir:"))
		.map(str::trim)
		.filter(|git_dir| !git_dir.is_empty())
		.map(PathBuf::from)
		.ok_or_else(|| SourceError::InvalidRepository(repository.into()))?;

	Ok(if git_dir.is_relative() {
		repository.join(git_dir)
	} else {
		git_dir
	})
}

async fn debounce(
	key: String,
	repository: PathBuf,
	window: Duration,
	raw_rx: chan::Receiver<()>,
	sink: SignalSink<PathBuf>,
	token: CancellationToken,
) {
	loop {
		tokio::select! {
			biased;
			() = token.cancelled() => break,
			received = raw_rx.recv() => if received.is_err() { break },
		}

		tokio::select! {
			biased;
			() = token.cancelled() => break,
			() = sleep(window) => {}
		}

		// Everything that arrived during the window belongs to the same burst
		while raw_rx.try_recv().is_ok() {}

		trace!(%key, "Repository changed;");

		if !sink.emit(ChangeSignal::modified(key.clone(), repository.clone())) {
			break;
		}
	}
}

#[async_trait]
impl ChangeSource for GitRepositorySource {
	type Payload = PathBuf;

	fn name(&self) -> &str {
		&self.name
	}

	fn state(&self) -> SourceState {
		if self.active.lock().is_some() {
			SourceState::Watching
		} else {
			SourceState::Idle
		}
	}

	#[instrument(skip_all, fields(source = %self.name, repositories = self.repositories.len()))]
	async fn start(&self, sink: SignalSink<PathBuf>) {
		if self.active.lock().is_some() {
			debug!("Repository source already watching;");
			return;
		}

		let token = CancellationToken::new();
		let mut watches = Vec::with_capacity(self.repositories.len());
		let mut partial = false;

		for repository in &self.repositories {
			match self.watch_repository(repository, &sink, &token).await {
				Ok(watch) => watches.push(watch),
				Err(e) => {
					warn!(
						?e,
						repository = %repository.display(),
						"Unable to watch repository, leaving it out;"
					);
					partial = true;
				}
			}
		}

		if watches.is_empty() {
			token.cancel();
			warn!("No repository could be watched, source will stay idle;");
			return;
		}

		let watched = watches
			.iter()
			.map(|watch| watch.repository.clone())
			.collect::<Vec<_>>();

		{
			let mut active = self.active.lock();
			if active.is_some() {
				// A concurrent start won the race
				token.cancel();
				return;
			}

			*active = Some(Active {
				watches,
				token,
				sink: sink.clone(),
				partial,
			});
		}

		announce(&watched, partial, &sink);
	}

	#[instrument(skip_all, fields(source = %self.name))]
	async fn stop(&self) {
		let active = self.active.lock().take();
		let Some(Active { watches, token, .. }) = active else {
			return;
		};

		token.cancel();

		for Watch {
			repository,
			_watcher: watcher,
			handle,
		} in watches
		{
			drop(watcher);

			if let Err(e) = handle.await {
				error!(?e, repository = %repository.display(), "Repository debounce task failed;");
			}
		}

		debug!("Stopped watching repositories;");
	}

	async fn rescan(&self) {
		let announcement = self.active.lock().as_ref().map(|active| {
			(
				active
					.watches
					.iter()
					.map(|watch| watch.repository.clone())
					.collect::<Vec<_>>(),
				active.partial,
				active.sink.clone(),
			)
		});

		if let Some((watched, partial, sink)) = announcement {
			announce(&watched, partial, &sink);
		}
	}
}

impl Drop for GitRepositorySource {
	fn drop(&mut self) {
		if let Some(Active { watches, token, .. }) = self.active.get_mut().take() {
			token.cancel();
			for watch in watches {
				watch.handle.abort();
			}
		}
	}
}
