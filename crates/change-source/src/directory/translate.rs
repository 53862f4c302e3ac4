//! Raw `notify` event translation
//!
//! inotify pairs rename halves when it can, but FSEvents and ReadDirectoryChangesW usually
//! report them separately, so unpaired halves are resolved against the filesystem.

use std::path::PathBuf;

use notify::{
	event::{ModifyKind, RenameMode},
	Event, EventKind,
};
use tracing::trace;
use wk_utils::path_key;

use crate::ChangeSignal;

pub(super) fn translate(event: Event) -> Vec<ChangeSignal<PathBuf>> {
	let Event { kind, paths, .. } = event;

	match kind {
		EventKind::Create(_) => paths.into_iter().map(added).collect(),
		EventKind::Remove(_) => paths.into_iter().map(removed).collect(),
		EventKind::Modify(ModifyKind::Name(mode)) => rename(mode, paths),
		EventKind::Modify(_) => paths.into_iter().map(modified).collect(),
		EventKind::Access(_) | EventKind::Any | EventKind::Other => {
			trace!(?kind, "Ignoring event kind;");
			vec![]
		}
	}
}

fn rename(mode: RenameMode, paths: Vec<PathBuf>) -> Vec<ChangeSignal<PathBuf>> {
	match mode {
		RenameMode::Both if paths.len() >= 2 => {
			let mut paths = paths.into_iter();
			paths
				.next()
				.map(removed)
				.into_iter()
				.chain(paths.next().map(added))
				.collect()
		}
		RenameMode::From => paths.into_iter().map(removed).collect(),
		RenameMode::To => paths.into_iter().map(added).collect(),
		_ => paths
			.into_iter()
			.map(|path| {
				if path.exists() {
					added(path)
				} else {
					removed(path)
				}
			})
			.collect(),
	}
}

fn added(path: PathBuf) -> ChangeSignal<PathBuf> {
	ChangeSignal::added(path_key(&path), path)
}

fn modified(path: PathBuf) -> ChangeSignal<PathBuf> {
	ChangeSignal::modified(path_key(&path), path)
}

fn removed(path: PathBuf) -> ChangeSignal<PathBuf> {
	ChangeSignal::removed(path_key(path))
}
