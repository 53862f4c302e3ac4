use anyhow::{Context as _, Result};
use serde_json::json;
use std::path::{absolute, PathBuf};
use std::sync::Arc;
use wk_change_source::PollingSource;
use wk_watchers::quick_access::PinnedFolders;
use wk_watchers::QuickAccess;

use crate::context::Context;

/// Pins or unpins each of `paths`, resolved against the working directory
pub async fn run(ctx: &Context, paths: Vec<PathBuf>, pin: bool) -> Result<()> {
	let source = Arc::new(PollingSource::new(
		"quick_access",
		PinnedFolders::new(ctx.quick_access_file()),
		ctx.config.quick_access.poll_interval(),
	));
	let quick_access = QuickAccess::new(source);

	let mut changed = Vec::with_capacity(paths.len());

	for path in paths {
		let path = absolute(&path)
			.with_context(|| format!("resolving {}", path.display()))?;

		let done = if pin {
			quick_access.pin(&path).await?
		} else {
			quick_access.unpin(&path).await?
		};

		changed.push((path, done));
	}

	let output = changed
		.iter()
		.map(|(path, done)| json!({ "path": path, "changed": done }))
		.collect::<Vec<_>>();

	ctx.print(&output, |_| {
		for (path, done) in &changed {
			match (pin, done) {
				(true, true) => println!("Pinned {}", path.display()),
				(true, false) => println!("{} is already pinned", path.display()),
				(false, true) => println!("Unpinned {}", path.display()),
				(false, false) => println!("{} was not pinned", path.display()),
			}
		}
	})
}
