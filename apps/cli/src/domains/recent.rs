use anyhow::Result;
use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use wk_watchers::RecentItems;

use crate::context::Context;

#[derive(Subcommand, Debug)]
pub enum RecentCmd {
	/// Remove one entry from the recent items folder
	Forget { path: PathBuf },
	/// Remove every entry from the recent items folder
	Clear,
}

pub async fn run(ctx: &Context, cmd: RecentCmd) -> Result<()> {
	let items = RecentItems::new(ctx.recent_dir());

	match cmd {
		RecentCmd::Forget { path } => {
			// Bare names refer to entries of the recent items folder
			let path = if path.parent().map_or(true, |parent| parent.as_os_str().is_empty()) {
				items.dir().join(path)
			} else {
				path
			};

			items.forget(&path).await?;

			ctx.print(&json!({ "forgotten": path }), |_| {
				println!("Forgot {}", path.display());
			})
		}
		RecentCmd::Clear => {
			let removed = items.clear().await?;

			ctx.print(&json!({ "removed": removed }), |_| {
				println!("Removed {removed} recent items");
			})
		}
	}
}
