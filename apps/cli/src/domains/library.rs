use anyhow::Result;
use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use wk_watchers::libraries::{is_library_path, LibraryUpdate};
use wk_watchers::LibraryStore;

use crate::context::Context;
use crate::sections::{Section, SectionWatcher};

#[derive(Subcommand, Debug)]
pub enum LibraryCmd {
	/// Create a library holding the given folders, your documents folder by default
	Create {
		name: String,
		#[arg(long = "folder")]
		folders: Vec<PathBuf>,
	},
	/// Pin a library to the sidebar, by name or definition path
	Pin {
		library: PathBuf,
		#[arg(long, default_value_t = false)]
		unpin: bool,
	},
}

pub async fn run(ctx: &Context, cmd: LibraryCmd) -> Result<()> {
	let store = LibraryStore::new(ctx.libraries_dir());

	match cmd {
		LibraryCmd::Create { name, mut folders } => {
			// Name checks run against what is on disk right now
			let watcher = SectionWatcher::build(Section::Libraries, ctx).await?;
			watcher.cycle().await?;
			let snapshot = watcher.collection.snapshot();

			if folders.is_empty() {
				folders.extend(dirs::document_dir());
			}

			let path = store.create(&name, &snapshot, folders).await?;

			ctx.print(&json!({ "created": path }), |_| {
				println!("Created library {name} at {}", path.display());
			})
		}
		LibraryCmd::Pin { library, unpin } => {
			let path = if is_library_path(&library) {
				library
			} else {
				store.path_for(&library.to_string_lossy())
			};

			let update = LibraryUpdate {
				pinned_to_sidebar: Some(!unpin),
				..Default::default()
			};

			let definition = store.update(&path, update).await?;

			ctx.print(&json!({ "path": path, "definition": definition }), |_| {
				match &definition {
					Some(_) if unpin => println!("Unpinned {}", path.display()),
					Some(_) => println!("Pinned {}", path.display()),
					None => println!("Nothing to update"),
				}
			})
		}
	}
}
