use anyhow::{bail, Result};
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wk_reconcile::{CollectionEvent, Delta, EntityKind};
use wk_watchers::drives;

use crate::context::{Context, OutputFormat};
use crate::sections::{Section, SectionWatcher};
use crate::util::output::print_json_line;

/// Streams the deltas of every requested section until Ctrl-C
pub async fn watch(ctx: &Context, sections: Vec<Section>) -> Result<()> {
	let sections = if sections.is_empty() {
		Section::ALL
			.into_iter()
			.filter(|section| section.is_enabled(ctx))
			.collect()
	} else {
		sections
	};

	let mut watchers = Vec::with_capacity(sections.len());
	let mut printers: Vec<JoinHandle<()>> = Vec::with_capacity(sections.len());

	for section in sections {
		let watcher = SectionWatcher::build(section, ctx).await?;
		// Subscribing first so the initial enumeration is printed too
		let events = watcher.collection.subscribe();

		if !watcher.start().await {
			warn!(%section, "Section could not be watched, leaving it out;");
			continue;
		}

		printers.push(tokio::spawn(print_events(section, events, ctx.format)));
		watchers.push(watcher);
	}

	if watchers.is_empty() {
		bail!("nothing to watch");
	}

	info!(sections = watchers.len(), "Watching, press Ctrl-C to stop;");

	tokio::signal::ctrl_c().await?;

	for watcher in &watchers {
		watcher.stop().await;
	}

	for printer in printers {
		printer.abort();
	}

	Ok(())
}

async fn print_events(
	section: Section,
	mut events: broadcast::Receiver<CollectionEvent>,
	format: OutputFormat,
) {
	loop {
		match events.recv().await {
			Ok(event) => print_event(section, &event, format),
			Err(RecvError::Lagged(skipped)) => {
				warn!(%section, skipped, "Fell behind on collection events;");
			}
			Err(RecvError::Closed) => break,
		}
	}
}

fn print_event(section: Section, event: &CollectionEvent, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			let line = json!({
				"section": section,
				"version": event.snapshot.version(),
				"delta": event.delta,
			});
			if let Err(e) = print_json_line(&line) {
				warn!(?e, "Unable to print event;");
			}
		}
		OutputFormat::Human => match &event.delta {
			Delta::Added { index, entity } => {
				println!("[{section}] + {index} {} ({})", entity.name, entity.path.display());
			}
			Delta::Removed { index, entity } => {
				println!("[{section}] - {index} {}", entity.name);
			}
			Delta::Replaced {
				old_index,
				index,
				new,
				..
			} => {
				println!("[{section}] ~ {old_index} -> {index} {}", new.name);
			}
			Delta::Reset => {
				println!(
					"[{section}] = {} entries (version {})",
					event.snapshot.len(),
					event.snapshot.version()
				);
			}
		},
	}
}

/// Runs one enumeration cycle and prints the result
pub async fn list(ctx: &Context, section: Section) -> Result<()> {
	let watcher = SectionWatcher::build(section, ctx).await?;
	let outcome = watcher.cycle().await?;
	let snapshot = watcher.collection.snapshot();

	let prompt = section == Section::Drives && drives::needs_access_prompt(&outcome, &snapshot);

	let output = json!({
		"section": section,
		"outcome": outcome,
		"snapshot": snapshot,
		"needs_access_prompt": prompt,
	});

	ctx.print(&output, |_| {
		if snapshot.is_empty() {
			println!("No {section} found");
		}

		for entity in snapshot.iter() {
			let marker = if entity.pinned { '*' } else { ' ' };
			match entity.kind {
				EntityKind::Repository => println!(
					"{marker} {} [{}] {}",
					entity.name,
					entity.metadata["branch"].as_str().unwrap_or("?"),
					entity.path.display()
				),
				_ => println!("{marker} {} {}", entity.name, entity.path.display()),
			}
		}

		if outcome.partial {
			println!("Some {section} could not be read");
		}

		if prompt {
			println!("Grant access to the system drive to see every drive");
		}
	})
}
