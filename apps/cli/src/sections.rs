//! One reconciled collection per sidebar section, built from the config

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, instrument};
use wk_change_source::ChangeSource;
use wk_reconcile::{
	Enricher, ReconciledCollection, Reconciler, ReconcilerState, RefreshOutcome,
};
use wk_watchers::{drives, git, libraries, quick_access, recent};

use crate::context::Context;

/// How long a one-off listing waits for its enumeration cycle
const CYCLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
	Drives,
	Libraries,
	Recent,
	QuickAccess,
	Repositories,
}

impl Section {
	pub const ALL: [Self; 5] = [
		Self::Drives,
		Self::Libraries,
		Self::Recent,
		Self::QuickAccess,
		Self::Repositories,
	];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Drives => "drives",
			Self::Libraries => "libraries",
			Self::Recent => "recent",
			Self::QuickAccess => "quick_access",
			Self::Repositories => "repositories",
		}
	}

	pub fn is_enabled(self, ctx: &Context) -> bool {
		let config = &ctx.config;
		match self {
			Self::Drives => config.drives.enabled,
			Self::Libraries => config.libraries.enabled,
			Self::Recent => config.recent.enabled,
			Self::QuickAccess => config.quick_access.enabled,
			Self::Repositories => !config.repositories.is_empty(),
		}
	}
}

impl fmt::Display for Section {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The reconciler operations the CLI needs, without its source and enricher types
#[async_trait]
trait Watched: Send + Sync {
	async fn start(&self);
	async fn stop(&self);
	fn state(&self) -> ReconcilerState;
	fn outcomes(&self) -> watch::Receiver<Option<RefreshOutcome>>;
}

#[async_trait]
impl<S, E> Watched for Reconciler<S, E>
where
	S: ChangeSource,
	E: Enricher<S::Payload>,
{
	async fn start(&self) {
		Reconciler::start(self).await;
	}

	async fn stop(&self) {
		Reconciler::stop(self).await;
	}

	fn state(&self) -> ReconcilerState {
		Reconciler::state(self)
	}

	fn outcomes(&self) -> watch::Receiver<Option<RefreshOutcome>> {
		Reconciler::outcomes(self)
	}
}

pub struct SectionWatcher {
	pub section: Section,
	pub collection: Arc<ReconciledCollection>,
	reconciler: Box<dyn Watched>,
}

impl SectionWatcher {
	pub async fn build(section: Section, ctx: &Context) -> Result<Self> {
		let config = ctx.reconciler_config();

		let (collection, reconciler): (_, Box<dyn Watched>) = match section {
			Section::Drives => {
				let collection = ctx.collection(drives::order());
				let reconciler = drives::reconciler(
					Arc::clone(&collection),
					ctx.config.drives.poll_interval(),
					config,
				);
				(collection, Box::new(reconciler))
			}
			Section::Libraries => {
				let dir = ctx.libraries_dir();
				create_dir(&dir).await?;

				let collection = ctx.collection(libraries::order());
				let reconciler = libraries::reconciler(Arc::clone(&collection), dir, config);
				(collection, Box::new(reconciler))
			}
			Section::Recent => {
				let dir = ctx.recent_dir();
				create_dir(&dir).await?;

				let collection = ctx.collection(recent::order());
				let reconciler = recent::reconciler(Arc::clone(&collection), dir, config);
				(collection, Box::new(reconciler))
			}
			Section::QuickAccess => {
				let collection = ctx.collection(quick_access::order());
				let reconciler = quick_access::reconciler(
					Arc::clone(&collection),
					ctx.quick_access_file(),
					ctx.config.quick_access.poll_interval(),
					config,
				);
				(collection, Box::new(reconciler))
			}
			Section::Repositories => {
				let collection = ctx.collection(git::order());
				let reconciler = git::reconciler(
					Arc::clone(&collection),
					ctx.config.repositories.iter().cloned(),
					config,
				);
				(collection, Box::new(reconciler))
			}
		};

		Ok(Self {
			section,
			collection,
			reconciler,
		})
	}

	/// Returns `false` when the section's source could not be started
	#[instrument(skip(self), fields(section = %self.section))]
	pub async fn start(&self) -> bool {
		self.reconciler.start().await;
		self.reconciler.state() == ReconcilerState::Watching
	}

	pub async fn stop(&self) {
		self.reconciler.stop().await;
	}

	/// Starts, waits for the first enumeration cycle to settle, then stops
	pub async fn cycle(&self) -> Result<RefreshOutcome> {
		let mut outcomes = self.reconciler.outcomes();

		if !self.start().await {
			bail!("{} could not be watched, see the log for details", self.section);
		}

		let waited = timeout(CYCLE_TIMEOUT, outcomes.wait_for(Option::is_some))
			.await
			.map(|waited| waited.ok().and_then(|outcome| outcome.clone()));

		self.stop().await;

		let Ok(outcome) = waited else {
			bail!("{} did not finish enumerating in time", self.section);
		};

		debug!(section = %self.section, ?outcome, "Cycle finished;");

		outcome.with_context(|| format!("{} stopped before enumerating", self.section))
	}
}

async fn create_dir(dir: &std::path::Path) -> Result<()> {
	fs::create_dir_all(dir)
		.await
		.with_context(|| format!("creating {}", dir.display()))
}
