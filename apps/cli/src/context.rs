use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use wk_config::WatchConfig;
use wk_reconcile::{ReconciledCollection, ReconcilerConfig, SortOrder};

use crate::util::output::print_json;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
	Human,
	Json,
}

pub struct Context {
	pub format: OutputFormat,
	pub data_dir: PathBuf,
	pub config: WatchConfig,
}

impl Context {
	pub fn new(format: OutputFormat, data_dir: PathBuf, config: WatchConfig) -> Self {
		Self {
			format,
			data_dir,
			config,
		}
	}

	pub fn reconciler_config(&self) -> ReconcilerConfig {
		ReconcilerConfig::default().with_concurrency(self.config.reconciler.enrichment_concurrency)
	}

	pub fn collection(&self, order: SortOrder) -> Arc<ReconciledCollection> {
		Arc::new(ReconciledCollection::with_event_capacity(
			order,
			self.config.reconciler.event_capacity,
		))
	}

	pub fn libraries_dir(&self) -> PathBuf {
		self.config.libraries_dir(&self.data_dir)
	}

	pub fn recent_dir(&self) -> PathBuf {
		self.config.recent_dir(&self.data_dir)
	}

	pub fn quick_access_file(&self) -> PathBuf {
		self.config.quick_access_file(&self.data_dir)
	}

	/// Prints `output` as JSON, or runs `human` for the human readable format
	pub fn print<T: Serialize>(&self, output: &T, human: impl FnOnce(&T)) -> Result<()> {
		match self.format {
			OutputFormat::Human => {
				human(output);
				Ok(())
			}
			OutputFormat::Json => print_json(output),
		}
	}
}
