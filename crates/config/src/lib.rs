use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";

/// Platform-specific data directory resolution
pub fn default_data_dir() -> Result<PathBuf> {
	#[cfg(target_os = "macos")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("watchkeeper");

	#[cfg(target_os = "windows")]
	let dir = dirs::data_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("Watchkeeper");

	#[cfg(not(any(target_os = "macos", target_os = "windows")))]
	let dir = dirs::data_local_dir()
		.ok_or_else(|| anyhow!("Could not determine data directory"))?
		.join("watchkeeper");

	// Create directory if it doesn't exist
	fs::create_dir_all(&dir)?;

	Ok(dir)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivesConfig {
	pub enabled: bool,
	pub poll_interval_secs: u64,
}

impl Default for DrivesConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			poll_interval_secs: 5,
		}
	}
}

impl DrivesConfig {
	pub const fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}
}

/// A watched folder. Without a `path`, a folder inside the data directory is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
	pub enabled: bool,
	pub path: Option<PathBuf>,
}

impl Default for FolderConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			path: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuickAccessConfig {
	pub enabled: bool,
	pub file: Option<PathBuf>,
	pub poll_interval_secs: u64,
}

impl Default for QuickAccessConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			file: None,
			poll_interval_secs: 2,
		}
	}
}

impl QuickAccessConfig {
	pub const fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.poll_interval_secs)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
	pub enrichment_concurrency: usize,
	/// Events a slow subscriber may fall behind by before it starts missing some
	pub event_capacity: usize,
}

impl Default for ReconcilerSettings {
	fn default() -> Self {
		Self {
			enrichment_concurrency: 4,
			event_capacity: 256,
		}
	}
}

/// Which sidebar sections are watched and where their data lives, stored as `config.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
	pub drives: DrivesConfig,
	pub libraries: FolderConfig,
	pub recent: FolderConfig,
	pub quick_access: QuickAccessConfig,
	pub repositories: Vec<PathBuf>,
	pub reconciler: ReconcilerSettings,
}

impl WatchConfig {
	pub fn config_path(data_dir: &Path) -> PathBuf {
		data_dir.join(CONFIG_FILE)
	}

	/// Loads the config from the data directory, writing the defaults on first run
	pub fn load_or_create(data_dir: &Path) -> Result<Self> {
		let config_path = Self::config_path(data_dir);

		if config_path.exists() {
			let json = fs::read_to_string(&config_path)
				.with_context(|| format!("reading {}", config_path.display()))?;
			let config = serde_json::from_str(&json)
				.with_context(|| format!("parsing {}", config_path.display()))?;
			Ok(config)
		} else {
			let config = Self::default();
			config.save(data_dir)?;
			debug!(path = %config_path.display(), "Wrote default config;");
			Ok(config)
		}
	}

	pub fn save(&self, data_dir: &Path) -> Result<()> {
		fs::create_dir_all(data_dir)?;

		let config_path = Self::config_path(data_dir);
		let json = serde_json::to_string_pretty(self)?;
		fs::write(&config_path, json)
			.with_context(|| format!("writing {}", config_path.display()))?;
		Ok(())
	}

	pub fn libraries_dir(&self, data_dir: &Path) -> PathBuf {
		self.libraries
			.path
			.clone()
			.unwrap_or_else(|| data_dir.join("libraries"))
	}

	/// The OS recent items folder on Windows, a data directory folder elsewhere
	pub fn recent_dir(&self, data_dir: &Path) -> PathBuf {
		if let Some(path) = &self.recent.path {
			return path.clone();
		}

		#[cfg(target_os = "windows")]
		if let Some(roaming) = dirs::data_dir() {
			return roaming.join(r"Microsoft\Windows\Recent");
		}

		data_dir.join("recent")
	}

	pub fn quick_access_file(&self, data_dir: &Path) -> PathBuf {
		self.quick_access
			.file
			.clone()
			.unwrap_or_else(|| data_dir.join("quick_access.json"))
	}
}
