use wk_config::WatchConfig;

use std::{fs, path::PathBuf};

use tempfile::tempdir;

#[test]
fn first_load_writes_defaults() {
	let dir = tempdir().unwrap();

	let config = WatchConfig::load_or_create(dir.path()).unwrap();

	assert_eq!(config, WatchConfig::default());
	assert!(WatchConfig::config_path(dir.path()).exists());
	assert_eq!(config.libraries_dir(dir.path()), dir.path().join("libraries"));
	assert_eq!(
		config.quick_access_file(dir.path()),
		dir.path().join("quick_access.json")
	);
}

#[test]
fn saved_changes_survive_a_reload() {
	let dir = tempdir().unwrap();

	let mut config = WatchConfig::load_or_create(dir.path()).unwrap();
	config.repositories.push(PathBuf::from("/src/watchkeeper"));
	config.libraries.path = Some(PathBuf::from("/srv/libraries"));
	config.reconciler.enrichment_concurrency = 1;
	config.save(dir.path()).unwrap();

	let reloaded = WatchConfig::load_or_create(dir.path()).unwrap();
	assert_eq!(reloaded, config);
	assert_eq!(
		reloaded.libraries_dir(dir.path()),
		PathBuf::from("/srv/libraries")
	);
}

#[test]
fn malformed_config_is_an_error() {
	let dir = tempdir().unwrap();
	fs::write(WatchConfig::config_path(dir.path()), "{ nope").unwrap();

	let e = WatchConfig::load_or_create(dir.path()).unwrap_err();
	assert!(format!("{e:#}").contains("parsing"));
}
