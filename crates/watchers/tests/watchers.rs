use wk_watchers::{
	drives, git, libraries, quick_access, recent, LibraryError, LibraryStore, QuickAccess,
	RecentError, RecentItems,
};

use std::{path::Path, sync::Arc, time::Duration};

use serde_json::json;
use tempfile::tempdir;
use tokio::{
	fs,
	time::{sleep, timeout, Instant},
};
use tracing_test::traced_test;
use wk_change_source::ChangeSource;
use wk_reconcile::{
	CollectionSnapshot, Enricher, Entity, EntityKind, ReconciledCollection, Reconciler,
	ReconcilerConfig, ReconcilerState, RefreshOutcome,
};
use wk_utils::path_key;

const WAIT: Duration = Duration::from_secs(5);

async fn first_outcome<S, E>(reconciler: &Reconciler<S, E>) -> RefreshOutcome
where
	S: ChangeSource,
	E: Enricher<S::Payload>,
{
	let mut outcomes = reconciler.outcomes();
	let outcome = timeout(WAIT, outcomes.wait_for(Option::is_some))
		.await
		.expect("timed out waiting for an enumeration cycle")
		.expect("reconciler dropped");

	outcome.clone().expect("outcome is present")
}

async fn wait_until(
	collection: &ReconciledCollection,
	mut done: impl FnMut(&CollectionSnapshot) -> bool,
) -> CollectionSnapshot {
	let deadline = Instant::now() + WAIT;
	loop {
		let snapshot = collection.snapshot();
		if done(&snapshot) {
			return snapshot;
		}

		assert!(Instant::now() < deadline, "timed out waiting for the collection");
		sleep(Duration::from_millis(20)).await;
	}
}

fn names(snapshot: &CollectionSnapshot) -> Vec<&str> {
	snapshot.iter().map(|entity| entity.name.as_str()).collect()
}

fn key(path: impl AsRef<Path>) -> String {
	path_key(path)
}

#[tokio::test]
#[traced_test]
async fn default_libraries_come_first() {
	let dir = tempdir().unwrap();
	fs::write(dir.path().join("Projects.library"), "{}").await.unwrap();
	fs::write(dir.path().join("Music.library"), "{}").await.unwrap();
	fs::write(dir.path().join("Archive.library"), "{}").await.unwrap();
	fs::write(dir.path().join("notes.txt"), "").await.unwrap();

	let collection = Arc::new(ReconciledCollection::new(libraries::order()));
	let reconciler =
		libraries::reconciler(Arc::clone(&collection), dir.path(), ReconcilerConfig::default());

	reconciler.start().await;
	let outcome = first_outcome(&reconciler).await;

	assert_eq!(outcome.added, 3);
	assert!(!outcome.partial);

	let snapshot = collection.snapshot();
	assert_eq!(names(&snapshot), vec!["Music", "Archive", "Projects"]);
	assert!(snapshot.entities()[0].pinned);

	reconciler.stop().await;
}

#[tokio::test]
#[traced_test]
async fn created_library_shows_up_and_names_are_checked() {
	let dir = tempdir().unwrap();
	fs::write(dir.path().join("Documents.library"), "{}").await.unwrap();

	let collection = Arc::new(ReconciledCollection::new(libraries::order()));
	let reconciler =
		libraries::reconciler(Arc::clone(&collection), dir.path(), ReconcilerConfig::default());
	reconciler.start().await;
	first_outcome(&reconciler).await;

	let store = LibraryStore::new(dir.path());
	let snapshot = collection.snapshot();

	assert!(matches!(
		store.can_create("  ", &snapshot),
		Err(LibraryError::EmptyName)
	));
	assert!(matches!(
		store.can_create("a/b", &snapshot),
		Err(LibraryError::RestrictedCharacters(_))
	));
	assert!(matches!(
		store.can_create("nul.txt", &snapshot),
		Err(LibraryError::RestrictedName(_))
	));
	assert!(matches!(
		store.can_create("documents", &snapshot),
		Err(LibraryError::AlreadyExists(_))
	));

	let folder = dir.path().join("code");
	let path = store
		.create("Code", &snapshot, vec![folder.clone()])
		.await
		.unwrap();
	assert_eq!(path, dir.path().join("Code.library"));

	let snapshot = wait_until(&collection, |snapshot| {
		snapshot.get(&key(&path)).is_some()
	})
	.await;

	let code = LibraryStore::find(&snapshot, dir.path().join("code.library")).unwrap();
	assert_eq!(code.kind, EntityKind::Library);
	assert!(!code.pinned);
	assert_eq!(code.metadata["folders"], json!([path_key(&folder)]));
	assert_eq!(code.metadata["pinned_to_sidebar"], json!(true));

	// The file already exists even if the snapshot is stale
	assert!(matches!(
		store.create("Code", &CollectionSnapshot::default(), vec![]).await,
		Err(LibraryError::AlreadyExists(_))
	));

	reconciler.stop().await;
}

#[tokio::test]
async fn library_updates() {
	let dir = tempdir().unwrap();
	let store = LibraryStore::new(dir.path());
	let path = store
		.create(
			"Photos",
			&CollectionSnapshot::default(),
			vec!["/photos/2023".into(), "/photos/2024".into()],
		)
		.await
		.unwrap();

	assert!(store
		.update(&path, libraries::LibraryUpdate::default())
		.await
		.unwrap()
		.is_none());

	assert!(store
		.update(
			&path,
			libraries::LibraryUpdate {
				folders: Some(vec![]),
				..Default::default()
			}
		)
		.await
		.unwrap()
		.is_none());

	let updated = store
		.update(
			&path,
			libraries::LibraryUpdate {
				folders: Some(vec![
					"/PHOTOS/2024".into(),
					"/photos/2025".into(),
					"/photos/2025".into(),
				]),
				pinned_to_sidebar: Some(false),
				..Default::default()
			},
		)
		.await
		.unwrap()
		.unwrap();

	assert_eq!(
		updated.folders,
		vec![
			Path::new("/photos/2024").to_path_buf(),
			Path::new("/photos/2025").to_path_buf()
		]
	);
	assert!(!updated.pinned_to_sidebar);
	assert_eq!(libraries::read_definition(&path).await.unwrap(), updated);

	assert!(matches!(
		store.update(dir.path().join("notes.txt"), libraries::LibraryUpdate::default()).await,
		Err(LibraryError::NotALibrary(_))
	));
}

#[tokio::test]
#[traced_test]
async fn malformed_library_is_skipped() {
	let dir = tempdir().unwrap();
	fs::write(dir.path().join("Broken.library"), "{ nope").await.unwrap();
	fs::write(dir.path().join("Videos.library"), "{}").await.unwrap();

	let collection = Arc::new(ReconciledCollection::new(libraries::order()));
	let reconciler =
		libraries::reconciler(Arc::clone(&collection), dir.path(), ReconcilerConfig::default());
	reconciler.start().await;

	let outcome = first_outcome(&reconciler).await;
	assert_eq!(outcome.added, 1);
	assert_eq!(outcome.skipped, 1);
	assert_eq!(names(&collection.snapshot()), vec!["Videos"]);
	assert!(logs_contain("Enrichment failed, skipping signal;"));

	reconciler.stop().await;
}

#[tokio::test]
#[traced_test]
async fn recent_items_can_be_forgotten_and_cleared() {
	let dir = tempdir().unwrap();
	let report = dir.path().join("report.docx.lnk");
	fs::write(&report, "").await.unwrap();
	fs::write(dir.path().join("photo.jpg"), "").await.unwrap();
	fs::write(dir.path().join("todo.txt"), "").await.unwrap();

	let collection = Arc::new(ReconciledCollection::new(recent::order()));
	let reconciler =
		recent::reconciler(Arc::clone(&collection), dir.path(), ReconcilerConfig::default());
	reconciler.start().await;
	first_outcome(&reconciler).await;

	let report_entity = collection.get(&key(&report)).unwrap();
	assert_eq!(report_entity.name, "report.docx");
	assert_eq!(report_entity.kind, EntityKind::RecentItem);

	let items = RecentItems::new(dir.path());
	items.forget(&report).await.unwrap();
	// Forgetting twice is fine
	items.forget(&report).await.unwrap();

	assert!(matches!(
		items.forget("/somewhere/else.txt").await,
		Err(RecentError::NotRecentItem(_))
	));

	wait_until(&collection, |snapshot| snapshot.len() == 2).await;

	assert_eq!(items.clear().await.unwrap(), 2);
	wait_until(&collection, CollectionSnapshot::is_empty).await;

	reconciler.stop().await;
}

#[tokio::test]
#[traced_test]
async fn pinning_and_unpinning_folders() {
	let dir = tempdir().unwrap();
	let file = dir.path().join("state/quick_access.json");
	let work = dir.path().join("work");
	let games = dir.path().join("games");
	fs::create_dir_all(&work).await.unwrap();
	fs::create_dir_all(&games).await.unwrap();

	let collection = Arc::new(ReconciledCollection::new(quick_access::order()));
	let reconciler = quick_access::reconciler(
		Arc::clone(&collection),
		&file,
		Duration::from_secs(3600),
		ReconcilerConfig::default(),
	);
	reconciler.start().await;
	first_outcome(&reconciler).await;
	assert!(collection.is_empty());

	let quick_access = QuickAccess::new(Arc::clone(reconciler.source()));
	assert!(quick_access.pin(&work).await.unwrap());
	assert!(quick_access.pin(&games).await.unwrap());
	assert!(!quick_access.pin(&work).await.unwrap());
	assert!(quick_access.pin(dir.path().join("gone")).await.unwrap());

	let snapshot = wait_until(&collection, |snapshot| snapshot.len() == 2).await;
	assert_eq!(names(&snapshot), vec!["work", "games"]);
	assert!(snapshot.iter().all(|entity| entity.pinned));
	assert_eq!(quick_access.pinned().await.unwrap().len(), 3);

	assert!(quick_access.unpin(&work).await.unwrap());
	assert!(!quick_access.unpin(&work).await.unwrap());

	let snapshot = wait_until(&collection, |snapshot| snapshot.len() == 1).await;
	assert_eq!(names(&snapshot), vec!["games"]);

	reconciler.stop().await;
}

#[tokio::test]
#[traced_test]
async fn repository_follows_branch_switches() {
	let repo = tempdir().unwrap();
	let git_dir = repo.path().join(".git");
	fs::create_dir_all(git_dir.join("refs/heads")).await.unwrap();
	fs::write(git_dir.join("HEAD"), "ref: refs/heads/main\n")
		.await
		.unwrap();

	let collection = Arc::new(ReconciledCollection::new(git::order()));
	let reconciler = git::reconciler(
		Arc::clone(&collection),
		[repo.path()],
		ReconcilerConfig::default(),
	);
	reconciler.start().await;
	first_outcome(&reconciler).await;

	let repo_key = key(repo.path());
	let entity = collection.get(&repo_key).unwrap();
	assert_eq!(entity.kind, EntityKind::Repository);
	assert_eq!(git::head(&entity), Some(git::Head::Branch("main".to_string())));

	fs::write(
		git_dir.join("HEAD"),
		"0123456789abcdef0123456789abcdef01234567\n",
	)
	.await
	.unwrap();

	let snapshot = wait_until(&collection, |snapshot| {
		snapshot
			.get(&repo_key)
			.and_then(git::head)
			.is_some_and(|head| head.is_detached())
	})
	.await;
	assert_eq!(
		snapshot.get(&repo_key).and_then(git::head),
		Some(git::Head::Detached("0123456".to_string()))
	);

	reconciler.stop().await;
}

fn drive(mount_point: &str, drive_type: drives::DriveType) -> Entity {
	Entity::new(mount_point, EntityKind::Drive, mount_point)
		.with_pinned(drives::is_system_drive(mount_point))
		.with_metadata(json!({ "drive_type": drive_type }))
}

#[test]
fn access_prompt_only_without_a_fixed_system_drive() {
	let partial = RefreshOutcome {
		partial: true,
		..Default::default()
	};

	let collection = ReconciledCollection::new(drives::order());
	collection.apply("/media/usb", Some(drive("/media/usb", drives::DriveType::Removable)));
	assert!(drives::needs_access_prompt(&partial, &collection.snapshot()));
	assert!(!drives::needs_access_prompt(
		&RefreshOutcome::default(),
		&collection.snapshot()
	));

	collection.apply("/", Some(drive("/", drives::DriveType::Fixed)));
	assert!(!drives::needs_access_prompt(&partial, &collection.snapshot()));
	assert_eq!(collection.snapshot().entities()[0].key, "/");
}

#[tokio::test]
#[traced_test]
async fn drives_reconciler_completes_a_cycle() {
	let collection = Arc::new(ReconciledCollection::new(drives::order()));
	let reconciler = drives::reconciler(
		Arc::clone(&collection),
		Duration::from_secs(3600),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;
	assert_eq!(reconciler.state(), ReconcilerState::Watching);

	let outcome = first_outcome(&reconciler).await;
	assert_eq!(outcome.generation, 1);
	assert!(collection
		.snapshot()
		.iter()
		.all(|entity| entity.kind == EntityKind::Drive));

	let refreshed = timeout(WAIT, reconciler.refresh())
		.await
		.expect("refresh timed out")
		.unwrap();
	assert_eq!(refreshed.generation, 2);
	assert_eq!(refreshed.added, 0);

	reconciler.stop().await;
	assert_eq!(reconciler.state(), ReconcilerState::Idle);
}
