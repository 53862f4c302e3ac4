use wk_change_source::{
	ChannelSource, ChangeSource, DirectoryOptions, DirectorySource, Enumeration, Enumerator,
	PollingSource, SourceError, SourceState,
};
use wk_reconcile::{
	enrich_with, CollectionEvent, Delta, EnrichError, Enricher, Entity, EntityKind, Error,
	ReconciledCollection, Reconciler, ReconcilerConfig, ReconcilerState, RefreshOutcome,
	SortOrder,
};

use std::{
	path::PathBuf,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use tokio::{
	sync::{broadcast, Notify},
	time::{sleep, timeout},
};
use tracing_test::traced_test;

const WAIT: Duration = Duration::from_secs(5);

fn named(key: &str, name: &str) -> Entity {
	Entity::new(key, EntityKind::Other, format!("/{key}")).with_name(name)
}

fn naming_enricher() -> impl Enricher<String> {
	enrich_with(|key: String, name: String| async move { Ok(Some(named(&key, &name))) })
}

async fn deltas_until_reset(events: &mut broadcast::Receiver<CollectionEvent>) -> Vec<Delta> {
	let mut deltas = vec![];
	loop {
		let event = timeout(WAIT, events.recv())
			.await
			.expect("timed out waiting for a collection event")
			.expect("collection events closed");

		let reset = event.delta == Delta::Reset;
		deltas.push(event.delta);
		if reset {
			return deltas;
		}
	}
}

async fn next_outcome<S, E>(reconciler: &Reconciler<S, E>, after: u64) -> RefreshOutcome
where
	S: ChangeSource,
	E: Enricher<S::Payload>,
{
	let mut outcomes = reconciler.outcomes();
	let outcome = timeout(
		WAIT,
		outcomes.wait_for(|outcome| outcome.as_ref().is_some_and(|o| o.generation > after)),
	)
	.await
	.expect("timed out waiting for an enumeration cycle")
	.expect("reconciler dropped");

	outcome.clone().expect("outcome is present")
}

#[tokio::test]
async fn modify_remove_add_then_complete() {
	let collection = Arc::new(ReconciledCollection::default());
	collection.apply("A", Some(named("A", "v1")));
	collection.apply("B", Some(named("B", "v1")));

	let source = Arc::new(ChannelSource::new("scenario"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	let mut events = collection.subscribe();
	reconciler.start().await;
	assert_eq!(reconciler.state(), ReconcilerState::Watching);

	source.modified("A", "v2".to_string());
	source.removed("B");
	source.added("C", "v1".to_string());
	source.enumeration_completed(false);

	let deltas = deltas_until_reset(&mut events).await;
	assert_eq!(
		deltas,
		vec![
			Delta::Removed {
				index: 1,
				entity: named("B", "v1"),
			},
			Delta::Replaced {
				old_index: 0,
				index: 0,
				old: named("A", "v1"),
				new: named("A", "v2"),
			},
			Delta::Added {
				index: 1,
				entity: named("C", "v1"),
			},
			Delta::Reset,
		]
	);

	let snapshot = collection.snapshot();
	assert_eq!(snapshot.len(), 2);
	assert_eq!(snapshot.get("A"), Some(&named("A", "v2")));
	assert_eq!(snapshot.get("C"), Some(&named("C", "v1")));

	let outcome = next_outcome(&reconciler, 0).await;
	assert_eq!(
		outcome,
		RefreshOutcome {
			generation: 1,
			added: 1,
			replaced: 1,
			removed: 1,
			skipped: 0,
			partial: false,
		}
	);

	reconciler.stop().await;
}

#[tokio::test]
async fn duplicate_signals_change_nothing_twice() {
	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("duplicates"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	let mut events = collection.subscribe();
	reconciler.start().await;

	source.added("A", "same".to_string());
	source.added("A", "same".to_string());
	source.removed("ghost");
	source.enumeration_completed(false);

	assert_eq!(
		deltas_until_reset(&mut events).await,
		vec![
			Delta::Added {
				index: 0,
				entity: named("A", "same"),
			},
			Delta::Reset,
		]
	);

	reconciler.stop().await;
}

struct GatedEnricher {
	started: Arc<Notify>,
	gate: Arc<Notify>,
}

#[async_trait]
impl Enricher<String> for GatedEnricher {
	async fn enrich(&self, key: &str, name: String) -> Result<Option<Entity>, EnrichError> {
		self.started.notify_one();
		self.gate.notified().await;
		Ok(Some(named(key, &name)))
	}
}

#[tokio::test]
async fn stop_discards_in_flight_enrichment() {
	let started = Arc::new(Notify::new());
	let gate = Arc::new(Notify::new());

	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("stopping"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		GatedEnricher {
			started: Arc::clone(&started),
			gate: Arc::clone(&gate),
		},
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;
	source.added("D", "drive".to_string());

	timeout(WAIT, started.notified()).await.unwrap();

	reconciler.stop().await;
	assert_eq!(reconciler.state(), ReconcilerState::Idle);
	assert_eq!(source.state(), SourceState::Idle);

	gate.notify_waiters();
	sleep(Duration::from_millis(50)).await;

	assert!(collection.get("D").is_none());
	assert!(collection.is_empty());

	// Stopping again is harmless
	reconciler.stop().await;
}

#[tokio::test]
async fn removal_overtakes_pending_enrichment() {
	let started = Arc::new(Notify::new());
	let gate = Arc::new(Notify::new());

	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("racing"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		GatedEnricher {
			started: Arc::clone(&started),
			gate: Arc::clone(&gate),
		},
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;

	source.added("X", "x".to_string());
	source.removed("X");
	source.enumeration_completed(false);

	timeout(WAIT, started.notified()).await.unwrap();
	gate.notify_one();

	let outcome = next_outcome(&reconciler, 0).await;
	assert_eq!(outcome.added, 0);
	assert!(collection.get("X").is_none());

	reconciler.stop().await;
}

#[tokio::test]
#[traced_test]
async fn failed_enrichment_is_logged_and_skipped() {
	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("flaky"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		enrich_with(|key: String, name: String| async move {
			match key.as_str() {
				"bad" => Err(EnrichError::Other("corrupted definition".to_string())),
				"gone" => Ok(None),
				_ => Ok(Some(named(&key, &name))),
			}
		}),
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;

	source.added("bad", "Bad".to_string());
	source.added("gone", "Gone".to_string());
	source.added("good", "Good".to_string());
	source.enumeration_completed(false);

	let outcome = next_outcome(&reconciler, 0).await;
	assert_eq!(outcome.skipped, 2);
	assert_eq!(outcome.added, 1);
	assert!(!outcome.partial);
	assert_eq!(collection.snapshot().keys().collect::<Vec<_>>(), ["good"]);

	assert!(logs_contain("Enrichment failed, skipping signal;"));
	assert!(logs_contain("corrupted definition"));

	// The loop survived the failures
	source.added("later", "Later".to_string());
	source.enumeration_completed(false);
	next_outcome(&reconciler, 1).await;
	assert!(collection.get("later").is_some());

	reconciler.stop().await;
}

#[tokio::test]
async fn partial_when_inaccessible_or_reported_by_source() {
	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("drives"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		enrich_with(|key: String, name: String| async move {
			if key == "locked" {
				Err(EnrichError::inaccessible(key))
			} else {
				Ok(Some(named(&key, &name)))
			}
		}),
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;

	source.added("locked", "System".to_string());
	source.added("usb", "USB".to_string());
	source.enumeration_completed(false);
	assert!(next_outcome(&reconciler, 0).await.partial);

	source.added("usb", "USB".to_string());
	source.enumeration_completed(false);
	assert!(!next_outcome(&reconciler, 1).await.partial);

	source.enumeration_completed(true);
	let outcome = next_outcome(&reconciler, 2).await;
	assert!(outcome.partial);
	// Nothing was confirmed in that last cycle
	assert_eq!(outcome.removed, 1);

	reconciler.stop().await;
}

#[tokio::test]
async fn sweep_is_limited_to_scope() {
	let collection = Arc::new(ReconciledCollection::new(SortOrder::DisplayName));
	collection.apply(
		"C:",
		Some(Entity::new("C:", EntityKind::Drive, "C:\\").with_name("Local Disk")),
	);
	collection.apply(
		"Music",
		Some(Entity::new("Music", EntityKind::Library, "/libraries/Music.library")),
	);

	let source = Arc::new(ChannelSource::<String>::new("libraries"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::clone(&collection),
		ReconcilerConfig::default().with_scope(EntityKind::Library),
	);

	reconciler.start().await;
	source.enumeration_completed(false);

	let outcome = next_outcome(&reconciler, 0).await;
	assert_eq!(outcome.removed, 1);
	assert_eq!(collection.snapshot().keys().collect::<Vec<_>>(), ["C:"]);

	reconciler.stop().await;
}

#[derive(Default)]
struct Names(Mutex<Vec<(String, String)>>);

impl Names {
	fn set(&self, names: &[&str]) {
		*self.0.lock().unwrap() = names
			.iter()
			.map(|name| ((*name).to_string(), name.to_uppercase()))
			.collect();
	}
}

#[async_trait]
impl Enumerator for Names {
	type Item = String;

	async fn enumerate(&self) -> Result<Enumeration<String>, SourceError> {
		Ok(Enumeration::complete(self.0.lock().unwrap().clone()))
	}
}

#[tokio::test]
async fn refresh_resolves_with_the_next_cycle() {
	let names = Names::default();
	names.set(&["a", "b"]);

	let source = Arc::new(PollingSource::new("names", names, Duration::from_secs(3600)));
	let collection = Arc::new(ReconciledCollection::new(SortOrder::DisplayName));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::clone(&collection),
		ReconcilerConfig::default().with_concurrency(1),
	);

	assert!(matches!(
		reconciler.refresh().await,
		Err(Error::NotWatching(_))
	));

	reconciler.start().await;
	reconciler.start().await;

	let first = next_outcome(&reconciler, 0).await;
	assert_eq!(first.added, 2);

	source.enumerator().set(&["b", "c"]);
	let outcome = timeout(WAIT, reconciler.refresh())
		.await
		.expect("refresh timed out")
		.expect("refresh failed");

	assert_eq!(outcome.generation, 2);
	assert_eq!(outcome.added, 1);
	assert_eq!(outcome.replaced, 0);
	assert_eq!(outcome.removed, 1);
	assert_eq!(reconciler.last_outcome(), Some(outcome));
	assert_eq!(collection.snapshot().keys().collect::<Vec<_>>(), ["b", "c"]);

	reconciler.stop().await;
	assert!(matches!(
		reconciler.refresh().await,
		Err(Error::NotWatching(_))
	));
}

#[tokio::test]
async fn refresh_skips_a_cycle_already_completing() {
	let started = Arc::new(Notify::new());
	let gate = Arc::new(Notify::new());

	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("overlapping"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		GatedEnricher {
			started: Arc::clone(&started),
			gate: Arc::clone(&gate),
		},
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;

	source.added("A", "a".to_string());
	source.enumeration_completed(false);

	timeout(WAIT, started.notified()).await.unwrap();
	// Lets the completion behind the gated enrichment be taken off the channel
	sleep(Duration::from_millis(50)).await;

	let (refreshed, ()) = tokio::join!(timeout(WAIT, reconciler.refresh()), async {
		gate.notify_one();
		assert_eq!(next_outcome(&reconciler, 0).await.generation, 1);
		source.enumeration_completed(false);
	});

	let outcome = refreshed
		.expect("refresh timed out")
		.expect("refresh failed");
	assert_eq!(outcome.generation, 2);
	assert_eq!(outcome.removed, 1);

	reconciler.stop().await;
}

#[tokio::test]
async fn session_ends_when_the_source_lets_go() {
	let collection = Arc::new(ReconciledCollection::default());
	let source = Arc::new(ChannelSource::new("unplugged"));
	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::clone(&collection),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;
	source.stop().await;

	assert!(matches!(
		timeout(WAIT, reconciler.refresh())
			.await
			.expect("refresh kept waiting on a finished session"),
		Err(Error::Stopped(_))
	));

	timeout(WAIT, async {
		while reconciler.state() == ReconcilerState::Watching {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("session outlived its source");

	reconciler.start().await;
	assert_eq!(reconciler.state(), ReconcilerState::Watching);
	assert_eq!(source.state(), SourceState::Watching);

	source.added("A", "again".to_string());
	source.enumeration_completed(false);
	next_outcome(&reconciler, 0).await;
	assert_eq!(collection.get("A"), Some(named("A", "again")));

	reconciler.stop().await;
}

struct Counting(Arc<AtomicUsize>);

#[async_trait]
impl Enumerator for Counting {
	type Item = String;

	async fn enumerate(&self) -> Result<Enumeration<String>, SourceError> {
		self.0.fetch_add(1, Ordering::SeqCst);
		Ok(Enumeration::complete(vec![(
			"usb".to_string(),
			"USB".to_string(),
		)]))
	}
}

#[tokio::test]
async fn dropping_a_reconciler_stops_enumeration() {
	let calls = Arc::new(AtomicUsize::new(0));
	let source = Arc::new(PollingSource::new(
		"drives",
		Counting(Arc::clone(&calls)),
		Duration::from_millis(20),
	));

	let reconciler = Reconciler::new(
		Arc::clone(&source),
		naming_enricher(),
		Arc::new(ReconciledCollection::default()),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;
	next_outcome(&reconciler, 0).await;

	drop(reconciler);

	timeout(WAIT, async {
		while source.state() == SourceState::Watching {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("source kept polling after its reconciler was dropped");

	let before = calls.load(Ordering::SeqCst);
	sleep(Duration::from_millis(200)).await;
	assert_eq!(calls.load(Ordering::SeqCst), before);
}

#[tokio::test]
#[traced_test]
async fn unavailable_source_leaves_reconciler_idle() {
	let dir = tempfile::tempdir().unwrap();

	let source = Arc::new(DirectorySource::new(
		"missing",
		dir.path().join("does-not-exist"),
		DirectoryOptions::default(),
	));
	let reconciler = Reconciler::new(
		source,
		enrich_with(|key: String, path: PathBuf| async move {
			Ok(Some(Entity::new(key, EntityKind::Other, path)))
		}),
		Arc::new(ReconciledCollection::default()),
		ReconcilerConfig::default(),
	);

	reconciler.start().await;

	assert_eq!(reconciler.state(), ReconcilerState::Idle);
	assert!(logs_contain("Source did not start"));
}
