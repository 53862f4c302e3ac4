use std::{
	collections::{HashMap, HashSet},
	mem,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use futures::{
	future::{self, BoxFuture},
	stream::FuturesOrdered,
	FutureExt, StreamExt,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
	spawn,
	sync::{watch, Mutex as AsyncMutex},
	task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Instrument};
use wk_change_source::{signal_channel, ChangeSignal, ChangeSource, SignalReceiver, SourceState};

use crate::{Delta, EnrichError, Enricher, Entity, EntityKind, Error, ReconciledCollection};

const DEFAULT_ENRICHMENT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
	/// How many enrichments may run at once. Results still land in signal order.
	pub enrichment_concurrency: usize,
	/// Restricts end-of-enumeration sweeps to one kind, for collections fed by several
	/// reconcilers
	pub scope: Option<EntityKind>,
}

impl Default for ReconcilerConfig {
	fn default() -> Self {
		Self {
			enrichment_concurrency: DEFAULT_ENRICHMENT_CONCURRENCY,
			scope: None,
		}
	}
}

impl ReconcilerConfig {
	#[must_use]
	pub fn with_concurrency(mut self, enrichment_concurrency: usize) -> Self {
		self.enrichment_concurrency = enrichment_concurrency;
		self
	}

	#[must_use]
	pub const fn with_scope(mut self, scope: EntityKind) -> Self {
		self.scope = Some(scope);
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
	Idle,
	Watching,
}

/// Summary of one enumeration cycle, published when its
/// [`ChangeSignal::EnumerationCompleted`] is processed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
	/// Counts cycles since the reconciler was created
	pub generation: u64,
	pub added: usize,
	pub replaced: usize,
	pub removed: usize,
	/// Signals dropped because enrichment failed or found nothing
	pub skipped: usize,
	/// Some items could not be read, so the collection may be missing entries
	pub partial: bool,
}

struct Session {
	token: CancellationToken,
	handle: JoinHandle<()>,
}

/// Keeps a [`ReconciledCollection`] in line with what a [`ChangeSource`] reports.
///
/// Added and modified signals go through the [`Enricher`] before being applied; removals are
/// applied right away and discard any older enrichment still in flight for the same key. Each
/// [`ChangeSignal::EnumerationCompleted`] sweeps away entities not confirmed during the cycle.
pub struct Reconciler<S: ChangeSource, E> {
	source: Arc<S>,
	enricher: Arc<E>,
	collection: Arc<ReconciledCollection>,
	config: ReconcilerConfig,
	lifecycle: AsyncMutex<()>,
	session: Mutex<Option<Session>>,
	outcomes: Arc<watch::Sender<Option<RefreshOutcome>>>,
	/// Generation of the latest [`ChangeSignal::EnumerationCompleted`] taken off the channel,
	/// settled or not
	received: Arc<AtomicU64>,
}

impl<S, E> Reconciler<S, E>
where
	S: ChangeSource,
	E: Enricher<S::Payload>,
{
	pub fn new(
		source: Arc<S>,
		enricher: E,
		collection: Arc<ReconciledCollection>,
		config: ReconcilerConfig,
	) -> Self {
		let (outcomes, _) = watch::channel(None);

		Self {
			source,
			enricher: Arc::new(enricher),
			collection,
			config,
			lifecycle: AsyncMutex::new(()),
			session: Mutex::new(None),
			outcomes: Arc::new(outcomes),
			received: Arc::new(AtomicU64::new(0)),
		}
	}

	pub const fn source(&self) -> &Arc<S> {
		&self.source
	}

	pub const fn collection(&self) -> &Arc<ReconciledCollection> {
		&self.collection
	}

	pub const fn config(&self) -> &ReconcilerConfig {
		&self.config
	}

	pub fn state(&self) -> ReconcilerState {
		match self.session.lock().as_ref() {
			Some(session) if !session.handle.is_finished() => ReconcilerState::Watching,
			_ => ReconcilerState::Idle,
		}
	}

	/// Starts the source and begins applying its signals. A no-op while already watching.
	///
	/// A session that ended because the source dropped its sink counts as stopped.
	///
	/// When the source fails to start, the failure is logged and the reconciler stays
	/// [`ReconcilerState::Idle`]; calling `start` again is a fresh attempt.
	#[instrument(skip_all, fields(source = %self.source.name()))]
	pub async fn start(&self) {
		let _lifecycle = self.lifecycle.lock().await;

		let finished = {
			let mut session = self.session.lock();
			if session
				.as_ref()
				.is_some_and(|current| !current.handle.is_finished())
			{
				debug!("Reconciler already watching;");
				return;
			}
			session.take()
		};

		if finished.is_some() {
			debug!("Previous session ended on its own, releasing the source;");
			self.source.stop().await;
		}

		let (sink, signals) = signal_channel();

		self.source.start(sink).await;

		if self.source.state() == SourceState::Idle {
			warn!("Source did not start, reconciler stays idle;");
			return;
		}

		let token = CancellationToken::new();

		let generation = self
			.outcomes
			.borrow()
			.as_ref()
			.map_or(0, |outcome| outcome.generation);
		self.received.store(generation, Ordering::SeqCst);

		let pipeline = Pipeline::new(
			Arc::clone(&self.enricher),
			Arc::clone(&self.collection),
			self.config.scope,
			Arc::clone(&self.outcomes),
			Arc::clone(&self.received),
		);

		let handle = spawn(
			run(
				pipeline,
				signals,
				self.config.enrichment_concurrency.max(1),
				token.clone(),
			)
			.in_current_span(),
		);

		*self.session.lock() = Some(Session { token, handle });

		debug!("Reconciler watching;");
	}

	/// Releases the source and waits for the reconciler task to finish. Enrichments still in
	/// flight are dropped and never applied.
	#[instrument(skip_all, fields(source = %self.source.name()))]
	pub async fn stop(&self) {
		let _lifecycle = self.lifecycle.lock().await;

		let session = self.session.lock().take();
		let Some(Session { token, handle }) = session else {
			return;
		};

		token.cancel();

		self.source.stop().await;

		if let Err(e) = handle.await {
			if !e.is_cancelled() {
				error!(?e, "Reconciler task failed;");
			}
		}

		debug!("Reconciler stopped;");
	}

	/// Asks the source to re-enumerate and waits for the next cycle to complete.
	///
	/// Cycles whose completion had already been taken off the channel when `refresh` was called
	/// don't count, even if their outcome is published afterwards.
	///
	/// Sources without a rescan of their own (like
	/// [`ChannelSource`](wk_change_source::ChannelSource)) resolve whenever their owner next
	/// completes an enumeration.
	pub async fn refresh(&self) -> Result<RefreshOutcome, Error> {
		let token = self
			.session
			.lock()
			.as_ref()
			.map(|session| session.token.clone())
			.ok_or_else(|| Error::NotWatching(self.source.name().to_owned()))?;

		let mut outcomes = self.outcomes.subscribe();
		let after = self.received.load(Ordering::SeqCst);

		self.source.rescan().await;

		loop {
			tokio::select! {
				biased;
				() = token.cancelled() => {
					return Err(Error::Stopped(self.source.name().to_owned()));
				}
				changed = outcomes.changed() => {
					if changed.is_err() {
						return Err(Error::Stopped(self.source.name().to_owned()));
					}
				}
			}

			if let Some(outcome) = outcomes
				.borrow_and_update()
				.as_ref()
				.filter(|outcome| outcome.generation > after)
				.cloned()
			{
				return Ok(outcome);
			}
		}
	}

	pub fn last_outcome(&self) -> Option<RefreshOutcome> {
		self.outcomes.borrow().clone()
	}

	pub fn outcomes(&self) -> watch::Receiver<Option<RefreshOutcome>> {
		self.outcomes.subscribe()
	}
}

impl<S: ChangeSource, E> Drop for Reconciler<S, E> {
	fn drop(&mut self) {
		if let Some(Session { token, handle }) = self.session.get_mut().take() {
			token.cancel();
			handle.abort();
		}
	}
}

enum Step {
	Enriched {
		seq: u64,
		key: String,
		result: Result<Option<Entity>, EnrichError>,
	},
	Completed {
		seq: u64,
		generation: u64,
		partial: bool,
	},
}

#[derive(Default)]
struct Cycle {
	confirmed: HashSet<String>,
	added: usize,
	replaced: usize,
	removed: usize,
	skipped: usize,
	inaccessible: bool,
}

struct Pipeline<E> {
	enricher: Arc<E>,
	collection: Arc<ReconciledCollection>,
	scope: Option<EntityKind>,
	outcomes: Arc<watch::Sender<Option<RefreshOutcome>>>,
	received: Arc<AtomicU64>,
	seq: u64,
	/// Sequence number of the latest removal per key, anything enriched before it is stale
	removed_at: HashMap<String, u64>,
	cycle: Cycle,
}

impl<E> Pipeline<E> {
	fn new(
		enricher: Arc<E>,
		collection: Arc<ReconciledCollection>,
		scope: Option<EntityKind>,
		outcomes: Arc<watch::Sender<Option<RefreshOutcome>>>,
		received: Arc<AtomicU64>,
	) -> Self {
		Self {
			enricher,
			collection,
			scope,
			outcomes,
			received,
			seq: 0,
			removed_at: HashMap::new(),
			cycle: Cycle::default(),
		}
	}

	fn dispatch<P>(&mut self, signal: ChangeSignal<P>) -> Option<BoxFuture<'static, Step>>
	where
		P: Send + 'static,
		E: Enricher<P>,
	{
		self.seq += 1;
		let seq = self.seq;

		match signal {
			ChangeSignal::Added { key, payload } | ChangeSignal::Modified { key, payload } => {
				let enricher = Arc::clone(&self.enricher);

				Some(
					async move {
						let result = enricher.enrich(&key, payload).await;
						Step::Enriched { seq, key, result }
					}
					.boxed(),
				)
			}

			ChangeSignal::Removed { key } => {
				self.remove(seq, key);
				None
			}

			ChangeSignal::EnumerationCompleted { partial } => {
				let generation = self.received.fetch_add(1, Ordering::SeqCst) + 1;

				Some(
					future::ready(Step::Completed {
						seq,
						generation,
						partial,
					})
					.boxed(),
				)
			}
		}
	}

	fn remove(&mut self, seq: u64, key: String) {
		self.cycle.confirmed.remove(&key);

		if self.collection.apply(&key, None).is_some() {
			self.cycle.removed += 1;
		} else {
			trace!(%key, "Removal of unknown key;");
		}

		self.removed_at.insert(key, seq);
	}

	fn settle(&mut self, step: Step) {
		match step {
			Step::Enriched { seq, key, result } => {
				if self
					.removed_at
					.get(&key)
					.is_some_and(|removed_at| *removed_at > seq)
				{
					trace!(%key, "Discarding enrichment overtaken by a removal;");
					return;
				}

				match result {
					Ok(Some(entity)) => {
						match self.collection.apply(&key, Some(entity)) {
							Some(Delta::Added { .. }) => self.cycle.added += 1,
							Some(Delta::Replaced { .. }) => self.cycle.replaced += 1,
							_ => {}
						}

						self.cycle.confirmed.insert(key);
					}

					Ok(None) => {
						warn!(%key, "Nothing found to describe, skipping signal;");
						self.cycle.skipped += 1;
					}

					Err(e) => {
						warn!(%key, ?e, "Enrichment failed, skipping signal;");
						self.cycle.inaccessible |= e.is_inaccessible();
						self.cycle.skipped += 1;
					}
				}
			}

			Step::Completed {
				seq,
				generation,
				partial,
			} => self.complete(seq, generation, partial),
		}
	}

	/// With nothing in flight no enrichment can be older than a removal
	fn drained(&mut self) {
		self.removed_at.clear();
	}

	fn complete(&mut self, seq: u64, generation: u64, partial: bool) {
		let Cycle {
			confirmed,
			added,
			replaced,
			removed,
			skipped,
			inaccessible,
		} = mem::take(&mut self.cycle);

		let scope = self.scope;
		let swept = self.collection.sweep(|entity| {
			scope.map_or(true, |kind| entity.kind == kind) && !confirmed.contains(&entity.key)
		});

		self.removed_at.retain(|_, removed_at| *removed_at > seq);

		let outcome = RefreshOutcome {
			generation,
			added,
			replaced,
			removed: removed + swept.len(),
			skipped,
			partial: partial || inaccessible,
		};

		info!(
			generation = outcome.generation,
			added = outcome.added,
			replaced = outcome.replaced,
			removed = outcome.removed,
			skipped = outcome.skipped,
			partial = outcome.partial,
			"Enumeration cycle completed;"
		);

		self.outcomes.send_replace(Some(outcome));
	}
}

async fn run<P, E>(
	mut pipeline: Pipeline<E>,
	signals: SignalReceiver<P>,
	concurrency: usize,
	token: CancellationToken,
) where
	P: Send + 'static,
	E: Enricher<P>,
{
	let mut pending = FuturesOrdered::new();
	let mut closed = false;

	loop {
		tokio::select! {
			biased;

			() = token.cancelled() => {
				trace!(in_flight = pending.len(), "Reconciler cancelled, discarding in-flight enrichments;");
				break;
			}

			received = signals.recv(), if !closed && pending.len() < concurrency => match received {
				Ok(signal) => {
					if let Some(step) = pipeline.dispatch(signal) {
						pending.push_back(step);
					}
				}
				Err(_) => {
					debug!("Source dropped its sink, draining in-flight enrichments;");
					closed = true;
				}
			},

			Some(step) = pending.next(), if !pending.is_empty() => pipeline.settle(step),

			else => break,
		}

		if pending.is_empty() {
			pipeline.drained();
		}
	}

	// Wakes refresh callers when the source went away on its own
	token.cancel();
}
