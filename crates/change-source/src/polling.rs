use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
	spawn,
	sync::Notify,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn, Instrument};

use crate::{ChangeSignal, ChangeSource, SignalSink, SourceError, SourceState};

/// Result of one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration<T> {
	pub items: Vec<(String, T)>,
	/// Some items could not be inspected and are missing from `items`
	pub partial: bool,
}

impl<T> Enumeration<T> {
	pub fn complete(items: Vec<(String, T)>) -> Self {
		Self {
			items,
			partial: false,
		}
	}

	pub fn partial(items: Vec<(String, T)>) -> Self {
		Self {
			items,
			partial: true,
		}
	}
}

/// Lists the current state of some external resource set, such as mounted disks.
#[async_trait]
pub trait Enumerator: Send + Sync + 'static {
	type Item: Clone + PartialEq + Send + Sync + 'static;

	async fn enumerate(&self) -> Result<Enumeration<Self::Item>, SourceError>;
}

#[derive(Default)]
struct Triggers {
	poll: Notify,
	rescan: Notify,
}

struct Poller {
	token: CancellationToken,
	triggers: Arc<Triggers>,
	handle: JoinHandle<()>,
}

/// Turns periodic enumerations into signals by diffing each pass against the previous one.
///
/// The first pass, and every [`rescan`](ChangeSource::rescan), announces everything and ends
/// with [`ChangeSignal::EnumerationCompleted`]. Later passes only emit what changed. A failed
/// pass is logged and skipped, never read as "everything vanished". A failed full pass is
/// retried in full on the next trigger, so every cycle eventually completes.
///
/// Dropping the source stops its polling task.
pub struct PollingSource<E: Enumerator> {
	name: String,
	enumerator: Arc<E>,
	interval: Duration,
	poller: Mutex<Option<Poller>>,
}

impl<E: Enumerator> PollingSource<E> {
	pub fn new(name: impl Into<String>, enumerator: E, interval: Duration) -> Self {
		Self {
			name: name.into(),
			enumerator: Arc::new(enumerator),
			interval,
			poller: Mutex::new(None),
		}
	}

	pub fn enumerator(&self) -> &E {
		&self.enumerator
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Runs a diff pass right away instead of waiting for the next tick
	pub fn poll_now(&self) {
		if let Some(poller) = self.poller.lock().as_ref() {
			poller.triggers.poll.notify_one();
		}
	}
}

#[async_trait]
impl<E: Enumerator> ChangeSource for PollingSource<E> {
	type Payload = E::Item;

	fn name(&self) -> &str {
		&self.name
	}

	fn state(&self) -> SourceState {
		match self.poller.lock().as_ref() {
			Some(poller) if !poller.handle.is_finished() => SourceState::Watching,
			_ => SourceState::Idle,
		}
	}

	#[instrument(skip_all, fields(source = %self.name))]
	async fn start(&self, sink: SignalSink<E::Item>) {
		let mut poller = self.poller.lock();
		if poller
			.as_ref()
			.is_some_and(|poller| !poller.handle.is_finished())
		{
			debug!("Polling source already running;");
			return;
		}

		let token = CancellationToken::new();
		let triggers = Arc::new(Triggers::default());

		let handle = spawn(
			run(
				Arc::clone(&self.enumerator),
				self.interval,
				sink,
				token.clone(),
				Arc::clone(&triggers),
			)
			.in_current_span(),
		);

		*poller = Some(Poller {
			token,
			triggers,
			handle,
		});

		debug!(interval = ?self.interval, "Polling source started;");
	}

	#[instrument(skip_all, fields(source = %self.name))]
	async fn stop(&self) {
		let poller = self.poller.lock().take();
		let Some(Poller { token, handle, .. }) = poller else {
			return;
		};

		token.cancel();
		handle.abort();

		if let Err(e) = handle.await {
			if !e.is_cancelled() {
				error!(?e, "Polling task failed;");
			}
		}

		debug!("Polling source stopped;");
	}

	async fn rescan(&self) {
		if let Some(poller) = self.poller.lock().as_ref() {
			poller.triggers.rescan.notify_one();
		}
	}
}

impl<E: Enumerator> Drop for PollingSource<E> {
	fn drop(&mut self) {
		if let Some(Poller { token, handle, .. }) = self.poller.get_mut().take() {
			token.cancel();
			handle.abort();
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
	Done,
	Failed,
	/// Nobody listens anymore
	Closed,
}

async fn run<E: Enumerator>(
	enumerator: Arc<E>,
	period: Duration,
	sink: SignalSink<E::Item>,
	token: CancellationToken,
	triggers: Arc<Triggers>,
) {
	let mut known = HashMap::new();

	// Set until a full pass goes through, so a failed first pass or rescan is retried in full
	let mut full_due = true;

	let mut ticker = interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let pass = if full_due {
			full_pass(&*enumerator, &sink, &mut known).await
		} else {
			diff_pass(&*enumerator, &sink, &mut known).await
		};

		match pass {
			Pass::Done => full_due = false,
			Pass::Failed => {}
			Pass::Closed => {
				trace!("Signal receiver is gone, polling stops;");
				break;
			}
		}

		tokio::select! {
			biased;
			() = token.cancelled() => break,
			() = triggers.rescan.notified() => full_due = true,
			() = triggers.poll.notified() => {}
			_ = ticker.tick() => {}
		}
	}
}

async fn enumerate<E: Enumerator>(
	enumerator: &E,
	sink: &SignalSink<E::Item>,
) -> Result<Enumeration<E::Item>, Pass> {
	enumerator.enumerate().await.map_err(|e| {
		warn!(?e, "Enumeration failed, skipping this pass;");
		if sink.is_closed() {
			Pass::Closed
		} else {
			Pass::Failed
		}
	})
}

async fn full_pass<E: Enumerator>(
	enumerator: &E,
	sink: &SignalSink<E::Item>,
	known: &mut HashMap<String, E::Item>,
) -> Pass {
	let Enumeration { items, partial } = match enumerate(enumerator, sink).await {
		Ok(enumeration) => enumeration,
		Err(pass) => return pass,
	};

	let mut current = HashMap::with_capacity(items.len());

	for (key, item) in items {
		if !sink.emit(ChangeSignal::added(key.clone(), item.clone())) {
			return Pass::Closed;
		}
		current.insert(key, item);
	}

	for key in known.keys().filter(|key| !current.contains_key(*key)) {
		if !sink.emit(ChangeSignal::removed(key.clone())) {
			return Pass::Closed;
		}
	}

	*known = current;

	if sink.emit(ChangeSignal::enumeration_completed(partial)) {
		Pass::Done
	} else {
		Pass::Closed
	}
}

async fn diff_pass<E: Enumerator>(
	enumerator: &E,
	sink: &SignalSink<E::Item>,
	known: &mut HashMap<String, E::Item>,
) -> Pass {
	let Enumeration { items, .. } = match enumerate(enumerator, sink).await {
		Ok(enumeration) => enumeration,
		Err(pass) => return pass,
	};

	let mut current = HashMap::with_capacity(items.len());

	for (key, item) in items {
		let signal = match known.get(&key) {
			None => Some(ChangeSignal::added(key.clone(), item.clone())),
			Some(previous) if *previous != item => {
				Some(ChangeSignal::modified(key.clone(), item.clone()))
			}
			Some(_) => None,
		};

		if let Some(signal) = signal {
			if !sink.emit(signal) {
				return Pass::Closed;
			}
		}

		current.insert(key, item);
	}

	for key in known.keys().filter(|key| !current.contains_key(*key)) {
		if !sink.emit(ChangeSignal::removed(key.clone())) {
			return Pass::Closed;
		}
	}

	*known = current;

	// Quiet passes emit nothing, so a dropped receiver would otherwise go unnoticed
	if sink.is_closed() {
		Pass::Closed
	} else {
		Pass::Done
	}
}
