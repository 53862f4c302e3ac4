use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{ChangeSignal, ChangeSource, SignalSink, SourceState};

/// A source fed by hand.
///
/// Bridges callback APIs that already live elsewhere in the process (a device-manager
/// subscription, a shell notification hook) into the reconciler contract. Signals emitted while
/// the source is idle are dropped.
pub struct ChannelSource<P> {
	name: String,
	sink: Mutex<Option<SignalSink<P>>>,
}

impl<P: Send + 'static> ChannelSource<P> {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			sink: Mutex::new(None),
		}
	}

	/// Returns whether the signal was handed to a running consumer.
	pub fn emit(&self, signal: ChangeSignal<P>) -> bool {
		// Holding the lock while emitting keeps concurrent emitters ordered; emit never blocks
		let sink = self.sink.lock();
		if let Some(sink) = sink.as_ref() {
			sink.emit(signal)
		} else {
			trace!(source = %self.name, kind = signal.kind(), "Dropping signal emitted while idle;");
			false
		}
	}

	pub fn added(&self, key: impl Into<String>, payload: P) -> bool {
		self.emit(ChangeSignal::added(key, payload))
	}

	pub fn modified(&self, key: impl Into<String>, payload: P) -> bool {
		self.emit(ChangeSignal::modified(key, payload))
	}

	pub fn removed(&self, key: impl Into<String>) -> bool {
		self.emit(ChangeSignal::removed(key))
	}

	pub fn enumeration_completed(&self, partial: bool) -> bool {
		self.emit(ChangeSignal::enumeration_completed(partial))
	}
}

#[async_trait]
impl<P: Send + 'static> ChangeSource for ChannelSource<P> {
	type Payload = P;

	fn name(&self) -> &str {
		&self.name
	}

	fn state(&self) -> SourceState {
		if self.sink.lock().is_some() {
			SourceState::Watching
		} else {
			SourceState::Idle
		}
	}

	async fn start(&self, sink: SignalSink<P>) {
		let mut current = self.sink.lock();
		if current.is_some() {
			debug!(source = %self.name, "Channel source already started;");
			return;
		}

		*current = Some(sink);
	}

	async fn stop(&self) {
		if self.sink.lock().take().is_some() {
			debug!(source = %self.name, "Channel source stopped;");
		}
	}

	async fn rescan(&self) {
		// The owner decides when to re-announce everything
		trace!(source = %self.name, "Channel source has nothing to rescan;");
	}
}
