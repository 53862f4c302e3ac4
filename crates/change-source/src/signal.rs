use std::fmt;

use async_channel as chan;

/// A raw change reported by a [`ChangeSource`](crate::ChangeSource), keyed by a stable
/// identifier (device id, file path, repository path).
///
/// Every signal is consumed exactly once by whoever drains the matching [`SignalReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeSignal<P> {
	Added { key: String, payload: P },
	Removed { key: String },
	Modified { key: String, payload: P },
	/// A full enumeration pass finished. Anything not re-announced since the previous pass is
	/// gone. `partial` is set when some items could not be read during the pass.
	EnumerationCompleted { partial: bool },
}

impl<P> ChangeSignal<P> {
	pub fn added(key: impl Into<String>, payload: P) -> Self {
		Self::Added {
			key: key.into(),
			payload,
		}
	}

	pub fn removed(key: impl Into<String>) -> Self {
		Self::Removed { key: key.into() }
	}

	pub fn modified(key: impl Into<String>, payload: P) -> Self {
		Self::Modified {
			key: key.into(),
			payload,
		}
	}

	pub const fn enumeration_completed(partial: bool) -> Self {
		Self::EnumerationCompleted { partial }
	}

	pub fn key(&self) -> Option<&str> {
		match self {
			Self::Added { key, .. } | Self::Removed { key } | Self::Modified { key, .. } => {
				Some(key)
			}
			Self::EnumerationCompleted { .. } => None,
		}
	}

	pub fn payload(&self) -> Option<&P> {
		match self {
			Self::Added { payload, .. } | Self::Modified { payload, .. } => Some(payload),
			Self::Removed { .. } | Self::EnumerationCompleted { .. } => None,
		}
	}

	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Added { .. } => "added",
			Self::Removed { .. } => "removed",
			Self::Modified { .. } => "modified",
			Self::EnumerationCompleted { .. } => "enumeration_completed",
		}
	}

	/// Converts the payload, keeping key and variant
	pub fn map<Q>(self, f: impl FnOnce(P) -> Q) -> ChangeSignal<Q> {
		match self {
			Self::Added { key, payload } => ChangeSignal::Added {
				key,
				payload: f(payload),
			},
			Self::Modified { key, payload } => ChangeSignal::Modified {
				key,
				payload: f(payload),
			},
			Self::Removed { key } => ChangeSignal::Removed { key },
			Self::EnumerationCompleted { partial } => ChangeSignal::EnumerationCompleted { partial },
		}
	}
}

/// Sending half handed to a source when it starts.
///
/// Backed by an unbounded channel, so emitting never blocks the OS callback thread.
pub struct SignalSink<P> {
	tx: chan::Sender<ChangeSignal<P>>,
}

impl<P> Clone for SignalSink<P> {
	fn clone(&self) -> Self {
		Self {
			tx: self.tx.clone(),
		}
	}
}

impl<P> fmt::Debug for SignalSink<P> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SignalSink")
			.field("closed", &self.tx.is_closed())
			.field("pending", &self.tx.len())
			.finish()
	}
}

impl<P> SignalSink<P> {
	/// Returns `false` once the receiving side is gone, so callers can stop producing.
	pub fn emit(&self, signal: ChangeSignal<P>) -> bool {
		// An unbounded channel only rejects when it's closed
		self.tx.try_send(signal).is_ok()
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

pub type SignalReceiver<P> = chan::Receiver<ChangeSignal<P>>;

pub fn signal_channel<P>() -> (SignalSink<P>, SignalReceiver<P>) {
	let (tx, rx) = chan::unbounded();
	(SignalSink { tx }, rx)
}
