use async_trait::async_trait;

use crate::SignalSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
	Idle,
	Watching,
}

/// A platform-level notifier of add/remove/modify events for external resources.
///
/// Implementations deliver signals in the order the OS delivered them and never block the
/// emitting thread. `start` on a running source is a no-op and `stop` can be called any number
/// of times. When OS registration fails, `start` logs the failure and the source stays
/// [`SourceState::Idle`] without ever emitting.
#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
	type Payload: Send + 'static;

	fn name(&self) -> &str;

	fn state(&self) -> SourceState;

	async fn start(&self, sink: SignalSink<Self::Payload>);

	/// Releases every OS handle before returning.
	async fn stop(&self);

	/// Re-announces every item followed by
	/// [`ChangeSignal::EnumerationCompleted`](crate::ChangeSignal::EnumerationCompleted).
	/// Does nothing while idle.
	async fn rescan(&self);
}
