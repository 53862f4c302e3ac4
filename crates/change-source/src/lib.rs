//!
//! # Change Sources
//!
//! Platform notifiers that report external resources (mounted drives, files in a folder, git
//! repositories) as a stream of keyed [`ChangeSignal`]s. Sources know nothing about how their
//! signals end up displayed: they only promise ordering and non-blocking delivery.
//!
//! - [`DirectorySource`]: a `notify` watch over one directory, with an initial enumeration;
//! - [`PollingSource`]: periodic enumeration through an [`Enumerator`], diffed into signals;
//! - [`GitRepositorySource`]: HEAD, index and refs of a set of repositories, debounced;
//! - [`ChannelSource`]: fed by hand from callbacks living elsewhere.
//!
//! ## Basic example
//!
//! ```no_run
//! use wk_change_source::{signal_channel, ChangeSource, DirectoryOptions, DirectorySource};
//!
//! # async fn run() {
//! let source = DirectorySource::new(
//! 	"libraries",
//! 	"/home/me/.local/share/watchkeeper/libraries",
//! 	DirectoryOptions::default().with_extension("library"),
//! );
//!
//! let (sink, signals) = signal_channel();
//! source.start(sink).await;
//!
//! while let Ok(signal) = signals.recv().await {
//! 	println!("{} {:?}", signal.kind(), signal.key());
//! }
//! # }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod channel;
mod directory;
mod error;
mod git;
mod polling;
mod signal;
mod source;

pub use channel::ChannelSource;
pub use directory::{DirectoryOptions, DirectorySource};
pub use error::SourceError;
pub use git::{resolve_git_dir, GitRepositorySource};
pub use polling::{Enumeration, Enumerator, PollingSource};
pub use signal::{signal_channel, ChangeSignal, SignalReceiver, SignalSink};
pub use source::{ChangeSource, SourceState};
