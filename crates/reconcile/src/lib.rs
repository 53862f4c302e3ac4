//!
//! # Reconcile
//!
//! Keeps an ordered, in-memory collection of [`Entity`]s in step with an external source of
//! truth. A [`Reconciler`] drains the signals of one
//! [`ChangeSource`](wk_change_source::ChangeSource), turns each of them into an entity through
//! an async [`Enricher`] and applies the result to a shared [`ReconciledCollection`], which in
//! turn broadcasts fine-grained [`Delta`]s to whoever renders it.
//!
//! ## Basic example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wk_change_source::ChannelSource;
//! use wk_reconcile::{
//! 	enrich_with, Entity, EntityKind, ReconciledCollection, Reconciler, ReconcilerConfig,
//! 	SortOrder,
//! };
//!
//! # async fn run() {
//! let source = Arc::new(ChannelSource::<String>::new("manual"));
//! let collection = Arc::new(ReconciledCollection::new(SortOrder::DisplayName));
//!
//! let reconciler = Reconciler::new(
//! 	Arc::clone(&source),
//! 	enrich_with(|key: String, name: String| async move {
//! 		Ok(Some(Entity::new(key.clone(), EntityKind::Other, key).with_name(name)))
//! 	}),
//! 	Arc::clone(&collection),
//! 	ReconcilerConfig::default(),
//! );
//!
//! let mut events = collection.subscribe();
//! reconciler.start().await;
//!
//! source.added("/mnt/usb", "USB stick".to_string());
//!
//! let event = events.recv().await.unwrap();
//! println!("{} -> {} entities", event.delta.kind(), event.snapshot.len());
//!
//! reconciler.stop().await;
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

mod collection;
mod enrich;
mod entity;
mod error;
mod order;
mod reconciler;

pub use collection::{CollectionEvent, CollectionSnapshot, Delta, ReconciledCollection};
pub use enrich::{enrich_with, EnrichError, Enricher, FnEnricher};
pub use entity::{Entity, EntityKind};
pub use error::Error;
pub use order::{CompareFn, SortOrder};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerState, RefreshOutcome};
