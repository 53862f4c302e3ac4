//!
//! # Watchers
//!
//! Each module pairs a change source with the enricher that turns its signals into
//! [`Entity`](wk_reconcile::Entity) values, plus the sort order its collection should use:
//!
//! - [`drives`]: mounted disks, polled since mounts carry no portable notification;
//! - [`libraries`]: `.library` definition files, with a [`LibraryStore`] to create and edit them;
//! - [`recent`]: entries of the recent items folder, newest first;
//! - [`quick_access`]: folders pinned by the user, in the order they were pinned;
//! - [`git`]: branch and HEAD of a set of repositories.

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

pub mod drives;
pub mod git;
pub mod libraries;
pub mod quick_access;
pub mod recent;

mod error;

pub use error::{LibraryError, QuickAccessError, RecentError};
pub use libraries::LibraryStore;
pub use quick_access::QuickAccess;
pub use recent::RecentItems;
