use std::{mem, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{Entity, SortOrder};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Immutable, ordered copy of a collection at some version.
///
/// Cheap to clone; a newer snapshot replaces it instead of mutating it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionSnapshot {
	version: u64,
	entities: Arc<[Entity]>,
}

impl CollectionSnapshot {
	/// Bumped by every mutation
	pub const fn version(&self) -> u64 {
		self.version
	}

	pub fn entities(&self) -> &[Entity] {
		&self.entities
	}

	pub fn iter(&self) -> impl Iterator<Item = &Entity> {
		self.entities.iter()
	}

	pub fn len(&self) -> usize {
		self.entities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entities.is_empty()
	}

	pub fn get(&self, key: &str) -> Option<&Entity> {
		self.entities.iter().find(|entity| entity.key == key)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.entities.iter().map(|entity| entity.key.as_str())
	}
}

/// What a single mutation did, with indexes into the ordered collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "delta", rename_all = "snake_case")]
pub enum Delta {
	Added {
		index: usize,
		entity: Entity,
	},
	Removed {
		index: usize,
		entity: Entity,
	},
	/// `old_index` points into the collection before the change, `index` after it
	Replaced {
		old_index: usize,
		index: usize,
		old: Entity,
		new: Entity,
	},
	/// A bulk load finished, re-render from the snapshot
	Reset,
}

impl Delta {
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Added { .. } => "added",
			Self::Removed { .. } => "removed",
			Self::Replaced { .. } => "replaced",
			Self::Reset => "reset",
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionEvent {
	pub delta: Delta,
	pub snapshot: CollectionSnapshot,
}

struct State {
	entities: Vec<Entity>,
	snapshot: CollectionSnapshot,
}

/// An ordered, keyed set of entities shared between reconcilers and readers.
///
/// Every mutation and the snapshot it produces happen under one lock, and the matching
/// [`CollectionEvent`] is broadcast before the lock is released, so subscribers see events in
/// mutation order and readers never see a half-applied change.
pub struct ReconciledCollection {
	order: SortOrder,
	state: Mutex<State>,
	events: broadcast::Sender<CollectionEvent>,
}

impl Default for ReconciledCollection {
	fn default() -> Self {
		Self::new(SortOrder::default())
	}
}

impl ReconciledCollection {
	pub fn new(order: SortOrder) -> Self {
		Self::with_event_capacity(order, DEFAULT_EVENT_CAPACITY)
	}

	/// Subscribers lagging more than `capacity` events behind get
	/// [`RecvError::Lagged`](broadcast::error::RecvError::Lagged) and should re-read
	/// [`snapshot`](Self::snapshot).
	pub fn with_event_capacity(order: SortOrder, capacity: usize) -> Self {
		let (events, _) = broadcast::channel(capacity.max(1));

		Self {
			order,
			state: Mutex::new(State {
				entities: Vec::new(),
				snapshot: CollectionSnapshot::default(),
			}),
			events,
		}
	}

	pub const fn order(&self) -> &SortOrder {
		&self.order
	}

	pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
		self.events.subscribe()
	}

	pub fn snapshot(&self) -> CollectionSnapshot {
		self.state.lock().snapshot.clone()
	}

	pub fn get(&self, key: &str) -> Option<Entity> {
		self.state
			.lock()
			.entities
			.iter()
			.find(|entity| entity.key == key)
			.cloned()
	}

	pub fn len(&self) -> usize {
		self.state.lock().entities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().entities.is_empty()
	}

	/// Inserts, replaces or (with `None`) removes the entity under `key`.
	///
	/// Returns the applied delta, or `None` when nothing changed: removing an unknown key and
	/// re-applying an identical entity are both no-ops.
	pub fn apply(&self, key: &str, entity: Option<Entity>) -> Option<Delta> {
		let mut guard = self.state.lock();
		let state = &mut *guard;

		let position = state.entities.iter().position(|existing| existing.key == key);

		let delta = match (position, entity) {
			(None, None) => return None,

			(Some(index), None) => Delta::Removed {
				index,
				entity: state.entities.remove(index),
			},

			(None, Some(mut entity)) => {
				key.clone_into(&mut entity.key);
				let index = self.order.insertion_index(&state.entities, &entity);
				state.entities.insert(index, entity.clone());

				Delta::Added { index, entity }
			}

			(Some(old_index), Some(mut new)) => {
				key.clone_into(&mut new.key);
				if state.entities[old_index] == new {
					return None;
				}

				if self.order.keeps_discovery_order()
					&& state.entities[old_index].pinned == new.pinned
				{
					let old = mem::replace(&mut state.entities[old_index], new.clone());

					Delta::Replaced {
						old_index,
						index: old_index,
						old,
						new,
					}
				} else {
					let old = state.entities.remove(old_index);
					let index = self.order.insertion_index(&state.entities, &new);
					state.entities.insert(index, new.clone());

					Delta::Replaced {
						old_index,
						index,
						old,
						new,
					}
				}
			}
		};

		self.mutated(state, delta.clone());

		Some(delta)
	}

	/// Removes every entity `is_stale` flags, one [`Delta::Removed`] each, then announces a
	/// [`Delta::Reset`]. Nothing else is touched: entities still present are never re-added.
	pub fn sweep(&self, mut is_stale: impl FnMut(&Entity) -> bool) -> Vec<Entity> {
		let mut guard = self.state.lock();
		let state = &mut *guard;

		let mut removed = Vec::new();
		let mut index = 0;

		while index < state.entities.len() {
			if is_stale(&state.entities[index]) {
				let entity = state.entities.remove(index);
				removed.push(entity.clone());
				self.mutated(state, Delta::Removed { index, entity });
			} else {
				index += 1;
			}
		}

		self.broadcast(state, Delta::Reset);

		removed
	}

	fn mutated(&self, state: &mut State, delta: Delta) {
		state.snapshot = CollectionSnapshot {
			version: state.snapshot.version + 1,
			entities: state.entities.as_slice().into(),
		};

		self.broadcast(state, delta);
	}

	fn broadcast(&self, state: &State, delta: Delta) {
		trace!(delta = delta.kind(), version = state.snapshot.version, "Collection changed;");

		// Nobody subscribed is fine, the snapshot is still current
		let _ = self.events.send(CollectionEvent {
			delta,
			snapshot: state.snapshot.clone(),
		});
	}
}
