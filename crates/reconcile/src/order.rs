use std::{cmp::Ordering, fmt, sync::Arc};

use crate::Entity;

pub type CompareFn = dyn Fn(&Entity, &Entity) -> Ordering + Send + Sync;

/// How a [`ReconciledCollection`](crate::ReconciledCollection) keeps its entities ordered.
///
/// Pinned entities always come first. Whatever the order leaves tied is settled by key, so two
/// refreshes over the same entities always produce the same sequence.
#[derive(Clone, Default)]
pub enum SortOrder {
	/// Insertion order within the pinned and unpinned groups
	#[default]
	Discovery,
	/// Case-insensitive display name, ascending
	DisplayName,
	Custom(Arc<CompareFn>),
}

impl fmt::Debug for SortOrder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Discovery => write!(f, "Discovery"),
			Self::DisplayName => write!(f, "DisplayName"),
			Self::Custom(_) => write!(f, "Custom(..)"),
		}
	}
}

impl SortOrder {
	pub fn custom(compare: impl Fn(&Entity, &Entity) -> Ordering + Send + Sync + 'static) -> Self {
		Self::Custom(Arc::new(compare))
	}

	pub(crate) const fn keeps_discovery_order(&self) -> bool {
		matches!(self, Self::Discovery)
	}

	/// Total order over entities, `Discovery` excluded since it depends on arrival
	pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
		b.pinned
			.cmp(&a.pinned)
			.then_with(|| match self {
				Self::Discovery => Ordering::Equal,
				Self::DisplayName => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
				Self::Custom(compare) => compare(a, b),
			})
			.then_with(|| a.key.cmp(&b.key))
	}

	/// Where `entity` goes in `entities`, which must already be in this order
	pub(crate) fn insertion_index(&self, entities: &[Entity], entity: &Entity) -> usize {
		if self.keeps_discovery_order() {
			if entity.pinned {
				entities.partition_point(|existing| existing.pinned)
			} else {
				entities.len()
			}
		} else {
			entities.partition_point(|existing| self.compare(existing, entity) == Ordering::Less)
		}
	}
}
