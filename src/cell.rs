use crate::time::Nanos;

use std::hash::{BuildHasher, Hash, Hasher};

/// The key type served by the cache.
pub type Key = u64;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
fn hash_key<H: BuildHasher>(hasher: &H, key: Key) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// One cache slot: the key currently occupying it, its expiry deadline and
/// whether the source confirmed the key as absent.
///
/// A fresh cell has `key == 0` and `expires_at == 0`, so it either fails the
/// key comparison or classifies as expired; it can never look like a hit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cell {
  pub(crate) key: Key,
  pub(crate) expires_at: Nanos,
  pub(crate) is_default: bool,
}

impl Cell {
  const EMPTY: Cell = Cell {
    key: 0,
    expires_at: 0,
    is_default: false,
  };
}

/// Outcome of locating a key's slot at a given instant.
///
/// The slot index is meaningful in all three cases: for a miss it is the slot
/// a future merge will overwrite, and its payload must be treated as garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FindResult {
  pub(crate) valid: bool,
  pub(crate) outdated: bool,
  pub(crate) slot: usize,
}

/// A fixed-size, direct-mapped table of cells.
///
/// The slot for a key is `hash(key) & mask`; there is no probing or chaining,
/// a colliding key simply overwrites whatever previously lived in the slot.
/// The table is allocated once and never resized.
pub(crate) struct CellTable<H> {
  cells: Box<[Cell]>,
  mask: usize,
  zero_slot: usize,
  hasher: H,
}

impl<H: BuildHasher> CellTable<H> {
  /// Creates a table with `slots` cells. `slots` must be a power of two.
  pub(crate) fn new(slots: usize, hasher: H) -> Self {
    debug_assert!(slots.is_power_of_two());
    let mask = slots - 1;
    let zero_slot = hash_key(&hasher, 0) as usize & mask;
    Self {
      cells: vec![Cell::EMPTY; slots].into_boxed_slice(),
      mask,
      zero_slot,
      hasher,
    }
  }

  #[inline]
  pub(crate) fn slot_for(&self, key: Key) -> usize {
    hash_key(&self.hasher, key) as usize & self.mask
  }

  /// Locates `key`'s slot and classifies it against `now`.
  pub(crate) fn find(&self, key: Key, now: Nanos) -> FindResult {
    let slot = self.slot_for(key);
    let cell = &self.cells[slot];

    if cell.key != key {
      return FindResult {
        valid: false,
        outdated: false,
        slot,
      };
    }

    if cell.expires_at > now {
      FindResult {
        valid: true,
        outdated: false,
        slot,
      }
    } else {
      FindResult {
        valid: false,
        outdated: true,
        slot,
      }
    }
  }

  #[inline]
  pub(crate) fn cell(&self, slot: usize) -> &Cell {
    &self.cells[slot]
  }

  #[inline]
  pub(crate) fn cell_mut(&mut self, slot: usize) -> &mut Cell {
    &mut self.cells[slot]
  }

  /// The slot key 0 maps to. A `key == 0` cell anywhere else means the slot
  /// has never been occupied; at this slot it may genuinely hold key 0.
  #[inline]
  pub(crate) fn zero_slot(&self) -> usize {
    self.zero_slot
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.cells.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::time::NEVER_EXPIRES;

  fn table(slots: usize) -> CellTable<ahash::RandomState> {
    CellTable::new(slots, ahash::RandomState::default())
  }

  #[test]
  fn fresh_table_misses_nonzero_keys() {
    let table = table(8);
    let find = table.find(42, 100);
    assert!(!find.valid);
    assert!(!find.outdated);
    assert_eq!(find.slot, table.slot_for(42));
  }

  #[test]
  fn zero_key_classifies_expired_on_first_touch() {
    // The zero slot matches key 0 from the start; the zeroed expiry keeps it
    // from ever classifying as a hit.
    let table = table(8);
    let find = table.find(0, 100);
    assert!(!find.valid);
    assert!(find.outdated);
    assert_eq!(find.slot, table.zero_slot());
  }

  #[test]
  fn occupied_cell_transitions_hit_to_expired() {
    let mut table = table(8);
    let slot = table.slot_for(42);
    *table.cell_mut(slot) = Cell {
      key: 42,
      expires_at: 500,
      is_default: false,
    };

    assert!(table.find(42, 499).valid);
    let at_deadline = table.find(42, 500);
    assert!(!at_deadline.valid);
    assert!(at_deadline.outdated);
  }

  #[test]
  fn never_expires_sentinel_always_hits() {
    let mut table = table(8);
    let slot = table.slot_for(7);
    *table.cell_mut(slot) = Cell {
      key: 7,
      expires_at: NEVER_EXPIRES,
      is_default: false,
    };
    assert!(table.find(7, u64::MAX - 1).valid);
  }

  #[test]
  fn colliding_key_is_a_miss_not_a_stale_read() {
    let mut table = table(1);
    *table.cell_mut(0) = Cell {
      key: 1,
      expires_at: NEVER_EXPIRES,
      is_default: false,
    };

    let find = table.find(2, 0);
    assert!(!find.valid);
    assert!(!find.outdated);
    assert_eq!(find.slot, 0);
  }
}
