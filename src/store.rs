/// Slot-indexed payload storage running parallel to the cell table.
///
/// The cache guards every implementation with its own reader/writer lock:
/// reads happen under the read lock, `write`/`write_default` only under the
/// write lock during a merge. Implementations provide no ordering of their
/// own and must be readable at every slot from the moment of construction.
pub trait AttributeStore<V>: Send + Sync {
  /// Reads the payload at `slot`.
  fn read(&self, slot: usize) -> V;

  /// Writes `value` at `slot`.
  fn write(&mut self, slot: usize, value: V);

  /// Writes the type's null/default value at `slot`.
  fn write_default(&mut self, slot: usize);
}

/// The default store: a dense column with one value per cell slot.
///
/// Every slot is pre-filled with `V::default()`, so a lookup that addresses a
/// not-yet-merged slot observes a well-defined default rather than garbage.
pub struct DenseColumn<V> {
  values: Box<[V]>,
}

impl<V: Clone + Default> DenseColumn<V> {
  pub fn new(slots: usize) -> Self {
    Self {
      values: vec![V::default(); slots].into_boxed_slice(),
    }
  }
}

impl<V: Clone + Default + Send + Sync> AttributeStore<V> for DenseColumn<V> {
  #[inline]
  fn read(&self, slot: usize) -> V {
    self.values[slot].clone()
  }

  #[inline]
  fn write(&mut self, slot: usize, value: V) {
    self.values[slot] = value;
  }

  #[inline]
  fn write_default(&mut self, slot: usize) {
    self.values[slot] = V::default();
  }
}
