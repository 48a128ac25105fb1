/// An append-only string output column: one contiguous byte buffer plus the
/// end offset of every row.
///
/// Rows can only be appended or discarded wholesale; there is no way to patch
/// a row at an arbitrary offset. This is what makes the optimistic all-hit
/// string lookup pass abort-and-retry rather than patch-in-place.
#[derive(Debug, Default, Clone)]
pub struct StringColumn {
  buf: String,
  offsets: Vec<usize>,
}

impl StringColumn {
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends one row.
  pub fn push(&mut self, value: &str) {
    self.buf.push_str(value);
    self.offsets.push(self.buf.len());
  }

  /// Returns the row at `index`.
  ///
  /// # Panics
  /// Panics if `index >= self.len()`.
  pub fn get(&self, index: usize) -> &str {
    let start = if index == 0 { 0 } else { self.offsets[index - 1] };
    &self.buf[start..self.offsets[index]]
  }

  pub fn len(&self) -> usize {
    self.offsets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.offsets.is_empty()
  }

  /// Discards every row, keeping the allocations.
  pub fn clear(&mut self) {
    self.buf.clear();
    self.offsets.clear();
  }

  pub fn reserve_rows(&mut self, rows: usize) {
    self.offsets.reserve(rows);
  }

  pub fn reserve_bytes(&mut self, bytes: usize) {
    self.buf.reserve(bytes);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_and_get_round_trip() {
    let mut column = StringColumn::new();
    column.push("alpha");
    column.push("");
    column.push("beta");

    assert_eq!(column.len(), 3);
    assert_eq!(column.get(0), "alpha");
    assert_eq!(column.get(1), "");
    assert_eq!(column.get(2), "beta");
  }

  #[test]
  fn clear_discards_partial_output() {
    let mut column = StringColumn::new();
    column.push("partial");
    column.clear();
    assert!(column.is_empty());

    column.push("fresh");
    assert_eq!(column.get(0), "fresh");
  }
}
