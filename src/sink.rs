/// Outcome of one append against a bounded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
  Complete,
  Overflow,
}

/// Append-only byte buffer with a hard capacity.
///
/// The first append that would push the payload past the capacity keeps a
/// truncated prefix of everything seen so far, appends a fixed marker
/// naming the capacity, and freezes the payload. Every later append is
/// rejected without touching the bytes.
pub struct BoundedBuffer {
  capacity: usize,
  payload: Vec<u8>,
  marker: String,
  overflowed: bool,
}

impl BoundedBuffer {
  pub fn new(capacity: usize) -> Self {
    BoundedBuffer {
      capacity,
      payload: Vec::with_capacity(capacity),
      marker: format!("...\ncapacity({}bytes) exceeded\n", capacity),
      overflowed: false,
    }
  }

  /// Append bytes, infallible up to the capacity.
  ///
  /// Crossing the capacity replaces the payload with
  /// `truncate(payload ++ bytes, capacity - marker) ++ marker`.
  pub fn append(&mut self, bytes: &[u8]) -> Append {
    if self.overflowed {
      return Append::Overflow;
    }

    if self.payload.len() + bytes.len() <= self.capacity {
      self.payload.extend_from_slice(bytes);
      return Append::Complete;
    }

    let keep = self.capacity.saturating_sub(self.marker.len());
    self.payload.extend_from_slice(bytes);
    self.payload.truncate(keep);
    self.payload.extend_from_slice(self.marker.as_bytes());
    self.overflowed = true;
    Append::Overflow
  }

  pub fn remaining(&self) -> usize {
    self.capacity.saturating_sub(self.payload.len())
  }

  pub fn snapshot(&self) -> &[u8] {
    &self.payload
  }

  pub fn overflowed(&self) -> bool {
    self.overflowed
  }

  /// Hand the capture over for the verdict; invalid UTF-8 is replaced.
  pub fn into_string(self) -> String {
    String::from_utf8_lossy(&self.payload).into_owned()
  }
}
