use crate::{
  align::ALIGNMENT,
  block::{HEADER_SIZE, STATE_SIZE},
  error::{HeapError, Result},
};

/// Size of the initial region and unit of the growth schedule.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page that holds the state reservation, the first header and the
/// header a first split carves out.
pub const MIN_PAGE_SIZE: usize = STATE_SIZE + 2 * HEADER_SIZE + ALIGNMENT;

/// Tunables for a [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Bytes requested at initialization. The n-th growth requests
  /// `page_size * n` bytes.
  pub page_size: usize,
  /// Emit `log` records for allocations, frees and growth. Must be off when
  /// the heap serves the global allocator and the installed logger allocates.
  pub log_events: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      log_events: true,
    }
  }
}

impl HeapConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_page_size(
    mut self,
    page_size: usize,
  ) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn with_logging(
    mut self,
    log_events: bool,
  ) -> Self {
    self.log_events = log_events;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.page_size < MIN_PAGE_SIZE || self.page_size % ALIGNMENT != 0 {
      return Err(HeapError::InvalidConfig {
        page_size: self.page_size,
        minimum: MIN_PAGE_SIZE,
      });
    }
    Ok(())
  }
}
