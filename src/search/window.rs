//! Accumulated, gap-free prefix of a remote result set.

use std::ops::Range;

/// Record range `[size * (page - 1), size * page)` of a 1-based page.
/// Page 0 and size 0 are treated as 1.
pub fn page_range(page: usize, page_size: usize) -> Range<usize> {
  let page = page.max(1);
  let page_size = page_size.max(1);
  page_size * (page - 1)..page_size * page
}

/// Records of one search session, fetched front to back.
///
/// Items only ever grow at the end, so `items[..len]` always mirrors the
/// server's ordering for the filter the window was built for.
#[derive(Debug, Clone)]
pub struct ResultWindow<T> {
  items: Vec<T>,
  /// Offset of the next record to request
  start: usize,
  page_size: usize,
  /// Server-reported total, unknown until the first response
  total_reported: Option<usize>,
  complete: bool,
}

impl<T: Clone> ResultWindow<T> {
  pub fn new(page_size: usize) -> Self {
    Self {
      items: Vec::new(),
      start: 0,
      page_size: page_size.max(1),
      total_reported: None,
      complete: false,
    }
  }

  /// Forget everything fetched so far.
  pub fn clear(&mut self) {
    self.items.clear();
    self.start = 0;
    self.total_reported = None;
    self.complete = false;
  }

  pub fn items(&self) -> &[T] {
    &self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn start(&self) -> usize {
    self.start
  }

  pub fn page_size(&self) -> usize {
    self.page_size
  }

  pub fn set_page_size(&mut self, page_size: usize) {
    self.page_size = page_size.max(1);
  }

  pub fn total_reported(&self) -> Option<usize> {
    self.total_reported
  }

  pub fn is_complete(&self) -> bool {
    self.complete
  }

  /// Whether `range` can be served without another request.
  pub fn covers(&self, range: &Range<usize>) -> bool {
    self.complete || range.end <= self.items.len()
  }

  /// The part of `range` that is present, possibly shorter than asked.
  pub fn slice(&self, range: &Range<usize>) -> Vec<T> {
    let end = range.end.min(self.items.len());
    let start = range.start.min(end);
    self.items[start..end].to_vec()
  }

  /// Append the next chunk of results. Returns the number of records kept.
  ///
  /// Records beyond the reported total are dropped. An empty chunk before
  /// the reported total is reached means the server has nothing more to
  /// give, so the window is closed at its current length.
  pub fn append(&mut self, records: Vec<T>, total: usize) -> usize {
    let returned = records.len();
    let room = total.saturating_sub(self.items.len());
    let kept = returned.min(room);

    self.items.extend(records.into_iter().take(kept));
    self.start += kept;

    let total = if returned == 0 {
      self.items.len()
    } else {
      total.max(self.items.len())
    };
    self.total_reported = Some(total);
    self.complete = self.items.len() >= total;
    kept
  }
}
