//! Word buffer: queued words, the current word, and the continuation cursor.
//!
//! The buffer never performs I/O itself. It hands out a `WordQuery` when it wants
//! a page and the owner reports the outcome back through `on_page` or
//! `on_page_failed`. The in-flight flag guarantees at most one outstanding query.

use std::collections::{HashSet, VecDeque};

use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::Selection;
use crate::domain::{Word, WordBatch, WordId};
use crate::remote::WordQuery;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Cursor {
  /// No page requested yet.
  Start,
  Next(String),
  Exhausted,
}

#[derive(Clone, Debug)]
pub struct BufferParams {
  pub batch_size: usize,
  pub low_water_mark: usize,
  pub language: String,
  pub difficulty: String,
  pub selection: Selection,
  pub max_fetch_failures: u32,
}

pub struct WordBatchBuffer {
  params: BufferParams,
  queue: VecDeque<Word>,
  current: Option<Word>,
  cursor: Cursor,
  in_flight: bool,
  failures: u32,
  served: HashSet<WordId>,
  rng: StdRng,
}

impl WordBatchBuffer {
  pub fn new(params: BufferParams, rng: StdRng) -> Self {
    Self {
      params,
      queue: VecDeque::new(),
      current: None,
      cursor: Cursor::Start,
      in_flight: false,
      failures: 0,
      served: HashSet::new(),
      rng,
    }
  }

  /// The word being asked, if one is ready.
  pub fn peek(&self) -> Option<&Word> {
    self.current.as_ref()
  }

  /// Words waiting behind the current one.
  #[cfg(test)]
  pub fn queued(&self) -> usize {
    self.queue.len()
  }

  pub fn is_fetching(&self) -> bool {
    self.in_flight
  }

  /// Nothing left to serve and nothing left to fetch.
  pub fn is_exhausted(&self) -> bool {
    self.cursor == Cursor::Exhausted && self.queue.is_empty() && self.current.is_none()
  }

  /// Request a page if fewer than `min_size` words are queued, a cursor remains and
  /// no request is outstanding. The returned query must be answered exactly once.
  /// After a failed page nothing is requested until `retry_request`.
  pub fn ensure_ready(&mut self, min_size: usize) -> Option<WordQuery> {
    if self.failures > 0 {
      return None;
    }
    self.request(min_size)
  }

  /// Low-water refill check, run after every advance.
  pub fn refill_request(&mut self) -> Option<WordQuery> {
    self.ensure_ready(self.params.low_water_mark)
  }

  /// Same cursor again after a failed page.
  pub fn retry_request(&mut self) -> Option<WordQuery> {
    self.request(self.params.low_water_mark.max(1))
  }

  fn request(&mut self, min_size: usize) -> Option<WordQuery> {
    if self.in_flight || self.queue.len() >= min_size {
      return None;
    }
    let cursor = match &self.cursor {
      Cursor::Exhausted => return None,
      Cursor::Start => None,
      Cursor::Next(c) => Some(c.clone()),
    };
    self.in_flight = true;
    Some(WordQuery {
      count: self.params.batch_size,
      language: self.params.language.clone(),
      difficulty: self.params.difficulty.clone(),
      cursor,
    })
  }

  pub fn on_page(&mut self, batch: WordBatch) {
    self.in_flight = false;
    self.failures = 0;
    self.cursor = match batch.continuation() {
      Some(c) => Cursor::Next(c.to_string()),
      None => Cursor::Exhausted,
    };
    let before = self.queue.len();
    for word in batch.words {
      let queued = self.queue.iter().any(|w| w.word_id == word.word_id);
      let current = self.current.as_ref().is_some_and(|w| w.word_id == word.word_id);
      if queued || current || self.served.contains(&word.word_id) {
        continue;
      }
      self.queue.push_back(word);
    }
    debug!(target: "drill", added = self.queue.len() - before, queued = self.queue.len(), exhausted = self.cursor == Cursor::Exhausted, "Word page applied");
    if self.current.is_none() {
      self.promote();
    }
  }

  /// Record a failed page. Returns true once failures have degraded the buffer to exhausted.
  pub fn on_page_failed(&mut self) -> bool {
    self.in_flight = false;
    self.failures += 1;
    if self.failures >= self.params.max_fetch_failures {
      warn!(target: "drill", failures = self.failures, "Word source keeps failing; treating as exhausted");
      self.cursor = Cursor::Exhausted;
      return true;
    }
    false
  }

  /// Consume the current word and promote the next one. Returns the consumed word.
  pub fn advance(&mut self) -> Option<Word> {
    let consumed = self.current.take();
    self.promote();
    consumed
  }

  fn promote(&mut self) {
    if self.queue.is_empty() {
      return;
    }
    let next = match self.params.selection {
      Selection::Sequential => self.queue.pop_front(),
      Selection::Random => {
        let idx = self.rng.gen_range(0..self.queue.len());
        self.queue.remove(idx)
      }
    };
    if let Some(word) = &next {
      self.served.insert(word.word_id);
    }
    self.current = next;
  }
}
