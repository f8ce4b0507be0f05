//! In-memory word service used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::domain::{AnswerResult, Level, LevelId, ScoringConfig, UserId, Word, WordBatch, WordId};
use crate::error::DrillError;
use crate::remote::{AnswerSubmission, DrillBackend, WordQuery};
use crate::scoring::ScoreRule;
use crate::seeds::builtin_levels;

pub fn word(id: WordId) -> Word {
  Word {
    word_id: id,
    concept_id: format!("c{id}"),
    language_code: "en".into(),
    word_text: format!("word{id}"),
    difficulty: "easy".into(),
  }
}

/// The answer the fake service accepts for a word.
pub fn answer_for(id: WordId) -> String {
  format!("answer{id}")
}

pub fn page(ids: std::ops::Range<WordId>, cursor: Option<&str>) -> WordBatch {
  WordBatch { words: ids.map(word).collect(), next_cursor: cursor.map(String::from) }
}

pub fn level(id: LevelId, target: i64, rule: ScoreRule) -> Arc<Level> {
  Arc::new(Level {
    level_id: id,
    code: format!("t{id}"),
    name: format!("Test {id}"),
    description: String::new(),
    difficulty: "easy".into(),
    scoring_config: ScoringConfig { target: Some(target), rule: Some(rule), target_rules: None },
  })
}

#[derive(Default)]
pub struct FakeBackend {
  /// Scripted pages; an empty script serves an exhausted empty page.
  pub pages: Mutex<VecDeque<Result<WordBatch, DrillError>>>,
  /// Scripted verdicts; an empty script judges against `answer_for`.
  pub verdicts: Mutex<VecDeque<Result<AnswerResult, DrillError>>>,
  /// When set, each page waits for a permit before replying.
  pub page_gate: Option<Arc<Semaphore>>,
  /// When set, session creation waits for a permit before replying.
  pub session_gate: Option<Arc<Semaphore>>,
  pub fail_levels: AtomicBool,
  pub fail_session: AtomicBool,
  pub level_calls: AtomicUsize,
  pub word_queries: Mutex<Vec<WordQuery>>,
  pub submissions: Mutex<Vec<AnswerSubmission>>,
  pub finished: Mutex<Vec<String>>,
}

impl FakeBackend {
  pub fn with_pages(pages: impl IntoIterator<Item = WordBatch>) -> Self {
    let backend = Self::default();
    backend.pages.lock().unwrap().extend(pages.into_iter().map(Ok));
    backend
  }

  pub fn script_verdict(&self, verdict: Result<AnswerResult, DrillError>) {
    self.verdicts.lock().unwrap().push_back(verdict);
  }
}

impl DrillBackend for FakeBackend {
  async fn levels(&self) -> Result<Vec<Level>, DrillError> {
    self.level_calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_levels.load(Ordering::SeqCst) {
      return Err(DrillError::CatalogUnavailable("HTTP 503".into()));
    }
    Ok(builtin_levels())
  }

  async fn random_words(&self, query: WordQuery) -> Result<WordBatch, DrillError> {
    if let Some(gate) = &self.page_gate {
      gate.acquire().await.map_err(|e| DrillError::BatchFetchFailed(e.to_string()))?.forget();
    }
    self.word_queries.lock().unwrap().push(query);
    let next = self.pages.lock().unwrap().pop_front();
    next.unwrap_or_else(|| Ok(WordBatch::default()))
  }

  async fn create_session(&self, user_id: UserId, level_id: LevelId) -> Result<String, DrillError> {
    if let Some(gate) = &self.session_gate {
      gate.acquire().await.map_err(|e| DrillError::SessionCreateFailed(e.to_string()))?.forget();
    }
    if self.fail_session.load(Ordering::SeqCst) {
      return Err(DrillError::SessionCreateFailed("HTTP 500".into()));
    }
    Ok(format!("tag-{user_id}-{level_id}"))
  }

  async fn submit_answer(&self, submission: AnswerSubmission) -> Result<AnswerResult, DrillError> {
    let scripted = self.verdicts.lock().unwrap().pop_front();
    let expected = answer_for(submission.word_id);
    let verdict = scripted.unwrap_or_else(|| {
      Ok(AnswerResult {
        is_correct: submission.user_answer == expected,
        correct_answer: expected.clone(),
        total_score: None,
      })
    });
    self.submissions.lock().unwrap().push(submission);
    verdict
  }

  async fn finish_session(&self, session_tag: String) -> Result<(), DrillError> {
    self.finished.lock().unwrap().push(session_tag);
    Ok(())
  }
}
