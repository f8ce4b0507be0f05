//! Session lifecycle: the state machine that owns one drill session.
//!
//! A `SessionLifecycle` is owned by a single task. Remote calls are spawned and
//! report back as `EngineEvent`s on the channel given at construction; the owner
//! feeds them to `handle` in arrival order. Every event carries the epoch that was
//! current when its request was issued, and `reset()` bumps the epoch, so results
//! of requests issued before a reset are dropped on arrival.
//!
//! Transitions:
//!   Idle | Selecting --select_level--> Loading
//!   Loading --session tag + first word--> Active
//!   Active --verdict--> Active | Loading (refill pending) | Finished (score >= target)
//!   any --reset--> Idle

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::buffer::{BufferParams, WordBatchBuffer};
use crate::catalog::Levels;
use crate::config::EngineConfig;
use crate::domain::{AnswerResult, Level, SessionStatus, UserId, Word, WordBatch};
use crate::error::DrillError;
use crate::pipeline::AnswerPipeline;
use crate::remote::{DrillBackend, WordQuery};
use crate::scoring::LevelScoring;

/// Completion of a spawned request, or a timer tick, tagged with its epoch.
#[derive(Debug)]
pub enum EngineEvent {
  SessionCreated { epoch: u64, result: Result<String, DrillError> },
  PageArrived { epoch: u64, result: Result<WordBatch, DrillError> },
  Verdict { epoch: u64, result: Result<AnswerResult, DrillError> },
  Tick { epoch: u64, elapsed: Duration },
  FinishAcked { epoch: u64, result: Result<(), DrillError> },
}

impl EngineEvent {
  pub fn epoch(&self) -> u64 {
    match self {
      EngineEvent::SessionCreated { epoch, .. }
      | EngineEvent::PageArrived { epoch, .. }
      | EngineEvent::Verdict { epoch, .. }
      | EngineEvent::Tick { epoch, .. }
      | EngineEvent::FinishAcked { epoch, .. } => *epoch,
    }
  }
}

/// What the last verdict meant for the player.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
  pub is_correct: bool,
  pub correct_answer: String,
  pub score: i64,
  pub wrong_streak: u32,
}

/// Outcome of handling one event.
#[derive(Debug, PartialEq)]
pub enum Update {
  /// Stale or informational; nothing visible changed.
  Ignored,
  Changed,
  Tick(Duration),
  /// A verdict was applied. `stalled` means no next word can be served.
  Answered { feedback: Feedback, stalled: bool },
}

/// Everything one session knows. Replaced wholesale on reset.
pub struct SessionState {
  pub user_id: Option<UserId>,
  pub level: Option<Arc<Level>>,
  pub scoring: Option<LevelScoring>,
  pub session_tag: Option<String>,
  pub score: i64,
  pub wrong_streak: u32,
  pub current_word: Option<Word>,
  pub buffer: Option<WordBatchBuffer>,
  pub status: SessionStatus,
  pub elapsed: Duration,
  pub last_feedback: Option<Feedback>,
  /// Set when the session cannot continue; only reset clears it.
  pub fault: Option<DrillError>,
  presented_at: Option<Instant>,
}

impl Default for SessionState {
  fn default() -> Self {
    Self {
      user_id: None,
      level: None,
      scoring: None,
      session_tag: None,
      score: 0,
      wrong_streak: 1,
      current_word: None,
      buffer: None,
      status: SessionStatus::Idle,
      elapsed: Duration::ZERO,
      last_feedback: None,
      fault: None,
      presented_at: None,
    }
  }
}

/// Repeating elapsed-time task, alive only while the session is Active.
struct ElapsedTimer {
  handle: JoinHandle<()>,
  started: Instant,
  offset: Duration,
}

impl ElapsedTimer {
  fn start(offset: Duration, period: Duration, epoch: u64, events: UnboundedSender<EngineEvent>) -> Self {
    let started = Instant::now();
    let handle = tokio::spawn(async move {
      let mut interval = tokio::time::interval_at(started + period, period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        interval.tick().await;
        let elapsed = offset + started.elapsed();
        if events.send(EngineEvent::Tick { epoch, elapsed }).is_err() {
          break;
        }
      }
    });
    Self { handle, started, offset }
  }

  fn elapsed(&self) -> Duration {
    self.offset + self.started.elapsed()
  }

  fn stop(self) -> Duration {
    self.handle.abort();
    self.elapsed()
  }
}

impl Drop for ElapsedTimer {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

pub struct SessionLifecycle<B> {
  backend: Arc<B>,
  config: Arc<EngineConfig>,
  events: UnboundedSender<EngineEvent>,
  epoch: u64,
  state: SessionState,
  pipeline: AnswerPipeline,
  timer: Option<ElapsedTimer>,
}

impl<B: DrillBackend> SessionLifecycle<B> {
  pub fn new(backend: Arc<B>, config: Arc<EngineConfig>, events: UnboundedSender<EngineEvent>) -> Self {
    let pipeline = AnswerPipeline::new(config.scoring_mode, config.answer_language.clone());
    Self { backend, config, events, epoch: 0, state: SessionState::default(), pipeline, timer: None }
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  pub fn status(&self) -> SessionStatus {
    self.state.status
  }

  #[cfg(test)]
  pub fn epoch(&self) -> u64 {
    self.epoch
  }

  pub fn is_submitting(&self) -> bool {
    self.pipeline.is_pending()
  }

  #[cfg(test)]
  pub fn timer_running(&self) -> bool {
    self.timer.is_some()
  }

  /// Elapsed active time, including the running stretch.
  pub fn elapsed(&self) -> Duration {
    self.timer.as_ref().map(ElapsedTimer::elapsed).unwrap_or(self.state.elapsed)
  }

  /// The catalog is available and the player is choosing.
  pub fn begin_selection(&mut self, levels: &Levels) -> Result<(), DrillError> {
    match self.state.status {
      SessionStatus::Idle | SessionStatus::Selecting => {
        self.state.status = SessionStatus::Selecting;
        debug!(target: "drill", levels = levels.len(), "Level selection open");
        Ok(())
      }
      status => Err(DrillError::InvalidTransition { op: "open level selection", status }),
    }
  }

  /// Start a session: create the remote session record and request the first page.
  #[instrument(level = "info", skip(self, level), fields(level_id = level.level_id, epoch = self.epoch))]
  pub fn select_level(&mut self, user_id: UserId, level: Arc<Level>) -> Result<(), DrillError> {
    match self.state.status {
      SessionStatus::Idle | SessionStatus::Selecting => {}
      status => return Err(DrillError::InvalidTransition { op: "select a level", status }),
    }
    let scoring = LevelScoring::resolve(&level);
    let rng = match self.config.selection_seed {
      Some(seed) => StdRng::seed_from_u64(seed),
      None => StdRng::from_entropy(),
    };
    let mut buffer = WordBatchBuffer::new(
      BufferParams {
        batch_size: self.config.batch_size,
        low_water_mark: self.config.low_water_mark,
        language: self.config.word_language.clone(),
        difficulty: level.difficulty.clone(),
        selection: self.config.selection,
        max_fetch_failures: self.config.max_fetch_failures,
      },
      rng,
    );
    let first_page = buffer.ensure_ready(1);

    info!(target: "drill", user_id, level_id = level.level_id, rule = %scoring.rule, target = scoring.target, "Level selected");
    let level_id = level.level_id;
    self.state = SessionState {
      user_id: Some(user_id),
      level: Some(level),
      scoring: Some(scoring),
      buffer: Some(buffer),
      status: SessionStatus::Loading,
      ..SessionState::default()
    };

    self.dispatch(
      move |b| async move { b.create_session(user_id, level_id).await },
      |epoch, result| EngineEvent::SessionCreated { epoch, result },
    );
    if let Some(query) = first_page {
      self.fetch(query);
    }
    Ok(())
  }

  /// Submit the player's answer for the current word.
  #[instrument(level = "info", skip(self, answer), fields(answer_len = answer.len(), epoch = self.epoch))]
  pub fn submit_answer(&mut self, answer: &str) -> Result<(), DrillError> {
    if let Some(fault) = &self.state.fault {
      return Err(fault.clone());
    }
    match self.state.status {
      SessionStatus::Active => {}
      SessionStatus::Finished => return Err(DrillError::SessionFinished),
      status => return Err(DrillError::InvalidTransition { op: "submit an answer", status }),
    }
    let (Some(word), Some(user_id), Some(tag)) =
      (&self.state.current_word, self.state.user_id, &self.state.session_tag)
    else {
      return Err(DrillError::InvalidTransition { op: "submit an answer", status: self.state.status });
    };
    let presented_at = self.state.presented_at.unwrap_or_else(Instant::now);
    let submission = self.pipeline.begin(word, user_id, tag, answer, presented_at)?;
    debug!(target: "drill", word_id = submission.word_id, response_ms = submission.response_time, "Submitting answer");
    self.dispatch(
      move |b| async move { b.submit_answer(submission).await },
      |epoch, result| EngineEvent::Verdict { epoch, result },
    );
    Ok(())
  }

  /// Re-issue the page request after a `BatchFetchFailed`.
  pub fn retry_fetch(&mut self) -> Result<(), DrillError> {
    match self.state.status {
      SessionStatus::Loading | SessionStatus::Active => {}
      status => return Err(DrillError::InvalidTransition { op: "retry the word fetch", status }),
    }
    if let Some(fault) = &self.state.fault {
      return Err(fault.clone());
    }
    let Some(buffer) = self.state.buffer.as_mut() else {
      return Err(DrillError::InvalidTransition { op: "retry the word fetch", status: self.state.status });
    };
    if buffer.is_fetching() {
      return Ok(());
    }
    match buffer.retry_request() {
      Some(query) => {
        self.fetch(query);
        Ok(())
      }
      None if buffer.is_exhausted() => Err(DrillError::NoMoreWords),
      None => Ok(()),
    }
  }

  /// Discard the session. Outstanding results are ignored when they arrive.
  #[instrument(level = "info", skip(self), fields(epoch = self.epoch))]
  pub fn reset(&mut self) {
    self.epoch += 1;
    self.timer = None;
    self.pipeline.clear();
    let previous = std::mem::take(&mut self.state);
    info!(target: "drill", from = %previous.status, score = previous.score, "Session reset");
  }

  /// Apply one event. Events from before the last reset are ignored.
  pub fn handle(&mut self, event: EngineEvent) -> Result<Update, DrillError> {
    if event.epoch() != self.epoch {
      debug!(target: "drill", event_epoch = event.epoch(), epoch = self.epoch, "Dropping stale event");
      return Ok(Update::Ignored);
    }
    match event {
      EngineEvent::SessionCreated { result, .. } => self.on_session_created(result),
      EngineEvent::PageArrived { result, .. } => self.on_page(result),
      EngineEvent::Verdict { result, .. } => self.on_verdict(result),
      EngineEvent::Tick { elapsed, .. } => {
        if self.state.status != SessionStatus::Active || self.timer.is_none() {
          return Ok(Update::Ignored);
        }
        self.state.elapsed = elapsed;
        Ok(Update::Tick(elapsed))
      }
      EngineEvent::FinishAcked { result, .. } => {
        match result {
          Ok(()) => debug!(target: "drill", "Finish acknowledged"),
          Err(e) => warn!(target: "drill", error = %e, "Finish notification failed; local result stands"),
        }
        Ok(Update::Ignored)
      }
    }
  }

  fn on_session_created(&mut self, result: Result<String, DrillError>) -> Result<Update, DrillError> {
    if self.state.status != SessionStatus::Loading {
      return Ok(Update::Ignored);
    }
    match result {
      Ok(tag) => {
        info!(target: "drill", session_tag = %tag, "Remote session created");
        self.state.session_tag = Some(tag);
        self.present_next();
        match &self.state.fault {
          Some(fault) => Err(fault.clone()),
          None => Ok(Update::Changed),
        }
      }
      Err(e) => {
        warn!(target: "drill", error = %e, "Session creation failed; back to idle");
        self.reset();
        Err(match e {
          DrillError::SessionCreateFailed(_) => e,
          other => DrillError::SessionCreateFailed(other.to_string()),
        })
      }
    }
  }

  fn on_page(&mut self, result: Result<WordBatch, DrillError>) -> Result<Update, DrillError> {
    if self.state.status == SessionStatus::Finished {
      return Ok(Update::Ignored);
    }
    let Some(buffer) = self.state.buffer.as_mut() else {
      return Ok(Update::Ignored);
    };
    match result {
      Ok(batch) => {
        buffer.on_page(batch);
        if self.state.status == SessionStatus::Loading && self.state.session_tag.is_some() {
          self.present_next();
        } else if let Some(query) = buffer.refill_request() {
          self.fetch(query);
        }
        match &self.state.fault {
          Some(fault) => Err(fault.clone()),
          None => Ok(Update::Changed),
        }
      }
      Err(e) => {
        let degraded = buffer.on_page_failed();
        warn!(target: "drill", error = %e, degraded, "Word page fetch failed");
        if degraded && buffer.peek().is_none() {
          return Err(self.stall());
        }
        Err(match e {
          DrillError::BatchFetchFailed(_) => e,
          other => DrillError::BatchFetchFailed(other.to_string()),
        })
      }
    }
  }

  fn on_verdict(&mut self, result: Result<AnswerResult, DrillError>) -> Result<Update, DrillError> {
    if !self.pipeline.is_pending() {
      return Ok(Update::Ignored);
    }
    // A failed submission leaves the current word in place for another try.
    let (word_id, verdict) = self.pipeline.complete(result)?;
    let scoring = self.state.scoring.ok_or(DrillError::InvalidTransition {
      op: "score an answer",
      status: self.state.status,
    })?;
    let update = self.pipeline.reconcile(&verdict, scoring, self.state.score, self.state.wrong_streak)?;

    self.state.score = update.score;
    self.state.wrong_streak = update.wrong_streak;
    let feedback = Feedback {
      is_correct: verdict.is_correct,
      correct_answer: verdict.correct_answer,
      score: update.score,
      wrong_streak: update.wrong_streak,
    };
    self.state.last_feedback = Some(feedback.clone());
    info!(target: "drill", word_id, correct = feedback.is_correct, score = update.score, wrong_streak = update.wrong_streak, "Answer scored");

    if let Some(buffer) = self.state.buffer.as_mut() {
      buffer.advance();
    }
    if update.score >= scoring.target {
      self.finish();
      return Ok(Update::Answered { feedback, stalled: false });
    }
    self.present_next();
    let stalled = self.state.fault.is_some();
    Ok(Update::Answered { feedback, stalled })
  }

  /// Show the buffer's current word, or fall back to Loading while a refill is due.
  fn present_next(&mut self) {
    let Some(buffer) = self.state.buffer.as_mut() else {
      return;
    };
    let refill = buffer.refill_request();
    let next = buffer.peek().cloned();
    let exhausted = buffer.is_exhausted();
    if let Some(query) = refill {
      self.fetch(query);
    }

    match next {
      Some(word) => {
        self.state.current_word = Some(word);
        self.state.presented_at = Some(Instant::now());
        if self.state.status != SessionStatus::Active {
          self.state.status = SessionStatus::Active;
          self.start_timer();
          info!(target: "drill", "Session active");
        }
      }
      None => {
        self.state.current_word = None;
        self.state.presented_at = None;
        if self.state.status == SessionStatus::Active {
          self.stop_timer();
          self.state.status = SessionStatus::Loading;
        }
        if exhausted {
          self.stall();
        }
      }
    }
  }

  fn stall(&mut self) -> DrillError {
    warn!(target: "drill", score = self.state.score, "No more words; session cannot continue");
    self.stop_timer();
    self.state.current_word = None;
    self.state.status = SessionStatus::Loading;
    self.state.fault = Some(DrillError::NoMoreWords);
    DrillError::NoMoreWords
  }

  fn finish(&mut self) {
    self.stop_timer();
    self.state.status = SessionStatus::Finished;
    self.state.current_word = None;
    self.state.presented_at = None;
    info!(target: "drill", score = self.state.score, elapsed_ms = self.state.elapsed.as_millis() as u64, "Session finished");
    if let Some(tag) = self.state.session_tag.clone() {
      self.dispatch(
        move |b| async move { b.finish_session(tag).await },
        |epoch, result| EngineEvent::FinishAcked { epoch, result },
      );
    }
  }

  fn start_timer(&mut self) {
    let period = Duration::from_millis(self.config.tick_interval_ms);
    self.timer = Some(ElapsedTimer::start(self.state.elapsed, period, self.epoch, self.events.clone()));
  }

  fn stop_timer(&mut self) {
    if let Some(timer) = self.timer.take() {
      self.state.elapsed = timer.stop();
    }
  }

  fn fetch(&self, query: WordQuery) {
    self.dispatch(
      move |b| async move { b.random_words(query).await },
      |epoch, result| EngineEvent::PageArrived { epoch, result },
    );
  }

  /// Spawn a backend call and report its result as an event tagged with the current epoch.
  fn dispatch<T, F, Fut>(&self, call: F, wrap: fn(u64, Result<T, DrillError>) -> EngineEvent)
  where
    T: Send + 'static,
    F: FnOnce(Arc<B>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, DrillError>> + Send + 'static,
  {
    let backend = Arc::clone(&self.backend);
    let events = self.events.clone();
    let epoch = self.epoch;
    tokio::spawn(async move {
      let result = call(backend).await;
      // The receiver is gone once the owning connection closes.
      let _ = events.send(wrap(epoch, result));
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{ScoringMode, Selection};
  use crate::scoring::ScoreRule;
  use crate::testing::{answer_for, level, page, FakeBackend};
  use tokio::sync::mpsc::{self, UnboundedReceiver};
  use tokio::sync::Semaphore;

  type Session = SessionLifecycle<FakeBackend>;

  fn setup(backend: FakeBackend, config: EngineConfig) -> (Session, UnboundedReceiver<EngineEvent>, Arc<FakeBackend>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backend = Arc::new(backend);
    let config = EngineConfig { selection_seed: Some(1), ..config };
    (SessionLifecycle::new(backend.clone(), Arc::new(config), tx), rx, backend)
  }

  async fn next_event(rx: &mut UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
      .await
      .expect("event in time")
      .expect("channel open")
  }

  /// Handle the next non-tick event.
  async fn pump(s: &mut Session, rx: &mut UnboundedReceiver<EngineEvent>) -> Result<Update, DrillError> {
    loop {
      let ev = next_event(rx).await;
      if matches!(ev, EngineEvent::Tick { .. }) {
        s.handle(ev).unwrap();
        continue;
      }
      return s.handle(ev);
    }
  }

  async fn start(s: &mut Session, rx: &mut UnboundedReceiver<EngineEvent>, lvl: Arc<Level>) {
    s.select_level(7, lvl).unwrap();
    assert_eq!(s.status(), SessionStatus::Loading);
    pump(s, rx).await.unwrap();
    pump(s, rx).await.unwrap();
    assert_eq!(s.status(), SessionStatus::Active);
  }

  /// Submit and handle events until the verdict is applied.
  async fn answer(s: &mut Session, rx: &mut UnboundedReceiver<EngineEvent>, correct: bool) -> Result<Feedback, DrillError> {
    let id = s.state().current_word.as_ref().expect("a word is shown").word_id;
    let text = if correct { answer_for(id) } else { "nope".to_string() };
    s.submit_answer(&text)?;
    loop {
      if let Update::Answered { feedback, .. } = pump(s, rx).await? {
        return Ok(feedback);
      }
    }
  }

  #[tokio::test]
  async fn linear_level_finishes_after_five_correct() {
    let (mut s, mut rx, backend) = setup(FakeBackend::with_pages([page(1..21, None)]), EngineConfig::default());
    start(&mut s, &mut rx, level(2, 5, ScoreRule::Linear1)).await;
    assert!(s.timer_running());

    for _ in 0..5 {
      answer(&mut s, &mut rx, true).await.unwrap();
    }
    assert_eq!(s.status(), SessionStatus::Finished);
    assert_eq!(s.state().score, 5);
    assert!(s.state().current_word.is_none());
    assert!(!s.timer_running());

    assert_eq!(s.submit_answer("late").unwrap_err(), DrillError::SessionFinished);

    assert_eq!(pump(&mut s, &mut rx).await.unwrap(), Update::Ignored);
    assert_eq!(backend.finished.lock().unwrap().as_slice(), ["tag-7-2".to_string()]);
    assert_eq!(backend.submissions.lock().unwrap().len(), 5);
  }

  #[tokio::test]
  async fn flat_level_mistakes_never_block_the_target() {
    let (mut s, mut rx, _) = setup(FakeBackend::with_pages([page(1..21, None)]), EngineConfig::default());
    start(&mut s, &mut rx, level(1, 5, ScoreRule::Flat)).await;

    for streak in 2..5 {
      let fb = answer(&mut s, &mut rx, false).await.unwrap();
      assert!(!fb.is_correct);
      assert_eq!(fb.correct_answer, answer_for(s.state().buffer.as_ref().unwrap().peek().unwrap().word_id - 1));
      assert_eq!((fb.score, fb.wrong_streak), (0, streak));
    }
    for _ in 0..5 {
      answer(&mut s, &mut rx, true).await.unwrap();
    }
    assert_eq!(s.state().score, 5);
    assert_eq!(s.state().wrong_streak, 1);
    assert_eq!(s.status(), SessionStatus::Finished);
  }

  #[tokio::test]
  async fn reset_discards_late_page() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = FakeBackend { page_gate: Some(gate.clone()), ..FakeBackend::with_pages([page(1..21, None)]) };
    let (mut s, mut rx, _) = setup(backend, EngineConfig::default());

    s.select_level(7, level(1, 5, ScoreRule::Flat)).unwrap();
    assert_eq!(pump(&mut s, &mut rx).await.unwrap(), Update::Changed);
    assert_eq!(s.status(), SessionStatus::Loading, "tag known but no word yet");

    s.reset();
    gate.add_permits(1);
    let late = next_event(&mut rx).await;
    assert!(matches!(late, EngineEvent::PageArrived { epoch: 0, .. }));
    assert_eq!(s.handle(late).unwrap(), Update::Ignored);

    assert_eq!(s.status(), SessionStatus::Idle);
    assert!(s.state().buffer.is_none());
    assert!(s.state().current_word.is_none());
    assert_eq!(s.epoch(), 1);
  }

  #[tokio::test]
  async fn second_submission_is_rejected_while_pending() {
    let (mut s, mut rx, backend) = setup(FakeBackend::with_pages([page(1..21, None)]), EngineConfig::default());
    start(&mut s, &mut rx, level(1, 5, ScoreRule::Flat)).await;

    s.submit_answer("one").unwrap();
    assert!(s.is_submitting());
    assert_eq!(s.submit_answer("two").unwrap_err(), DrillError::SubmissionInFlight);
    pump(&mut s, &mut rx).await.unwrap();
    assert!(!s.is_submitting());
    assert_eq!(backend.submissions.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn failed_submission_keeps_the_word() {
    let backend = FakeBackend::with_pages([page(1..21, None)]);
    backend.script_verdict(Err(DrillError::SubmissionFailed("HTTP 502".into())));
    let (mut s, mut rx, _) = setup(backend, EngineConfig::default());
    start(&mut s, &mut rx, level(2, 5, ScoreRule::Linear1)).await;

    let before = s.state().current_word.clone();
    let err = answer(&mut s, &mut rx, true).await.unwrap_err();
    assert_eq!(err.code(), "submission_failed");
    assert_eq!(s.state().current_word, before);
    assert_eq!(s.state().score, 0);
    assert_eq!(s.status(), SessionStatus::Active);

    let fb = answer(&mut s, &mut rx, true).await.unwrap();
    assert_eq!(fb.score, 1);
  }

  #[tokio::test]
  async fn exhausted_words_surface_no_more_words() {
    let (mut s, mut rx, _) = setup(FakeBackend::with_pages([page(1..3, None)]), EngineConfig::default());
    start(&mut s, &mut rx, level(2, 5, ScoreRule::Linear1)).await;

    answer(&mut s, &mut rx, true).await.unwrap();
    s.submit_answer(&answer_for(2)).unwrap();
    let update = pump(&mut s, &mut rx).await.unwrap();
    assert!(matches!(update, Update::Answered { stalled: true, .. }));
    assert_eq!(s.state().fault, Some(DrillError::NoMoreWords));
    assert!(!s.timer_running());
    assert_eq!(s.submit_answer("x").unwrap_err(), DrillError::NoMoreWords);

    s.reset();
    assert_eq!(s.status(), SessionStatus::Idle);
    assert!(s.state().fault.is_none());
  }

  #[tokio::test]
  async fn refill_uses_cursor_and_stays_single_flight() {
    let backend = FakeBackend::with_pages([page(1..11, Some("p2")), page(11..21, None)]);
    let config = EngineConfig { batch_size: 10, low_water_mark: 5, ..Default::default() };
    let (mut s, mut rx, backend) = setup(backend, config);
    start(&mut s, &mut rx, level(1, 50, ScoreRule::Flat)).await;

    let mut seen = vec![s.state().current_word.as_ref().unwrap().word_id];
    for _ in 0..15 {
      answer(&mut s, &mut rx, true).await.unwrap();
      if let Some(w) = &s.state().current_word {
        seen.push(w.word_id);
      }
    }
    let queries = backend.word_queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].cursor, None);
    assert_eq!(queries[1].cursor.as_deref(), Some("p2"));
    let unique: std::collections::HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
  }

  #[tokio::test]
  async fn session_create_failure_returns_to_idle() {
    let backend = FakeBackend::with_pages([page(1..21, None)]);
    backend.fail_session.store(true, std::sync::atomic::Ordering::SeqCst);
    let (mut s, mut rx, _) = setup(backend, EngineConfig::default());
    s.select_level(7, level(1, 5, ScoreRule::Flat)).unwrap();

    let mut outcomes = vec![pump(&mut s, &mut rx).await, pump(&mut s, &mut rx).await];
    outcomes.retain(|o| o.is_err());
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].as_ref().unwrap_err().code(), "session_create_failed");
    assert_eq!(s.status(), SessionStatus::Idle);
  }

  #[tokio::test]
  async fn batch_failure_is_retryable_then_degrades() {
    let backend = FakeBackend::default();
    backend.pages.lock().unwrap().extend([
      Err(DrillError::BatchFetchFailed("HTTP 500".into())),
      Err(DrillError::BatchFetchFailed("HTTP 500".into())),
    ]);
    let config = EngineConfig { max_fetch_failures: 2, ..Default::default() };
    let (mut s, mut rx, _) = setup(backend, config);
    s.select_level(7, level(1, 5, ScoreRule::Flat)).unwrap();

    let mut errors = vec![];
    for _ in 0..2 {
      if let Err(e) = pump(&mut s, &mut rx).await {
        errors.push(e);
      }
    }
    assert_eq!(errors, vec![DrillError::BatchFetchFailed("HTTP 500".into())]);

    s.retry_fetch().unwrap();
    assert_eq!(pump(&mut s, &mut rx).await.unwrap_err(), DrillError::NoMoreWords);
    assert_eq!(s.retry_fetch().unwrap_err(), DrillError::NoMoreWords);
  }

  #[tokio::test]
  async fn server_mode_adopts_total_score() {
    let backend = FakeBackend::with_pages([page(1..21, None)]);
    backend.script_verdict(Ok(AnswerResult { is_correct: true, correct_answer: "a".into(), total_score: Some(3) }));
    backend.script_verdict(Ok(AnswerResult { is_correct: false, correct_answer: "b".into(), total_score: Some(1) }));
    backend.script_verdict(Ok(AnswerResult { is_correct: true, correct_answer: "c".into(), total_score: None }));
    let config = EngineConfig { scoring_mode: ScoringMode::Server, ..Default::default() };
    let (mut s, mut rx, _) = setup(backend, config);
    start(&mut s, &mut rx, level(2, 5, ScoreRule::Linear1)).await;

    assert_eq!(answer(&mut s, &mut rx, true).await.unwrap().score, 3);
    let fb = answer(&mut s, &mut rx, false).await.unwrap();
    assert_eq!((fb.score, fb.wrong_streak), (1, 2));
    assert_eq!(answer(&mut s, &mut rx, true).await.unwrap_err(), DrillError::MissingServerScore);
    assert_eq!(s.state().score, 1);
  }

  #[tokio::test]
  async fn random_selection_serves_each_word_once() {
    let config = EngineConfig { selection: Selection::Random, ..Default::default() };
    let (mut s, mut rx, _) = setup(FakeBackend::with_pages([page(1..21, None)]), config);
    start(&mut s, &mut rx, level(1, 10, ScoreRule::Flat)).await;

    let mut seen = std::collections::HashSet::new();
    while s.status() == SessionStatus::Active {
      let id = s.state().current_word.as_ref().unwrap().word_id;
      assert!(seen.insert(id), "word {id} served twice");
      answer(&mut s, &mut rx, true).await.unwrap();
    }
    assert_eq!(seen.len(), 10);
  }

  #[tokio::test(start_paused = true)]
  async fn elapsed_timer_runs_only_while_active() {
    let config = EngineConfig { tick_interval_ms: 100, ..Default::default() };
    let (mut s, mut rx, _) = setup(FakeBackend::with_pages([page(1..21, None)]), config);
    start(&mut s, &mut rx, level(1, 5, ScoreRule::Flat)).await;

    let mut ticks = 0;
    while ticks < 3 {
      if let Update::Tick(_) = s.handle(next_event(&mut rx).await).unwrap() {
        ticks += 1;
      }
    }
    assert!(s.state().elapsed >= Duration::from_millis(300));

    s.reset();
    assert!(!s.timer_running());
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(ev) = rx.try_recv() {
      assert_eq!(s.handle(ev).unwrap(), Update::Ignored);
    }
    assert_eq!(s.state().elapsed, Duration::ZERO);
  }

  #[tokio::test]
  async fn select_level_only_from_idle_or_selecting() {
    let (mut s, mut rx, _) = setup(FakeBackend::with_pages([page(1..21, None)]), EngineConfig::default());
    let levels: Levels = crate::seeds::builtin_levels().into_iter().map(Arc::new).collect();
    s.begin_selection(&levels).unwrap();
    assert_eq!(s.status(), SessionStatus::Selecting);
    start(&mut s, &mut rx, level(1, 5, ScoreRule::Flat)).await;

    let err = s.select_level(7, level(2, 5, ScoreRule::Linear1)).unwrap_err();
    assert_eq!(err.code(), "invalid_transition");
    assert!(s.begin_selection(&levels).is_err());
  }

  #[tokio::test]
  async fn drained_queue_waits_in_loading_for_the_refill() {
    let gate = Arc::new(Semaphore::new(1));
    let backend = FakeBackend {
      page_gate: Some(gate.clone()),
      ..FakeBackend::with_pages([page(1..7, Some("p2")), page(7..13, None)])
    };
    let config = EngineConfig { batch_size: 6, low_water_mark: 5, ..Default::default() };
    let (mut s, mut rx, _) = setup(backend, config);
    start(&mut s, &mut rx, level(1, 50, ScoreRule::Flat)).await;

    for _ in 0..6 {
      answer(&mut s, &mut rx, true).await.unwrap();
    }
    assert_eq!(s.status(), SessionStatus::Loading);
    assert!(!s.timer_running());
    assert!(s.state().current_word.is_none());
    assert_eq!(s.state().fault, None);
    assert_eq!(s.submit_answer("early").unwrap_err().code(), "invalid_transition");

    gate.add_permits(1);
    assert_eq!(pump(&mut s, &mut rx).await.unwrap(), Update::Changed);
    assert_eq!(s.status(), SessionStatus::Active);
    assert!(s.timer_running());
    assert_eq!(s.state().current_word.as_ref().map(|w| w.word_id), Some(7));
  }

  #[tokio::test]
  async fn empty_first_page_reports_no_more_words_when_tag_arrives_last() {
    let gate = Arc::new(Semaphore::new(0));
    let backend = FakeBackend { session_gate: Some(gate.clone()), ..FakeBackend::default() };
    let (mut s, mut rx, _) = setup(backend, EngineConfig::default());
    s.select_level(7, level(1, 5, ScoreRule::Flat)).unwrap();

    let first = next_event(&mut rx).await;
    assert!(matches!(first, EngineEvent::PageArrived { .. }));
    assert_eq!(s.handle(first).unwrap(), Update::Changed);
    assert_eq!(s.state().fault, None);

    gate.add_permits(1);
    assert_eq!(pump(&mut s, &mut rx).await.unwrap_err(), DrillError::NoMoreWords);
    assert_eq!(s.state().fault, Some(DrillError::NoMoreWords));
    assert_eq!(s.status(), SessionStatus::Loading);
  }
}
