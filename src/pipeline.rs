//! Answer submission pipeline: one submission in flight at a time, and the
//! reconciliation of a verdict with the session score.

use tokio::time::Instant;

use crate::config::ScoringMode;
use crate::domain::{AnswerResult, UserId, Word, WordId};
use crate::error::DrillError;
use crate::remote::AnswerSubmission;
use crate::scoring::{self, LevelScoring, ScoreUpdate};
use crate::util::normalize_answer;

#[derive(Clone, Debug)]
struct Pending {
  word_id: WordId,
}

pub struct AnswerPipeline {
  mode: ScoringMode,
  answer_language: String,
  pending: Option<Pending>,
}

impl AnswerPipeline {
  pub fn new(mode: ScoringMode, answer_language: impl Into<String>) -> Self {
    Self { mode, answer_language: answer_language.into(), pending: None }
  }

  pub fn is_pending(&self) -> bool {
    self.pending.is_some()
  }

  /// Start a submission for `word`. Rejected while another one is in flight.
  pub fn begin(
    &mut self,
    word: &Word,
    user_id: UserId,
    session_tag: &str,
    answer: &str,
    presented_at: Instant,
  ) -> Result<AnswerSubmission, DrillError> {
    if self.pending.is_some() {
      return Err(DrillError::SubmissionInFlight);
    }
    self.pending = Some(Pending { word_id: word.word_id });
    Ok(AnswerSubmission {
      word_id: word.word_id,
      user_id,
      language_code: self.answer_language.clone(),
      user_answer: normalize_answer(answer),
      response_time: presented_at.elapsed().as_millis() as u64,
      session_tag: session_tag.to_string(),
    })
  }

  /// Settle the in-flight submission. Returns the word it was for with the verdict.
  pub fn complete(
    &mut self,
    result: Result<AnswerResult, DrillError>,
  ) -> Result<(WordId, AnswerResult), DrillError> {
    let pending = self.pending.take().ok_or(DrillError::InvalidTransition {
      op: "settle a submission",
      status: crate::domain::SessionStatus::Active,
    })?;
    let verdict = result.map_err(|e| match e {
      DrillError::SubmissionFailed(_) => e,
      other => DrillError::SubmissionFailed(other.to_string()),
    })?;
    Ok((pending.word_id, verdict))
  }

  /// Drop any in-flight submission without settling it.
  pub fn clear(&mut self) {
    self.pending = None;
  }

  /// New score and streak after `verdict`, according to the configured authority.
  pub fn reconcile(
    &self,
    verdict: &AnswerResult,
    scoring: LevelScoring,
    score: i64,
    wrong_streak: u32,
  ) -> Result<ScoreUpdate, DrillError> {
    let local = scoring::apply(scoring.rule, score, wrong_streak, verdict.is_correct);
    match self.mode {
      ScoringMode::Client => Ok(local),
      ScoringMode::Server => {
        let total = verdict.total_score.ok_or(DrillError::MissingServerScore)?;
        Ok(ScoreUpdate { score: total, wrong_streak: local.wrong_streak })
      }
    }
  }
}
