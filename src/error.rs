//! Typed errors surfaced by the engine. Every variant maps to a stable wire code.

use crate::domain::{LevelId, SessionStatus};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DrillError {
  #[error("level catalog unavailable: {0}")]
  CatalogUnavailable(String),

  #[error("unknown level {0}")]
  UnknownLevel(LevelId),

  #[error("word batch fetch failed: {0}")]
  BatchFetchFailed(String),

  #[error("answer submission failed: {0}")]
  SubmissionFailed(String),

  #[error("an answer is already being submitted")]
  SubmissionInFlight,

  #[error("no more words available for this session")]
  NoMoreWords,

  #[error("session could not be created: {0}")]
  SessionCreateFailed(String),

  #[error("session already finished")]
  SessionFinished,

  #[error("cannot {op} while {status}")]
  InvalidTransition { op: &'static str, status: SessionStatus },

  #[error("server verdict carried no total_score")]
  MissingServerScore,

  #[error("finish notification failed: {0}")]
  FinishFailed(String),

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl DrillError {
  pub fn code(&self) -> &'static str {
    match self {
      DrillError::CatalogUnavailable(_) => "catalog_unavailable",
      DrillError::UnknownLevel(_) => "unknown_level",
      DrillError::BatchFetchFailed(_) => "batch_fetch_failed",
      DrillError::SubmissionFailed(_) => "submission_failed",
      DrillError::SubmissionInFlight => "submission_in_flight",
      DrillError::NoMoreWords => "no_more_words",
      DrillError::SessionCreateFailed(_) => "session_create_failed",
      DrillError::SessionFinished => "session_finished",
      DrillError::InvalidTransition { .. } => "invalid_transition",
      DrillError::MissingServerScore => "missing_server_score",
      DrillError::FinishFailed(_) => "finish_failed",
      DrillError::Config(_) => "config",
    }
  }

  /// Errors after which only `reset()` brings the session back.
  pub fn is_fatal(&self) -> bool {
    matches!(self, DrillError::NoMoreWords)
  }
}
