//! Domain models shared by the engine: levels and their scoring configuration,
//! words and word pages, server verdicts, and the session status enumeration.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::scoring::ScoreRule;

pub type LevelId = i64;
pub type WordId = i64;
pub type UserId = i64;

/// Scoring configuration carried by a level.
///
/// Two shapes are accepted: the explicit `{ target, rule }` form and the older
/// `target_rules` block stored by the word service. Both are optional so that a
/// level without any configuration still resolves through its ordinal.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
  #[serde(default)] pub target: Option<i64>,
  #[serde(default, deserialize_with = "lenient_rule")]
  pub rule: Option<ScoreRule>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_rules: Option<TargetRules>,
}

/// An unrecognised rule name leaves the rule unset so the level still resolves.
fn lenient_rule<'de, D: Deserializer<'de>>(d: D) -> Result<Option<ScoreRule>, D::Error> {
  let Some(raw) = Option::<serde_json::Value>::deserialize(d)? else {
    return Ok(None);
  };
  match serde_json::from_value::<ScoreRule>(raw.clone()) {
    Ok(rule) => Ok(Some(rule)),
    Err(_) => {
      warn!(target: "drill", rule = %raw, "Unknown scoring rule in level data; ignoring");
      Ok(None)
    }
  }
}

/// Legacy penalty description (`mode = "number" | "formula"`).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TargetRules {
  #[serde(default)] pub correct_bonus: Option<i64>,
  #[serde(default)] pub wrong_penalty: Option<serde_json::Value>,
  #[serde(default)] pub mode: Option<String>,
}

/// A difficulty level as served by `GET /levels`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Level {
  pub level_id: LevelId,
  pub code: String,
  pub name: String,
  #[serde(default)] pub description: String,
  pub difficulty: String,
  #[serde(default)] pub scoring_config: ScoringConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Word {
  pub word_id: WordId,
  #[serde(default)] pub concept_id: String,
  pub language_code: String,
  pub word_text: String,
  #[serde(default)] pub difficulty: String,
}

/// One page of the word source. An absent or empty cursor means the source is exhausted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WordBatch {
  #[serde(default)] pub words: Vec<Word>,
  #[serde(default)] pub next_cursor: Option<String>,
}

impl WordBatch {
  pub fn continuation(&self) -> Option<&str> {
    self.next_cursor.as_deref().filter(|c| !c.is_empty())
  }
}

/// Server verdict for one submitted answer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnswerResult {
  pub is_correct: bool,
  #[serde(default)] pub correct_answer: String,
  #[serde(default)] pub total_score: Option<i64>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
  Idle,
  Selecting,
  Loading,
  Active,
  Finished,
}

impl Default for SessionStatus {
  fn default() -> Self { SessionStatus::Idle }
}

impl std::fmt::Display for SessionStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      SessionStatus::Idle => "idle",
      SessionStatus::Selecting => "selecting",
      SessionStatus::Loading => "loading",
      SessionStatus::Active => "active",
      SessionStatus::Finished => "finished",
    };
    f.write_str(s)
  }
}
