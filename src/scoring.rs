//! Score rules and the pure scoring function.
//!
//! Rules are carried by level data (`scoring_config.rule`). Levels that predate
//! the explicit rule field resolve through the legacy `target_rules` block, and
//! failing that through the fixed ordinal table (level 1 = flat ... 6 = streak-quadratic).

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Level, ScoringConfig, TargetRules};

/// How an incorrect answer affects the score.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScoreRule {
  #[serde(rename = "flat")]
  Flat,
  #[serde(rename = "linear-1")]
  Linear1,
  #[serde(rename = "linear-2")]
  Linear2,
  #[serde(rename = "reset")]
  Reset,
  #[serde(rename = "streak-linear")]
  StreakLinear,
  #[serde(rename = "streak-quadratic")]
  StreakQuadratic,
}

impl ScoreRule {
  pub const ALL: [ScoreRule; 6] = [
    ScoreRule::Flat,
    ScoreRule::Linear1,
    ScoreRule::Linear2,
    ScoreRule::Reset,
    ScoreRule::StreakLinear,
    ScoreRule::StreakQuadratic,
  ];

  /// Fixed enumeration used by the first generation of levels.
  pub fn for_ordinal(ordinal: i64) -> Option<ScoreRule> {
    match ordinal {
      1..=6 => Some(Self::ALL[(ordinal - 1) as usize]),
      _ => None,
    }
  }

  fn from_target_rules(tr: &TargetRules) -> Option<ScoreRule> {
    match tr.mode.as_deref()? {
      // Signed delta applied on a miss; a positive value is a bonus, not a penalty.
      "number" => match tr.wrong_penalty.as_ref()?.as_i64()? {
        0 => Some(ScoreRule::Flat),
        -1 => Some(ScoreRule::Linear1),
        -2 => Some(ScoreRule::Linear2),
        _ => None,
      },
      "formula" => match tr.wrong_penalty.as_ref()?.as_str()? {
        "arithmetic" => Some(ScoreRule::StreakLinear),
        "reset" => Some(ScoreRule::Reset),
        _ => None,
      },
      _ => None,
    }
  }
}

impl std::fmt::Display for ScoreRule {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ScoreRule::Flat => "flat",
      ScoreRule::Linear1 => "linear-1",
      ScoreRule::Linear2 => "linear-2",
      ScoreRule::Reset => "reset",
      ScoreRule::StreakLinear => "streak-linear",
      ScoreRule::StreakQuadratic => "streak-quadratic",
    };
    f.write_str(s)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreUpdate {
  pub score: i64,
  pub wrong_streak: u32,
}

/// Apply one answer outcome. `wrong_streak` is the streak *before* this answer.
pub fn apply(rule: ScoreRule, score: i64, wrong_streak: u32, is_correct: bool) -> ScoreUpdate {
  if is_correct {
    return ScoreUpdate { score: score + 1, wrong_streak: 1 };
  }
  let streak = i64::from(wrong_streak);
  let score = match rule {
    ScoreRule::Flat => score,
    ScoreRule::Linear1 => score - 1,
    ScoreRule::Linear2 => score - 2,
    ScoreRule::Reset => 0,
    ScoreRule::StreakLinear => score - streak,
    ScoreRule::StreakQuadratic => score - streak * streak,
  };
  ScoreUpdate { score, wrong_streak: wrong_streak.saturating_add(1) }
}

/// Rule and target resolved for one level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelScoring {
  pub rule: ScoreRule,
  pub target: i64,
}

impl LevelScoring {
  pub fn resolve(level: &Level) -> Self {
    let ScoringConfig { target, rule, target_rules } = &level.scoring_config;
    let rule = rule
      .or_else(|| target_rules.as_ref().and_then(ScoreRule::from_target_rules))
      .or_else(|| ScoreRule::for_ordinal(level.level_id))
      .unwrap_or_else(|| {
        warn!(target: "drill", level_id = level.level_id, "Level carries no usable scoring rule; using flat");
        ScoreRule::Flat
      });
    let target = target.filter(|t| *t > 0).unwrap_or(if level.level_id >= 4 { 10 } else { 5 });
    Self { rule, target }
  }
}
