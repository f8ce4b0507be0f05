//! Built-in level table: the six standard drill levels.
//!
//! Served when `level_source = "builtin"`, so a deployment can run against a word
//! service that has no `/levels` endpoint.

use crate::domain::{Level, ScoringConfig};
use crate::scoring::ScoreRule;

pub fn builtin_levels() -> Vec<Level> {
  let table = [
    (1, "easy", "No penalty for mistakes."),
    (2, "easy", "Each mistake costs one point."),
    (3, "medium", "Each mistake costs two points."),
    (4, "medium", "A mistake wipes the score."),
    (5, "hard", "Mistakes cost as much as the current wrong streak."),
    (6, "hard", "Mistakes cost the square of the wrong streak."),
  ];
  table
    .into_iter()
    .map(|(id, difficulty, description)| Level {
      level_id: id,
      code: format!("level-{id}"),
      name: format!("Level {id}"),
      description: description.into(),
      difficulty: difficulty.into(),
      scoring_config: ScoringConfig {
        target: Some(if id >= 4 { 10 } else { 5 }),
        rule: ScoreRule::for_ordinal(id),
        target_rules: None,
      },
    })
    .collect()
}
