//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{Level, LevelId, SessionStatus, UserId, Word};
use crate::error::DrillError;
use crate::remote::DrillBackend;
use crate::scoring::{LevelScoring, ScoreRule};
use crate::session::{Feedback, SessionLifecycle};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Levels,
    SelectLevel {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "levelId")]
        level_id: LevelId,
    },
    SubmitAnswer {
        answer: String,
    },
    RetryFetch,
    Reset,
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Levels {
        levels: Vec<LevelOut>,
    },
    State {
        session: SessionSnapshot,
    },
    Verdict {
        feedback: Feedback,
    },
    Tick {
        #[serde(rename = "elapsedMs")]
        elapsed_ms: u64,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

impl From<&DrillError> for ServerWsMessage {
    fn from(e: &DrillError) -> Self {
        ServerWsMessage::Error { code: e.code(), message: e.to_string() }
    }
}

/// Level as shown to the player, with its resolved rule and target.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOut {
    pub level_id: LevelId,
    pub code: String,
    pub name: String,
    pub description: String,
    pub difficulty: String,
    pub rule: ScoreRule,
    pub target: i64,
}

pub fn level_out(l: &Level) -> LevelOut {
    let scoring = LevelScoring::resolve(l);
    LevelOut {
        level_id: l.level_id,
        code: l.code.clone(),
        name: l.name.clone(),
        description: l.description.clone(),
        difficulty: l.difficulty.clone(),
        rule: scoring.rule,
        target: scoring.target,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordOut {
    pub word_id: i64,
    pub word_text: String,
    pub language_code: String,
}

/// Everything the client needs to render the drill.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub level_id: Option<LevelId>,
    pub rule: Option<ScoreRule>,
    pub target: Option<i64>,
    pub score: i64,
    pub wrong_streak: u32,
    pub current_word: Option<WordOut>,
    pub submitting: bool,
    pub elapsed_ms: u64,
    pub last_feedback: Option<Feedback>,
    pub fault: Option<&'static str>,
}

fn word_out(w: &Word) -> WordOut {
    WordOut { word_id: w.word_id, word_text: w.word_text.clone(), language_code: w.language_code.clone() }
}

pub fn to_snapshot<B: DrillBackend>(s: &SessionLifecycle<B>) -> SessionSnapshot {
    let st = s.state();
    SessionSnapshot {
        status: st.status,
        level_id: st.level.as_ref().map(|l| l.level_id),
        rule: st.scoring.map(|sc| sc.rule),
        target: st.scoring.map(|sc| sc.target),
        score: st.score,
        wrong_streak: st.wrong_streak,
        current_word: st.current_word.as_ref().map(word_out),
        submitting: s.is_submitting(),
        elapsed_ms: s.elapsed().as_millis() as u64,
        last_feedback: st.last_feedback.clone(),
        fault: st.fault.as_ref().map(DrillError::code),
    }
}

//
// HTTP response DTOs
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
    pub ok: bool,
    pub levels_loaded: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub code: &'static str,
    pub message: String,
}
