//! Word service client.
//!
//! `DrillBackend` is the seam between the engine and the remote word service;
//! `RemoteApi` implements it over HTTP with reqwest. Calls are instrumented and
//! log paths, statuses and sizes. The bearer token is never logged.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::domain::{AnswerResult, Level, LevelId, UserId, WordBatch, WordId};
use crate::error::DrillError;
use crate::util::trunc_for_log;

/// Query for one page of words.
#[derive(Clone, Debug, PartialEq)]
pub struct WordQuery {
  pub count: usize,
  pub language: String,
  pub difficulty: String,
  pub cursor: Option<String>,
}

/// Body of `POST /answer`; the session tag travels as a cookie.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnswerSubmission {
  pub word_id: WordId,
  pub user_id: UserId,
  pub language_code: String,
  pub user_answer: String,
  /// Milliseconds between presenting the word and submitting.
  pub response_time: u64,
  #[serde(skip)]
  pub session_tag: String,
}

#[derive(Serialize)]
struct CreateSessionBody {
  user_id: UserId,
  level_id: LevelId,
}

#[derive(Deserialize)]
struct CreateSessionReply {
  session_tag: String,
}

#[derive(Serialize)]
struct FinishBody<'a> {
  session_tag: &'a str,
}

/// Remote operations the engine depends on.
pub trait DrillBackend: Send + Sync + 'static {
  fn levels(&self) -> impl Future<Output = Result<Vec<Level>, DrillError>> + Send;
  fn random_words(&self, query: WordQuery) -> impl Future<Output = Result<WordBatch, DrillError>> + Send;
  fn create_session(&self, user_id: UserId, level_id: LevelId) -> impl Future<Output = Result<String, DrillError>> + Send;
  fn submit_answer(&self, submission: AnswerSubmission) -> impl Future<Output = Result<AnswerResult, DrillError>> + Send;
  fn finish_session(&self, session_tag: String) -> impl Future<Output = Result<(), DrillError>> + Send;
}

#[derive(Clone)]
pub struct RemoteApi {
  pub client: reqwest::Client,
  pub base_url: String,
  api_token: Option<String>,
}

impl RemoteApi {
  pub fn from_config(cfg: &EngineConfig) -> Result<Self, DrillError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.request_timeout_secs))
      .build()
      .map_err(|e| DrillError::Config(format!("http client: {e}")))?;
    Ok(Self {
      client,
      base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
      api_token: cfg.api_token.clone(),
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.base_url, path)
  }

  fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
    let req = req.header(USER_AGENT, "drill-backend/0.1");
    match &self.api_token {
      Some(token) => req.header(AUTHORIZATION, format!("Bearer {token}")),
      None => req,
    }
  }

  /// Send and turn transport errors and non-2xx statuses into a message.
  async fn send(&self, req: RequestBuilder) -> Result<Response, String> {
    let res = self.authorize(req).send().await.map_err(|e| e.to_string())?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      let msg = extract_service_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(format!("HTTP {status}: {msg}"));
    }
    Ok(res)
  }
}

impl DrillBackend for RemoteApi {
  #[instrument(level = "info", skip(self))]
  async fn levels(&self) -> Result<Vec<Level>, DrillError> {
    let res = self
      .send(self.client.get(self.url("/levels")))
      .await
      .map_err(DrillError::CatalogUnavailable)?;
    let levels: Vec<Level> = res.json().await.map_err(|e| DrillError::CatalogUnavailable(e.to_string()))?;
    debug!(target: "drill_backend", count = levels.len(), "Fetched levels");
    Ok(levels)
  }

  #[instrument(level = "info", skip(self, query), fields(count = query.count, difficulty = %query.difficulty, has_cursor = query.cursor.is_some()))]
  async fn random_words(&self, query: WordQuery) -> Result<WordBatch, DrillError> {
    let mut params = vec![
      ("count", query.count.to_string()),
      ("language", query.language),
      ("difficulty", query.difficulty),
    ];
    if let Some(cursor) = query.cursor {
      params.push(("cursor", cursor));
    }
    let res = self
      .send(self.client.get(self.url("/words/random")).query(&params))
      .await
      .map_err(DrillError::BatchFetchFailed)?;
    let batch: WordBatch = res.json().await.map_err(|e| DrillError::BatchFetchFailed(e.to_string()))?;
    debug!(target: "drill_backend", words = batch.words.len(), exhausted = batch.continuation().is_none(), "Fetched word page");
    Ok(batch)
  }

  #[instrument(level = "info", skip(self))]
  async fn create_session(&self, user_id: UserId, level_id: LevelId) -> Result<String, DrillError> {
    let req = self
      .client
      .post(self.url("/session"))
      .header(CONTENT_TYPE, "application/json")
      .json(&CreateSessionBody { user_id, level_id });
    let res = self.send(req).await.map_err(DrillError::SessionCreateFailed)?;
    let reply: CreateSessionReply = res.json().await.map_err(|e| DrillError::SessionCreateFailed(e.to_string()))?;
    Ok(reply.session_tag)
  }

  #[instrument(level = "info", skip(self, submission), fields(word_id = submission.word_id, answer_len = submission.user_answer.len()))]
  async fn submit_answer(&self, submission: AnswerSubmission) -> Result<AnswerResult, DrillError> {
    let req = self
      .client
      .post(self.url("/answer"))
      .header(CONTENT_TYPE, "application/json")
      .header(COOKIE, format!("session_tag={}", submission.session_tag))
      .json(&submission);
    let res = self.send(req).await.map_err(DrillError::SubmissionFailed)?;
    res.json().await.map_err(|e| DrillError::SubmissionFailed(e.to_string()))
  }

  #[instrument(level = "info", skip(self))]
  async fn finish_session(&self, session_tag: String) -> Result<(), DrillError> {
    let req = self
      .client
      .post(self.url("/finish"))
      .header(CONTENT_TYPE, "application/json")
      .json(&FinishBody { session_tag: &session_tag });
    self.send(req).await.map_err(DrillError::FinishFailed)?;
    Ok(())
  }
}

/// The word service replies `{"error": "..."}` or `{"message": "..."}` on failure.
fn extract_service_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct ErrBody {
    #[serde(default)] error: Option<String>,
    #[serde(default)] message: Option<String>,
  }
  let parsed: ErrBody = serde_json::from_str(body).ok()?;
  parsed.message.or(parsed.error)
}
