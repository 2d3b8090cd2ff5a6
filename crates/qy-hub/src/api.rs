//! HTTP handlers.
//!
//! Every handler that needs the store awaits `connect()` first, so requests
//! arriving during startup wait for the shared initialization.

use crate::boundary::{self, classify_failure, FailureClass};
use crate::config::Config;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use qy_core::{Document, Error, StructuredQuery, Value};
use qy_engine::{CollectionStats, QueryService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

pub struct AppState {
    pub service: Arc<QueryService>,
    pub config: Config,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub const DEFAULT_SAMPLE_LIMIT: usize = 5;
pub const MAX_SAMPLE_LIMIT: usize = 100;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                error: message.into(),
                kind: "bad_request".into(),
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let class = classify_failure(&err);
        let (error, kind) = match class {
            FailureClass::Quota => (boundary::QUOTA_MESSAGE.to_string(), "quota"),
            _ => (err.to_string(), err.kind()),
        };
        tracing::warn!("Request failed ({}): {}", kind, err);
        Self {
            status: class.status(),
            body: ErrorBody {
                error,
                kind: kind.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Health
// =============================================================================

#[derive(Deserialize, Default)]
pub struct HealthParams {
    #[serde(default)]
    pub deep: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected: bool,
    pub document_count: Option<u64>,
    /// Only probed with `?deep=true`.
    pub reasoning_ready: Option<bool>,
    pub uptime_seconds: u64,
    pub started_at: String,
}

pub async fn health(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HealthParams>,
) -> Json<HealthResponse> {
    let service = &state.service;
    let connected = match service.connect().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Health check: {}", e);
            false
        }
    };
    let document_count = if connected {
        service.test_connection().await.ok()
    } else {
        None
    };
    let reasoning_ready = if params.deep {
        Some(service.reasoning_ready().await)
    } else {
        None
    };
    let healthy = document_count.is_some() && reasoning_ready != Some(false);

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        connected,
        document_count,
        reasoning_ready,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        started_at: state.started_at.to_rfc3339(),
    })
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    pub question: String,
    pub query: StructuredQuery,
    pub results: Vec<Document>,
    pub total: usize,
    pub truncated: bool,
    pub summary: Option<String>,
    pub elapsed_ms: u64,
}

fn require_question(question: &str) -> Result<&str, ApiError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("question must not be empty"));
    }
    Ok(question)
}

/// Translate, execute with repair, shape, summarize.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<AskResponse> {
    let Json(req) = body?;
    let question = require_question(&req.question)?;
    let started = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let max_attempts = req.max_attempts.unwrap_or(state.config.query.max_attempts);
    tracing::info!("[{}] Question: {}", request_id, question);

    let service = &state.service;
    service.connect().await?;
    let query = service.generate_query(question).await?;
    tracing::info!("[{}] Generated query: {}", request_id, query);

    let results = service
        .execute_query_with_retry(query.clone(), question, max_attempts)
        .await?;
    let summary = service.summarize(question, &results).await.ok();

    let server = &state.config.server;
    let shaped = boundary::shape_results(results, server.truncate_above, server.truncate_to);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        "[{}] {} record(s) in {}ms{}",
        request_id,
        shaped.total,
        elapsed_ms,
        if shaped.truncated { " (truncated)" } else { "" }
    );

    Ok(Json(AskResponse {
        request_id,
        question: question.to_string(),
        query,
        results: shaped.results,
        total: shaped.total,
        truncated: shaped.truncated,
        summary,
        elapsed_ms,
    }))
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub query: StructuredQuery,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<GenerateResponse> {
    let Json(req) = body?;
    let question = require_question(&req.question)?;
    let query = state.service.generate_query(question).await?;
    Ok(Json(GenerateResponse { query }))
}

#[derive(Deserialize)]
pub struct RawRequest {
    pub pipeline: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RowsResponse {
    pub results: Vec<Document>,
    pub total: usize,
    pub truncated: bool,
}

/// Run a caller-written pipeline once, without repair.
pub async fn raw(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RawRequest>, JsonRejection>,
) -> ApiResult<RowsResponse> {
    let Json(req) = body?;
    let query = StructuredQuery::try_from(Value::from(req.pipeline))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    state.service.connect().await?;
    let results = state.service.execute_raw_query(&query).await?;
    let server = &state.config.server;
    let shaped = boundary::shape_results(results, server.truncate_above, server.truncate_to);
    Ok(Json(RowsResponse {
        results: shaped.results,
        total: shaped.total,
        truncated: shaped.truncated,
    }))
}

// =============================================================================
// Collection
// =============================================================================

#[derive(Deserialize, Default)]
pub struct SampleParams {
    pub limit: Option<usize>,
}

pub async fn sample(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SampleParams>,
) -> ApiResult<Vec<Document>> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_SAMPLE_LIMIT)
        .min(MAX_SAMPLE_LIMIT);
    state.service.connect().await?;
    Ok(Json(state.service.get_sample_data(limit).await?))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<CollectionStats> {
    state.service.connect().await?;
    Ok(Json(state.service.get_collection_stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qy_core::Result;
    use qy_engine::reasoning::{ReasoningService, Turn};
    use qy_engine::store::memory::StaticConnector;
    use qy_engine::{DocumentStore, MemoryStore, Summarizer, Translator};
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with canned text in order, then fails.
    struct Canned(Mutex<Vec<Result<String>>>);

    #[async_trait::async_trait]
    impl ReasoningService for Canned {
        async fn generate(&self, _preamble: &str, _turns: &[Turn]) -> Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return Err(Error::Reasoning("no reply".into()));
            }
            replies.remove(0)
        }
    }

    fn state_with(rows: usize, replies: Vec<Result<String>>) -> Arc<AppState> {
        let docs: Vec<Document> = (0..rows)
            .map(|i| {
                let mut d = Document::new();
                d.insert("instructor", format!("Instructor {}", i % 7));
                d.insert("rating", Value::Int((i % 5) as i64 + 1));
                d
            })
            .collect();
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new("reviews", docs));
        let reasoning = Arc::new(Canned(Mutex::new(replies)));
        let service = QueryService::new(
            Arc::new(StaticConnector::new(store)),
            Translator::with_preamble(reasoning.clone(), "preamble".into()),
            Summarizer::new(reasoning),
        );
        Arc::new(AppState {
            service: Arc::new(service),
            config: Config::default(),
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }

    fn ok(text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    #[tokio::test]
    async fn test_ask_truncates_large_results() {
        let state = state_with(250, vec![ok("[]"), ok("Lots of reviews.")]);
        let Json(resp) = ask(
            State(state),
            Ok(Json(AskRequest {
                question: "all reviews".into(),
                max_attempts: None,
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.total, 250);
        assert!(resp.truncated);
        assert_eq!(resp.results.len(), 50);
        assert_eq!(resp.summary.as_deref(), Some("Lots of reviews."));
    }

    #[tokio::test]
    async fn test_ask_without_summary_still_returns_rows() {
        let state = state_with(3, vec![ok("[{\"$limit\": 2}]")]);
        let Json(resp) = ask(
            State(state),
            Ok(Json(AskRequest {
                question: "two reviews".into(),
                max_attempts: Some(1),
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.results.len(), 2);
        assert!(!resp.truncated);
        assert!(resp.summary.is_none());
    }

    #[tokio::test]
    async fn test_quota_failure_maps_to_429() {
        let state = state_with(
            3,
            vec![Err(Error::Reasoning("status 429: You exceeded your current quota".into()))],
        );
        let err = ask(
            State(state),
            Ok(Json(AskRequest {
                question: "anything".into(),
                max_attempts: None,
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.body.kind, "quota");
        assert_eq!(err.body.error, boundary::QUOTA_MESSAGE);
    }

    #[tokio::test]
    async fn test_execution_failure_maps_to_500() {
        let state = state_with(3, vec![ok("[{\"$bogus\": 1}]"), ok("[{\"$bogus\": 2}]")]);
        let err = ask(
            State(state),
            Ok(Json(AskRequest {
                question: "anything".into(),
                max_attempts: Some(2),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.body.kind, "execution");
        assert!(err.body.error.starts_with("Query failed after 2 attempts"));
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let state = state_with(1, vec![]);
        let err = generate(
            State(state),
            Ok(Json(GenerateRequest {
                question: "   ".into(),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_raw_requires_an_array() {
        let state = state_with(5, vec![]);
        let err = raw(
            State(state.clone()),
            Ok(Json(RawRequest {
                pipeline: json!({"$limit": 1}),
            })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(resp) = raw(
            State(state),
            Ok(Json(RawRequest {
                pipeline: json!([{"$count": "n"}]),
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.total, 1);
        assert_eq!(resp.results[0].get("n"), Some(&Value::Int(5)));
    }

    #[tokio::test]
    async fn test_sample_limit_is_capped() {
        let state = state_with(150, vec![]);
        let Json(rows) = sample(State(state.clone()), Query(SampleParams::default()))
            .await
            .unwrap();
        assert_eq!(rows.len(), DEFAULT_SAMPLE_LIMIT);
        let Json(rows) = sample(State(state), Query(SampleParams { limit: Some(500) }))
            .await
            .unwrap();
        assert_eq!(rows.len(), MAX_SAMPLE_LIMIT);
    }

    #[tokio::test]
    async fn test_health() {
        let state = state_with(4, vec![ok("OK")]);
        let Json(shallow) = health(State(state.clone()), Query(HealthParams::default())).await;
        assert_eq!(shallow.status, "ok");
        assert_eq!(shallow.document_count, Some(4));
        assert!(shallow.reasoning_ready.is_none());

        let Json(deep) = health(State(state), Query(HealthParams { deep: true })).await;
        assert_eq!(deep.reasoning_ready, Some(true));
    }
}
