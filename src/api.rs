//! HTTP surface: health check and the single-item ingestion endpoint.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::classify::Classifier;
use crate::dedup::url_hash;
use crate::ingest::feed::parse_feed_date;
use crate::ingest::types::RawRecord;
use crate::ingest::{normalize_record, parse_http_url};
use crate::model::{Channel, NormalizedArticle, SourceTier};
use crate::pipeline::{IngestAction, Pipeline};

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_SOURCE_CHARS: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub classifier: Arc<dyn Classifier>,
    pub ingest_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    if state.ingest_secret.is_none() {
        tracing::warn!(target: "ingest", "INGEST_SECRET not set, ingestion endpoint is open");
    }
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/news/ingest", post(ingest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Errors surfaced by the ingestion endpoint. Every body carries `ok: false`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Processing(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "ok": false, "error": msg, "stage": "validation" }),
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "ok": false, "error": "unauthorized" }),
            ),
            ApiError::Processing(msg) => {
                tracing::error!(target: "ingest", error = %msg, "ingestion failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "ok": false, "error": msg, "stage": "processing" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub action: IngestAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub reason: &'static str,
}

async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    authorize(state.ingest_secret.as_deref(), &headers)?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))?;
    let article = validate(&value, state.classifier.as_ref())?;

    let outcome = state
        .pipeline
        .ingest_article(article)
        .await
        .map_err(|e| ApiError::Processing(e.to_string()))?;

    Ok(Json(IngestResponse {
        ok: true,
        action: outcome.action,
        article_id: outcome.article_id,
        channel: outcome.channel,
        score: outcome.score,
        message_id: outcome.message_id,
        reason: outcome.dedup.reason.as_str(),
    }))
}

fn authorize(secret: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn optional_str<'a>(body: &'a Value, key: &str) -> Result<Option<&'a str>, ApiError> {
    match body.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ApiError::Validation(format!("`{key}` must be a string"))),
    }
}

fn required_str<'a>(body: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    optional_str(body, key)?.ok_or_else(|| ApiError::Validation(format!("`{key}` is required")))
}

/// Check the request body and build the article. Nothing touches the pipeline
/// until this passes.
pub fn validate(body: &Value, classifier: &dyn Classifier) -> Result<NormalizedArticle, ApiError> {
    if !body.is_object() {
        return Err(ApiError::Validation("body must be a JSON object".into()));
    }

    let title = required_str(body, "title")?.trim();
    let title_len = title.chars().count();
    if title_len == 0 || title_len > MAX_TITLE_CHARS {
        return Err(ApiError::Validation(format!(
            "`title` must be 1-{MAX_TITLE_CHARS} characters"
        )));
    }

    let url = parse_http_url(required_str(body, "url")?.trim())
        .ok_or_else(|| ApiError::Validation("`url` must be an absolute http(s) URL".into()))?;

    let published_raw = required_str(body, "published_at")?;
    if parse_feed_date(published_raw).is_none() {
        return Err(ApiError::Validation(
            "`published_at` must be an RFC 3339, RFC 2822 or YYYY-MM-DD[ HH:MM:SS] date".into(),
        ));
    }

    let source = required_str(body, "source")?.trim();
    let source_len = source.chars().count();
    if source_len == 0 || source_len > MAX_SOURCE_CHARS {
        return Err(ApiError::Validation(format!(
            "`source` must be 1-{MAX_SOURCE_CHARS} characters"
        )));
    }

    let tier = match body.get("tier") {
        None | Some(Value::Null) => SourceTier::default(),
        Some(v) => v
            .as_u64()
            .and_then(|t| u8::try_from(t).ok())
            .and_then(SourceTier::new)
            .ok_or_else(|| ApiError::Validation("`tier` must be an integer 1-5".into()))?,
    };

    let symbols: Vec<String> = match body.get("symbols") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.trim().trim_start_matches('$').to_ascii_uppercase())
                    .ok_or_else(|| ApiError::Validation("`symbols` must all be strings".into()))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(ApiError::Validation("`symbols` must be an array".into())),
    };

    let summary = optional_str(body, "summary")?;
    let external_id = optional_str(body, "external_id")?
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("url:{}", url_hash(&url)));

    let mut article = normalize_record(
        RawRecord {
            source: source.to_string(),
            tier: Some(tier.get()),
            guid: Some(external_id),
            title: Some(title.to_string()),
            link: Some(url),
            description: summary.map(str::to_string),
            pub_date: Some(published_raw.to_string()),
            lang: optional_str(body, "lang")?.map(str::to_string),
            ..RawRecord::default()
        },
        classifier,
    )
    .map_err(|r| ApiError::Validation(r.reason))?;

    // caller-supplied symbols lead; extracted ones follow
    let mut merged: Vec<String> = Vec::new();
    for s in symbols.into_iter().chain(article.symbols.drain(..)) {
        if !s.is_empty() && !merged.contains(&s) {
            merged.push(s);
        }
    }
    article.symbols = merged;
    article.title_translated = optional_str(body, "title_translated")?
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    article.commentary = optional_str(body, "commentary")?
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(article)
}
