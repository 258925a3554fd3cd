//! Integration tests for the analysis service.
//! These tests drive the HTTP router end to end against an in-memory store.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_chartlab::api::{router, session_token, AppState};
use rust_chartlab::config::AppConfig;
use rust_chartlab::data::SqliteStore;
use rust_chartlab::llm::{ChartOracle, DemoOracle};
use rust_chartlab::models::{CandidatePlan, Horizon};
use rust_chartlab::{AnalysisService, OracleError, TradePlanGate};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

const USER: &str = "user-u";

struct CountingOracle {
    calls: AtomicUsize,
    plan: CandidatePlan,
}

impl CountingOracle {
    fn with_confidence(confidence: f64) -> Arc<Self> {
        let mut plan = DemoOracle::plan();
        plan.confidence = confidence;
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            plan,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChartOracle for CountingOracle {
    fn name(&self) -> &str {
        "counting"
    }

    async fn analyze(&self, _image_ref: &str, _horizon: Horizon) -> Result<CandidatePlan, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.plan.clone())
    }
}

struct UnreachableOracle;

#[async_trait]
impl ChartOracle for UnreachableOracle {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn analyze(&self, _image_ref: &str, _horizon: Horizon) -> Result<CandidatePlan, OracleError> {
        Err(OracleError::Unavailable("connection refused".to_string()))
    }
}

struct Harness {
    app: axum::Router,
    store: Arc<SqliteStore>,
    token: String,
}

fn harness(oracle: Arc<dyn ChartOracle>) -> Harness {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store.upsert_user(USER, Some("u@example.com")).unwrap();
    let token = store.create_session(USER, chrono::Duration::hours(1)).unwrap();

    let mut config = AppConfig::default();
    config.llm.demo = true;

    let state = Arc::new(AppState {
        analysis: AnalysisService::new(oracle, store.clone(), TradePlanGate::default()),
        sessions: store.clone(),
        config,
    });

    Harness {
        app: router(state),
        store,
        token,
    }
}

fn analyze_request(token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

const VALID_BODY: &str = r#"{"imageUrl": "https://x/c.png", "horizon": "long-term"}"#;

/// Scenario A: accepted plan is returned verbatim and persisted once.
#[tokio::test]
async fn test_accepted_analysis_round_trip() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let (status, body) = send(&h.app, analyze_request(Some(&h.token), VALID_BODY)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "direction": "long",
            "entry": [100.0, 105.0],
            "stop": 95.0,
            "takeProfits": [112.0, 118.0],
            "rr": 2.1,
            "confidence": 0.84,
            "reasoning": ["demo output"],
            "timeframe": "1h"
        })
    );
    assert_eq!(oracle.calls(), 1);
    assert_eq!(h.store.job_count(USER).unwrap(), 1);
    assert_eq!(h.store.plan_count(USER).unwrap(), 1);

    let history = Request::builder()
        .uri("/history")
        .header("authorization", format!("Bearer {}", h.token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, history).await;

    assert_eq!(status, StatusCode::OK);
    let entry = &body["data"][0];
    assert_eq!(entry["userId"], USER);
    assert_eq!(entry["status"], "done");
    assert_eq!(entry["params"]["horizon"], "long-term");
    assert_eq!(entry["plan"]["entryLow"], 100.0);
    assert_eq!(entry["plan"]["entryHigh"], 105.0);
    assert_eq!(entry["plan"]["stop"], 95.0);
    assert_eq!(entry["plan"]["takeProfits"], json!([112.0, 118.0]));
}

/// Scenario B: low confidence is explained and nothing is stored.
#[tokio::test]
async fn test_low_confidence_rejected() {
    let oracle = CountingOracle::with_confidence(0.62);
    let h = harness(oracle.clone());

    let (status, body) = send(&h.app, analyze_request(Some(&h.token), VALID_BODY)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let reason = body["reason"].as_str().unwrap();
    assert!(reason.contains("0.62"));
    assert!(reason.contains("0.8"));
    assert_eq!(body["threshold"], 0.8);
    assert_eq!(h.store.job_count(USER).unwrap(), 0);
    assert_eq!(h.store.plan_count(USER).unwrap(), 0);
}

/// Scenario C: anonymous callers never reach the oracle.
#[tokio::test]
async fn test_unauthenticated_request() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let (status, body) = send(&h.app, analyze_request(None, VALID_BODY)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
    assert_eq!(oracle.calls(), 0);
    assert_eq!(h.store.job_count(USER).unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let (status, _) = send(&h.app, analyze_request(Some("forged"), VALID_BODY)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(oracle.calls(), 0);
}

/// Scenario D: both field errors are reported.
#[tokio::test]
async fn test_invalid_body_reports_fields() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let (status, body) = send(&h.app, analyze_request(Some(&h.token), r#"{"horizon": "daily"}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["imageUrl"].is_array());
    assert!(body["error"]["horizon"].is_array());
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let (status, body) = send(&h.app, analyze_request(Some(&h.token), "{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["body"].is_array());
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn test_oracle_outage_is_generic_500() {
    let h = harness(Arc::new(UnreachableOracle));

    let (status, body) = send(&h.app, analyze_request(Some(&h.token), VALID_BODY)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to analyze chart." }));
    assert_eq!(h.store.job_count(USER).unwrap(), 0);
}

#[tokio::test]
async fn test_session_cookie_authenticates() {
    let oracle = CountingOracle::with_confidence(0.9);
    let h = harness(oracle.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("cookie", format!("theme=dark; next-auth.session-token={}", h.token))
        .body(Body::from(VALID_BODY))
        .unwrap();
    let (status, _) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_each_persist() {
    let oracle = CountingOracle::with_confidence(0.84);
    let h = harness(oracle.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = h.app.clone();
        let request = analyze_request(Some(&h.token), VALID_BODY);
        handles.push(tokio::spawn(async move { send(&app, request).await.0 }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(oracle.calls(), 8);
    assert_eq!(h.store.job_count(USER).unwrap(), 8);
    assert_eq!(h.store.plan_count(USER).unwrap(), 8);
}

#[tokio::test]
async fn test_history_requires_auth_and_respects_limit() {
    let h = harness(CountingOracle::with_confidence(0.84));
    for _ in 0..3 {
        let (status, _) = send(&h.app, analyze_request(Some(&h.token), VALID_BODY)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let anonymous = Request::builder().uri("/history").body(Body::empty()).unwrap();
    let (status, _) = send(&h.app, anonymous).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let limited = Request::builder()
        .uri("/history?limit=2")
        .header("authorization", format!("Bearer {}", h.token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, limited).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_history_bad_limit_is_json_error() {
    let h = harness(CountingOracle::with_confidence(0.84));

    let request = Request::builder()
        .uri("/history?limit=abc")
        .header("authorization", format!("Bearer {}", h.token))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": { "limit": ["Expected a positive integer"] } }));

    let anonymous = Request::builder().uri("/history?limit=abc").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, anonymous).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn test_health() {
    let h = harness(Arc::new(DemoOracle));

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[test]
fn test_session_token_prefers_bearer() {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert("authorization", "Bearer abc".parse().unwrap());
    headers.insert("cookie", "next-auth.session-token=xyz".parse().unwrap());

    assert_eq!(session_token(&headers, "next-auth.session-token"), Some("abc"));

    headers.remove("authorization");
    assert_eq!(session_token(&headers, "next-auth.session-token"), Some("xyz"));
    assert_eq!(session_token(&headers, "other-cookie"), None);
}
