//! Control API driven in-process through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use robopilot_core::{AppConfig, MarketSnapshot};
use robopilot_execution::{PaperBroker, ScriptedFeed};
use robopilot_orchestrator::{Collaborators, InMemoryLeaseStore, NoopPeerNotifier, PilotRuntime};
use robopilot_web_api::ApiServer;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    runtime: PilotRuntime,
    broker: Arc<PaperBroker>,
}

impl TestApp {
    fn new() -> Self {
        let mut config = AppConfig::default();
        config.trading.respect_market_hours = false;

        let broker = Arc::new(PaperBroker::new(0));
        let collaborators = Collaborators {
            broker: broker.clone(),
            market: Arc::new(ScriptedFeed::new(vec![MarketSnapshot::calm(Utc::now())])),
            lease: Arc::new(InMemoryLeaseStore::new()),
            notifier: Arc::new(NoopPeerNotifier),
        };
        let runtime = PilotRuntime::build(&config, collaborators, None, true);
        Self { runtime, broker }
    }

    fn router(&self) -> axum::Router {
        ApiServer::new(Arc::new(self.runtime.control.clone())).router()
    }

    /// Runs one tick and waits for its orders to fill.
    async fn trade_once(&self) {
        let handle = self.runtime.supervisor.start();
        handle.tick().await.unwrap();
        self.runtime.deps.wait_for_submissions().await;
        handle.shutdown().await.unwrap();
    }

    async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.router().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ==================== Reporting Tests ====================

#[tokio::test]
async fn test_stats_reports_dashboard_fields() {
    let app = TestApp::new();
    let (status, json) = app.call(get("/api/stats")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["mode"], "income");
    assert_eq!(json["systemStatus"], "green");
    assert_eq!(json["isPaused"], false);
    assert_eq!(json["riskUsed"], 0.0);
    assert!(json["positions"].as_array().unwrap().is_empty());
    assert!(json["lastUpdate"].is_string());
}

#[tokio::test]
async fn test_health_is_independent_of_trading_state() {
    let app = TestApp::new();
    app.call(post("/api/exit_all")).await;

    let (status, json) = app.call(get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["alive"], true);
    assert_eq!(json["loopState"], "halted");
}

// ==================== Command Tests ====================

#[tokio::test]
async fn test_pause_is_idempotent() {
    let app = TestApp::new();

    let (status, first) = app.call(post("/api/pause")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["state"]["changed"], true);

    let (status, second) = app.call(post("/api/pause")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["state"]["state"], "paused");
    assert_eq!(second["state"]["changed"], false);

    let (_, stats) = app.call(get("/api/stats")).await;
    assert_eq!(stats["isPaused"], true);
    assert_eq!(stats["systemStatus"], "red");
}

#[tokio::test]
async fn test_toggle_mode_blocked_with_open_income_position() {
    let app = TestApp::new();
    app.trade_once().await;

    let (status, json) = app.call(post("/api/toggle_mode?mode=turbo")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(json["reason"], "ModeSwitchBlocked");

    let (_, stats) = app.call(get("/api/stats")).await;
    assert_eq!(stats["mode"], "income");
}

#[tokio::test]
async fn test_toggle_mode_switches_when_flat() {
    let app = TestApp::new();

    let (status, json) = app.call(post("/api/toggle_mode?mode=turbo")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["result"], "switched");

    let (_, stats) = app.call(get("/api/stats")).await;
    assert_eq!(stats["mode"], "turbo");
}

#[tokio::test]
async fn test_toggle_mode_rejects_unknown_mode() {
    let app = TestApp::new();

    let (status, json) = app.call(post("/api/toggle_mode?mode=yolo")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["reason"], "InvalidRequest");

    let (status, json) = app.call(post("/api/toggle_mode")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["reason"], "InvalidRequest");
}

#[tokio::test]
async fn test_update_risk_validates_limits() {
    let app = TestApp::new();

    let body = serde_json::json!({ "daily_limit": 0.01, "per_trade_limit": 0.05 });
    let (status, json) = app.call(post_json("/api/update_risk", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["reason"], "InvalidRiskBudget");

    let body = serde_json::json!({ "daily_limit": 0.04, "per_trade_limit": 0.02 });
    let (status, json) = app.call(post_json("/api/update_risk", &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["daily_limit_fraction"], 0.04);

    let (_, stats) = app.call(get("/api/stats")).await;
    assert_eq!(stats["dailyLimit"], 0.04);
}

#[tokio::test]
async fn test_update_risk_rejects_malformed_body() {
    let app = TestApp::new();
    let body = serde_json::json!({ "daily_limit": "lots" });

    let (status, json) = app.call(post_json("/api/update_risk", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["reason"], "InvalidRequest");
}

// ==================== Emergency Exit Tests ====================

#[tokio::test]
async fn test_exit_all_closes_positions_and_halts() {
    let app = TestApp::new();
    app.trade_once().await;
    assert_eq!(app.broker.open_count(), 1);

    let (status, json) = app.call(post("/api/exit_all")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["closed"], 1);
    assert_eq!(json["state"]["state"], "halted");
    assert_eq!(app.broker.open_count(), 0);

    // idempotent once halted
    let (status, json) = app.call(post("/api/exit_all")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"]["closed"], 0);

    let (status, json) = app.call(post("/api/resume")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["reason"], "TradingHalted");
}

#[tokio::test]
async fn test_exit_all_reports_broker_failure() {
    let app = TestApp::new();
    app.trade_once().await;
    app.broker.fail_next_closes(100);

    let (status, json) = app.call(post("/api/exit_all")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["reason"], "BrokerUnavailable");
    assert!(json["message"].as_str().unwrap().contains("SPY"));
}

// ==================== Failover Tests ====================

#[tokio::test]
async fn test_takeover_request_accepted() {
    let app = TestApp::new();
    let body = serde_json::json!({ "from": "cloud" });

    let (status, json) = app.call(post_json("/api/takeover", &body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["success"], true);
}
