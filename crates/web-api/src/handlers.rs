use crate::error::ApiError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use robopilot_core::{Host, RiskBudget, TradingMode};
use robopilot_orchestrator::{ControlSurface, ExitReport, HealthReport, StatsReport, Transition};
use robopilot_strategy::ModeTransition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Success body for commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse<T> {
    pub success: bool,
    pub message: String,
    pub state: T,
}

impl<T> StatusResponse<T> {
    fn ok(message: impl Into<String>, state: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            state,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleModeParams {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRiskRequest {
    pub daily_limit: f64,
    pub per_trade_limit: f64,
}

#[derive(Debug, Deserialize)]
pub struct TakeoverRequest {
    pub from: Host,
}

pub async fn get_stats(State(control): State<Arc<ControlSurface>>) -> Json<StatsReport> {
    Json(control.stats())
}

/// Liveness only; answers even when trading is halted.
pub async fn health(State(control): State<Arc<ControlSurface>>) -> Json<HealthReport> {
    Json(control.health())
}

/// # Errors
/// Returns `409` with `TradingHalted` once the loop is halted.
pub async fn pause(
    State(control): State<Arc<ControlSurface>>,
) -> Result<Json<StatusResponse<Transition>>, ApiError> {
    let transition = control.pause()?;
    let message = if transition.changed { "Trading paused" } else { "Trading already paused" };
    Ok(StatusResponse::ok(message, transition))
}

/// # Errors
/// Returns `409` with `TradingHalted` once the loop is halted.
pub async fn resume(
    State(control): State<Arc<ControlSurface>>,
) -> Result<Json<StatusResponse<Transition>>, ApiError> {
    let transition = control.resume()?;
    let message = if transition.changed { "Trading resumed" } else { "Trading already running" };
    Ok(StatusResponse::ok(message, transition))
}

/// # Errors
/// Returns `503` with `BrokerUnavailable` if any position could not be closed.
pub async fn exit_all(
    State(control): State<Arc<ControlSurface>>,
) -> Result<Json<StatusResponse<ExitReport>>, ApiError> {
    let report = control.exit_all().await?;
    let message = format!("Emergency exit completed. Closed {} positions", report.closed);
    Ok(StatusResponse::ok(message, report))
}

/// # Errors
/// Returns `400` for an unknown mode, `409` with `ModeSwitchBlocked` while
/// positions from the current mode are open.
pub async fn toggle_mode(
    State(control): State<Arc<ControlSurface>>,
    params: Result<Query<ToggleModeParams>, QueryRejection>,
) -> Result<Json<StatusResponse<ModeTransition>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let mode: TradingMode = params.mode.parse()?;

    let transition = control.switch_mode(mode)?;
    Ok(StatusResponse::ok(format!("Switched to {mode} mode"), transition))
}

/// # Errors
/// Returns `400` with `InvalidRiskBudget` for inconsistent limits.
pub async fn update_risk(
    State(control): State<Arc<ControlSurface>>,
    payload: Result<Json<UpdateRiskRequest>, JsonRejection>,
) -> Result<Json<StatusResponse<RiskBudget>>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    let budget = control.update_risk(req.daily_limit, req.per_trade_limit)?;
    Ok(StatusResponse::ok("Risk settings updated", budget))
}

/// Called by the peer host when it hands trading over to us.
///
/// # Errors
/// Returns `400` for a malformed body.
pub async fn takeover(
    State(control): State<Arc<ControlSurface>>,
    payload: Result<Json<TakeoverRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StatusResponse<HealthReport>>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::invalid_request(e.body_text()))?;
    control.request_takeover(req.from);
    Ok((
        StatusCode::ACCEPTED,
        StatusResponse::ok("Takeover scheduled", control.health()),
    ))
}
