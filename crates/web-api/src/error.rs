use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use robopilot_core::{PilotError, ReasonCode};
use serde::{Deserialize, Serialize};

/// Failure body shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub reason: ReasonCode,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub PilotError);

impl From<PilotError> for ApiError {
    fn from(err: PilotError) -> Self {
        Self(err)
    }
}

impl ApiError {
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self(PilotError::InvalidRequest(message.into()))
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.0.code() {
            ReasonCode::CircuitBreakerTripped
            | ReasonCode::DailyLimitExceeded
            | ReasonCode::PerTradeLimitExceeded
            | ReasonCode::EdgeTooLow
            | ReasonCode::ModeSwitchBlocked
            | ReasonCode::TradingHalted => StatusCode::CONFLICT,
            ReasonCode::InvalidRiskBudget | ReasonCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ReasonCode::BrokerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ReasonCode::BudgetExceeded | ReasonCode::WatchdogFailoverExhausted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            success: false,
            reason: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
