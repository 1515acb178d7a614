use crate::error::ErrorBody;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use robopilot_core::ReasonCode;
use robopilot_orchestrator::{ControlCommand, ControlSurface};
use std::sync::Arc;
use tokio::time::{interval, Duration};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(control): State<Arc<ControlSurface>>,
) -> Response {
    ws.on_upgrade(|socket| websocket_connection(socket, control))
}

/// Pushes stats every second and runs commands sent as JSON text frames.
async fn websocket_connection(mut socket: WebSocket, control: Arc<ControlSurface>) {
    let mut tick = interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let json = serde_json::to_string(&control.stats()).unwrap_or_default();
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = run_command(&control, &text).await;
                        if socket.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed");
}

async fn run_command(control: &ControlSurface, text: &str) -> String {
    let result = match serde_json::from_str::<ControlCommand>(text) {
        Ok(command) => control
            .execute(command)
            .await
            .map_err(|e| ErrorBody {
                success: false,
                reason: e.code(),
                message: e.to_string(),
            }),
        Err(e) => Err(ErrorBody {
            success: false,
            reason: ReasonCode::InvalidRequest,
            message: format!("unrecognised command: {e}"),
        }),
    };

    match result {
        Ok(ack) => serde_json::json!({ "success": true, "state": ack }).to_string(),
        Err(body) => serde_json::to_string(&body).unwrap_or_default(),
    }
}
