use crate::core::DaemonEvent;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use cast_daemon::CastController;
use cast_proto::protocol::{CastState, Command};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    controller: Arc<CastController>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Serialize)]
struct PresenceStatus {
    text: Option<String>,
}

#[derive(Serialize)]
struct CommandReply {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn router(controller: Arc<CastController>, event_tx: mpsc::Sender<DaemonEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/presence", get(get_presence))
        .route("/api/command", post(post_command))
        .layer(CorsLayer::permissive())
        .with_state(HttpState {
            controller,
            event_tx,
        })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    controller: Arc<CastController>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(controller, event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Json<CastState> {
    Json(state.controller.cast_state().await)
}

async fn get_presence(State(state): State<HttpState>) -> Json<PresenceStatus> {
    Json(PresenceStatus {
        text: state.controller.notifier().last_text(),
    })
}

/// Runs through the same queue as socket commands and answers with this
/// command's own outcome.
async fn post_command(
    State(state): State<HttpState>,
    Json(cmd): Json<Command>,
) -> Result<(StatusCode, Json<CommandReply>), StatusCode> {
    info!("HTTP command: {:?}", cmd);
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .event_tx
        .send(DaemonEvent::ClientCommand {
            cmd,
            reply: Some(reply_tx),
        })
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let outcome = reply_rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(match outcome {
        Ok(volume) => (
            StatusCode::OK,
            Json(CommandReply {
                ok: true,
                volume,
                error: None,
            }),
        ),
        Err(error) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(CommandReply {
                ok: false,
                volume: None,
                error: Some(error),
            }),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_state_and_answers_commands() {
        use cast_daemon::presence::{MemorySink, PresenceNotifier};
        use cast_daemon::publisher::StatePublisher;
        use cast_daemon::supervisor::SupervisorTiming;
        use cast_daemon::engine::IpcEngine;
        use cast_proto::config::{EngineConfig, VolumeConfig};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let controller = Arc::new(CastController::new(
            Arc::new(IpcEngine::new(&EngineConfig::default())),
            Arc::new(StatePublisher::new()),
            Arc::new(PresenceNotifier::new(Arc::new(MemorySink::new()))),
            SupervisorTiming::default(),
            VolumeConfig::default(),
        ));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(controller, event_tx)).await;
        });

        async fn request(addr: std::net::SocketAddr, raw: String) -> String {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream.write_all(raw.as_bytes()).await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        }

        let response = request(
            addr,
            "GET /api/state HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n".to_string(),
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"title\":\"stopped\""));

        // Stand-in core: refuses the seek, reports a volume for the rest
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if let DaemonEvent::ClientCommand { cmd, reply: Some(reply) } = event {
                    let outcome = match cmd {
                        Command::Seek { seconds } => Err(format!("cannot seek to {}", seconds)),
                        _ => Ok(Some(35)),
                    };
                    let _ = reply.send(outcome);
                }
            }
        });

        fn post(body: &str) -> String {
            format!(
                "POST /api/command HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
        }

        let response = request(addr, post(r#"{"cmd":"Seek","seconds":42}"#)).await;
        assert!(response.starts_with("HTTP/1.1 422"));
        assert!(response.contains("\"error\":\"cannot seek to 42\""));

        let response = request(addr, post(r#"{"cmd":"GetVolume"}"#)).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"volume\":35"));
    }
}
