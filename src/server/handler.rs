// Axum control server — exposes the dial-up operations and UI events to a local front end.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::api::dialup_api::{ConnectOptions, DialupApi, OpResult};
use crate::emulation::cdp::CdpView;
use crate::engine::session::ConnectionStatus;

pub struct ControlServer {
    port: u16,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ControlServer {
    /// Start the control server on a random loopback port, returning a handle.
    pub async fn start(api: DialupApi) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let app = router(api);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("control server stopped: {}", e);
            }
        });
        info!("control server listening on 127.0.0.1:{}", port);

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn events_url(&self) -> String {
        format!("ws://127.0.0.1:{}/events", self.port)
    }

    /// Shutdown the server gracefully.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(api: DialupApi) -> Router {
    Router::new()
        .route("/connect/start", post(connect_start))
        .route("/connect/complete", post(connect_complete))
        .route("/disconnect", post(disconnect))
        .route("/dialog/status", post(show_connection_status))
        .route("/dialog/hide", post(hide_dialup_window))
        .route("/dialog/close", post(dialog_close))
        .route("/view/attached", post(view_attached))
        .route("/browser/closed", post(browser_closed))
        .route("/connection/elapsed", get(elapsed))
        .route("/connection/state", get(connection_state))
        .route("/events", get(events))
        .with_state(api)
}

fn op_response(result: OpResult) -> Response {
    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(result)).into_response()
}

/// POST /connect/start — body is `ConnectOptions`.
async fn connect_start(State(api): State<DialupApi>, Json(options): Json<ConnectOptions>) -> Response {
    debug!("connect start request profile={}", options.modem_profile_key);
    op_response(api.connect_start(options))
}

async fn connect_complete(State(api): State<DialupApi>) -> Response {
    op_response(api.connect_complete())
}

async fn disconnect(State(api): State<DialupApi>) -> Response {
    op_response(api.disconnect().await)
}

async fn show_connection_status(State(api): State<DialupApi>) -> Response {
    op_response(api.show_connection_status())
}

async fn hide_dialup_window(State(api): State<DialupApi>) -> Response {
    op_response(api.hide_dialup_window())
}

/// POST /dialog/close — `{"decision": "hide" | "close"}`.
async fn dialog_close(State(api): State<DialupApi>) -> Response {
    Json(json!({ "decision": api.dialog_close_requested() })).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewAttachedRequest {
    /// DevTools HTTP endpoint of the browser hosting the content view.
    devtools_url: String,
}

/// POST /view/attached — throttle the first debuggable page behind `devtoolsUrl`.
async fn view_attached(
    State(api): State<DialupApi>,
    Json(req): Json<ViewAttachedRequest>,
) -> Response {
    if api.connection_state().status != ConnectionStatus::Connected {
        debug!("view attached while not connected, ignoring {}", req.devtools_url);
        return op_response(OpResult::FAILED);
    }
    let view = match CdpView::first_page(&req.devtools_url).await {
        Ok(view) => Arc::new(view),
        Err(e) => {
            warn!("no debuggable page behind {}: {:#}", req.devtools_url, e);
            return (StatusCode::BAD_GATEWAY, Json(OpResult::FAILED)).into_response();
        }
    };
    match api.content_view_attached(view).await {
        Some(outcome) => Json(json!({ "success": true, "outcome": outcome })).into_response(),
        None => op_response(OpResult::FAILED),
    }
}

async fn browser_closed(State(api): State<DialupApi>) -> Response {
    api.browser_window_closed().await;
    op_response(OpResult::OK)
}

async fn elapsed(State(api): State<DialupApi>) -> Response {
    Json(json!({ "seconds": api.get_connection_elapsed_seconds() })).into_response()
}

async fn connection_state(State(api): State<DialupApi>) -> Response {
    Json(api.connection_state()).into_response()
}

/// GET /events — WebSocket stream of UI events as JSON text frames.
async fn events(State(api): State<DialupApi>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| forward_events(api, socket))
}

async fn forward_events(api: DialupApi, mut socket: WebSocket) {
    let mut rx = api.subscribe();
    debug!("ui event subscriber connected");
    loop {
        tokio::select! {
            ev = rx.recv() => {
                let ev = match ev {
                    Ok(ev) => ev,
                    Err(RecvError::Lagged(n)) => {
                        warn!("ui event subscriber lagged, {} events skipped", n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let text = match serde_json::to_string(&ev) {
                    Ok(t) => t,
                    Err(e) => {
                        error!("serialize ui event: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("ui event subscriber disconnected");
}
