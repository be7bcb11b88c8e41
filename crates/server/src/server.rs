//! The relay server: bridges the controller's request/response model to the
//! tab's push model. Owns the connection registry, the request ledger, and
//! the notification queue; exposes the tab-facing WebSocket and the
//! controller-facing HTTP API.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tabrelay_core::{
    HealthPayload, Notification, Result, ResultPayload, ServerConfig, ServerMessage, TabMessage,
    TemplateResolver,
};

use crate::ledger::{CompletedResult, Ledger, Lookup};
use crate::registry::{Connection, Registry};

/// Everything the relay mutates, behind one lock. The lock is never held
/// across an await; suspension happens only at network I/O and the long-poll
/// wait-handle.
#[derive(Default)]
struct RelayState {
    registry: Registry,
    ledger: Ledger,
    notifications: VecDeque<Notification>,
}

/// Outcome of awaiting a result. Everything except a malformed submission is
/// encoded as data; the controller client decides what becomes an error.
#[derive(Debug, Clone)]
pub enum AwaitOutcome {
    Completed(CompletedResult),
    /// Still pending after the remaining budget elapsed. Normal, not an error.
    Pending,
    /// Pending with zero connections: reported immediately, never after a
    /// full timeout.
    NoBrowser,
    /// Never submitted, or already reaped.
    Unknown,
}

pub struct RelayServer {
    state: Mutex<RelayState>,
    reap_after: Duration,
    templates: Arc<dyn TemplateResolver>,
}

impl RelayServer {
    pub fn new(config: &ServerConfig, templates: Arc<dyn TemplateResolver>) -> Self {
        Self {
            state: Mutex::new(RelayState::default()),
            reap_after: Duration::from_secs(config.reap_after_secs),
            templates,
        }
    }

    /// Records a pending request and pushes it to the routed tab. With no
    /// target the request is still recorded, without error: a tab connecting
    /// later receives it via replay.
    pub async fn submit(&self, code: String) -> String {
        let mut st = self.state.lock().await;
        st.ledger.reap(self.reap_after);
        let id = Uuid::new_v4().to_string();
        st.ledger.insert(&id, &code);
        match st.registry.select_target() {
            Some((conn_id, tx)) => {
                let msg = ServerMessage::Execute {
                    request_id: id.clone(),
                    code,
                };
                if tx.send(msg).is_err() {
                    warn!(connection = %conn_id, "Push channel closed; dropping connection");
                    st.registry.unregister(conn_id);
                }
            }
            None => debug!(request = %id, "No tab connected; request queued for replay"),
        }
        id
    }

    /// Waits for a completed outcome. The budget counts from the request's
    /// submission, not from this call; a poll arriving late waits only the
    /// remainder.
    pub async fn await_result(&self, id: &str, timeout: Duration) -> AwaitOutcome {
        let st = self.state.lock().await;
        let (notify, remaining) = match st.ledger.lookup(id) {
            Lookup::Completed(res) => return AwaitOutcome::Completed(res),
            Lookup::Unknown => return AwaitOutcome::Unknown,
            Lookup::Pending { notify, age } => {
                if st.registry.is_empty() {
                    return AwaitOutcome::NoBrowser;
                }
                let remaining = timeout.saturating_sub(age);
                if remaining.is_zero() {
                    return AwaitOutcome::Pending;
                }
                (notify, remaining)
            }
        };

        // Arm the wait-handle before releasing the lock so a completion
        // landing in between cannot be missed.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(st);
        let _ = tokio::time::timeout(remaining, notified).await;

        let st = self.state.lock().await;
        match st.ledger.lookup(id) {
            Lookup::Completed(res) => AwaitOutcome::Completed(res),
            Lookup::Unknown => AwaitOutcome::Unknown,
            Lookup::Pending { .. } => {
                if st.registry.is_empty() {
                    AwaitOutcome::NoBrowser
                } else {
                    AwaitOutcome::Pending
                }
            }
        }
    }

    /// The one path where the server originates a payload: resolves the
    /// reinit template against the supplied config and dispatches it like any
    /// submitted request.
    pub async fn reinit(&self, config: &Value) -> Result<String> {
        let mut subs = HashMap::new();
        subs.insert("config".to_string(), config.to_string());
        if let Some(obj) = config.as_object() {
            for (key, value) in obj {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                subs.insert(key.clone(), rendered);
            }
        }
        let code = self.templates.resolve("reinit", &subs)?;
        Ok(self.submit(code).await)
    }

    pub async fn health(&self) -> HealthPayload {
        let mut st = self.state.lock().await;
        st.ledger.reap(self.reap_after);
        HealthPayload {
            ok: true,
            timestamp: chrono::Utc::now().timestamp_millis(),
            connected_browsers: st.registry.len(),
            pending: st.ledger.pending_len(),
            completed: st.ledger.completed_len(),
            browsers: st.registry.infos(),
        }
    }

    /// Drains the notification queue: at-most-once delivery.
    pub async fn drain_notifications(&self) -> Vec<Notification> {
        let mut st = self.state.lock().await;
        st.notifications.drain(..).collect()
    }

    async fn handle_tab_message(
        &self,
        conn_id: Uuid,
        tx: &mpsc::UnboundedSender<ServerMessage>,
        text: &str,
    ) {
        let msg: TabMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(connection = %conn_id, error = %e, "Dropping unparseable tab message");
                return;
            }
        };
        match msg {
            // liveness only; never counts as routing traffic
            TabMessage::Ping => {
                let _ = tx.send(ServerMessage::Pong);
            }
            TabMessage::Result {
                request_id,
                ok,
                result,
                error,
                url,
                title,
            } => {
                let mut st = self.state.lock().await;
                st.registry.touch(conn_id);
                let applied = st.ledger.complete(
                    &request_id,
                    CompletedResult {
                        ok,
                        result,
                        error,
                        url,
                        title,
                        completed_at: Instant::now(),
                    },
                );
                if applied {
                    debug!(request = %request_id, ok, "Result recorded");
                } else {
                    debug!(request = %request_id, "Result for unknown or resolved request; dropped");
                }
            }
            TabMessage::BrowserInfo(info) => {
                let mut st = self.state.lock().await;
                st.registry.touch(conn_id);
                st.registry.update_info(conn_id, info);
            }
            TabMessage::RefocusNotification { success, message } => {
                let mut st = self.state.lock().await;
                st.registry.touch(conn_id);
                st.notifications.push_back(Notification {
                    success,
                    message,
                    timestamp_ms: chrono::Utc::now().timestamp_millis(),
                });
            }
            TabMessage::ReinitControl { config } => {
                {
                    let mut st = self.state.lock().await;
                    st.registry.touch(conn_id);
                }
                match self.reinit(&config).await {
                    Ok(id) => info!(request = %id, "Reinit payload dispatched at tab's request"),
                    Err(e) => warn!(error = %e, "Reinit synthesis failed"),
                }
            }
        }
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/run", post(handle_run))
            .route("/result", get(handle_result))
            .route("/notifications", get(handle_notifications))
            .route("/health", get(handle_health))
            .route("/reinit-control", post(handle_reinit))
            .route("/ws", get(handle_ws_upgrade))
            .layer(CorsLayer::permissive().allow_credentials(false))
            .with_state(Arc::clone(self))
    }

    /// Binds and serves until ctrl-c.
    pub async fn serve(self: Arc<Self>, host: &str, port: u16) -> Result<()> {
        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        info!(addr = %bind_addr, "Relay listening");
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tab-facing WebSocket channel
// ---------------------------------------------------------------------------

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    State(server): State<Arc<RelayServer>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_tab_socket(socket, server))
}

async fn handle_tab_socket(socket: WebSocket, server: Arc<RelayServer>) {
    let conn_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer task owns the sink. The per-connection queue is deliberately
    // unbounded; age-based reaping is the only backpressure valve.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "Failed to encode push message");
                    continue;
                }
            };
            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Register, then replay everything still pending: navigation silently
    // kills the old channel mid-request, and the new execution context must
    // be re-told what is outstanding.
    {
        let mut st = server.state.lock().await;
        st.registry.register(Connection {
            id: conn_id,
            tx: tx.clone(),
            info: None,
        });
        let outstanding = st.ledger.pending_payloads();
        let replayed = outstanding.len();
        for (request_id, code) in outstanding {
            let _ = tx.send(ServerMessage::Execute { request_id, code });
        }
        info!(connection = %conn_id, replayed, "Tab connected");
    }

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                warn!(connection = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        };
        match msg {
            WsMessage::Text(text) => server.handle_tab_message(conn_id, &tx, &text).await,
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    {
        let mut st = server.state.lock().await;
        st.registry.unregister(conn_id);
    }
    send_task.abort();
    info!(connection = %conn_id, "Tab disconnected");
}

// ---------------------------------------------------------------------------
// Controller-facing HTTP surface
// ---------------------------------------------------------------------------

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "error": error})),
    )
        .into_response()
}

async fn handle_run(
    State(server): State<Arc<RelayServer>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(v)) => v,
        Err(rejection) => return bad_request(format!("malformed body: {}", rejection)),
    };
    let code = match body.get("code").and_then(|c| c.as_str()) {
        Some(c) if !c.trim().is_empty() => c.to_string(),
        _ => return bad_request("code is required".to_string()),
    };
    let id = server.submit(code).await;
    Json(json!({"ok": true, "request_id": id})).into_response()
}

#[derive(Deserialize)]
struct ResultParams {
    request_id: Option<String>,
    timeout_ms: Option<u64>,
}

async fn handle_result(
    State(server): State<Arc<RelayServer>>,
    Query(params): Query<ResultParams>,
) -> Response {
    let Some(request_id) = params.request_id else {
        return bad_request("request_id is required".to_string());
    };
    let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(0));
    match server.await_result(&request_id, timeout).await {
        AwaitOutcome::Completed(res) => Json(ResultPayload {
            ok: res.ok,
            status: None,
            result: res.result,
            error: res.error,
            url: res.url,
            title: res.title,
        })
        .into_response(),
        AwaitOutcome::Pending => Json(ResultPayload {
            ok: false,
            status: Some("pending".to_string()),
            result: None,
            error: None,
            url: None,
            title: None,
        })
        .into_response(),
        AwaitOutcome::NoBrowser => Json(ResultPayload {
            ok: false,
            status: Some("no_browser".to_string()),
            result: None,
            error: Some("no browser connected; open a tab with the agent loaded".to_string()),
            url: None,
            title: None,
        })
        .into_response(),
        AwaitOutcome::Unknown => (
            StatusCode::NOT_FOUND,
            Json(json!({"ok": false, "error": "unknown request_id"})),
        )
            .into_response(),
    }
}

async fn handle_notifications(State(server): State<Arc<RelayServer>>) -> impl IntoResponse {
    let notifications = server.drain_notifications().await;
    Json(json!({"ok": true, "notifications": notifications}))
}

async fn handle_health(State(server): State<Arc<RelayServer>>) -> impl IntoResponse {
    Json(server.health().await)
}

async fn handle_reinit(
    State(server): State<Arc<RelayServer>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(v)) => v,
        Err(rejection) => return bad_request(format!("malformed body: {}", rejection)),
    };
    let config = body.get("config").cloned().unwrap_or(Value::Null);
    match server.reinit(&config).await {
        Ok(id) => Json(json!({"ok": true, "request_id": id})).into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}
