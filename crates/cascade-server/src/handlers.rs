//! HTTP and WebSocket handlers for the Cascade server.
//!
//! This module wires the pipeline together: webhook intake, connection
//! lifecycle, and the broadcast trigger surface.

use crate::config::Config;
use crate::dispatch;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use cascade_core::{
    broadcast_queue, BroadcastMessage, BroadcastQueue, ConnectionId, ConnectionPush,
    ConnectionRegistry, FanoutEngine, Headers, MemoryStore, Verifier,
};
use cascade_transport::WebSocketGateway;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header marking a transport-encoded webhook body.
const TRANSFER_ENCODING_HEADER: &str = "Content-Transfer-Encoding";

/// Header carrying the event classification hint.
const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// Shared server state.
///
/// External clients (store, gateway) are constructed once here and passed
/// explicitly into the components that need them.
pub struct AppState {
    /// Webhook signature verifier.
    pub verifier: Verifier,
    /// Connection registry.
    pub registry: ConnectionRegistry,
    /// Push gateway for live WebSocket connections.
    pub gateway: Arc<WebSocketGateway>,
    /// Broadcast fanout engine.
    pub engine: FanoutEngine,
    /// Queue feeding the broadcast dispatcher.
    pub queue: BroadcastQueue,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, queue: BroadcastQueue) -> Self {
        let store = Arc::new(MemoryStore::with_page_size(config.fanout.scan_page_size));
        let registry = ConnectionRegistry::new(store);
        let gateway = Arc::new(WebSocketGateway::with_config(
            config.transport.gateway_config(),
        ));
        let engine = FanoutEngine::with_config(
            registry.clone(),
            Arc::clone(&gateway) as Arc<dyn ConnectionPush>,
            config.fanout.fanout_config(),
        );

        Self {
            verifier: Verifier::new(config.auth.scheme()),
            registry,
            gateway,
            engine,
            queue,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let (queue, drain) = broadcast_queue();
    let state = Arc::new(AppState::new(config.clone(), queue));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Broadcast-triggered fanout runs independently of request handling.
    tokio::spawn(dispatch::run(drain, state.engine.clone()));

    // Build router
    let app = Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/connect", post(connect_handler))
        .route("/broadcast", post(broadcast_handler))
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Cascade server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Inbound webhook handler.
///
/// Every failure is converted to a structured response here; nothing
/// propagates unhandled.
async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match process_webhook(&state, &headers, body) {
        Ok(response) => response,
        Err(err) => {
            metrics::record_error("webhook");
            error!(error = %err, "Webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "internal error", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

fn process_webhook(state: &AppState, headers: &HeaderMap, body: Bytes) -> Result<Response> {
    let raw_body = decode_body(headers, body)?;
    let request_headers = to_headers(headers);

    let verdict = state.verifier.verify(&raw_body, &request_headers);
    if !verdict.accepted {
        metrics::record_webhook("rejected");
        warn!(reason = %verdict.reason, "Webhook rejected");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "unauthorized", "reason": verdict.reason})),
        )
            .into_response());
    }

    // Republish the raw body so clients receive provider-native payloads.
    let payload =
        String::from_utf8(raw_body.to_vec()).context("webhook body is not valid UTF-8")?;
    let event_type = request_headers
        .get(EVENT_TYPE_HEADER)
        .unwrap_or(cascade_core::queue::DEFAULT_EVENT_TYPE)
        .to_string();

    debug!(event_type = %event_type, reason = %verdict.reason, "Webhook accepted");
    state
        .queue
        .publish(BroadcastMessage::new(payload).with_event_type(event_type));
    metrics::record_webhook("accepted");

    Ok((StatusCode::OK, Json(json!({"status": "ok"}))).into_response())
}

/// Decode a transport-encoded body.
///
/// Signatures are computed over the decoded raw bytes, so this runs before
/// verification.
fn decode_body(headers: &HeaderMap, body: Bytes) -> Result<Bytes> {
    let is_base64 = headers
        .get(TRANSFER_ENCODING_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("base64"));

    if !is_base64 {
        return Ok(body);
    }

    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let decoded = BASE64.decode(compact).context("invalid base64 body")?;
    Ok(Bytes::from(decoded))
}

/// Convert axum headers into the verifier's case-insensitive map.
fn to_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

/// Connection-open notification from an external transport.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    #[serde(default)]
    connection_id: Option<String>,
}

async fn connect_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    let Some(id) = request.connection_id.filter(|id| !id.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": "missing connectionId"})),
        )
            .into_response();
    };

    let id = ConnectionId::new(id);
    match state.registry.register(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"connected": true}))).into_response(),
        Err(err) => {
            metrics::record_error("store");
            error!(connection = %id, error = %err, "Failed to register connection");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "internal error", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// Broadcast trigger carrying a batch of republished payloads.
#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    #[serde(default)]
    messages: Vec<String>,
}

async fn broadcast_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BroadcastRequest>,
) -> Response {
    // Latest-wins: only the most recent payload in the batch is delivered.
    // An empty batch is a successful no-op.
    let Some(payload) = request.messages.last() else {
        return (StatusCode::OK, Json(json!({"delivered": 0}))).into_response();
    };

    match state.engine.fanout(payload).await {
        Ok(report) => {
            metrics::record_broadcast(&report);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(err) => {
            metrics::record_error("store");
            error!(error = %err, "Broadcast trigger failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"message": "internal error", "error": err.to_string()})),
            )
                .into_response()
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    if let Err(err) = state.registry.register(&connection_id).await {
        error!(connection = %connection_id, error = %err, "Failed to register connection");
        return;
    }

    let mut outbound = state.gateway.attach(&connection_id);
    let (mut sender, mut receiver) = socket.split();

    // Acknowledge the connection before any broadcast reaches it.
    let hello = json!({"connected": true, "connectionId": connection_id.as_str()}).to_string();
    if sender.send(Message::Text(hello)).await.is_err() {
        error!(connection = %connection_id, "Failed to send connect ack");
        state.gateway.detach(&connection_id);
        return;
    }

    loop {
        tokio::select! {
            // Payloads pushed by the fanout engine
            payload = outbound.recv() => {
                match payload {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Delivery is one-way; inbound data frames are ignored.
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Detach the outbound channel only. The registry entry stays until a
    // fanout push reports the endpoint gone and reconciliation evicts it.
    state.gateway.detach(&connection_id);
    debug!(connection = %connection_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use cascade_core::BroadcastDrain;

    fn test_config(signing_secret: Option<&str>) -> Config {
        let mut config = Config::default();
        config.auth.endpoint_secret = None;
        config.auth.signing_secret = signing_secret.map(String::from);
        config
    }

    fn test_state(signing_secret: Option<&str>) -> (Arc<AppState>, BroadcastDrain) {
        let (queue, drain) = broadcast_queue();
        let state = Arc::new(AppState::new(test_config(signing_secret), queue));
        (state, drain)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_to_headers_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Event-Type", "refund_event".parse().unwrap());
        let converted = to_headers(&headers);
        assert_eq!(converted.get("x-event-type"), Some("refund_event"));
    }

    #[test]
    fn test_decode_body_passthrough() {
        let headers = HeaderMap::new();
        let body = decode_body(&headers, Bytes::from_static(b"raw")).unwrap();
        assert_eq!(&body[..], b"raw");
    }

    #[test]
    fn test_decode_body_base64() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Transfer-Encoding", "base64".parse().unwrap());
        let body = decode_body(&headers, Bytes::from_static(b"aGVsbG8=")).unwrap();
        assert_eq!(&body[..], b"hello");

        assert!(decode_body(&headers, Bytes::from_static(b"%%%")).is_err());
    }

    #[tokio::test]
    async fn test_webhook_missing_signature_is_unauthorized() {
        let (state, _drain) = test_state(Some("whsec_abc"));
        let response = process_webhook(&state, &HeaderMap::new(), Bytes::from_static(b"{}"))
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["message"], "unauthorized");
        assert_eq!(body["reason"], "missing X-Signature header");
    }

    #[tokio::test]
    async fn test_webhook_accepted_republishes_payload() {
        let (state, mut drain) = test_state(None);
        let mut headers = HeaderMap::new();
        headers.insert("X-Event-Type", "refund_event".parse().unwrap());

        let response =
            process_webhook(&state, &headers, Bytes::from_static(b"{\"id\":1}")).unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let batch = drain.next_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, "{\"id\":1}");
        assert_eq!(batch[0].event_type, "refund_event");
    }

    #[tokio::test]
    async fn test_connect_requires_connection_id() {
        let (state, _drain) = test_state(None);
        let response = connect_handler(
            State(Arc::clone(&state)),
            Json(ConnectRequest {
                connection_id: None,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = connect_handler(
            State(state),
            Json(ConnectRequest {
                connection_id: Some("c1".into()),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["connected"], true);
    }

    #[tokio::test]
    async fn test_broadcast_empty_batch_is_noop() {
        let (state, _drain) = test_state(None);
        let response = broadcast_handler(
            State(state),
            Json(BroadcastRequest {
                messages: Vec::new(),
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["delivered"], 0);
    }

    #[tokio::test]
    async fn test_broadcast_delivers_latest_only() {
        let (state, _drain) = test_state(None);
        let id = ConnectionId::from("c1");
        state.registry.register(&id).await.unwrap();
        let mut rx = state.gateway.attach(&id);

        let response = broadcast_handler(
            State(Arc::clone(&state)),
            Json(BroadcastRequest {
                messages: vec!["a".into(), "b".into(), "c".into()],
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["delivered"], 1);
        assert_eq!(body["staleCleaned"], 0);

        assert_eq!(rx.recv().await.unwrap(), "c");
        assert!(rx.try_recv().is_err());
    }
}
