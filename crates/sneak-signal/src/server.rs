//! HTTP and WebSocket server over the rendezvous registry

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info};

use crate::facade::{ApiError, Rendezvous};
use crate::messages::{entries_json, ErrorCode, ErrorResponse, HealthResponse, PublishRequest};
use crate::registry::Registry;

/// Maximum accepted request body
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Upper bound on reading a request body and producing the response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type WsSender = SplitSink<WebSocket, Message>;

/// Signal server state
pub struct SignalServer {
    api: Rendezvous,
}

impl SignalServer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            api: Rendezvous::new(registry),
        }
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    ///
    /// Starts the registry sweeper. On shutdown the sweeper is told to stop,
    /// in-flight requests finish, and open WebSocket sessions are left to end
    /// on their own.
    pub async fn serve_listener<F>(
        &self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Signal server listening on {}", listener.local_addr()?);

        let registry = self.api.registry().clone();
        let _sweeper = supervise_sweeper(registry.clone());

        let stopping = registry.clone();
        let result = axum::serve(listener, router(self.api.clone()))
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Shutting down server...");
                stopping.stop();
            })
            .await;

        registry.stop();
        result
    }
}

/// Spawn the sweeper and report it if it ends while the registry is still live
fn supervise_sweeper(registry: Arc<Registry>) -> JoinHandle<()> {
    let sweeper = registry.spawn_sweeper();
    tokio::spawn(async move {
        match sweeper.await {
            Ok(()) if registry.is_stopped() => debug!("Sweeper exited"),
            Ok(()) => error!("Sweeper exited before shutdown; stale entries will not expire"),
            Err(e) => error!("Sweeper task failed: {}", e),
        }
    })
}

/// Build the API router
pub fn router(api: Rendezvous) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/punch", post(publish_handler))
        .route("/api/lookup/{hash}", get(lookup_handler))
        .route("/api/entries", get(list_handler))
        .route("/api/entries/{id}", delete(remove_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/ws", get(ws_handler))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ))
        .layer(cors)
        .with_state(api)
}

async fn publish_handler(
    State(api): State<Rendezvous>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorCode::PayloadTooLarge,
                "Request too large",
            );
        }
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorCode::BadRequest,
                rejection.body_text(),
            );
        }
    };

    let request: PublishRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return ApiError::BadRequest("Invalid request body".into()).into_response(),
    };

    match api.publish(request) {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn lookup_handler(
    State(api): State<Rendezvous>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    let entry = api.lookup(&hash)?;
    Ok(Json(entry).into_response())
}

async fn list_handler(State(api): State<Rendezvous>) -> Response {
    Json(api.entries()).into_response()
}

async fn remove_handler(
    State(api): State<Rendezvous>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    api.remove(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

async fn stats_handler(State(api): State<Rendezvous>) -> Response {
    Json(api.stats()).into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, ErrorCode::NotFound, "Not found")
}

async fn method_not_allowed() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorCode::MethodNotAllowed,
        "Method not allowed",
    )
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(code, message))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadRequest),
            ApiError::Registry(_) => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
        };
        debug!("API error: {} - {}", status, self);
        error_response(status, code, self.to_string())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(api): State<Rendezvous>) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_websocket(socket, api).await {
            debug!("WebSocket session error: {}", e);
        }
    })
}

/// Push entry lists to one subscriber until it leaves
async fn handle_websocket(socket: WebSocket, api: Rendezvous) -> Result<(), BoxError> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    info!("WebSocket subscriber connected");

    // Subscribe before the first snapshot so no change slips in between
    let mut events = api.registry().subscribe();
    send_entries(&mut ws_sender, &api).await?;

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => ws_sender.send(Message::Text(text)).await?,
                    Some(Ok(Message::Binary(data))) => ws_sender.send(Message::Binary(data)).await?,
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by the protocol layer
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket read error: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => send_entries(&mut ws_sender, &api).await?,
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    debug!("WebSocket subscriber disconnected");
    Ok(())
}

async fn send_entries(sender: &mut WsSender, api: &Rendezvous) -> Result<(), BoxError> {
    let json = entries_json(&api.entries())?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}
