use crate::config::ListenerSettings;
use crate::errors::{Error, Result};
use crate::render::{self, Console};
use crate::types::{Delivery, DeliveryHeaders, Payload};
use crate::verification;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct ServerState {
    settings: Arc<ListenerSettings>,
    console: Console,
}

/// Router for the webhook listener. Every path behaves like `/`.
pub fn router(settings: ListenerSettings, console: Console) -> Router {
    let state = ServerState {
        settings: Arc::new(settings),
        console,
    };

    Router::new()
        .route("/", any(handle_delivery))
        .fallback(handle_delivery)
        .with_state(state)
}

/// Bind on all interfaces at the configured port.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Bind { port, source })
}

/// Print the banner and serve deliveries until `shutdown` fires, then drain
/// in-flight requests.
pub async fn serve(
    listener: TcpListener,
    settings: ListenerSettings,
    console: Console,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = listener.local_addr().map_err(Error::Serve)?.port();
    console.emit(&render::listener_banner(
        port,
        &settings.pattern,
        settings.verification_enabled(),
    ));
    tracing::info!(port, pattern = %settings.pattern, "webhook listener started");

    let app = router(settings, console);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(Error::Serve)?;

    tracing::info!("webhook listener stopped");
    Ok(())
}

async fn handle_delivery(
    State(state): State<ServerState>,
    method: Method,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
    }

    let body = match body {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read webhook body");
            state.console.emit(&format!("❌ Error reading body: {e}\n"));
            return (StatusCode::BAD_REQUEST, "Error reading body").into_response();
        }
    };

    let delivery_headers = DeliveryHeaders::from_headers(&headers);
    let settings = &state.settings;

    if !settings.pattern.matches(&delivery_headers.event_type) {
        tracing::debug!(
            event_type = %delivery_headers.event_type,
            pattern = %settings.pattern,
            "delivery filtered out"
        );
        return StatusCode::OK.into_response();
    }

    let verification =
        verification::inspect(&settings.secret, &body, &delivery_headers.signature);

    let delivery = Delivery {
        id: uuid::Uuid::new_v4().to_string(),
        received_at: Utc::now(),
        headers: delivery_headers,
        verification,
        payload: Payload::from_body(&body),
    };

    tracing::debug!(
        delivery_id = %delivery.id,
        received_at = %delivery.received_at,
        event_id = %delivery.headers.event_id,
        event_type = %delivery.headers.event_type,
        verified = delivery.verification.as_ref().map(|v| v.is_valid()),
        "delivery received"
    );

    state.console.emit(&render::render_delivery(&delivery));

    (StatusCode::OK, Json(serde_json::json!({ "status": "received" }))).into_response()
}
