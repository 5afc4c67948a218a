use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::dispatcher::Gateway;
use super::interaction::{Interaction, InteractionKind};
use super::responder::HttpResponder;
use crate::discord::types::InteractionResponse;
use crate::discord::PlatformOps;

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("public key is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("public key must be 32 bytes, got {0}")]
    Length(usize),
    #[error("public key is not a valid Ed25519 point: {0}")]
    Point(#[from] ed25519_dalek::SignatureError),
}

/// Checks the platform's Ed25519 signature over `timestamp || body`.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
}

impl SignatureVerifier {
    pub fn from_hex(public_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(public_key.trim())?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::Length(bytes.len()))?;
        Ok(Self {
            key: VerifyingKey::from_bytes(&bytes)?,
        })
    }

    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> bool {
        let Ok(raw) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&raw) else {
            return false;
        };
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        self.key.verify(&message, &signature).is_ok()
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub gateway: Arc<Gateway>,
    pub platform: Arc<dyn PlatformOps>,
    pub verifier: Arc<SignatureVerifier>,
    /// How long to wait for a handler's first reply before deferring.
    pub initial_response_timeout: Duration,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/interactions", post(interactions))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

async fn interactions(State(state): State<ServerState>, headers: HeaderMap, body: Bytes) -> Response {
    let (Some(signature), Some(timestamp)) = (header(&headers, SIGNATURE_HEADER), header(&headers, TIMESTAMP_HEADER))
    else {
        return (StatusCode::UNAUTHORIZED, "missing request signature").into_response();
    };
    if !state.verifier.verify(timestamp, &body, signature) {
        warn!("Rejected interaction with invalid signature");
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }

    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(interaction) => interaction,
        Err(e) => {
            warn!(error = %e, "Malformed interaction payload");
            return (StatusCode::BAD_REQUEST, "malformed interaction").into_response();
        }
    };
    if interaction.kind == InteractionKind::Ping {
        debug!("Answering platform ping");
        return Json(InteractionResponse::Pong).into_response();
    }

    let (tx, mut rx) = oneshot::channel();
    let responder = Arc::new(HttpResponder::new(
        tx,
        state.platform.clone(),
        interaction.id,
        interaction.token.clone(),
    ));
    let gateway = state.gateway.clone();
    tokio::spawn(async move { gateway.handle(interaction, responder).await });

    let first = tokio::select! {
        received = &mut rx => received.ok(),
        _ = tokio::time::sleep(state.initial_response_timeout) => {
            rx.close();
            rx.try_recv().ok()
        }
    };
    match first {
        Some(response) => Json(response).into_response(),
        None => {
            info!("Handler still running, deferring the reply");
            Json(InteractionResponse::DeferredMessage { ephemeral: true }).into_response()
        }
    }
}

/// Serves the interactions endpoint until `shutdown` resolves.
pub async fn serve(
    bind_address: &str,
    state: ServerState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind interactions endpoint to {bind_address}"))?;
    info!(address = %listener.local_addr()?, "Interactions endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Interactions endpoint failed")?;
    info!("Interactions endpoint stopped");
    Ok(())
}
