//! `OAuthCallbackServer` — a one-route loopback HTTP listener that receives
//! the authorization code redirect and hands it back to the caller.
//!
//! Grounded on the `axum`/`hyper` HTTP transport usage found in the
//! `matbeedotcom-remotemedia-sdk` pack repo — no teacher precedent exists
//! for an inbound HTTP listener, so this follows that repo's idiom of a
//! small single-route `axum::Router` bound to an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::error::{EngineError, Result};

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// The authorization code extracted from a successful callback.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub state: String,
}

struct ServerState {
    expected_state: String,
    result_tx: Mutex<Option<oneshot::Sender<Result<AuthorizationCode>>>>,
}

/// A loopback HTTP server listening on `127.0.0.1:0` for exactly one OAuth
/// redirect, then shutting itself down.
pub struct OAuthCallbackServer {
    local_addr: SocketAddr,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    result_rx: Mutex<Option<oneshot::Receiver<Result<AuthorizationCode>>>>,
}

impl OAuthCallbackServer {
    /// Bind the loopback listener and start serving. `expected_state` must
    /// match the `state` query parameter of the incoming redirect or the
    /// callback is rejected with `EngineError::OAuthStateMismatch`.
    pub async fn start(expected_state: impl Into<String>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| EngineError::OAuthServer(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| EngineError::OAuthServer(e.to_string()))?;

        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(ServerState {
            expected_state: expected_state.into(),
            result_tx: Mutex::new(Some(result_tx)),
        });

        let app = Router::new()
            .route("/auth/callback", get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!("oauth callback server exited with error: {e}");
            }
        });

        info!(%local_addr, "oauth callback server listening");

        Ok(Self {
            local_addr,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            result_rx: Mutex::new(Some(result_rx)),
        })
    }

    /// The loopback redirect URI the authorization request should use.
    pub fn redirect_uri(&self) -> String {
        format!("http://{}/auth/callback", self.local_addr)
    }

    /// Wait for the single callback to arrive, or for `timeout` to elapse.
    pub async fn wait_for_code(&self, timeout: std::time::Duration) -> Result<AuthorizationCode> {
        let rx = self
            .result_rx
            .lock()
            .take()
            .ok_or_else(|| EngineError::OAuthServer("callback already awaited".into()))?;

        let outcome = tokio::time::timeout(timeout, rx).await;
        self.stop();
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::OAuthServer("callback channel closed".into())),
            Err(_) => Err(EngineError::OAuthServer("timed out waiting for callback".into())),
        }
    }

    /// Idempotent shutdown — safe to call more than once, including after
    /// `wait_for_code` already stopped the server.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for OAuthCallbackServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_callback(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CallbackQuery>,
) -> impl IntoResponse {
    let result = if let Some(error) = query.error {
        Err(EngineError::OAuthServer(format!("authorization denied: {error}")))
    } else {
        match (query.code, query.state) {
            (Some(code), Some(received_state)) if received_state == state.expected_state => {
                Ok(AuthorizationCode {
                    code,
                    state: received_state,
                })
            }
            (Some(_), Some(_)) => Err(EngineError::OAuthStateMismatch),
            _ => Err(EngineError::OAuthServer("callback missing code/state".into())),
        }
    };

    let is_ok = result.is_ok();
    if let Some(tx) = state.result_tx.lock().take() {
        let _ = tx.send(result);
    }

    if is_ok {
        (StatusCode::OK, Html("<html><body>Signed in — you can close this window.</body></html>"))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Html("<html><body>Sign-in failed — you can close this window and try again.</body></html>"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accepts_matching_state_and_extracts_code() {
        let server = OAuthCallbackServer::start("xyz-state").await.unwrap();
        let uri = server.redirect_uri();

        let client = reqwest::Client::new();
        tokio::spawn(async move {
            let _ = client
                .get(format!("{uri}?code=auth-code-1&state=xyz-state"))
                .send()
                .await;
        });

        let code = server
            .wait_for_code(std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(code.code, "auth-code-1");
        assert_eq!(code.state, "xyz-state");
    }

    #[tokio::test]
    async fn rejects_mismatched_state() {
        let server = OAuthCallbackServer::start("expected").await.unwrap();
        let uri = server.redirect_uri();

        let client = reqwest::Client::new();
        tokio::spawn(async move {
            let _ = client
                .get(format!("{uri}?code=auth-code&state=wrong"))
                .send()
                .await;
        });

        let result = server.wait_for_code(std::time::Duration::from_secs(5)).await;
        assert!(matches!(result, Err(EngineError::OAuthStateMismatch)));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = OAuthCallbackServer::start("s").await.unwrap();
        server.stop();
        server.stop();
    }

    #[tokio::test]
    async fn mismatched_state_responds_400() {
        let server = OAuthCallbackServer::start("legit").await.unwrap();
        let uri = server.redirect_uri();
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{uri}?code=stolen&state=attacker"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let result = server.wait_for_code(std::time::Duration::from_millis(200)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_with_no_request_returns_nothing() {
        let server = OAuthCallbackServer::start("s").await.unwrap();
        let result = server.wait_for_code(std::time::Duration::from_millis(100)).await;
        assert!(result.is_err());
    }
}
