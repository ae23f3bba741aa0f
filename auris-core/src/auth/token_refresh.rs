//! `TokenRefreshCoordinator` — coalesces concurrent refresh requests into a
//! single in-flight HTTP call.
//!
//! A single `Arc<Mutex<...>>`-guarded resource that many callers reach
//! through, built around "one in-flight async refresh behind a coalescing
//! gate" using `tokio::sync::broadcast` so every waiter observes the same
//! outcome instead of redoing the network call.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::form_encode::encode_form_urlencoded;
use super::OAuthCredentials;
use crate::error::{EngineError, Result};

#[derive(Clone)]
enum RefreshOutcome {
    Ok(OAuthCredentials),
    Err(String),
}

struct InFlight {
    tx: broadcast::Sender<RefreshOutcome>,
}

/// Which role a caller takes once the single-flight decision has been made
/// under one lock acquisition: lead the refresh, or follow an existing one.
enum Role {
    Leader(broadcast::Sender<RefreshOutcome>),
    Follower(broadcast::Receiver<RefreshOutcome>),
}

/// Coordinates OAuth token refresh so that N concurrent callers observing
/// an expired token produce exactly one refresh request.
pub struct TokenRefreshCoordinator {
    client: Client,
    token_endpoint: String,
    client_id: String,
    in_flight: Mutex<Option<Arc<InFlight>>>,
}

impl TokenRefreshCoordinator {
    pub fn new(token_endpoint: impl Into<String>, client_id: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| EngineError::TokenRefresh(format!("http client build: {e}")))?;
        Ok(Self {
            client,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            in_flight: Mutex::new(None),
        })
    }

    /// Refresh `credentials`, coalescing with any refresh already underway
    /// for this coordinator.
    ///
    /// The decision to lead or follow, and (when leading) the registration
    /// of the new `InFlight` slot, happen under a single lock acquisition —
    /// splitting "check" and "act" across two acquisitions would let two
    /// concurrent callers both observe no in-flight refresh and both become
    /// leaders, invoking `do_refresh` twice.
    pub async fn refresh(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        let role = {
            let mut guard = self.in_flight.lock();
            match guard.as_ref() {
                Some(flight) => Role::Follower(flight.tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    *guard = Some(Arc::new(InFlight { tx: tx.clone() }));
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                debug!("joining in-flight token refresh");
                match rx.recv().await {
                    Ok(RefreshOutcome::Ok(creds)) => Ok(creds),
                    Ok(RefreshOutcome::Err(msg)) => Err(EngineError::TokenRefresh(msg)),
                    Err(_) => Err(EngineError::TokenRefresh(
                        "in-flight refresh dropped before completing".into(),
                    )),
                }
            }
            Role::Leader(tx) => {
                let result = self.do_refresh(credentials).await;

                *self.in_flight.lock() = None;

                let outcome = match &result {
                    Ok(creds) => RefreshOutcome::Ok(creds.clone()),
                    Err(e) => RefreshOutcome::Err(e.to_string()),
                };
                // No receivers is fine — it just means nobody joined us.
                let _ = tx.send(outcome);

                result
            }
        }
    }

    async fn do_refresh(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        let body = encode_form_urlencoded(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", &credentials.refresh_token),
            ("client_id", &self.client_id),
        ]);
        self.post_token_request(body, credentials.refresh_token.clone(), credentials.account_id.clone())
            .await
    }

    /// Exchange a freshly-received authorization code (from
    /// `OAuthCallbackServer`) for a token set. Not part of the single-flight
    /// refresh path — only one exchange ever happens per login, so there is
    /// nothing to coalesce. `code_verifier` is the PKCE verifier matching the
    /// `code_challenge` sent to the authorization endpoint, if the caller used one.
    pub async fn exchange_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<OAuthCredentials> {
        let mut pairs = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.client_id),
        ];
        if let Some(verifier) = code_verifier {
            pairs.push(("code_verifier", verifier));
        }
        let body = encode_form_urlencoded(&pairs);
        self.post_token_request(body, String::new(), String::new()).await
    }

    async fn post_token_request(
        &self,
        body: String,
        fallback_refresh_token: String,
        fallback_account_id: String,
    ) -> Result<OAuthCredentials> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| EngineError::TokenRefresh(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%status, "token request failed");
            return Err(EngineError::TokenRefresh(format!("status {status}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::TokenRefresh(format!("invalid token response: {e}")))?;

        let access_token = payload
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::TokenRefresh("response missing access_token".into()))?
            .to_string();
        let refresh_token = payload
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(fallback_refresh_token);
        let id_token = payload
            .get("id_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let account_id = payload
            .get("account_id")
            .or_else(|| payload.get("chatgpt_account_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(fallback_account_id);

        info!("token request succeeded");
        Ok(OAuthCredentials {
            access_token,
            refresh_token,
            id_token,
            account_id,
            last_refresh: chrono::Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// A tiny token endpoint that fails its first N calls, then succeeds,
    /// counting total invocations so tests can assert single-flight
    /// coalescing didn't invoke it more than expected.
    struct ScriptedTokenEndpoint {
        calls: AtomicU32,
        fail_first_n: u32,
    }

    async fn handler(
        State(endpoint): State<Arc<ScriptedTokenEndpoint>>,
        _body: String,
    ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
        let call = endpoint.calls.fetch_add(1, Ordering::SeqCst);
        if call < endpoint.fail_first_n {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "transient"})),
            )
        } else {
            (
                axum::http::StatusCode::OK,
                Json(serde_json::json!({
                    "access_token": format!("recovered-{call}"),
                    "refresh_token": "rt",
                    "account_id": "acct-1",
                })),
            )
        }
    }

    async fn spawn_endpoint(fail_first_n: u32) -> (String, Arc<ScriptedTokenEndpoint>) {
        let state = Arc::new(ScriptedTokenEndpoint {
            calls: AtomicU32::new(0),
            fail_first_n,
        });
        let app = Router::new().route("/token", post(handler)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/token"), state)
    }

    fn creds() -> OAuthCredentials {
        OAuthCredentials {
            access_token: "stale".into(),
            refresh_token: "rt".into(),
            id_token: None,
            account_id: "acct-1".into(),
            last_refresh: chrono::Utc::now() - chrono::Duration::hours(25),
        }
    }

    #[test]
    fn new_rejects_nothing_up_front() {
        let coordinator = TokenRefreshCoordinator::new("https://example.invalid/token", "client-1");
        assert!(coordinator.is_ok());
    }

    #[tokio::test]
    async fn concurrent_callers_coalesce_onto_one_refresh() {
        let (endpoint, state) = spawn_endpoint(0).await;
        let coordinator = Arc::new(TokenRefreshCoordinator::new(endpoint, "client-1").unwrap());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = Arc::clone(&coordinator);
            let creds = creds();
            handles.push(tokio::spawn(async move { coordinator.refresh(&creds).await }));
        }

        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap().unwrap().access_token);
        }
        assert!(tokens.iter().all(|t| *t == tokens[0]), "all callers must observe the same outcome");
        assert_eq!(state.calls.load(Ordering::SeqCst), 1, "exactly one refresh call for N coalesced callers");
    }

    /// Refresh fails once, slot clears, the next call retries and
    /// succeeds — total of exactly two invocations.
    #[tokio::test]
    async fn failure_clears_slot_so_next_caller_retries() {
        let (endpoint, state) = spawn_endpoint(1).await;
        let coordinator = TokenRefreshCoordinator::new(endpoint, "client-1").unwrap();

        let first = coordinator.refresh(&creds()).await;
        assert!(first.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = coordinator.refresh(&creds()).await.unwrap();
        assert!(second.access_token.starts_with("recovered-"));
        assert_eq!(state.calls.load(Ordering::SeqCst), 2);
    }
}
