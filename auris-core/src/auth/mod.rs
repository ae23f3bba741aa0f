//! OAuth token lifecycle: persisted credential shape, single-flight token
//! refresh, the loopback authorization callback server, and RFC 3986
//! form-urlencoded request bodies.

pub mod form_encode;
pub mod oauth_server;
pub mod token_refresh;

pub use form_encode::encode_form_urlencoded;
pub use oauth_server::OAuthCallbackServer;
pub use token_refresh::TokenRefreshCoordinator;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// The fixed staleness window past which credentials are considered
/// unconditionally expired: `isExpired = now - lastRefresh > 24h`.
pub const EXPIRY_WINDOW: ChronoDuration = ChronoDuration::hours(24);

/// OAuth credentials as persisted to disk (see `auris-app::credentials`)
/// and as passed in-memory to [`TokenRefreshCoordinator`]. Immutable —
/// refreshing produces a new value rather than mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub account_id: String,
    /// ISO-8601 with fractional seconds, e.g. `2026-07-28T10:15:30.123Z`.
    pub last_refresh: DateTime<Utc>,
}

impl OAuthCredentials {
    /// `now - lastRefresh > 24h`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_refresh > EXPIRY_WINDOW
    }

    /// `now - lastRefresh > window` — a caller-chosen proactive-refresh
    /// margin, distinct from the fixed 24h hard expiry.
    pub fn should_refresh(&self, now: DateTime<Utc>, window: ChronoDuration) -> bool {
        now - self.last_refresh > window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(last_refresh: DateTime<Utc>) -> OAuthCredentials {
        OAuthCredentials {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            id_token: None,
            account_id: "acct-1".into(),
            last_refresh,
        }
    }

    #[test]
    fn should_refresh_respects_window() {
        let c = creds(Utc::now() - ChronoDuration::seconds(90));
        assert!(c.should_refresh(Utc::now(), ChronoDuration::seconds(60)));
        assert!(!c.should_refresh(Utc::now(), ChronoDuration::seconds(120)));
    }

    #[test]
    fn is_expired_uses_fixed_24h_window() {
        let stale = creds(Utc::now() - ChronoDuration::hours(25));
        assert!(stale.is_expired(Utc::now()));
        let fresh = creds(Utc::now() - ChronoDuration::hours(1));
        assert!(!fresh.is_expired(Utc::now()));
    }
}
