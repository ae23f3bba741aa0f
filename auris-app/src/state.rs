//! Tauri application state.
//!
//! `AppState` is managed via `app.manage(...)` and injected into command
//! handlers by Tauri's `State<'_, AppState>` extractor.

use std::path::PathBuf;
use std::sync::Arc;

use auris_core::{OAuthCallbackServer, OAuthCredentials, RecordingController, TokenRefreshCoordinator};
use parking_lot::{Mutex, RwLock};

use crate::settings::AppSettings;

/// Shared application state — available in every `#[tauri::command]`.
pub struct AppState {
    /// The recording lifecycle controller. Wrapped in `Arc` so it can be
    /// cloned into event-forwarding tasks started after setup.
    pub controller: Arc<RecordingController>,
    /// User-selected microphone name to use when starting capture.
    pub preferred_input_device: Arc<Mutex<Option<String>>>,
    /// Persisted app settings cache.
    pub settings: Arc<Mutex<AppSettings>>,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    /// Absolute path to `credentials.json`.
    pub credentials_path: PathBuf,
    /// In-memory credentials the `TranscriptionService` reads on every
    /// upload. Updated here whenever a login or refresh completes so both
    /// sides of the split observe the same value without re-reading disk.
    pub credentials: Arc<RwLock<OAuthCredentials>>,
    /// Single-flight OAuth access-token refresh coordinator.
    pub token_refresh: Arc<TokenRefreshCoordinator>,
    /// In-flight OAuth loopback server, if a login flow is underway.
    pub oauth_server: Arc<Mutex<Option<OAuthCallbackServer>>>,
}
