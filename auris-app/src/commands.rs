//! Tauri command handlers.
//!
//! Each function is registered with `tauri::Builder::invoke_handler` and
//! callable from the frontend via `invoke(...)`, covering the
//! recording/settings/auth surface the desktop shell needs. The
//! `reqwest::Client` construction conventions used for the update checker
//! elsewhere in this codebase are what `TranscriptionService` and
//! `TokenRefreshCoordinator` follow for their own HTTP clients.

use auris_core::audio::{device::DeviceInfo, CpalAudioSource};
use auris_core::ipc::events::RecordingState;
use tauri::State;
use tracing::info;
use uuid::Uuid;

use crate::credentials::{load_credentials, save_credentials};
use crate::settings::{save_settings, RuntimeSettings};
use crate::state::AppState;

/// Start a new push-to-talk recording session.
#[tauri::command]
pub async fn start_recording(
    state: State<'_, AppState>,
    device_name: Option<String>,
) -> Result<(), String> {
    if let Some(name) = device_name {
        *state.preferred_input_device.lock() = Some(name);
    }
    let preferred = state.preferred_input_device.lock().clone();

    let source = tauri::async_runtime::spawn_blocking(move || {
        CpalAudioSource::open(preferred.as_deref())
    })
    .await
    .map_err(|e| format!("audio source setup task panicked: {e}"))?
    .map_err(|e| e.to_string())?;

    state
        .controller
        .start(Box::new(source))
        .await
        .map_err(|e| e.to_string())
}

/// Stop capture, flush the final buffered chunk, and return to idle.
#[tauri::command]
pub async fn stop_recording(state: State<'_, AppState>) -> Result<(), String> {
    state
        .controller
        .stop_and_finalize()
        .await
        .map_err(|e| e.to_string())
}

/// Stop capture immediately, discarding any buffered audio.
#[tauri::command]
pub async fn cancel_recording(state: State<'_, AppState>) -> Result<(), String> {
    state.controller.cancel().await.map_err(|e| e.to_string())
}

/// Return the current recording lifecycle state.
#[tauri::command]
pub async fn get_recording_state(state: State<'_, AppState>) -> Result<RecordingState, String> {
    Ok(state.controller.state())
}

/// Return a list of available audio input devices.
#[tauri::command]
pub async fn list_audio_devices(_state: State<'_, AppState>) -> Result<Vec<DeviceInfo>, String> {
    Ok(auris_core::audio::device::list_input_devices())
}

/// Persist the preferred input device name used for future `start_recording` calls.
#[tauri::command]
pub async fn set_preferred_input_device(
    state: State<'_, AppState>,
    device_name: Option<String>,
) -> Result<(), String> {
    let normalized = device_name
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    *state.preferred_input_device.lock() = normalized.clone();

    let mut settings = state.settings.lock();
    settings.preferred_input_device = normalized;
    save_settings(&state.settings_path, &settings).map_err(|e| e.to_string())?;
    Ok(())
}

/// Return the currently preferred input device name, if one is set.
#[tauri::command]
pub async fn get_preferred_input_device(
    state: State<'_, AppState>,
) -> Result<Option<String>, String> {
    Ok(state.preferred_input_device.lock().clone())
}

/// Return persisted runtime settings.
#[tauri::command]
pub async fn get_runtime_settings(state: State<'_, AppState>) -> Result<RuntimeSettings, String> {
    Ok(state.settings.lock().runtime_settings())
}

/// Update runtime settings, persisting the result.
#[tauri::command]
pub async fn set_runtime_settings(
    state: State<'_, AppState>,
    max_chunk_duration_seconds: Option<f32>,
    auto_end_enabled: Option<bool>,
    auto_end_silence_ms: Option<u64>,
    transcription_endpoint: Option<String>,
    toggle_shortcut: Option<String>,
) -> Result<RuntimeSettings, String> {
    let mut settings = state.settings.lock();
    if let Some(v) = max_chunk_duration_seconds {
        settings.max_chunk_duration_seconds = v;
    }
    if let Some(v) = auto_end_enabled {
        settings.auto_end_enabled = v;
    }
    if let Some(v) = auto_end_silence_ms {
        settings.auto_end_silence_ms = v;
    }
    if let Some(v) = transcription_endpoint {
        settings.transcription_endpoint = v;
    }
    if let Some(v) = toggle_shortcut {
        settings.toggle_shortcut = v;
    }
    settings.normalize();
    save_settings(&state.settings_path, &settings).map_err(|e| e.to_string())?;
    info!("runtime settings updated");
    Ok(settings.runtime_settings())
}

/// Whether a persisted OAuth credentials file exists.
#[tauri::command]
pub async fn has_oauth_credentials(state: State<'_, AppState>) -> Result<bool, String> {
    Ok(load_credentials(&state.credentials_path)
        .map_err(|e| e.to_string())?
        .is_some())
}

/// Start an OAuth login flow: bind the loopback callback server and return
/// the authorization URL's `redirect_uri` + `state` nonce for the frontend
/// to open in the system browser.
#[tauri::command]
pub async fn start_oauth_login(
    state: State<'_, AppState>,
    authorize_base_url: String,
    client_id: String,
) -> Result<String, String> {
    let expected_state = Uuid::new_v4().to_string();

    let server = auris_core::OAuthCallbackServer::start(expected_state.clone())
        .await
        .map_err(|e| e.to_string())?;
    let redirect_uri = server.redirect_uri();
    *state.oauth_server.lock() = Some(server);

    let authorize_url = format!(
        "{base}?client_id={client_id}&redirect_uri={redirect}&state={state_param}&response_type=code",
        base = authorize_base_url.trim_end_matches('/'),
        client_id = client_id,
        redirect = urlencoding_escape(&redirect_uri),
        state_param = expected_state,
    );
    Ok(authorize_url)
}

/// Wait for the pending OAuth login's callback, exchange the code for
/// tokens, and persist the resulting credentials.
#[tauri::command]
pub async fn complete_oauth_login(
    state: State<'_, AppState>,
    timeout_secs: u64,
) -> Result<(), String> {
    let server = state
        .oauth_server
        .lock()
        .take()
        .ok_or_else(|| "no oauth login in progress".to_string())?;

    let redirect_uri = server.redirect_uri();
    let code = server
        .wait_for_code(std::time::Duration::from_secs(timeout_secs))
        .await
        .map_err(|e| e.to_string())?;

    let credentials = state
        .token_refresh
        .exchange_authorization_code(&code.code, &redirect_uri, None)
        .await
        .map_err(|e| e.to_string())?;

    save_credentials(&state.credentials_path, &credentials).map_err(|e| e.to_string())?;
    *state.credentials.write() = credentials;
    info!("oauth login completed");
    Ok(())
}

fn urlencoding_escape(raw: &str) -> String {
    auris_core::auth::encode_form_urlencoded(&[(raw, "")])
        .trim_end_matches('=')
        .to_string()
}
