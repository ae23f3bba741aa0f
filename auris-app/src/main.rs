//! Auris desktop application entry point.
//!
//! ## Runtime note
//!
//! Tauri v2 manages its own Tokio runtime internally.
//! We use `tauri::async_runtime::spawn` (not `tokio::spawn`) so our tasks
//! share Tauri's runtime and can safely call Tauri APIs.

#![cfg_attr(
    all(not(debug_assertions), target_os = "windows"),
    windows_subsystem = "windows"
)]

mod commands;
mod credentials;
mod settings;
mod sink_windows;
mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use auris_core::{
    auth::OAuthCredentials, queue::TranscriptionQueue, transcription::RateLimiter,
    transcription::TranscriptionService, RecordingController,
};
use parking_lot::{Mutex, RwLock};
use settings::{default_settings_path, load_settings};
use sink_windows::WindowsTextSink;
use state::AppState;
use tauri::{
    menu::{Menu, MenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    Emitter, Manager,
};
use tauri_plugin_global_shortcut::ShortcutState;
use tracing::info;

const DEFAULT_GLOBAL_TOGGLE_SHORTCUT: &str = "Ctrl+Shift+Space";
const TRAY_SHOW_HIDE_ID: &str = "tray_show_hide";
const TRAY_EXIT_ID: &str = "tray_exit";

/// Minimum spacing between outbound transcription uploads. Chosen to stay
/// comfortably under the provider's per-account request budget without
/// measurably delaying normal push-to-talk cadence.
const TRANSCRIPTION_MIN_INTERVAL: Duration = Duration::from_millis(250);

const OAUTH_TOKEN_ENDPOINT: &str = "https://auth.openai.com/oauth/token";
const OAUTH_CLIENT_ID: &str = "auris-desktop";

#[cfg(target_os = "windows")]
fn enforce_single_instance() -> Option<isize> {
    use std::{ffi::OsStr, os::windows::ffi::OsStrExt};
    use windows_sys::Win32::{
        Foundation::{GetLastError, ERROR_ALREADY_EXISTS},
        System::Threading::CreateMutexW,
        UI::WindowsAndMessaging::{FindWindowW, SetForegroundWindow, ShowWindow, SW_RESTORE},
    };

    fn to_wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
    }

    let mutex_name = to_wide("Global\\AurisSingleInstance");
    let mutex = unsafe { CreateMutexW(std::ptr::null(), true.into(), mutex_name.as_ptr()) };
    if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
        let window_title = to_wide("Auris");
        let hwnd = unsafe { FindWindowW(std::ptr::null(), window_title.as_ptr()) };
        if !hwnd.is_null() {
            unsafe {
                ShowWindow(hwnd, SW_RESTORE);
                SetForegroundWindow(hwnd);
            }
        }
        return None;
    }
    Some(mutex as isize)
}

#[cfg(not(target_os = "windows"))]
fn enforce_single_instance() -> Option<isize> {
    Some(0)
}

fn toggle_recording_from_shortcut<R: tauri::Runtime>(app: &tauri::AppHandle<R>) {
    let state = app.state::<AppState>();
    let controller = Arc::clone(&state.controller);
    let preferred_device = state.preferred_input_device.lock().clone();

    tauri::async_runtime::spawn(async move {
        use auris_core::ipc::events::RecordingState;

        let result = if controller.state() == RecordingState::Recording {
            controller.stop_and_finalize().await
        } else {
            let source = match tauri::async_runtime::spawn_blocking(move || {
                auris_core::audio::CpalAudioSource::open(preferred_device.as_deref())
            })
            .await
            {
                Ok(Ok(source)) => source,
                Ok(Err(e)) => {
                    tracing::warn!("global shortcut: failed to open audio source: {e}");
                    return;
                }
                Err(e) => {
                    tracing::warn!("global shortcut: audio source setup task panicked: {e}");
                    return;
                }
            };
            controller.start(Box::new(source)).await
        };

        if let Err(e) = result {
            tracing::warn!("global shortcut toggle failed: {e}");
        }
    });
}

fn reveal_main_window<R: tauri::Runtime>(app: &tauri::AppHandle<R>) {
    if let Some(window) = app.get_webview_window("main") {
        let _ = window.show();
        let _ = window.unminimize();
        let _ = window.set_focus();
    }
}

fn toggle_main_window<R: tauri::Runtime>(app: &tauri::AppHandle<R>) {
    if let Some(window) = app.get_webview_window("main") {
        let is_visible = window.is_visible().unwrap_or(false);
        if is_visible {
            let _ = window.hide();
        } else {
            reveal_main_window(app);
        }
    }
}

fn setup_system_tray<R: tauri::Runtime>(app: &tauri::AppHandle<R>) -> tauri::Result<()> {
    let show_hide_item = MenuItem::with_id(app, TRAY_SHOW_HIDE_ID, "Show / Hide Auris", true, None::<&str>)?;
    let exit_item = MenuItem::with_id(app, TRAY_EXIT_ID, "Exit Auris", true, None::<&str>)?;
    let tray_menu = Menu::with_items(app, &[&show_hide_item, &exit_item])?;

    let mut tray = TrayIconBuilder::with_id("auris-tray")
        .menu(&tray_menu)
        .tooltip("Auris")
        .show_menu_on_left_click(false)
        .on_menu_event(|app, event| {
            if event.id() == TRAY_SHOW_HIDE_ID {
                toggle_main_window(app);
            } else if event.id() == TRAY_EXIT_ID {
                app.exit(0);
            }
        })
        .on_tray_icon_event(|tray, event| {
            if let TrayIconEvent::Click {
                button: MouseButton::Left,
                button_state: MouseButtonState::Up,
                ..
            } = event
            {
                toggle_main_window(tray.app_handle());
            }
        });

    if let Some(icon) = app.default_window_icon().cloned() {
        tray = tray.icon(icon);
    }

    tray.build(app)?;
    Ok(())
}

/// Placeholder credentials used until a login completes or a persisted
/// credentials file is found. An empty `access_token` keeps
/// `TranscriptionService::is_configured` (and therefore
/// `RecordingController::can_start_dictation`) false.
fn empty_credentials() -> OAuthCredentials {
    OAuthCredentials {
        access_token: String::new(),
        refresh_token: String::new(),
        id_token: None,
        account_id: String::new(),
        last_refresh: chrono::Utc::now() - chrono::Duration::hours(48),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "auris=info".parse().unwrap()),
        )
        .init();

    info!("Auris starting");
    let _single_instance_guard = enforce_single_instance();
    if _single_instance_guard.is_none() {
        return;
    }

    let settings_path = default_settings_path();
    let app_settings = load_settings(&settings_path);
    info!(
        settings_path = ?settings_path,
        toggle_shortcut = %app_settings.toggle_shortcut,
        "runtime settings loaded"
    );

    let credentials_path = credentials::default_credentials_path();
    let loaded_credentials = credentials::load_credentials(&credentials_path)
        .unwrap_or_else(|e| {
            tracing::warn!("failed to load credentials file: {e}");
            None
        })
        .unwrap_or_else(empty_credentials);
    let credentials = Arc::new(RwLock::new(loaded_credentials));

    let token_refresh = Arc::new(
        auris_core::auth::TokenRefreshCoordinator::new(OAUTH_TOKEN_ENDPOINT, OAUTH_CLIENT_ID)
            .expect("failed to construct OAuth token refresh client"),
    );

    let rate_limiter = Arc::new(RateLimiter::new(Arc::new(auris_core::clock::SystemClock), TRANSCRIPTION_MIN_INTERVAL));

    let transcription_service = Arc::new(
        TranscriptionService::new(
            app_settings.transcription_endpoint.clone(),
            Arc::clone(&credentials),
            rate_limiter,
            Some(Arc::clone(&token_refresh)),
        )
        .expect("failed to construct transcription service"),
    );

    let recording_config = app_settings.recording_config();
    let controller = Arc::new(RecordingController::new(
        Arc::new(auris_core::clock::SystemClock),
        Arc::new(TranscriptionQueue::new()),
        transcription_service,
        Arc::new(WindowsTextSink::new()),
        recording_config,
    ));
    // No accessibility/microphone permission-prompt flow is modeled on this
    // platform; capture access is granted (or denied by the OS) implicitly
    // when `cpal` opens the device.
    controller.set_permissions(auris_core::PermissionState {
        accessibility_granted: true,
        microphone_granted: true,
    });

    let settings_state = Arc::new(Mutex::new(app_settings.clone()));

    let toggle_debounce = Arc::new(Mutex::new(None::<Instant>));
    let toggle_debounce_for_handler = Arc::clone(&toggle_debounce);
    let global_shortcut_plugin = tauri_plugin_global_shortcut::Builder::new()
        .with_shortcut(if app_settings.toggle_shortcut.trim().is_empty() {
            DEFAULT_GLOBAL_TOGGLE_SHORTCUT
        } else {
            app_settings.toggle_shortcut.as_str()
        })
        .expect("invalid global shortcut")
        .with_handler(move |app, _shortcut, event| {
            if event.state == ShortcutState::Pressed {
                let now = Instant::now();
                {
                    let mut guard = toggle_debounce_for_handler.lock();
                    if let Some(last) = *guard {
                        if now.duration_since(last) < Duration::from_millis(350) {
                            tracing::debug!("ignoring duplicate shortcut press within debounce window");
                            return;
                        }
                    }
                    *guard = Some(now);
                }
                toggle_recording_from_shortcut(app);
            }
        })
        .build();

    let controller_for_setup = Arc::clone(&controller);

    tauri::Builder::default()
        .plugin(global_shortcut_plugin)
        .setup(move |app| {
            let app_handle = app.handle().clone();
            setup_system_tray(&app_handle)?;

            // Forward engine events onto the Tauri event bus.
            // `tauri::async_runtime::spawn` shares Tauri's Tokio runtime.
            let mut status_rx = controller_for_setup.subscribe_status();
            let handle_status = app_handle.clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    match status_rx.recv().await {
                        Ok(event) => {
                            if let Err(e) = handle_status.emit("auris://status", &event) {
                                tracing::warn!("emit status: {e}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("status receiver lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            let mut transcript_rx = controller_for_setup.subscribe_transcript();
            let handle_transcript = app_handle.clone();
            tauri::async_runtime::spawn(async move {
                loop {
                    match transcript_rx.recv().await {
                        Ok(event) => {
                            if let Err(e) = handle_transcript.emit("auris://transcript", &event) {
                                tracing::warn!("emit transcript: {e}");
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("transcript receiver lagged by {n} events");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });

            Ok(())
        })
        .manage(AppState {
            controller,
            preferred_input_device: Arc::new(Mutex::new(app_settings.preferred_input_device.clone())),
            settings: settings_state,
            settings_path,
            credentials_path,
            credentials,
            token_refresh,
            oauth_server: Arc::new(Mutex::new(None)),
        })
        .invoke_handler(tauri::generate_handler![
            commands::start_recording,
            commands::stop_recording,
            commands::cancel_recording,
            commands::get_recording_state,
            commands::list_audio_devices,
            commands::set_preferred_input_device,
            commands::get_preferred_input_device,
            commands::get_runtime_settings,
            commands::set_runtime_settings,
            commands::has_oauth_credentials,
            commands::start_oauth_login,
            commands::complete_oauth_login,
        ])
        .run(tauri::generate_context!())
        .expect("error while running Tauri application");
}
