//! Windows `TextSink`: types a delta into the focused window via `SendInput`,
//! falling back to clipboard paste for terminal emulators that swallow
//! simulated Unicode key events.
//!
//! Implements the `TextSink` contract: report the focused process, then
//! apply one delete-then-insert delta to it. The chunking/retry/
//! paste-fallback machinery below is unchanged from earlier iterations of
//! this file; history/dictionary post-processing is out of scope here —
//! that lives in `auris-app`'s own local-history surface, not this sink.

use std::time::Duration;

use async_trait::async_trait;
use auris_core::error::{EngineError, Result};
use auris_core::sink::{FocusTarget, TextSink};
use parking_lot::Mutex;

#[derive(Default)]
pub struct WindowsTextSink {
    target: Mutex<Option<FocusTarget>>,
}

impl WindowsTextSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn expected_process(&self) -> Option<String> {
        self.target.lock().as_ref().map(|t| t.process_name.clone())
    }
}

#[async_trait]
impl TextSink for WindowsTextSink {
    async fn capture_target(&self) -> Option<FocusTarget> {
        let target = tauri::async_runtime::spawn_blocking(|| {
            foreground_process_name().map(|process_name| FocusTarget { process_name })
        })
        .await
        .ok()
        .flatten();
        *self.target.lock() = target.clone();
        target
    }

    async fn insert(&self, text: &str) -> Result<()> {
        let Some(expected) = self.expected_process() else {
            return Err(EngineError::FocusChanged);
        };
        let text = text.to_string();
        tauri::async_runtime::spawn_blocking(move || {
            if foreground_process_name().unwrap_or_default() != expected {
                return Err(EngineError::FocusChanged);
            }
            apply_delta_sync(0, &text)
        })
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("injection task panicked: {e}")))?
    }

    async fn delete(&self, graphemes: usize) -> Result<()> {
        if graphemes == 0 {
            return Ok(());
        }
        let Some(expected) = self.expected_process() else {
            return Err(EngineError::FocusChanged);
        };
        tauri::async_runtime::spawn_blocking(move || {
            if foreground_process_name().unwrap_or_default() != expected {
                return Err(EngineError::FocusChanged);
            }
            apply_delta_sync(graphemes, "")
        })
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("injection task panicked: {e}")))?
    }

    async fn press_enter(&self) -> Result<()> {
        #[cfg(target_os = "windows")]
        {
            tauri::async_runtime::spawn_blocking(|| {
                use windows_sys::Win32::UI::Input::KeyboardAndMouse::VK_RETURN;
                send_key_chord(&[], VK_RETURN).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))
            })
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("injection task panicked: {e}")))?
        }
        #[cfg(not(target_os = "windows"))]
        {
            Ok(())
        }
    }

    async fn is_target_app_frontmost(&self) -> bool {
        match self.expected_process() {
            Some(expected) => {
                tauri::async_runtime::spawn_blocking(move || foreground_process_name().unwrap_or_default() == expected)
                    .await
                    .unwrap_or(false)
            }
            None => false,
        }
    }

    async fn ensure_target_focused(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.is_target_app_frontmost().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.is_target_app_frontmost().await
    }

    async fn cancel_and_reset(&self) {
        *self.target.lock() = None;
    }
}

#[cfg(target_os = "windows")]
fn apply_delta_sync(graphemes_to_delete: usize, text: &str) -> Result<()> {
    use std::{thread, time::Duration};

    if graphemes_to_delete > 0 {
        send_backspaces(graphemes_to_delete)
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    }

    if text.is_empty() {
        return Ok(());
    }

    let mut units: Vec<u16> = text.encode_utf16().collect();
    for unit in &mut units {
        if *unit == b'\n' as u16 {
            *unit = b'\r' as u16;
        }
    }

    let target_proc = foreground_process_name().unwrap_or_default();
    if is_terminal_process(&target_proc) {
        if let Err(e) = inject_via_clipboard_paste(text) {
            tracing::debug!(error = %e, process = %target_proc, "clipboard paste injection failed; falling back to unicode");
        } else {
            thread::sleep(Duration::from_millis(60));
            return Ok(());
        }
    }

    for chunk in units.chunks(160) {
        send_unicode_chunk(chunk).map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    }
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn apply_delta_sync(_graphemes_to_delete: usize, _text: &str) -> Result<()> {
    Ok(())
}

#[cfg(target_os = "windows")]
fn is_terminal_process(process_name: &str) -> bool {
    matches!(
        process_name,
        "windowsterminal.exe"
            | "wezterm-gui.exe"
            | "alacritty.exe"
            | "cmd.exe"
            | "conhost.exe"
            | "powershell.exe"
            | "pwsh.exe"
            | "mintty.exe"
    )
}

#[cfg(target_os = "windows")]
fn send_backspaces(count: usize) -> Result<()> {
    use std::mem::size_of;
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP, VK_BACK,
    };

    let mut inputs: Vec<INPUT> = Vec::with_capacity(count * 2);
    for _ in 0..count {
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VK_BACK,
                    wScan: 0,
                    dwFlags: 0,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        });
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VK_BACK,
                    wScan: 0,
                    dwFlags: KEYEVENTF_KEYUP,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        });
    }

    let sent = unsafe { SendInput(inputs.len() as u32, inputs.as_ptr(), size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        let win_err = std::io::Error::last_os_error();
        return Err(format!("SendInput backspace sent {sent}/{} events (os_error={win_err})", inputs.len()));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn send_unicode_chunk(chunk: &[u16]) -> Result<(), String> {
    use std::mem::size_of;
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP, KEYEVENTF_UNICODE,
    };

    let mut inputs: Vec<INPUT> = Vec::with_capacity(chunk.len() * 2);
    for &scan in chunk {
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: 0,
                    wScan: scan,
                    dwFlags: KEYEVENTF_UNICODE,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        });
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: 0,
                    wScan: scan,
                    dwFlags: KEYEVENTF_UNICODE | KEYEVENTF_KEYUP,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        });
    }

    let sent = unsafe { SendInput(inputs.len() as u32, inputs.as_ptr(), size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        let win_err = std::io::Error::last_os_error();
        return Err(format!("SendInput sent {sent}/{} keyboard events (os_error={win_err})", inputs.len()));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn inject_via_clipboard_paste(text: &str) -> Result<(), String> {
    use std::{thread, time::Duration};
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{VK_CONTROL, VK_V};

    let previous = read_clipboard_unicode_text();
    set_clipboard_unicode_text(text)?;
    let result = send_key_chord(&[VK_CONTROL], VK_V);
    if let Some(prev) = previous {
        thread::sleep(Duration::from_millis(45));
        let _ = set_clipboard_unicode_text(&prev);
    }
    result
}

#[cfg(target_os = "windows")]
fn send_key_chord(modifiers: &[u16], key: u16) -> Result<(), String> {
    use std::mem::size_of;
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
        SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, KEYBDINPUT, KEYEVENTF_KEYUP,
    };

    let mut inputs: Vec<INPUT> = Vec::with_capacity(modifiers.len() * 2 + 2);
    for &vk in modifiers {
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT { wVk: vk, wScan: 0, dwFlags: 0, time: 0, dwExtraInfo: 0 },
            },
        });
    }
    inputs.push(INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT { wVk: key, wScan: 0, dwFlags: 0, time: 0, dwExtraInfo: 0 },
        },
    });
    inputs.push(INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT { wVk: key, wScan: 0, dwFlags: KEYEVENTF_KEYUP, time: 0, dwExtraInfo: 0 },
        },
    });
    for &vk in modifiers.iter().rev() {
        inputs.push(INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT { wVk: vk, wScan: 0, dwFlags: KEYEVENTF_KEYUP, time: 0, dwExtraInfo: 0 },
            },
        });
    }

    let sent = unsafe { SendInput(inputs.len() as u32, inputs.as_ptr(), size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        let win_err = std::io::Error::last_os_error();
        return Err(format!("SendInput chord sent {sent}/{} events (os_error={win_err})", inputs.len()));
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn read_clipboard_unicode_text() -> Option<String> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use windows_sys::Win32::System::DataExchange::{CloseClipboard, GetClipboardData, IsClipboardFormatAvailable};
    use windows_sys::Win32::System::Memory::{GlobalLock, GlobalUnlock};

    const CF_UNICODETEXT: u32 = 13;
    if !open_clipboard_with_retry() {
        return None;
    }
    let result = unsafe {
        if IsClipboardFormatAvailable(CF_UNICODETEXT) == 0 {
            None
        } else {
            let h = GetClipboardData(CF_UNICODETEXT);
            if h.is_null() {
                None
            } else {
                let ptr = GlobalLock(h as _) as *const u16;
                if ptr.is_null() {
                    None
                } else {
                    let mut len = 0usize;
                    while *ptr.add(len) != 0 {
                        len += 1;
                    }
                    let slice = std::slice::from_raw_parts(ptr, len);
                    let out = OsString::from_wide(slice).to_string_lossy().to_string();
                    let _ = GlobalUnlock(h as _);
                    Some(out)
                }
            }
        }
    };
    unsafe { CloseClipboard(); }
    result
}

#[cfg(target_os = "windows")]
fn set_clipboard_unicode_text(text: &str) -> Result<(), String> {
    use windows_sys::Win32::System::DataExchange::{CloseClipboard, EmptyClipboard, SetClipboardData};
    use windows_sys::Win32::System::Memory::{GlobalAlloc, GlobalLock, GlobalUnlock, GMEM_MOVEABLE};

    const CF_UNICODETEXT: u32 = 13;
    let mut utf16: Vec<u16> = text.encode_utf16().collect();
    utf16.push(0);
    let bytes = utf16.len() * std::mem::size_of::<u16>();

    if !open_clipboard_with_retry() {
        return Err("OpenClipboard failed".into());
    }
    let result = unsafe {
        if EmptyClipboard() == 0 {
            Err("EmptyClipboard failed".to_string())
        } else {
            let hmem = GlobalAlloc(GMEM_MOVEABLE, bytes);
            if hmem.is_null() {
                Err("GlobalAlloc failed for clipboard text".to_string())
            } else {
                let dst = GlobalLock(hmem) as *mut u16;
                if dst.is_null() {
                    Err("GlobalLock failed for clipboard text".to_string())
                } else {
                    std::ptr::copy_nonoverlapping(utf16.as_ptr(), dst, utf16.len());
                    let _ = GlobalUnlock(hmem);
                    let set = SetClipboardData(CF_UNICODETEXT, hmem as *mut _);
                    if set.is_null() {
                        Err("SetClipboardData(CF_UNICODETEXT) failed".to_string())
                    } else {
                        Ok(())
                    }
                }
            }
        }
    };
    unsafe { CloseClipboard(); }
    result
}

#[cfg(target_os = "windows")]
fn open_clipboard_with_retry() -> bool {
    use std::{thread, time::Duration};
    use windows_sys::Win32::System::DataExchange::OpenClipboard;
    for _ in 0..8 {
        if unsafe { OpenClipboard(std::ptr::null_mut()) != 0 } {
            return true;
        }
        thread::sleep(Duration::from_millis(8));
    }
    false
}

#[cfg(target_os = "windows")]
fn foreground_process_name() -> Option<String> {
    use std::path::Path;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    };
    use windows_sys::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.is_null() {
            return None;
        }
        let mut pid = 0u32;
        let _ = GetWindowThreadProcessId(hwnd, &mut pid);
        if pid == 0 {
            return None;
        }
        let hproc: HANDLE = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if hproc.is_null() {
            return None;
        }
        let mut buf = vec![0u16; 1024];
        let mut len = buf.len() as u32;
        let ok = QueryFullProcessImageNameW(hproc, PROCESS_NAME_WIN32, buf.as_mut_ptr(), &mut len);
        let _ = CloseHandle(hproc);
        if ok == 0 || len == 0 {
            return None;
        }
        let full = String::from_utf16_lossy(&buf[..len as usize]);
        let exe = Path::new(&full).file_name()?.to_string_lossy().to_ascii_lowercase();
        Some(exe)
    }
}

#[cfg(not(target_os = "windows"))]
fn foreground_process_name() -> Option<String> {
    None
}
