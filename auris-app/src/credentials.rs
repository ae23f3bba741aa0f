//! Persisted OAuth credentials file.
//!
//! Stored as JSON next to `settings.json`. Grounded on
//! `settings.rs`'s load/save shape, with one addition the settings file
//! doesn't need: a symlink check before reading, since a credentials file
//! is a more attractive tamper target than a settings file.

use std::fs;
use std::path::{Path, PathBuf};

use auris_core::{EngineError, OAuthCredentials, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// On-disk shape: nested `tokens.{access_token, refresh_token, account_id}`
/// plus a top-level `last_refresh` timestamp. `OAuthCredentials` itself
/// stays flat for in-memory ergonomics; this type is the (de)serialization
/// adapter between the two.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialsFile {
    tokens: TokensSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    last_refresh: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokensSection {
    access_token: String,
    refresh_token: String,
    account_id: String,
}

impl From<&OAuthCredentials> for CredentialsFile {
    fn from(c: &OAuthCredentials) -> Self {
        Self {
            tokens: TokensSection {
                access_token: c.access_token.clone(),
                refresh_token: c.refresh_token.clone(),
                account_id: c.account_id.clone(),
            },
            id_token: c.id_token.clone(),
            last_refresh: c.last_refresh,
        }
    }
}

impl From<CredentialsFile> for OAuthCredentials {
    fn from(f: CredentialsFile) -> Self {
        Self {
            access_token: f.tokens.access_token,
            refresh_token: f.tokens.refresh_token,
            id_token: f.id_token,
            account_id: f.tokens.account_id,
            last_refresh: f.last_refresh,
        }
    }
}

pub fn default_credentials_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Auris")
            .join("credentials.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("auris")
            .join("credentials.json")
    }
}

fn reject_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(EngineError::CredentialsSymlink(path.to_path_buf()))
        }
        _ => Ok(()),
    }
}

pub fn load_credentials(path: &Path) -> Result<Option<OAuthCredentials>> {
    reject_symlink(path)?;
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file: CredentialsFile = serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!(e))?;
            Ok(Some(file.into()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_credentials(path: &Path, credentials: &OAuthCredentials) -> Result<()> {
    reject_symlink(path)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = CredentialsFile::from(credentials);
    let json = serde_json::to_string_pretty(&file).map_err(|e| anyhow::anyhow!(e))?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OAuthCredentials {
        OAuthCredentials {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            id_token: Some("idt".into()),
            account_id: "acct-1".into(),
            last_refresh: Utc::now(),
        }
    }

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = std::env::temp_dir().join(format!("auris-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("credentials.json");

        let creds = sample();
        save_credentials(&path, &creds).expect("save");
        let loaded = load_credentials(&path).expect("load").expect("present");
        assert_eq!(loaded.access_token, creds.access_token);
        assert_eq!(loaded.refresh_token, creds.refresh_token);
        assert_eq!(loaded.account_id, creds.account_id);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn file_layout_nests_tokens_section() {
        let dir = std::env::temp_dir().join(format!("auris-test-layout-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("credentials.json");
        save_credentials(&path, &sample()).expect("save");

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["tokens"]["access_token"].is_string());
        assert!(value["tokens"]["refresh_token"].is_string());
        assert!(value["tokens"]["account_id"].is_string());
        assert!(value["last_refresh"].is_string());

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_returns_none() {
        let path = std::env::temp_dir().join("auris-credentials-does-not-exist.json");
        fs::remove_file(&path).ok();
        assert!(load_credentials(&path).expect("load ok").is_none());
    }
}
