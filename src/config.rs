//! Configuration loading and management
//!
//! `Config` holds the daemon's filesystem layout. `Preferences` is the
//! user-facing settings snapshot (hotkeys, dictionary, tones, limits) that
//! the session controller and the transcription pipeline read at call time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::hotkey::{AGENT_DICTATE_ACTION, DICTATE_ACTION};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket served to UI/host clients
    pub socket_path: PathBuf,

    /// Path to the native host's command socket
    pub host_socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// User preferences file
    pub settings_path: PathBuf,

    /// Append-only transcription history
    pub history_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("DICTATION_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = std::env::var("HOME").context("HOME is not set")?;
                PathBuf::from(&home)
                    .join(".local")
                    .join("share")
                    .join("dictation-daemon")
            }
        };

        let socket_path = std::env::var_os("DICTATION_DAEMON_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));
        let host_socket_path = std::env::var_os("DICTATION_HOST_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("host.sock"));

        Ok(Self {
            socket_path,
            host_socket_path,
            settings_path: data_dir.join("settings.json"),
            history_path: data_dir.join("history.jsonl"),
            data_dir,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }

    /// Read preferences from disk, falling back to defaults when the file is absent
    pub fn load_preferences(&self) -> Result<Preferences> {
        Preferences::load(&self.settings_path)
    }
}

/// A user-configured key combo bound to a hotkey action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyBinding {
    pub action_name: String,
    pub keys: Vec<String>,
}

/// A dictionary entry; replacement terms carry a destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryTerm {
    pub source: String,
    #[serde(default)]
    pub destination: Option<String>,
}

/// A writing style applied during post-processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tone {
    pub id: String,
    pub name: String,
    pub prompt_template: String,
    #[serde(default)]
    pub disables_post_processing: bool,
}

/// User preferences snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Recording is refused until onboarding is complete
    pub onboarded: bool,
    pub hotkeys: Vec<HotkeyBinding>,
    pub dictionary: Vec<DictionaryTerm>,
    pub tones: Vec<Tone>,
    pub active_tone_id: Option<String>,
    /// BCP-47 style tag, e.g. `en`, `en-US`, `zh-TW`
    pub dictation_language: String,
    pub user_name: Option<String>,
    pub preferred_microphone: Option<String>,
    pub model_size: Option<String>,
    pub post_processing_enabled: bool,
    /// Daily word allowance; `None` means unlimited
    pub word_limit: Option<u64>,
    pub agent_exit_phrases: Vec<String>,
    pub append_trailing_space: bool,
    pub incognito: bool,
    /// Use the built-in modifier listener instead of host `keys_held` events (macOS)
    pub local_key_listener: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            onboarded: true,
            hotkeys: vec![
                HotkeyBinding {
                    action_name: DICTATE_ACTION.to_string(),
                    keys: vec!["control".into(), "option".into()],
                },
                HotkeyBinding {
                    action_name: AGENT_DICTATE_ACTION.to_string(),
                    keys: vec!["control".into(), "command".into()],
                },
            ],
            dictionary: Vec::new(),
            tones: Vec::new(),
            active_tone_id: None,
            dictation_language: "en".to_string(),
            user_name: None,
            preferred_microphone: None,
            model_size: None,
            post_processing_enabled: true,
            word_limit: None,
            agent_exit_phrases: vec![
                "exit agent".to_string(),
                "end conversation".to_string(),
                "goodbye".to_string(),
            ],
            append_trailing_space: false,
            incognito: false,
            local_key_listener: false,
        }
    }
}

impl Preferences {
    /// Load preferences from a JSON file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(?path, "no settings file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let prefs: Preferences = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(?path, bindings = prefs.hotkeys.len(), "settings loaded");
        Ok(prefs)
    }
}

/// Shared, reloadable preferences
#[derive(Debug, Clone, Default)]
pub struct PreferenceHandle {
    inner: Arc<RwLock<Preferences>>,
}

impl PreferenceHandle {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            inner: Arc::new(RwLock::new(prefs)),
        }
    }

    /// Clone of the current preferences
    pub fn snapshot(&self) -> Preferences {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, prefs: Preferences) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = prefs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.settings_path.ends_with("settings.json"));
        assert!(config.history_path.starts_with(&config.data_dir));
    }

    #[test]
    fn test_missing_settings_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Preferences::load(&dir.path().join("settings.json")).unwrap();
        assert!(prefs.onboarded);
        assert_eq!(prefs.hotkeys.len(), 2);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"dictation_language":"zh-TW","word_limit":2000}"#).unwrap();

        let prefs = Preferences::load(&path).unwrap();
        assert_eq!(prefs.dictation_language, "zh-TW");
        assert_eq!(prefs.word_limit, Some(2000));
        assert!(prefs.post_processing_enabled);
    }

    #[test]
    fn test_handle_replace_is_visible_to_clones() {
        let handle = PreferenceHandle::default();
        let other = handle.clone();
        handle.replace(Preferences {
            incognito: true,
            ..Preferences::default()
        });
        assert!(other.snapshot().incognito);
    }
}
