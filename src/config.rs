// Ambient settings that are not part of the positional command line.

use crate::error::{Result, UploadError};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org/bot";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const ENV_API_BASE: &str = "TG_UPLOADER_API_BASE";
const ENV_STATE_FILE: &str = "TG_UPLOADER_STATE_FILE";
const ENV_TIMEOUT_SECS: &str = "TG_UPLOADER_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploaderConfig {
    /// Prefix the token and method are appended to, e.g.
    /// `https://api.telegram.org/bot` + `<token>/sendAudio`.
    pub api_base: String,
    /// Where the last successful upload time is kept.
    pub state_path: PathBuf,
    pub timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            state_path: default_state_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl UploaderConfig {
    /// Read overrides from `TG_UPLOADER_*` environment variables and fall
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(base) = lookup(ENV_API_BASE).filter(|v| !v.is_empty()) {
            config.api_base = base;
        }
        if let Some(path) = lookup(ENV_STATE_FILE).filter(|v| !v.is_empty()) {
            config.state_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS).filter(|v| !v.is_empty()) {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                UploadError::InvalidArgument(format!(
                    "{} must be a number of seconds, got {:?}",
                    ENV_TIMEOUT_SECS, secs
                ))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// `<local data dir>/tg-uploader/last_upload.txt`, or the working
/// directory when the platform has no data dir.
pub fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tg-uploader"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("last_upload.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = UploaderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert!(config.state_path.ends_with("last_upload.txt"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = UploaderConfig::from_lookup(lookup(&[
            ("TG_UPLOADER_API_BASE", "http://127.0.0.1:9000/bot"),
            ("TG_UPLOADER_STATE_FILE", "/tmp/tg/last.txt"),
            ("TG_UPLOADER_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:9000/bot");
        assert_eq!(config.state_path, PathBuf::from("/tmp/tg/last.txt"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let err = UploaderConfig::from_lookup(lookup(&[("TG_UPLOADER_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
    }
}
