//! Application configuration management.
//!
//! Backend credentials come from the process environment (optionally via a
//! `.env` file loaded by the binary):
//!
//! - `SECLEARN_BACKEND_URL`: base URL of the hosted backend
//! - `SECLEARN_BACKEND_KEY`: public API key
//! - `SECLEARN_SITE_URL`: base URL the OAuth flow redirects back to
//!
//! The remaining settings are stored at `~/.config/seclearn/config.json`.
//! Environment values take precedence over the file.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "seclearn";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const ENV_BACKEND_URL: &str = "SECLEARN_BACKEND_URL";
pub const ENV_BACKEND_KEY: &str = "SECLEARN_BACKEND_KEY";
pub const ENV_SITE_URL: &str = "SECLEARN_SITE_URL";

/// Local dev server address of the web front end.
const DEFAULT_SITE_URL: &str = "http://localhost:5173";

/// Path the OAuth provider sends the user back to after signing in.
pub const POST_AUTH_LANDING_PATH: &str = "/dashboard";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub backend_url: Option<String>,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default)]
    pub last_email: Option<String>,
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_key: None,
            site_url: default_site_url(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply the process environment.
    ///
    /// Never fails: an unreadable file falls back to defaults, and missing
    /// credentials only produce a warning.
    pub fn load() -> Self {
        let mut config = match Self::load_file() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.warn_if_unconfigured();
        config
    }

    /// Build a config from environment-style lookups only.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_env(lookup);
        config
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = non_empty(ENV_BACKEND_URL) {
            self.backend_url = Some(url.trim_end_matches('/').to_string());
        }
        if let Some(key) = non_empty(ENV_BACKEND_KEY) {
            self.api_key = Some(key);
        }
        if let Some(site) = non_empty(ENV_SITE_URL) {
            self.site_url = site;
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Both backend credentials are present.
    pub fn is_configured(&self) -> bool {
        self.backend_url.is_some() && self.api_key.is_some()
    }

    pub fn warn_if_unconfigured(&self) {
        if self.backend_url.is_none() {
            warn!(var = ENV_BACKEND_URL, "Backend URL not set, backend calls will fail");
        }
        if self.api_key.is_none() {
            warn!(var = ENV_BACKEND_KEY, "Backend API key not set, backend calls will fail");
        }
    }

    /// Redirect target handed to the OAuth provider.
    pub fn oauth_redirect_url(&self) -> String {
        format!("{}{}", self.site_url.trim_end_matches('/'), POST_AUTH_LANDING_PATH)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the persisted session.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
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
    fn test_from_lookup_full() {
        let config = Config::from_lookup(lookup(&[
            (ENV_BACKEND_URL, "https://abc.example.co/"),
            (ENV_BACKEND_KEY, "anon-key"),
            (ENV_SITE_URL, "https://learn.example.com/"),
        ]));
        assert!(config.is_configured());
        assert_eq!(config.backend_url.as_deref(), Some("https://abc.example.co"));
        assert_eq!(config.api_key.as_deref(), Some("anon-key"));
        assert_eq!(config.oauth_redirect_url(), "https://learn.example.com/dashboard");
    }

    #[test]
    fn test_missing_credentials_do_not_fail() {
        let config = Config::from_lookup(lookup(&[(ENV_BACKEND_KEY, "   ")]));
        assert!(!config.is_configured());
        assert_eq!(config.api_key, None);
        assert_eq!(config.oauth_redirect_url(), "http://localhost:5173/dashboard");
        config.warn_if_unconfigured();
    }

    #[test]
    fn test_file_fields_only() {
        let config: Config =
            serde_json::from_str(r#"{"last_email":"ada@example.com","backend_url":"ignored"}"#)
                .expect("parse config");
        assert_eq!(config.last_email.as_deref(), Some("ada@example.com"));
        assert_eq!(config.site_url, DEFAULT_SITE_URL);
        assert_eq!(config.backend_url, None);

        let saved = serde_json::to_string(&config).expect("serialize config");
        assert!(!saved.contains("backend_url"));
    }
}
