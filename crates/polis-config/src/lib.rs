//! Shared configuration for polis deployments.
//!
//! TOML profiles, credential resolution (env-var indirection with a
//! plaintext fallback), and translation to `polis_core::EngineConfig`.
//! The embedding application picks a profile; core never touches disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use polis_core::{EngineConfig, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no service key configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named platform profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default)]
    pub insecure: bool,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// A named platform profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Platform base URL (e.g., "https://office-db.example.org").
    pub platform: String,

    /// Service key (plaintext — prefer `service_key_env`).
    pub service_key: Option<String>,

    /// Environment variable name containing the service key.
    pub service_key_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "polis", "polis").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("polis");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load a Config from an explicit path + environment.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("POLIS_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write to an explicit path.
pub fn save_config_to(cfg: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the platform service key for a profile.
///
/// Chain: `service_key_env` env-var indirection, then the plaintext
/// `service_key` field.
pub fn resolve_service_key(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    if let Some(ref env_name) = profile.service_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    if let Some(ref key) = profile.service_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

// ── Engine config translation ───────────────────────────────────────

/// Build an `EngineConfig` from a profile.
pub fn profile_to_engine_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<EngineConfig, ConfigError> {
    let url: url::Url = profile
        .platform
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "platform".into(),
            reason: format!("invalid URL: {}", profile.platform),
        })?;

    let service_key = resolve_service_key(profile, profile_name)?;

    let tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = EngineConfig::new(url, service_key);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(default_timeout()));
    Ok(config)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn profile(platform: &str) -> Profile {
        Profile {
            platform: platform.into(),
            service_key: Some("sk-test".into()),
            service_key_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
        }
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut cfg = Config::default();
        cfg.profiles.insert("office".into(), profile("https://db.example.org"));

        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.default_profile.as_deref(), Some("default"));
        assert_eq!(parsed.profiles["office"].platform, "https://db.example.org");
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "office"

[profiles.office]
platform = "https://db.example.org"
service_key = "sk-test"
timeout = 10
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("office"));
        assert_eq!(cfg.profiles["office"].timeout, Some(10));
    }

    #[test]
    fn plaintext_service_key_resolves() {
        let key = resolve_service_key(&profile("https://db.example.org"), "office").unwrap();
        use secrecy::ExposeSecret;
        assert_eq!(key.expose_secret(), "sk-test");
    }

    #[test]
    fn missing_service_key_is_an_error() {
        let mut p = profile("https://db.example.org");
        p.service_key = None;

        let result = resolve_service_key(&p, "office");
        assert!(matches!(result, Err(ConfigError::NoCredentials { .. })));
    }

    #[test]
    fn profile_translates_to_engine_config() {
        let mut p = profile("https://db.example.org");
        p.timeout = Some(5);
        p.insecure = Some(true);

        let cfg = profile_to_engine_config(&p, "office").unwrap();
        assert_eq!(cfg.url.as_str(), "https://db.example.org/");
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert!(matches!(cfg.tls, TlsVerification::DangerAcceptInvalid));
    }

    #[test]
    fn invalid_platform_url_is_rejected() {
        let result = profile_to_engine_config(&profile("not a url"), "office");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }
}
