use std::fs;
use std::path::Path;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;

/// Request options shared by every call made through one [`crate::eurostat::Client`].
///
/// Built once by the caller and never mutated afterwards; a different set of
/// options means a different client.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub timeout: Duration,
    /// Full proxy URL, credentials included (see [`ProxySettings::to_url`]).
    pub proxy: Option<String>,
    pub verify_tls: bool,
    /// Pause between two polls of an async job.
    pub poll_interval: Duration,
    /// Give up on an async job after this long.
    pub poll_timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy: None,
            verify_tls: true,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }
}

/// Proxy host plus optional credentials, as written in the configuration file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ProxySettings {
    pub url: String, // http://host:port
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxySettings {
    /// Splices the credentials into the proxy URL, percent-encoding the password.
    pub fn to_url(&self) -> Result<String, ConfigError> {
        let (scheme, host) = match self.url.split_once("//") {
            Some((scheme, host)) if scheme.ends_with(':') && host.contains(':') => (scheme, host),
            _ => {
                return Err(ConfigError::InvalidProxy {
                    proxy: self.url.clone(),
                    reason: "proxy host must be in the form 'http://url:port'".to_owned(),
                })
            }
        };

        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                let password = utf8_percent_encode(password, NON_ALPHANUMERIC);
                Ok(format!("{}//{}:{}@{}", scheme, user, password, host))
            }
            (Some(user), None) => Ok(format!("{}//{}@{}", scheme, user, host)),
            _ => Ok(format!("{}//{}", scheme, host)),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    timeout_secs: Option<u64>,
    verify_tls: Option<bool>,
    poll_interval_ms: Option<u64>,
    poll_timeout_secs: Option<u64>,
    proxy: Option<ProxySettings>,
}

impl RequestConfig {
    /// Reads a TOML file; keys that are absent keep their defaults.
    pub fn from_file(path: &Path) -> Result<RequestConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        RequestConfig::from_toml(&text).map_err(|error| match error {
            ConfigError::Toml { source, .. } => ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<RequestConfig, ConfigError> {
        let file: ConfigFile = toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: Default::default(),
            source,
        })?;

        let mut config = RequestConfig::default();
        if let Some(secs) = file.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(verify) = file.verify_tls {
            config.verify_tls = verify;
        }
        if let Some(ms) = file.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = file.poll_timeout_secs {
            config.poll_timeout = Duration::from_secs(secs);
        }
        if let Some(proxy) = file.proxy {
            config.proxy = Some(proxy.to_url()?);
        }

        Ok(config)
    }
}
