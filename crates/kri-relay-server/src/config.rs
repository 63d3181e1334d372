//! Configuration loading and resolution.
//!
//! Values come from CLI flags first, then environment variables, then defaults.

use std::time::Duration;

use kri_relay::portal::KRI_ORIGIN;
use kri_relay::{Credentials, DEFAULT_SESSION_TTL};
use url::Url;

/// Listen address when neither `--addr` nor `PORT` is given.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Per-request timeout towards the portal.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Errors while resolving configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{key} must be a whole number, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} is not a valid URL: {reason}")]
    InvalidUrl { key: &'static str, reason: String },
}

/// Fully resolved relay configuration.
///
/// Not `Debug`; log [`RelayConfig::redacted`] instead.
#[derive(Clone)]
pub struct RelayConfig {
    pub addr: String,
    /// Expected `x-api-token`; without one every guarded route answers 401.
    pub api_token: Option<String>,
    pub credentials: Credentials,
    pub session_ttl: Duration,
    pub timeout: Duration,
    pub portal_origin: String,
    pub search_url: Option<Url>,
    pub mobile_warmup_url: Option<Url>,
}

impl RelayConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let addr = get("PORT")
            .map(|port| format!("0.0.0.0:{}", port.trim()))
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        let credentials = match (get("KRI_ID_B64"), get("KRI_PW_B64"), get("KRI_ID"), get("KRI_PW")) {
            (Some(id_b64), Some(pw_b64), _, _) => {
                Credentials::from_encoded(id_b64, pw_b64, get("KRI_UID"), get("KRI_UPW"))
            }
            (_, _, Some(id), Some(pw)) => Credentials::from_plain(id, pw),
            _ => Credentials::from_encoded("", "", None, None),
        };

        let session_ttl = match get("KRI_SESSION_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_number("KRI_SESSION_TTL_SECS", &v)?),
            None => DEFAULT_SESSION_TTL,
        };
        let timeout = match get("KRI_TIMEOUT_MS") {
            Some(v) => Duration::from_millis(parse_number("KRI_TIMEOUT_MS", &v)?),
            None => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            addr,
            api_token: get("API_TOKEN"),
            credentials,
            session_ttl,
            timeout,
            portal_origin: get("KRI_ORIGIN").unwrap_or_else(|| KRI_ORIGIN.to_string()),
            search_url: get("KRI_SEARCH_URL")
                .map(|v| parse_url("KRI_SEARCH_URL", &v))
                .transpose()?,
            mobile_warmup_url: get("KRI_MOBILE_WARMUP_URL")
                .map(|v| parse_url("KRI_MOBILE_WARMUP_URL", &v))
                .transpose()?,
        })
    }

    /// Apply CLI overrides.
    pub fn with_overrides(mut self, addr: Option<String>, token: Option<String>) -> Self {
        if let Some(addr) = addr {
            self.addr = addr;
        }
        if token.is_some() {
            self.api_token = token;
        }
        self
    }

    /// Configuration as JSON with every secret replaced by its presence.
    pub fn redacted(&self) -> serde_json::Value {
        serde_json::json!({
            "addr": self.addr,
            "api_token": self.api_token.is_some(),
            "credentials": self.credentials.is_complete(),
            "session_ttl_secs": self.session_ttl.as_secs(),
            "timeout_ms": self.timeout.as_millis() as u64,
            "portal_origin": self.portal_origin,
            "search_url": self.search_url.as_ref().map(Url::as_str),
            "mobile_warmup_url": self.mobile_warmup_url.as_ref().map(Url::as_str),
        })
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|e| ConfigError::InvalidUrl {
        key,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve(&[]).unwrap();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert!(config.api_token.is_none());
        assert!(!config.credentials.is_complete());
        assert_eq!(config.session_ttl, DEFAULT_SESSION_TTL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.portal_origin, KRI_ORIGIN);
    }

    #[test]
    fn test_encoded_credentials_preferred() {
        let config = resolve(&[
            ("KRI_ID_B64", "cmVzZWFyY2hlcg=="),
            ("KRI_PW_B64", "cEBzcw=="),
            ("KRI_ID", "ignored"),
            ("KRI_PW", "ignored"),
        ])
        .unwrap();
        assert_eq!(config.credentials.uid(), "researcher");
        assert_eq!(config.credentials.upw(), "p@ss");
    }

    #[test]
    fn test_plain_credentials_encoded() {
        let config = resolve(&[("KRI_ID", "researcher"), ("KRI_PW", "p@ss")]).unwrap();
        assert_eq!(config.credentials.id_b64(), "cmVzZWFyY2hlcg==");
    }

    #[test]
    fn test_port_and_numbers() {
        let config = resolve(&[
            ("PORT", "8080"),
            ("KRI_SESSION_TTL_SECS", "60"),
            ("KRI_TIMEOUT_MS", "1500"),
            ("API_TOKEN", "t0k"),
        ])
        .unwrap();
        assert_eq!(config.addr, "0.0.0.0:8080");
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.api_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            resolve(&[("KRI_TIMEOUT_MS", "soon")]),
            Err(ConfigError::InvalidNumber { key: "KRI_TIMEOUT_MS", .. })
        ));
        assert!(matches!(
            resolve(&[("KRI_MOBILE_WARMUP_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = resolve(&[("PORT", "8080"), ("API_TOKEN", "env")])
            .unwrap()
            .with_overrides(Some("127.0.0.1:9000".into()), Some("cli".into()));
        assert_eq!(config.addr, "127.0.0.1:9000");
        assert_eq!(config.api_token.as_deref(), Some("cli"));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let config = resolve(&[("KRI_ID", "researcher"), ("KRI_PW", "p@ss"), ("API_TOKEN", "t0k")]).unwrap();
        let shown = config.redacted().to_string();
        assert!(!shown.contains("researcher"));
        assert!(!shown.contains("t0k"));
        assert!(shown.contains("\"credentials\":true"));
    }
}
