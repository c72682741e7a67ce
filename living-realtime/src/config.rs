//! Realtime feed configuration

use std::env;
use std::time::Duration;

use living_core::{LivingError, LivingResult};
use url::Url;

use crate::hooks::QUOTE_FALLBACK_DELAY;
use crate::transport::stomp::{
    StompConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
};

/// Path of the STOMP endpoint under the investment API
pub const REALTIME_ENDPOINT_PATH: &str = "/ws/reits-realtime";

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Full websocket URL of the STOMP endpoint
    pub ws_url: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub quote_fallback_delay: Duration,
    /// Check connection health when the host resumes
    pub reconnect_on_resume: bool,
}

impl RealtimeConfig {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_outgoing: DEFAULT_HEARTBEAT,
            heartbeat_incoming: DEFAULT_HEARTBEAT,
            quote_fallback_delay: QUOTE_FALLBACK_DELAY,
            reconnect_on_resume: true,
        }
    }

    /// Load configuration from environment variables
    ///
    /// Expects either:
    /// - INVESTMENT_WS_URL: full websocket URL, or
    /// - INVESTMENT_API_URL: http(s) base URL of the investment API
    ///
    /// Optional:
    /// - REALTIME_RECONNECT_DELAY_MS
    /// - REALTIME_MAX_RECONNECT_ATTEMPTS
    /// - REALTIME_HEARTBEAT_MS (both directions)
    pub fn from_env() -> LivingResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> LivingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let ws_url = match (var("INVESTMENT_WS_URL"), var("INVESTMENT_API_URL")) {
            (Some(ws_url), _) => validate_ws_url(&ws_url)?,
            (None, Some(api_url)) => derive_ws_url(&api_url)?,
            (None, None) => {
                return Err(LivingError::config(
                    "INVESTMENT_WS_URL or INVESTMENT_API_URL must be set",
                ))
            }
        };

        let mut config = Self::new(ws_url);

        if let Some(ms) = var("REALTIME_RECONNECT_DELAY_MS") {
            config.reconnect_delay = Duration::from_millis(parse_number("REALTIME_RECONNECT_DELAY_MS", &ms)?);
        }
        if let Some(attempts) = var("REALTIME_MAX_RECONNECT_ATTEMPTS") {
            let attempts = parse_number("REALTIME_MAX_RECONNECT_ATTEMPTS", &attempts)?;
            config.max_reconnect_attempts = u32::try_from(attempts).map_err(|_| {
                LivingError::config(format!("REALTIME_MAX_RECONNECT_ATTEMPTS out of range: {}", attempts))
            })?;
        }
        if let Some(ms) = var("REALTIME_HEARTBEAT_MS") {
            let heartbeat = Duration::from_millis(parse_number("REALTIME_HEARTBEAT_MS", &ms)?);
            config.heartbeat_outgoing = heartbeat;
            config.heartbeat_incoming = heartbeat;
        }

        Ok(config)
    }

    pub fn to_stomp_config(&self) -> StompConfig {
        StompConfig {
            url: self.ws_url.clone(),
            reconnect_delay: self.reconnect_delay,
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_outgoing: self.heartbeat_outgoing,
            heartbeat_incoming: self.heartbeat_incoming,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

fn parse_number(field: &str, raw: &str) -> LivingResult<u64> {
    raw.parse::<u64>()
        .map_err(|e| LivingError::config(format!("{}: {:?} ({})", field, raw, e)))
}

fn validate_ws_url(raw: &str) -> LivingResult<String> {
    let url = Url::parse(raw).map_err(|e| LivingError::config(format!("INVESTMENT_WS_URL: {}", e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(raw.to_string()),
        other => Err(LivingError::config(format!(
            "INVESTMENT_WS_URL must use ws or wss, got {}",
            other
        ))),
    }
}

/// `http(s)://host[/base]` -> `ws(s)://host[/base]/ws/reits-realtime`
fn derive_ws_url(api_url: &str) -> LivingResult<String> {
    let mut url = Url::parse(api_url)
        .map_err(|e| LivingError::config(format!("INVESTMENT_API_URL: {}", e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LivingError::config(format!(
                "INVESTMENT_API_URL has unsupported scheme {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| LivingError::config(format!("Cannot convert {} to a websocket URL", api_url)))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), REALTIME_ENDPOINT_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_derives_ws_url_from_api_url() {
        let config = RealtimeConfig::from_lookup(lookup(&[("INVESTMENT_API_URL", "http://10.0.2.2:8091")])).unwrap();
        assert_eq!(config.ws_url, "ws://10.0.2.2:8091/ws/reits-realtime");

        let config = RealtimeConfig::from_lookup(lookup(&[("INVESTMENT_API_URL", "https://api.example.com/invest/")])).unwrap();
        assert_eq!(config.ws_url, "wss://api.example.com/invest/ws/reits-realtime");
    }

    #[test]
    fn test_explicit_ws_url_wins() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("INVESTMENT_WS_URL", "ws://localhost:9000/stomp"),
            ("INVESTMENT_API_URL", "http://10.0.2.2:8091"),
        ]))
        .unwrap();
        assert_eq!(config.ws_url, "ws://localhost:9000/stomp");
    }

    #[test]
    fn test_missing_url_is_config_error() {
        let err = RealtimeConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, LivingError::Config(_)));

        let err = RealtimeConfig::from_lookup(lookup(&[("INVESTMENT_WS_URL", "http://localhost")])).unwrap_err();
        assert!(matches!(err, LivingError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let config = RealtimeConfig::from_lookup(lookup(&[
            ("INVESTMENT_API_URL", "http://localhost:8091"),
            ("REALTIME_RECONNECT_DELAY_MS", "1500"),
            ("REALTIME_MAX_RECONNECT_ATTEMPTS", "3"),
            ("REALTIME_HEARTBEAT_MS", "10000"),
        ]))
        .unwrap();
        assert_eq!(config.reconnect_delay, Duration::from_millis(1500));
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.heartbeat_incoming, Duration::from_secs(10));

        let stomp = config.to_stomp_config();
        assert_eq!(stomp.url, config.ws_url);
        assert_eq!(stomp.heartbeat_outgoing, Duration::from_secs(10));
    }

    #[test]
    fn test_bad_number_rejected() {
        let err = RealtimeConfig::from_lookup(lookup(&[
            ("INVESTMENT_API_URL", "http://localhost:8091"),
            ("REALTIME_RECONNECT_DELAY_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("REALTIME_RECONNECT_DELAY_MS"));
    }

    #[test]
    fn test_defaults() {
        let config = RealtimeConfig::new("ws://localhost/ws");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.quote_fallback_delay, Duration::from_secs(5));
        assert!(config.reconnect_on_resume);
    }
}
