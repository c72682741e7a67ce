//! Connection state as seen by the UI layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport connection state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        };
        f.write_str(s)
    }
}

/// Snapshot of connection health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// When the current connection was established
    pub connected_at: Option<DateTime<Utc>>,
    /// When the last update was dispatched
    pub last_update: Option<DateTime<Utc>>,
    /// Last transport or server-pushed error
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Human readable status line
    pub fn describe(&self) -> String {
        match (&self.state, &self.last_error) {
            (_, Some(error)) => format!("{} ({})", self.state, error),
            (ConnectionState::Connected, None) => match self.connected_at {
                Some(at) => format!("CONNECTED since {}", at.format("%H:%M:%S")),
                None => "CONNECTED".to_string(),
            },
            (state, None) => state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_disconnected() {
        let status = ConnectionStatus::default();
        assert!(!status.is_connected());
        assert_eq!(status.describe(), "DISCONNECTED");
    }

    #[test]
    fn test_describe_with_error() {
        let status = ConnectionStatus {
            state: ConnectionState::Connected,
            last_error: Some("market closed".to_string()),
            ..Default::default()
        };
        assert_eq!(status.describe(), "CONNECTED (market closed)");
    }
}
