//! Connectivity health checks driven by the host application
//!
//! Any host (mobile foreground event, desktop window focus, server-side
//! heartbeat) reports state changes here. Reconnection is best effort: nothing
//! published while disconnected is replayed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::registry::SubscriptionRegistry;

/// Host application state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppState {
    Active,
    Inactive,
    Background,
}

impl AppState {
    /// Not in the foreground
    pub fn is_idle(&self) -> bool {
        matches!(self, AppState::Inactive | AppState::Background)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Active => "active",
            AppState::Inactive => "inactive",
            AppState::Background => "background",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AppState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" | "foreground" | "focused" => Ok(AppState::Active),
            "inactive" | "blurred" => Ok(AppState::Inactive),
            "background" | "hidden" => Ok(AppState::Background),
            _ => Err(format!("Unknown app state: {}", s)),
        }
    }
}

/// Something whose connection can be checked and restored
pub trait ConnectivityCheck: Send + Sync {
    fn is_connected(&self) -> bool;

    fn reconnect(&self);
}

impl ConnectivityCheck for SubscriptionRegistry {
    fn is_connected(&self) -> bool {
        SubscriptionRegistry::is_connected(self)
    }

    fn reconnect(&self) {
        self.connect();
    }
}

/// Bridges host state transitions to connection health
pub struct LifecycleController {
    check: Arc<dyn ConnectivityCheck>,
    current: Mutex<AppState>,
}

impl LifecycleController {
    pub fn new(check: Arc<dyn ConnectivityCheck>) -> Self {
        Self::with_initial_state(check, AppState::Active)
    }

    pub fn with_initial_state(check: Arc<dyn ConnectivityCheck>, initial: AppState) -> Self {
        Self {
            check,
            current: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> AppState {
        *self.current.lock()
    }

    /// Record a host state change. Returns true when a reconnect was issued.
    pub fn on_app_state_change(&self, next: AppState) -> bool {
        let previous = std::mem::replace(&mut *self.current.lock(), next);
        debug!("[Lifecycle] {} -> {}", previous, next);

        if previous.is_idle() && next == AppState::Active {
            self.check_health()
        } else {
            false
        }
    }

    /// Reconnect if the check reports no connection
    pub fn check_health(&self) -> bool {
        if self.check.is_connected() {
            return false;
        }
        info!("[Lifecycle] Connection not healthy, reconnecting");
        self.check.reconnect();
        true
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("current", &self.current())
            .finish()
    }
}
