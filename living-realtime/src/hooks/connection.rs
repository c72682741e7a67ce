use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use living_core::ConnectionStatus;
use tokio::sync::watch;

use crate::lifecycle::{AppState, LifecycleController};
use crate::registry::{ListenerId, SubscriptionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionHookOptions {
    /// Request a connection on mount when disconnected
    pub auto_connect: bool,
    /// Run a health check when the host returns to the foreground
    pub reconnect_on_app_active: bool,
}

impl Default for ConnectionHookOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            reconnect_on_app_active: true,
        }
    }
}

/// Reactive mirror of the connection status
pub struct ConnectionHook {
    registry: SubscriptionRegistry,
    options: ConnectionHookOptions,
    active: Arc<AtomicBool>,
    listener: Option<ListenerId>,
    lifecycle: LifecycleController,
    state: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionHook {
    pub fn mount(registry: &SubscriptionRegistry, options: ConnectionHookOptions) -> Self {
        let (state, _) = watch::channel(registry.status());
        let state = Arc::new(state);
        let active = Arc::new(AtomicBool::new(true));

        let sink = Arc::clone(&state);
        let flag = Arc::clone(&active);
        let listener = registry.on_connection(Arc::new(move |status: &ConnectionStatus| {
            if flag.load(Ordering::SeqCst) {
                sink.send_replace(status.clone());
            }
        }));

        let hook = Self {
            registry: registry.clone(),
            options,
            active,
            listener: Some(listener),
            lifecycle: LifecycleController::new(Arc::new(registry.clone())),
            state,
        };

        if options.auto_connect && !registry.is_connected() {
            hook.connect();
        }
        hook
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.state.subscribe()
    }

    pub fn connect(&self) {
        self.registry.connect();
    }

    pub fn disconnect(&self) {
        self.registry.disconnect();
    }

    /// Forward a host state change. Returns true when a reconnect was issued.
    pub fn on_app_state_change(&self, next: AppState) -> bool {
        if !self.options.reconnect_on_app_active {
            return false;
        }
        self.lifecycle.on_app_state_change(next)
    }

    pub fn unmount(&mut self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = self.listener.take() {
            self.registry.remove_connection_listener(id);
        }
    }
}

impl Drop for ConnectionHook {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl std::fmt::Debug for ConnectionHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHook")
            .field("options", &self.options)
            .field("status", &self.status().describe())
            .finish()
    }
}
