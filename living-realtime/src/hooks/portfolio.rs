use std::sync::Arc;

use chrono::Utc;
use living_core::{PortfolioUpdate, TopicKey, Update};
use tokio::sync::watch;

use super::{Mount, Snapshot};
use crate::registry::SubscriptionRegistry;

/// Portfolio valuation of the signed-in user
pub struct PortfolioHook {
    mount: Mount,
    state: Arc<watch::Sender<Snapshot<PortfolioUpdate>>>,
}

impl PortfolioHook {
    pub fn mount(registry: &SubscriptionRegistry) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        let state = Arc::new(state);
        let mut mount = Mount::new(registry);
        let key = TopicKey::portfolio();

        let sink = Arc::clone(&state);
        mount.listen(&key, move |update| {
            if let Update::Portfolio(portfolio) = update {
                sink.send_modify(|snapshot| {
                    snapshot.value = Some(portfolio.clone());
                    snapshot.last_updated = Some(Utc::now());
                });
            }
        });
        mount.subscribe(&key);

        Self { mount, state }
    }

    pub fn portfolio(&self) -> Option<PortfolioUpdate> {
        self.state.borrow().value.clone()
    }

    pub fn snapshot(&self) -> Snapshot<PortfolioUpdate> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<PortfolioUpdate>> {
        self.state.subscribe()
    }

    pub fn unmount(&mut self) {
        self.mount.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use rust_decimal_macros::dec;

    #[test]
    fn test_latest_snapshot_wins() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = PortfolioHook::mount(&registry);
        let dest = TopicKey::portfolio().destination();

        transport.deliver(
            &dest,
            r#"{"rt_cd":"0","output":{"userId":1,"totalValue":100,"totalProfitLoss":0,"totalProfitLossRate":0}}"#,
        );
        transport.deliver(
            &dest,
            r#"{"rt_cd":"0","output":{"userId":1,"totalValue":250,"totalProfitLoss":50,"totalProfitLossRate":25}}"#,
        );

        let snapshot = hook.snapshot();
        assert_eq!(snapshot.value.unwrap().total_value, dec!(250));
        assert!(snapshot.last_updated.is_some());
    }

    #[test]
    fn test_malformed_leaves_state_untouched() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = PortfolioHook::mount(&registry);

        let before = hook.snapshot();
        transport.deliver(
            &TopicKey::portfolio().destination(),
            r#"{"rt_cd":"0","output":{"totalValue":"lots"}}"#,
        );
        assert_eq!(hook.snapshot(), before);
    }
}
