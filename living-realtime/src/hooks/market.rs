use std::sync::Arc;

use chrono::Utc;
use living_core::{MarketUpdate, TopicKey, Update};
use tokio::sync::watch;

use super::{Mount, Snapshot};
use crate::registry::SubscriptionRegistry;

/// Market-wide REITs snapshot
pub struct MarketHook {
    mount: Mount,
    state: Arc<watch::Sender<Snapshot<MarketUpdate>>>,
}

impl MarketHook {
    pub fn mount(registry: &SubscriptionRegistry) -> Self {
        let (state, _) = watch::channel(Snapshot::default());
        let state = Arc::new(state);
        let mut mount = Mount::new(registry);
        let key = TopicKey::market();

        let sink = Arc::clone(&state);
        mount.listen(&key, move |update| {
            if let Update::Market(market) = update {
                sink.send_modify(|snapshot| {
                    snapshot.value = Some(market.clone());
                    snapshot.last_updated = Some(Utc::now());
                });
            }
        });
        mount.subscribe(&key);

        Self { mount, state }
    }

    pub fn market(&self) -> Option<MarketUpdate> {
        self.state.borrow().value.clone()
    }

    pub fn snapshot(&self) -> Snapshot<MarketUpdate> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<MarketUpdate>> {
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

    #[test]
    fn test_market_snapshot_replaced() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = MarketHook::mount(&registry);
        let dest = TopicKey::market().destination();

        transport.deliver(
            &dest,
            r#"{"rt_cd":"0","reits_list":[{"stck_shrn_iscd":"395400","stck_prpr":"5120"}]}"#,
        );
        transport.deliver(
            &dest,
            r#"{"rt_cd":"0","reits_list":[{"stck_shrn_iscd":"338100","stck_prpr":"4210"},{"stck_shrn_iscd":"395400","stck_prpr":"5130"}]}"#,
        );

        let market = hook.market().unwrap();
        assert_eq!(market.reits.len(), 2);
        assert!(market.find("338100").is_some());
    }

    #[test]
    fn test_null_names_and_bad_items_keep_snapshot() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = MarketHook::mount(&registry);

        transport.deliver(
            &TopicKey::market().destination(),
            r#"{"rt_cd":"0","reits_list":[{"stck_shrn_iscd":"395400","hts_kor_isnm":null,"stck_prpr":"5120"},{"stck_shrn_iscd":"338100","hts_kor_isnm":"ESR켄달스퀘어리츠","stck_prpr":"4210"},{"stck_shrn_iscd":"330590","stck_prpr":"-"}]}"#,
        );

        let market = hook.market().unwrap();
        assert_eq!(market.reits.len(), 2);
        assert_eq!(market.find("395400").unwrap().name, "");
        assert!(market.find("330590").is_none());
    }

    #[test]
    fn test_output_field_is_not_a_market_payload() {
        let transport = Arc::new(MemoryTransport::connected());
        let registry = SubscriptionRegistry::new(transport.clone());
        let hook = MarketHook::mount(&registry);

        transport.deliver(
            &TopicKey::market().destination(),
            r#"{"rt_cd":"0","output":[{"stck_shrn_iscd":"395400","stck_prpr":"5120"}]}"#,
        );
        assert_eq!(hook.snapshot(), Snapshot::default());
    }
}
