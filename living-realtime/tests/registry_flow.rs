use std::sync::Arc;
use std::time::Duration;

use living_core::{ConnectionState, TopicKey, ERROR_DESTINATION, SUBSCRIBE_INTENT_DESTINATION};
use living_realtime::{
    AppState, ConnectionHookOptions, InvestmentFeedOptions, MemoryTransport, RealtimeConfig,
    RealtimeService,
};
use rust_decimal_macros::dec;

fn service(transport: &Arc<MemoryTransport>) -> RealtimeService {
    RealtimeService::new(RealtimeConfig::new("ws://localhost:8091/ws/reits-realtime"), transport.clone())
}

fn price_body(code: &str, price: &str) -> String {
    format!(
        r#"{{"rt_cd":"0","output":{{"stck_shrn_iscd":"{}","hts_kor_isnm":"리츠","stck_prpr":"{}","prdy_vrss":"10","prdy_ctrt":"0.2","prdy_vrss_sign":"2","acml_vol":"1000"}}}}"#,
        code, price
    )
}

#[test]
fn hooks_sharing_a_topic_share_one_subscription() {
    let transport = Arc::new(MemoryTransport::connected());
    let service = service(&transport);
    let key = TopicKey::price("395400");

    let first = service.price_hook(["395400"]);
    let mut second = service.price_hook(["395400", "338100"]);
    assert_eq!(transport.live_count(&key.destination()), 1);
    assert_eq!(service.registry().ref_count(&key), 2);

    transport.deliver(&key.destination(), &price_body("395400", "5120"));
    assert_eq!(first.get("395400").unwrap().current_price, dec!(5120));
    assert_eq!(second.get("395400").unwrap().current_price, dec!(5120));
    assert!(second.get("338100").is_none());

    second.unmount();
    assert_eq!(transport.live_count(&key.destination()), 1);
    assert_eq!(transport.live_count(&TopicKey::price("338100").destination()), 0);

    // Unmounted hook keeps its last state but stops receiving
    transport.deliver(&key.destination(), &price_body("395400", "5130"));
    assert_eq!(first.get("395400").unwrap().current_price, dec!(5130));
    assert_eq!(second.get("395400").unwrap().current_price, dec!(5120));
}

#[test]
fn pending_topics_materialize_on_connect() {
    let transport = Arc::new(MemoryTransport::new());
    let service = service(&transport);
    let connection = service.connection_hook(ConnectionHookOptions::default());
    let feed = service.investment_feed(InvestmentFeedOptions {
        product_ids: vec!["395400".into(), "338100".into()],
        include_market: true,
        ..Default::default()
    });

    assert_eq!(connection.status().state, ConnectionState::Connecting);
    assert_eq!(service.registry().live_subscription_count(), 0);
    assert_eq!(transport.connect_calls(), 1);

    transport.complete_connect();
    assert!(connection.is_connected());
    assert_eq!(service.registry().live_subscription_count(), 5);
    assert_eq!(transport.live_count(ERROR_DESTINATION), 1);

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, SUBSCRIBE_INTENT_DESTINATION);
    assert_eq!(
        published[0].1,
        r#"{"stock_code":"338100,395400","market_code":"ALL"}"#
    );

    transport.deliver(&TopicKey::price("338100").destination(), &price_body("338100", "4210"));
    assert_eq!(feed.price("338100").unwrap().volume, dec!(1000));
    assert!(feed.price("395400").is_none());
}

#[test]
fn dropped_connection_recovers_on_resume() {
    let transport = Arc::new(MemoryTransport::connected());
    let service = service(&transport);
    let prices = service.price_hook(["395400"]);
    let key = TopicKey::price("395400");

    service.on_app_state_change(AppState::Background);
    transport.drop_connection(Some("app suspended"));
    assert!(!service.registry().is_live(&key));
    assert_eq!(service.registry().ref_count(&key), 1);

    assert!(service.on_app_state_change(AppState::Active));
    assert_eq!(transport.connect_calls(), 1);
    transport.complete_connect();
    assert!(service.registry().is_live(&key));

    transport.deliver(&key.destination(), &price_body("395400", "5200"));
    assert_eq!(prices.get("395400").unwrap().current_price, dec!(5200));

    // Already healthy: no second reconnect
    service.on_app_state_change(AppState::Inactive);
    assert!(!service.on_app_state_change(AppState::Active));
    assert_eq!(transport.connect_calls(), 1);
}

#[test]
fn repeated_mount_cycles_leave_no_residue() {
    let transport = Arc::new(MemoryTransport::connected());
    let service = service(&transport);

    for _ in 0..10 {
        let _feed = service.investment_feed(InvestmentFeedOptions {
            product_ids: vec!["395400".into()],
            include_market: true,
            ..Default::default()
        });
        let _connection = service.connection_hook(ConnectionHookOptions::default());
    }

    assert_eq!(service.registry().topic_count(), 0);
    assert_eq!(service.registry().connection_listener_count(), 0);
    assert_eq!(transport.total_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn quote_subscribes_once_when_connect_beats_fallback() {
    let transport = Arc::new(MemoryTransport::new());
    let service = service(&transport);
    let quote = service.quote_hook("395400");
    let destination = TopicKey::quote("395400").destination();

    tokio::time::sleep(Duration::from_secs(2)).await;
    transport.complete_connect();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let subscribes = transport
        .subscribe_calls()
        .iter()
        .filter(|dest| **dest == destination)
        .count();
    assert_eq!(subscribes, 1);
    assert!(quote.is_subscribed());

    transport.deliver(
        &destination,
        r#"{"rt_cd":"0","output":{"askp1":"5130","bidp1":"5120","askp_rsqn1":"3","bidp_rsqn1":"4"}}"#,
    );
    let book = quote.quote().unwrap().order_book;
    assert_eq!(book.best_ask().unwrap().price, dec!(5130));
    assert_eq!(book.best_bid().unwrap().volume, dec!(4));
}

#[test]
fn rejected_and_malformed_messages_leave_state() {
    let transport = Arc::new(MemoryTransport::connected());
    let service = service(&transport);
    let portfolio = service.portfolio_hook();
    let orders = service.order_hook();

    let portfolio_dest = TopicKey::portfolio().destination();
    let orders_dest = TopicKey::orders().destination();
    transport.deliver(&portfolio_dest, r#"{"rt_cd":"1","msg1":"인증 실패"}"#);
    transport.deliver(&portfolio_dest, "{");
    transport.deliver(&orders_dest, r#"{"rt_cd":"0","output":null}"#);

    assert!(portfolio.portfolio().is_none());
    assert!(orders.updates().is_empty());
    assert!(service.registry().status().last_update.is_none());
}
