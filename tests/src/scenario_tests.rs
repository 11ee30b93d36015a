use crate::{mock_streams, TEST_ACCOUNT};
use hyperstream_core::run_stream;
use hyperstream_exchanges::hyperliquid::mock::wait_for;
use hyperstream_exchanges::prelude::*;
use rstest::rstest;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

fn counts(streams: &HyperliquidStreams) -> Vec<(SubscriptionKind, u64)> {
    streams
        .list_active_subscriptions()
        .into_iter()
        .map(|info| (info.subscription_type, info.messages_received))
        .collect()
}

#[rstest]
#[case(&["l2Book", "trades", "bogus"], None)]
#[case(&["userFills"], None)]
#[case(&["trades", "candle"], Some("7m"))]
#[case(&[], None)]
fn test_invalid_market_data_leaves_no_subscription(#[case] data_types: &[&str], #[case] interval: Option<&str>) {
    run_stream(move || async move {
        let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
        streams.start().await.unwrap();

        let result = streams
            .subscribe_market_data_with_interval("BTC", data_types, interval, None)
            .await;

        assert!(matches!(result, Err(StreamError::Validation(_))));
        assert!(streams.list_active_subscriptions().is_empty());
        assert!(transport.sent().is_empty());
        streams.stop().await;
    })
    .unwrap();
}

#[rstest]
#[case("1m")]
#[case("4h")]
#[case("1M")]
fn test_candle_intervals_reach_the_wire(#[case] interval: &str) {
    run_stream(move || async move {
        let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
        streams.start().await.unwrap();

        streams
            .subscribe_market_data_with_interval("SOL", &["candle"], Some(interval), None)
            .await
            .unwrap();

        let expected = format!(
            r#"{{"method":"subscribe","subscription":{{"type":"candle","coin":"SOL","interval":"{interval}"}}}}"#
        );
        assert_eq!(transport.sent(), vec![expected]);
        streams.stop().await;
    })
    .unwrap();
}

#[monoio::test(timer_enabled = true)]
async fn test_identical_requests_share_one_wire_subscription() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
    streams.start().await.unwrap();

    let first = streams.subscribe_market_data("BTC", &["trades"], None).await.unwrap();
    let second = streams
        .subscribe_market_data("BTC", &["trades"], Some(MessageCallback::sync(|_| Ok(()))))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(streams.list_active_subscriptions().len(), 1);
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_routing_is_by_kind_only() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
    streams.start().await.unwrap();

    let hits = Rc::new(RefCell::new(0u32));
    for coin in ["BTC", "ETH"] {
        let hits = hits.clone();
        let callback = MessageCallback::sync(move |_| {
            *hits.borrow_mut() += 1;
            Ok(())
        });
        streams.subscribe_market_data(coin, &["trades"], Some(callback)).await.unwrap();
    }
    streams.subscribe_market_data("BTC", &["l2Book"], None).await.unwrap();

    transport.push_inbound(r#"{"channel":"trades","data":[{"coin":"SOL"}]}"#);
    assert!(streams.next_message(Duration::from_secs(1)).await.is_some());

    assert_eq!(*hits.borrow(), 2);
    assert_eq!(
        counts(&streams),
        vec![
            (SubscriptionKind::Trades, 1),
            (SubscriptionKind::Trades, 1),
            (SubscriptionKind::L2Book, 0),
        ]
    );
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_counters_only_grow() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default().with_account(TEST_ACCOUNT), 1);
    streams.start().await.unwrap();
    streams.subscribe_user_events(None).await.unwrap();

    for expected in 1..=3u64 {
        transport.push_inbound(r#"{"channel":"userEvents","data":{}}"#);
        streams.next_message(Duration::from_secs(1)).await.unwrap();
        assert_eq!(counts(&streams), vec![(SubscriptionKind::UserEvents, expected)]);

        // Unrelated operations leave the counter alone.
        streams.subscribe_market_data("BTC", &["trades"], None).await.unwrap();
        let trades = SubscriptionId::derive(
            SubscriptionKind::Trades,
            &SubscriptionParams::new().with("coin", "BTC"),
        );
        streams.unsubscribe(&trades).await.unwrap();
        assert_eq!(counts(&streams), vec![(SubscriptionKind::UserEvents, expected)]);
    }
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_async_and_poll_delivery_together() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
    streams.start().await.unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    let callback = MessageCallback::from_async(move |message: InboundMessage| {
        let log = log.clone();
        async move {
            monoio::time::sleep(Duration::from_millis(1)).await;
            log.borrow_mut().push(message.channel);
            Ok(())
        }
    });
    streams.subscribe_market_data("ETH", &["l2Book"], Some(callback)).await.unwrap();

    transport.push_inbound(r#"{"channel":"l2Book@ETH","data":{"levels":[]}}"#);
    let queued = streams.next_message(Duration::from_secs(1)).await.unwrap();

    assert_eq!(queued.data["data"]["levels"], serde_json::json!([]));
    assert_eq!(*seen.borrow(), vec!["l2Book@ETH".to_string()]);
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_reconnect_replays_each_subscription_once() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default().with_account(TEST_ACCOUNT), 30);
    streams.start().await.unwrap();
    streams.subscribe_order_updates(None).await.unwrap();
    streams.subscribe_market_data("BTC", &["trades"], None).await.unwrap();
    let before = transport.sent();
    assert_eq!(before.len(), 3);

    transport.drop_connection();
    assert!(wait_for(|| !streams.is_connected(), Duration::from_secs(1)).await);

    // Added while the supervisor is backing off: rejected, nothing retained.
    let during = streams.subscribe_market_data("ETH", &["trades"], None).await;
    assert!(matches!(during, Err(StreamError::Subscription(_))));

    assert!(wait_for(|| transport.sent().len() == 6, Duration::from_secs(2)).await);
    assert_eq!(transport.sent()[3..], before[..]);

    // Added after the reconnect: sent exactly once.
    streams.subscribe_market_data("ETH", &["trades"], None).await.unwrap();
    monoio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent().len(), 7);
    assert_eq!(streams.list_active_subscriptions().len(), 4);
    assert_eq!(streams.connection_stats().reconnections, 1);
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_backoff_is_bounded() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default(), 1);
    streams.start().await.unwrap();
    streams.subscribe_market_data("BTC", &["trades"], None).await.unwrap();

    transport.fail_next_opens(100);
    transport.drop_connection();
    assert!(
        wait_for(
            || streams.connection_stats().state == ConnectionState::Failed,
            Duration::from_secs(1)
        )
        .await
    );

    let opens = transport.open_count();
    assert_eq!(opens, 1 + 3);
    monoio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.open_count(), opens);

    // The registry outlives the failure and is replayed by an explicit start.
    transport.fail_next_opens(0);
    streams.start().await.unwrap();
    assert_eq!(transport.sent().len(), 2);
    streams.stop().await;
}

#[monoio::test(timer_enabled = true)]
async fn test_stop_interrupts_backoff() {
    let (streams, transport) = mock_streams(HyperliquidConfig::default(), 60_000);
    streams.start().await.unwrap();

    transport.drop_connection();
    assert!(
        wait_for(
            || streams.connection_stats().state == ConnectionState::Reconnecting,
            Duration::from_secs(1)
        )
        .await
    );

    let stopped = monoio::time::timeout(Duration::from_secs(1), streams.stop()).await;
    assert!(stopped.is_ok());
    assert_eq!(streams.connection_stats().state, ConnectionState::Stopped);
    assert_eq!(transport.open_count(), 1);
}

#[monoio::test(timer_enabled = true)]
async fn test_order_updates_scenario_through_commands() {
    let transport = hyperstream_exchanges::hyperliquid::mock::MockTransport::new();
    let config = HyperliquidConfig::default()
        .with_account(TEST_ACCOUNT)
        .with_ws_url("wss://mock.local/ws")
        .with_receive_timeout_ms(20);
    let context = AppContext::new(config, Rc::new(transport.clone())).unwrap();
    let commands = context.stream_commands();

    let response = commands.execute("subscribe_order_updates", &serde_json::Value::Null).await;
    assert_eq!(response["success"], true);

    let active = commands.get_active_subscriptions();
    assert_eq!(active["total_subscriptions"], 2);
    for subscription in active["subscriptions"].as_array().unwrap() {
        assert_eq!(subscription["params"]["user"], TEST_ACCOUNT);
        assert_eq!(subscription["messages_received"], 0);
    }

    transport.push_inbound(r#"{"channel":"orderUpdates","data":[{"order":{"oid":7}}]}"#);
    let polled = commands
        .execute("get_next_message", &serde_json::json!({ "timeout_ms": 1000 }))
        .await;
    assert_eq!(polled["message"]["data"]["data"][0]["order"]["oid"], 7);

    let active = commands.get_active_subscriptions();
    let received: Vec<(String, u64)> = active["subscriptions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| {
            (
                s["subscription_type"].as_str().unwrap().to_string(),
                s["messages_received"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        received,
        vec![("orderUpdates".to_string(), 1), ("userFills".to_string(), 0)]
    );

    commands.stop().await;
}
