//! Routing and identity benchmarks
//!
//! Measures the per-message cost of the hot path: identity derivation, wire
//! message building, inbound parsing and kind matching.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hyperstream_exchanges::hyperliquid::{subscribe_message, InboundMessage, SubscriptionId, SubscriptionKind, SubscriptionParams};

fn identity_benchmark(c: &mut Criterion) {
    let params = SubscriptionParams::new().with("coin", "BTC").with("interval", "1m");

    c.bench_function("subscription_id_derive", |b| {
        b.iter(|| SubscriptionId::derive(black_box(SubscriptionKind::Candle), black_box(&params)))
    });

    c.bench_function("subscribe_message_build", |b| {
        b.iter(|| subscribe_message(black_box(SubscriptionKind::Candle), black_box(&params)))
    });
}

fn routing_benchmark(c: &mut Criterion) {
    let trades = r#"{"channel":"trades","data":[{"coin":"BTC","side":"B","px":"64250.5","sz":"0.015","time":1700000000000}]}"#;
    let book = r#"{"channel":"l2Book","data":{"coin":"ETH","levels":[[{"px":"3100.1","sz":"4.2","n":3}],[{"px":"3100.4","sz":"1.1","n":1}]]}}"#;

    c.bench_function("inbound_parse_trades", |b| b.iter(|| InboundMessage::parse(black_box(trades))));
    c.bench_function("inbound_parse_l2book", |b| b.iter(|| InboundMessage::parse(black_box(book))));

    c.bench_function("kind_match_all", |b| {
        b.iter(|| {
            SubscriptionKind::ALL
                .iter()
                .filter(|kind| kind.matches_channel(black_box("l2Book@ETH")))
                .count()
        })
    });
}

criterion_group!(benches, identity_benchmark, routing_benchmark);
criterion_main!(benches);
