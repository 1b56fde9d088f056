//! Oracle Engine Integration Tests
//!
//! Exercises the engine through the public API with in-process adapters.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use price_oracle::domain::price::now_millis;
use price_oracle::{
    Adapter, EngineSettings, EngineState, InProcessAdapter, MedianAggregator, MockPriceSource,
    OracleEngine, Price,
};

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

fn source(name: &str, prices: &[(&str, Decimal)]) -> Arc<MockPriceSource> {
    let source = Arc::new(MockPriceSource::new(name));
    for (symbol, price) in prices {
        source.set_price(symbol, *price);
    }
    source
}

fn adapter(source: &Arc<MockPriceSource>) -> Arc<dyn Adapter> {
    Arc::new(InProcessAdapter::new(Arc::clone(source)))
}

#[tokio::test]
async fn two_sources_are_averaged() {
    let engine = OracleEngine::new(symbols(&["NTNUSD"]), EngineSettings::default()).unwrap();
    engine
        .register_adapter(adapter(&source("a", &[("NTNUSD", dec!(1.00))])))
        .unwrap();
    engine
        .register_adapter(adapter(&source("b", &[("NTNUSD", dec!(1.02))])))
        .unwrap();

    let before = now_millis();
    engine.update_prices().await.unwrap();
    let price = engine.get_price("NTNUSD").unwrap();

    assert_eq!(price.price, dec!(1.01));
    assert!(price.timestamp >= before);
}

#[tokio::test]
async fn failing_source_does_not_hide_healthy_one() {
    let engine = OracleEngine::new(symbols(&["NTNUSD"]), EngineSettings::default()).unwrap();
    let broken = source("broken", &[]);
    broken.fail_with("connection refused");
    engine.register_adapter(adapter(&broken)).unwrap();
    engine
        .register_adapter(adapter(&source("ok", &[("NTNUSD", dec!(0.98))])))
        .unwrap();

    let tick = engine.update_prices().await.unwrap();

    assert_eq!(tick.failed_adapters, vec!["broken"]);
    assert_eq!(engine.get_price("NTNUSD").unwrap().price, dec!(0.98));
    assert_eq!(engine.get_prices().len(), 1);
}

#[tokio::test]
async fn freshness_window_boundary() {
    let window = Duration::from_secs(60);
    let engine = OracleEngine::new(
        symbols(&["IN", "OUT"]),
        EngineSettings {
            freshness_window: window,
            ..EngineSettings::default()
        },
    )
    .unwrap();

    let window_ms = i64::try_from(window.as_millis()).unwrap();
    let now = now_millis();
    let feed = Arc::new(MockPriceSource::new("feed"));
    // Leave headroom for the time between here and the tick.
    feed.set_observation(Price::new("IN", dec!(1), now - window_ms + 5_000));
    feed.set_observation(Price::new("OUT", dec!(2), now - window_ms - 1));
    engine.register_adapter(adapter(&feed)).unwrap();

    let tick = engine.update_prices().await.unwrap();

    assert!(engine.get_price("IN").is_some());
    assert!(engine.get_price("OUT").is_none());
    assert_eq!(tick.stale_symbols, vec!["OUT"]);
}

#[tokio::test]
async fn future_timestamps_are_not_fresh() {
    let engine = OracleEngine::new(symbols(&["X"]), EngineSettings::default()).unwrap();
    let feed = Arc::new(MockPriceSource::new("feed"));
    feed.set_observation(Price::new("X", dec!(3), now_millis() + 60_000));
    engine.register_adapter(adapter(&feed)).unwrap();

    engine.update_prices().await.unwrap();
    assert!(engine.get_price("X").is_none());
}

#[tokio::test]
async fn symbol_updates_apply_from_next_tick() {
    let engine = OracleEngine::new(symbols(&["A"]), EngineSettings::default()).unwrap();
    engine
        .register_adapter(adapter(&source("s", &[("A", dec!(1)), ("B", dec!(2))])))
        .unwrap();

    engine.update_prices().await.unwrap();
    assert!(engine.get_price("B").is_none());

    let accepted = engine.update_symbols(symbols(&["A", "B"])).unwrap();
    assert_eq!(accepted, symbols(&["A", "B"]));
    assert_eq!(engine.symbols(), symbols(&["A", "B"]));

    engine.update_prices().await.unwrap();
    assert_eq!(engine.get_price("B").unwrap().price, dec!(2));
}

#[tokio::test]
async fn published_entries_survive_outage() {
    let engine = OracleEngine::new(symbols(&["A"]), EngineSettings::default()).unwrap();
    let feed = source("s", &[("A", dec!(7))]);
    engine.register_adapter(adapter(&feed)).unwrap();
    engine.update_prices().await.unwrap();
    let published = engine.get_price("A").unwrap();

    feed.fail_with("outage");
    let tick = engine.update_prices().await.unwrap();

    // The provider still holds the last good observation, which is fresh.
    assert_eq!(tick.failed_adapters, vec!["s"]);
    assert_eq!(engine.get_price("A").unwrap().price, published.price);
}

#[tokio::test]
async fn median_aggregator_can_replace_mean() {
    let engine = OracleEngine::new(symbols(&["A"]), EngineSettings::default())
        .unwrap()
        .with_aggregator(Arc::new(MedianAggregator));
    for (name, value) in [("a", dec!(10)), ("b", dec!(20)), ("c", dec!(90))] {
        engine
            .register_adapter(adapter(&source(name, &[("A", value)])))
            .unwrap();
    }

    engine.update_prices().await.unwrap();
    assert_eq!(engine.get_price("A").unwrap().price, dec!(20));
}

#[tokio::test]
async fn extreme_prices_do_not_break_the_tick() {
    let large = Decimal::MAX / Decimal::TWO + Decimal::ONE;
    let engine = Arc::new(
        OracleEngine::new(
            symbols(&["X"]),
            EngineSettings {
                tick_interval: Duration::from_millis(20),
                ..EngineSettings::default()
            },
        )
        .unwrap(),
    );
    engine
        .register_adapter(adapter(&source("a", &[("X", large)])))
        .unwrap();
    engine
        .register_adapter(adapter(&source("b", &[("X", large)])))
        .unwrap();

    let tick = engine.update_prices().await.unwrap();
    assert_eq!(tick.published, 1);
    let published = engine.get_price("X").unwrap().price;
    assert!((published - large).abs() <= Decimal::ONE);

    // The loop keeps ticking.
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(engine.last_tick().unwrap().evaluated_at > tick.evaluated_at);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn engine_can_restart() {
    let engine = Arc::new(
        OracleEngine::new(
            symbols(&["A"]),
            EngineSettings {
                tick_interval: Duration::from_millis(20),
                ..EngineSettings::default()
            },
        )
        .unwrap(),
    );
    let feed = source("s", &[("A", dec!(1))]);
    engine.register_adapter(adapter(&feed)).unwrap();

    for _ in 0..2 {
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        tokio::time::sleep(Duration::from_millis(60)).await;
        engine.stop().await.unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    assert!(feed.fetch_count() >= 2);
    assert!(engine.last_tick().is_some());
}
