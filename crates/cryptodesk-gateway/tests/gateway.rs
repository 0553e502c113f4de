use std::sync::Arc;
use std::time::Duration;

use cryptodesk_gateway::test_support::{gateway_with, ticker_payload, MockSource};
use cryptodesk_gateway::{Gateway, GatewayError, RetryPolicy, SourceError, TokenBucket};
use rust_decimal_macros::dec;

#[tokio::test]
async fn fetch_within_ttl_makes_one_upstream_call() {
    let source = Arc::new(MockSource::new("primary").with_price(dec!(50000)));
    let gateway = gateway_with(vec![source.clone()], Duration::from_secs(60));

    let first = gateway.fetch("BTC").await.unwrap();
    let second = gateway.fetch("btc").await.unwrap();

    assert_eq!(first.price(), dec!(50000));
    assert_eq!(second.price(), dec!(50000));
    assert_eq!(first.provenance().source, "primary");
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn concurrent_misses_share_one_load() {
    let source = Arc::new(
        MockSource::new("slow")
            .with_price(dec!(3000))
            .with_delay(Duration::from_millis(50)),
    );
    let gateway = Arc::new(gateway_with(vec![source.clone()], Duration::from_secs(60)));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move { gateway.fetch("ETH").await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().price(), dec!(3000));
    }

    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn different_symbols_are_fetched_separately() {
    let source = Arc::new(MockSource::new("primary").with_price(dec!(1)));
    let gateway = gateway_with(vec![source.clone()], Duration::from_secs(60));

    gateway.fetch("BTC").await.unwrap();
    gateway.fetch("ETH").await.unwrap();
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn transient_errors_are_retried() {
    let source = Arc::new(
        MockSource::new("flaky")
            .with_price(dec!(50000))
            .failing_times(2, SourceError::Timeout(10)),
    );
    let gateway = gateway_with(vec![source.clone()], Duration::from_secs(60));

    let snapshot = gateway.fetch("BTC").await.unwrap();
    assert_eq!(snapshot.price(), dec!(50000));
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn retry_exhaustion_is_unavailable() {
    let source = Arc::new(MockSource::new("down").failing_times(
        5,
        SourceError::Http {
            status: 503,
            body: "maintenance".to_string(),
        },
    ));
    let gateway = gateway_with(vec![source.clone()], Duration::from_secs(60));

    let err = gateway.fetch("BTC").await.unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable(msg) if msg.starts_with("down")));
    assert_eq!(source.calls(), 3);
}

#[tokio::test]
async fn invalid_symbol_is_not_retried_and_does_not_fall_through() {
    let primary = Arc::new(
        MockSource::new("primary").then(Err(SourceError::InvalidSymbol("NOPE".to_string()))),
    );
    let secondary = Arc::new(MockSource::new("secondary").with_price(dec!(1)));
    let gateway = gateway_with(vec![primary.clone(), secondary.clone()], Duration::from_secs(60));

    let err = gateway.fetch("NOPE").await.unwrap_err();
    assert_eq!(err, GatewayError::InvalidSymbol("NOPE".to_string()));
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn unavailable_source_falls_through_to_next() {
    let primary = Arc::new(MockSource::new("primary").failing_times(
        3,
        SourceError::Transport("connection refused".to_string()),
    ));
    let secondary = Arc::new(MockSource::new("secondary").with_price(dec!(42)));
    let gateway = gateway_with(vec![primary.clone(), secondary.clone()], Duration::from_secs(60));

    let snapshot = gateway.fetch("SOL").await.unwrap();
    assert_eq!(snapshot.price(), dec!(42));
    assert_eq!(snapshot.provenance().source, "secondary");
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn malformed_payload_fails_closed_and_is_not_cached() {
    let source = Arc::new(
        MockSource::new("primary")
            .then(Ok(serde_json::json!({"volume": "10"})))
            .with_price(dec!(50000)),
    );
    let gateway = gateway_with(vec![source.clone()], Duration::from_secs(60));

    let err = gateway.fetch("BTC").await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Unavailable("primary: payload missing field price".to_string())
    );

    // The failure was not cached; the next fetch goes upstream again.
    let snapshot = gateway.fetch("BTC").await.unwrap();
    assert_eq!(snapshot.price(), dec!(50000));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn non_positive_price_fails_closed() {
    let source = Arc::new(MockSource::new("primary").then(Ok(ticker_payload(dec!(0), dec!(10)))));
    let gateway = gateway_with(vec![source], Duration::from_secs(60));

    assert!(matches!(
        gateway.fetch("BTC").await,
        Err(GatewayError::Unavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn exhausted_rate_budget_fails_fast() {
    let source = Arc::new(MockSource::new("tight").with_price(dec!(1)));
    let gateway = Gateway::new(
        Duration::from_secs(60),
        100,
        RetryPolicy::none(),
        Duration::from_millis(100),
    )
    .with_source(source.clone(), TokenBucket::new(1, 0.1));

    gateway.fetch("BTC").await.unwrap();

    let start = tokio::time::Instant::now();
    let err = gateway.fetch("ETH").await.unwrap_err();
    assert_eq!(err, GatewayError::RateLimited("tight".to_string()));
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn top_symbols_skips_sources_without_rankings() {
    let tickers = Arc::new(MockSource::new("tickers").with_price(dec!(1)));
    let rankings = Arc::new(MockSource::new("rankings").with_rankings(&["BTC", "ETH", "SOL"]));
    let gateway = gateway_with(vec![tickers, rankings], Duration::from_secs(60));

    assert_eq!(gateway.top_symbols(2).await.unwrap(), vec!["BTC", "ETH"]);
}

#[tokio::test]
async fn top_symbols_without_provider_is_unavailable() {
    let tickers = Arc::new(MockSource::new("tickers").with_price(dec!(1)));
    let gateway = gateway_with(vec![tickers], Duration::from_secs(60));

    assert!(matches!(
        gateway.top_symbols(10).await,
        Err(GatewayError::Unavailable(_))
    ));
}
