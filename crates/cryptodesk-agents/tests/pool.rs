use std::sync::Arc;
use std::time::Duration;

use cryptodesk_agents::test_support::{snapshot, ScriptedAnalyst};
use cryptodesk_agents::{AgentPool, AgentRegistry};
use cryptodesk_models::analysis::{AgentFailureKind, AgentKind, Verdict};
use rust_decimal_macros::dec;

#[tokio::test(start_paused = true)]
async fn results_follow_registry_order() {
    let registry = AgentRegistry::new()
        .with(Arc::new(ScriptedAnalyst::slow(
            AgentKind::Technical,
            Duration::from_secs(3),
            Verdict::Bullish,
            dec!(0.8),
        )))
        .with(Arc::new(ScriptedAnalyst::slow(
            AgentKind::Financial,
            Duration::from_secs(1),
            Verdict::Bearish,
            dec!(0.4),
        )))
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Legal,
            Verdict::Neutral,
            dec!(0.5),
        )));
    let pool = AgentPool::new(registry, Duration::from_secs(10), 4);

    let results = pool.analyze(&snapshot("BTC", dec!(50000))).await;

    let kinds: Vec<AgentKind> = results.iter().map(|r| r.agent).collect();
    assert_eq!(
        kinds,
        vec![AgentKind::Technical, AgentKind::Financial, AgentKind::Legal]
    );
    assert!(results.iter().all(|r| !r.is_failed()));
    assert_eq!(results[1].verdict, Verdict::Bearish);
}

#[tokio::test(start_paused = true)]
async fn timeout_becomes_failed_result() {
    let hanging = Arc::new(ScriptedAnalyst::hanging(AgentKind::Legal));
    let registry = AgentRegistry::new()
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Technical,
            Verdict::Bullish,
            dec!(0.8),
        )))
        .with(hanging.clone());
    let pool = AgentPool::new(registry, Duration::from_secs(5), 4);

    let start = tokio::time::Instant::now();
    let results = pool.analyze(&snapshot("BTC", dec!(50000))).await;

    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
    assert!(results[0].is_viable());

    let failure = results[1].failure.as_ref().unwrap();
    assert_eq!(failure.kind, AgentFailureKind::Timeout);
    assert_eq!(results[1].verdict, Verdict::Abstain);
    assert_eq!(results[1].confidence, dec!(0));
    assert_eq!(hanging.started(), 1);
    assert_eq!(hanging.finished(), 0);
}

#[tokio::test]
async fn errors_and_panics_are_isolated() {
    let registry = AgentRegistry::new()
        .with(Arc::new(ScriptedAnalyst::failing(
            AgentKind::Technical,
            "claude exited 1",
        )))
        .with(Arc::new(ScriptedAnalyst::panicking(AgentKind::Financial)))
        .with(Arc::new(ScriptedAnalyst::voting(
            AgentKind::Strategist,
            Verdict::Bearish,
            dec!(0.65),
        )));
    let pool = AgentPool::new(registry, Duration::from_secs(5), 4);

    let results = pool.analyze(&snapshot("ETH", dec!(3000))).await;

    assert_eq!(results.len(), 3);
    let technical = results[0].failure.as_ref().unwrap();
    assert_eq!(technical.kind, AgentFailureKind::Failure);
    assert!(technical.message.contains("claude exited 1"));

    let financial = results[1].failure.as_ref().unwrap();
    assert_eq!(financial.kind, AgentFailureKind::Failure);
    assert_eq!(results[1].agent, AgentKind::Financial);

    assert!(results[2].is_viable());
    assert_eq!(results[2].confidence, dec!(0.65));
}

#[tokio::test]
async fn out_of_range_confidence_is_a_failure() {
    let registry = AgentRegistry::new().with(Arc::new(ScriptedAnalyst::voting(
        AgentKind::Technical,
        Verdict::Bullish,
        dec!(1.5),
    )));
    let pool = AgentPool::new(registry, Duration::from_secs(5), 1);

    let results = pool.analyze(&snapshot("BTC", dec!(50000))).await;
    assert!(results[0].is_failed());
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded() {
    let registry = AgentKind::ALL.iter().fold(AgentRegistry::new(), |r, kind| {
        r.with(Arc::new(ScriptedAnalyst::slow(
            *kind,
            Duration::from_secs(2),
            Verdict::Neutral,
            dec!(0.5),
        )))
    });

    // Four two-second analysts, two at a time: two waves.
    let pool = AgentPool::new(registry, Duration::from_secs(10), 2);
    let start = tokio::time::Instant::now();
    let results = pool.analyze(&snapshot("BTC", dec!(50000))).await;

    assert!(results.iter().all(|r| r.is_viable()));
    assert!(start.elapsed() >= Duration::from_secs(4));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_fan_out_aborts_analysts() {
    let slow = Arc::new(ScriptedAnalyst::slow(
        AgentKind::Technical,
        Duration::from_secs(30),
        Verdict::Bullish,
        dec!(0.9),
    ));
    let registry = AgentRegistry::new().with(slow.clone());
    let pool = AgentPool::new(registry, Duration::from_secs(60), 4);
    let snap = snapshot("BTC", dec!(50000));

    let outcome = tokio::time::timeout(Duration::from_secs(1), pool.analyze(&snap)).await;
    assert!(outcome.is_err());

    // Let the analyst's original deadline pass: it must never finish.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(slow.started(), 1);
    assert_eq!(slow.finished(), 0);
}
