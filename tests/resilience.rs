//! Resilience behaviour across the broker and the history chain.

mod support;

use futures::future::join_all;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use support::{registry, registry_with_limits, FixedHistory, FlakyBroker};
use vigil::broker::{BrokerApi, BrokerSettings, ResilientBroker, BROKER_DEPENDENCY};
use vigil::data::{HistoryPeriod, HistoryProvider, MultiSourceDataClient};
use vigil::resilience::{BreakerState, CallFailure, CallOutcome, RateLimit, ResilienceRegistry, RetryPolicy};
use vigil::types::{OrderRequest, OrderSide};

fn settings(max_retries: u32) -> BrokerSettings {
    BrokerSettings {
        quote_ttl: Duration::from_secs(30),
        retry: RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
        },
        timeout: Duration::from_secs(5),
    }
}

fn broker(
    fake: &Arc<FlakyBroker>,
    registry: Arc<ResilienceRegistry>,
    max_retries: u32,
) -> ResilientBroker {
    ResilientBroker::new(fake.clone() as Arc<dyn BrokerApi>, registry, settings(max_retries))
}

#[tokio::test(start_paused = true)]
async fn test_stale_quote_served_during_outage() {
    let fake = FlakyBroker::new(dec!(10000));
    fake.set_price("GGAL", dec!(120));
    let broker = broker(&fake, registry(10, 60), 1);

    assert!(broker.get_quote("GGAL").await.is_live());
    assert!(matches!(broker.get_quote("GGAL").await, CallOutcome::Cached(_)));

    tokio::time::advance(Duration::from_secs(31)).await;
    fake.set_outage("HTTP 503");

    let outcome = broker.get_quote("GGAL").await;
    assert!(outcome.is_stale());
    assert_eq!(outcome.value().map(|q| q.price), Some(dec!(120)));
    assert!(matches!(
        outcome.failure(),
        Some(CallFailure::Exhausted { attempts: 2, .. })
    ));

    // Balance is never cached, so there is nothing to fall back to.
    assert!(matches!(broker.get_balance().await, CallOutcome::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_broker_breaker_opens_and_recovers() {
    let fake = FlakyBroker::new(dec!(10000));
    let reg = registry(2, 30);
    let broker = broker(&fake, Arc::clone(&reg), 0);

    fake.set_outage("connection reset");
    for _ in 0..2 {
        assert!(matches!(
            broker.get_balance().await,
            CallOutcome::Failed(CallFailure::Exhausted { attempts: 1, .. })
        ));
    }
    assert_eq!(reg.breaker(BROKER_DEPENDENCY).state(), BreakerState::Open);

    // Fast-fails without reaching the broker.
    let before = fake.calls();
    assert!(matches!(
        broker.get_balance().await,
        CallOutcome::Failed(CallFailure::BreakerOpen { .. })
    ));
    assert_eq!(fake.calls(), before);

    tokio::time::advance(Duration::from_secs(30)).await;
    fake.clear_outage();
    assert!(broker.get_balance().await.is_live());
    assert_eq!(reg.breaker(BROKER_DEPENDENCY).state(), BreakerState::HalfOpen);
    assert!(broker.get_balance().await.is_live());
    assert_eq!(reg.breaker(BROKER_DEPENDENCY).state(), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_order_never_retried() {
    let fake = FlakyBroker::new(dec!(10000));
    fake.set_price("GGAL", dec!(100));
    let broker = broker(&fake, registry(10, 60), 3);

    fake.set_outage("timeout waiting for fill");
    let order = OrderRequest {
        symbol: "GGAL".into(),
        side: OrderSide::Buy,
        quantity: dec!(1),
    };
    assert!(matches!(
        broker.place_order(&order).await,
        CallOutcome::Failed(CallFailure::Exhausted { attempts: 1, .. })
    ));
    assert_eq!(fake.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_is_not_retried_or_served_stale() {
    let fake = FlakyBroker::new(dec!(100));
    fake.set_price("GGAL", dec!(100));
    let broker = broker(&fake, registry(10, 60), 3);

    let order = OrderRequest {
        symbol: "GGAL".into(),
        side: OrderSide::Buy,
        quantity: dec!(5),
    };
    match broker.place_order(&order).await {
        CallOutcome::Failed(CallFailure::Rejected(msg)) => assert!(msg.contains("insufficient cash")),
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(fake.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_broker_calls() {
    let fake = FlakyBroker::new(dec!(10000));
    let mut limits = HashMap::new();
    limits.insert(BROKER_DEPENDENCY.to_string(), RateLimit::new(2, Duration::from_secs(10)));
    let reg = registry_with_limits(10, 60, limits);
    let broker = broker(&fake, Arc::clone(&reg), 0);

    let start = Instant::now();
    for _ in 0..3 {
        assert!(broker.get_balance().await.is_live());
    }
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(reg.rate_limiter().remaining_calls(BROKER_DEPENDENCY).await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_window() {
    let fake = FlakyBroker::new(dec!(10000));
    let mut limits = HashMap::new();
    limits.insert(BROKER_DEPENDENCY.to_string(), RateLimit::new(2, Duration::from_secs(10)));
    let broker = broker(&fake, registry_with_limits(10, 60, limits), 0);

    let start = Instant::now();
    let outcomes = join_all((0..5).map(|_| broker.get_balance())).await;
    assert!(outcomes.iter().all(|o| o.is_live()));
    assert_eq!(fake.calls(), 5);
    // Five calls at two per window need three windows.
    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_failures_open_breaker() {
    let fake = FlakyBroker::new(dec!(10000));
    let reg = registry(3, 60);
    let broker = broker(&fake, Arc::clone(&reg), 0);
    fake.set_outage("HTTP 502");

    let outcomes = join_all((0..3).map(|_| broker.get_balance())).await;
    assert!(outcomes.iter().all(|o| matches!(o, CallOutcome::Failed(_))));
    assert_eq!(reg.breaker(BROKER_DEPENDENCY).state(), BreakerState::Open);

    let stats = reg.breaker_stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total_failures, 3);
}

#[tokio::test(start_paused = true)]
async fn test_history_chain_skips_open_breaker_then_recovers() {
    let primary = FixedHistory::new("primary", &[("GGAL.BA", &[100.0, 101.0])]);
    let backup = FixedHistory::new("backup", &[("GGAL.BA", &[200.0, 201.0])]);
    primary.set_failing(true);

    let chain: Vec<Arc<dyn HistoryProvider>> = vec![primary.clone(), backup.clone()];
    let client = MultiSourceDataClient::new(chain, registry(1, 60), Duration::from_secs(5));

    let first = client.get_history("GGAL.BA", HistoryPeriod::OneMonth).await;
    assert_eq!(first.source.as_deref(), Some("backup"));
    assert_eq!(primary.calls(), 1);

    // Primary's breaker is open: skipped without a call.
    let second = client.get_history("GGAL.BA", HistoryPeriod::OneMonth).await;
    assert_eq!(second.source.as_deref(), Some("backup"));
    assert_eq!(primary.calls(), 1);

    tokio::time::advance(Duration::from_secs(60)).await;
    primary.set_failing(false);
    let third = client.get_history("GGAL.BA", HistoryPeriod::OneMonth).await;
    assert_eq!(third.source.as_deref(), Some("primary"));
    assert_eq!(third.data[1].close, 101.0);
}

#[tokio::test(start_paused = true)]
async fn test_history_chain_exhausted_is_explicit() {
    let a = FixedHistory::new("a", &[]);
    let b = FixedHistory::new("b", &[]);
    a.set_failing(true);

    let chain: Vec<Arc<dyn HistoryProvider>> = vec![a, b];
    let client = MultiSourceDataClient::new(chain, registry(5, 60), Duration::from_secs(5));

    let result = client.get_history("NOPE", HistoryPeriod::FiveDays).await;
    assert!(!result.success);
    assert!(result.source.is_none());
    assert!(result.data.is_empty());
}
