//! Admission decisions across the global and resource tiers.
//!
//! Every request is charged against the global tier first and then against
//! the tier its resource type resolves to. The decision combines both
//! results; nothing in here awaits or performs I/O.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::registry::TierRegistry;
use crate::settings::rate_limiting::ChargePolicy;
use crate::store::{Consumption, Store};
use crate::tier::TierConfig;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Admitted,
    LimitExceeded,
    /// The request costs more than the tier can ever hold
    Misconfigured,
    /// The store failed and the request was let through
    FailOpen,
}

/// Outcome of [`AdmissionEngine::admit`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Capacity of the limiting tier, or of the resource tier when allowed
    pub limit: u32,
    pub retry_after_ms: u64,
    pub reset_after_ms: u64,
    /// Tier that denied the request, global first if both did
    pub limiting_tier: Option<String>,
    pub resource_tier: String,
    pub reason: DecisionReason,
}

impl AdmissionDecision {
    /// Whole seconds to wait before retrying, never less than one.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_ms.div_ceil(1000).max(1)
    }

    pub fn reset_after_secs(&self) -> u64 {
        self.reset_after_ms.div_ceil(1000)
    }
}

enum Charge {
    Charged(Consumption),
    Misconfigured,
    Faulted,
}

struct TierOutcome<'a> {
    tier: &'a TierConfig,
    allowed: bool,
    remaining: u64,
    retry_after_ms: u64,
    reset_after_ms: u64,
    reason: DecisionReason,
}

impl<'a> TierOutcome<'a> {
    fn new(tier: &'a TierConfig, charge: Charge) -> Option<Self> {
        match charge {
            Charge::Charged(consumption) => Some(TierOutcome {
                tier,
                allowed: consumption.allowed,
                remaining: consumption.remaining,
                retry_after_ms: consumption.retry_after_ms,
                reset_after_ms: consumption.reset_after_ms,
                reason: if consumption.allowed {
                    DecisionReason::Admitted
                } else {
                    DecisionReason::LimitExceeded
                },
            }),
            // Denied for this key until the configuration is fixed.
            Charge::Misconfigured => Some(TierOutcome {
                tier,
                allowed: false,
                remaining: 0,
                retry_after_ms: tier.refill_interval_ms(),
                reset_after_ms: tier.refill_interval_ms(),
                reason: DecisionReason::Misconfigured,
            }),
            Charge::Faulted => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionEngine {
    store: Arc<dyn Store>,
    registry: Arc<TierRegistry>,
    clock: Arc<dyn Clock>,
    charge_policy: ChargePolicy,
}

impl AdmissionEngine {
    pub fn new(store: Arc<dyn Store>, registry: Arc<TierRegistry>, clock: Arc<dyn Clock>) -> Self {
        AdmissionEngine {
            store,
            registry,
            clock,
            charge_policy: ChargePolicy::default(),
        }
    }

    pub fn with_charge_policy(mut self, charge_policy: ChargePolicy) -> Self {
        self.charge_policy = charge_policy;
        self
    }

    pub fn registry(&self) -> &TierRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn admit(&self, ctx: &RequestContext) -> AdmissionDecision {
        let tier = self.registry.resolve(&ctx.resource_type);
        self.admit_with(ctx, tier)
    }

    /// Admit against `tier_name` instead of the tier the resource type
    /// resolves to. Unknown names fall back to normal resolution.
    pub fn admit_as(&self, ctx: &RequestContext, tier_name: &str) -> AdmissionDecision {
        match self.registry.get(tier_name) {
            Some(tier) => self.admit_with(ctx, tier),
            None => {
                warn!(tier = tier_name, "Forced rate limit tier is not registered");
                self.admit(ctx)
            }
        }
    }

    fn admit_with(&self, ctx: &RequestContext, resource: &TierConfig) -> AdmissionDecision {
        let now = self.clock.now();
        let global = self.registry.global_tier();

        let mut charges = vec![(global, self.charge(global, ctx, now))];
        let global_denied = !matches!(&charges[0].1, Charge::Charged(c) if c.allowed);
        let skip_resource = resource.name() == global.name()
            || (global_denied && self.charge_policy == ChargePolicy::StopOnGlobalDeny);
        if !skip_resource {
            charges.push((resource, self.charge(resource, ctx, now)));
        }

        let mut outcomes = Vec::with_capacity(charges.len());
        for (tier, charge) in charges {
            match TierOutcome::new(tier, charge) {
                Some(outcome) => outcomes.push(outcome),
                None => return self.fail_open(resource, &outcomes),
            }
        }

        let decision = combine(resource, &outcomes);
        if !decision.allowed {
            debug!(
                identity = %ctx.identity,
                path = %ctx.path,
                tier = decision.limiting_tier.as_deref().unwrap_or_default(),
                retry_after_ms = decision.retry_after_ms,
                "Request denied by rate limiter"
            );
        }
        decision
    }

    fn charge(&self, tier: &TierConfig, ctx: &RequestContext, now: std::time::Instant) -> Charge {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let key = tier.bucket_key(ctx);
            let cost = tier.cost(ctx);
            self.store.consume(&key, cost, &tier.limits(), now)
        }));

        match result {
            Ok(Ok(consumption)) => Charge::Charged(consumption),
            Ok(Err(StoreError::CostExceedsCapacity { cost, capacity })) => {
                error!(
                    tier = tier.name(),
                    cost, capacity, "Request cost exceeds tier capacity, denying"
                );
                Charge::Misconfigured
            }
            Ok(Err(e)) => {
                error!(tier = tier.name(), "Bucket store failed, failing open: {}", e);
                Charge::Faulted
            }
            Err(_) => {
                error!(tier = tier.name(), "Bucket store panicked, failing open");
                Charge::Faulted
            }
        }
    }

    fn fail_open(&self, resource: &TierConfig, charged: &[TierOutcome<'_>]) -> AdmissionDecision {
        let remaining = charged
            .iter()
            .map(|outcome| outcome.remaining)
            .min()
            .unwrap_or(u64::from(resource.capacity()));

        AdmissionDecision {
            allowed: true,
            remaining,
            limit: resource.capacity(),
            retry_after_ms: 0,
            reset_after_ms: 0,
            limiting_tier: None,
            resource_tier: resource.name().to_string(),
            reason: DecisionReason::FailOpen,
        }
    }
}

fn combine(resource: &TierConfig, outcomes: &[TierOutcome<'_>]) -> AdmissionDecision {
    // Outcomes are in charge order, so a global deny is found first.
    let limiting = outcomes.iter().find(|outcome| !outcome.allowed);

    AdmissionDecision {
        allowed: limiting.is_none(),
        remaining: outcomes
            .iter()
            .map(|o| o.remaining)
            .min()
            .unwrap_or_default(),
        limit: limiting
            .map(|o| o.tier.capacity())
            .unwrap_or(resource.capacity()),
        retry_after_ms: outcomes
            .iter()
            .map(|o| o.retry_after_ms)
            .max()
            .unwrap_or_default(),
        reset_after_ms: outcomes
            .iter()
            .map(|o| o.reset_after_ms)
            .max()
            .unwrap_or_default(),
        limiting_tier: limiting.map(|o| o.tier.name().to_string()),
        resource_tier: resource.name().to_string(),
        reason: limiting
            .map(|o| o.reason)
            .unwrap_or(DecisionReason::Admitted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::{BucketLimits, BucketSnapshot, InMemoryStore};
    use axum::http::Method;
    use std::time::{Duration, Instant};

    fn registry(global_capacity: u32) -> TierRegistry {
        TierRegistry::builder()
            .global("global")
            .default_tier("api")
            .tier(TierConfig::new(
                "global",
                global_capacity,
                global_capacity,
                60_000,
            ))
            .tier(TierConfig::new("api", 10, 10, 60_000))
            .tier(TierConfig::new("auth", 5, 5, 900_000))
            .tier(
                TierConfig::new("upload", 10, 10, 60_000)
                    .with_cost_fn(Arc::new(|_: &RequestContext| 50)),
            )
            .tier(
                TierConfig::new("free", 1, 1, 60_000)
                    .with_cost_fn(Arc::new(|_: &RequestContext| 0)),
            )
            .build()
            .unwrap()
    }

    fn engine_with(global_capacity: u32) -> (AdmissionEngine, Arc<InMemoryStore>, MockClock) {
        let store = Arc::new(InMemoryStore::new());
        let clock = MockClock::default();
        let engine = AdmissionEngine::new(
            store.clone(),
            Arc::new(registry(global_capacity)),
            Arc::new(clock.clone()),
        );
        (engine, store, clock)
    }

    fn ctx(resource_type: &str) -> RequestContext {
        RequestContext::new("10.0.0.1", Method::GET, "/api/items", resource_type)
    }

    #[test]
    fn test_burst_then_deny() {
        let (engine, _, _) = engine_with(1000);

        for i in 0..10 {
            let decision = engine.admit(&ctx("api"));
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.reason, DecisionReason::Admitted);
            assert_eq!(decision.remaining, 9 - i);
            assert_eq!(decision.limit, 10);
        }

        let denied = engine.admit(&ctx("api"));
        assert!(!denied.allowed);
        assert_eq!(denied.limiting_tier.as_deref(), Some("api"));
        assert_eq!(denied.reason, DecisionReason::LimitExceeded);
        assert_eq!(denied.retry_after_ms, 6_000);
        assert_eq!(denied.retry_after_secs(), 6);
    }

    #[test]
    fn test_refill_recovery() {
        let (engine, _, clock) = engine_with(1000);
        for _ in 0..5 {
            assert!(engine.admit(&ctx("auth")).allowed);
        }

        let denied = engine.admit(&ctx("auth"));
        assert!(!denied.allowed);
        assert!(denied.retry_after_ms > 0);

        clock.advance(Duration::from_millis(denied.retry_after_ms));
        assert!(engine.admit(&ctx("auth")).allowed);
    }

    #[test]
    fn test_global_deny_is_named_global() {
        let (engine, _, _) = engine_with(2);
        assert!(engine.admit(&ctx("api")).allowed);
        assert!(engine.admit(&ctx("api")).allowed);

        let denied = engine.admit(&ctx("api"));
        assert!(!denied.allowed);
        assert_eq!(denied.limiting_tier.as_deref(), Some("global"));
        assert_eq!(denied.resource_tier, "api");
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 2);
        assert_eq!(denied.retry_after_ms, 30_000);
    }

    #[test]
    fn test_unknown_resource_type_uses_default_tier() {
        let (engine, store, _) = engine_with(1000);
        let decision = engine.admit(&ctx("reports"));

        assert!(decision.allowed);
        assert_eq!(decision.resource_tier, "api");
        assert!(store.get("api:10.0.0.1").is_some());
    }

    #[test]
    fn test_always_both_keeps_charging_resource_tier() {
        let (engine, store, _) = engine_with(1);
        for _ in 0..3 {
            engine.admit(&ctx("auth"));
        }
        assert_eq!(store.get("auth:10.0.0.1").unwrap().tokens, 2.0);
    }

    #[test]
    fn test_stop_on_global_deny_spares_resource_tier() {
        let (engine, store, _) = engine_with(1);
        let engine = engine.with_charge_policy(ChargePolicy::StopOnGlobalDeny);
        for _ in 0..3 {
            engine.admit(&ctx("auth"));
        }
        assert_eq!(store.get("auth:10.0.0.1").unwrap().tokens, 4.0);
    }

    #[test]
    fn test_cost_above_capacity_denies_without_panicking() {
        let (engine, store, _) = engine_with(1000);
        let decision = engine.admit(&ctx("upload"));

        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Misconfigured);
        assert_eq!(decision.limiting_tier.as_deref(), Some("upload"));
        assert_eq!(decision.retry_after_ms, 60_000);
        assert!(store.get("upload:10.0.0.1").is_none());
    }

    #[test]
    fn test_zero_cost_never_drains() {
        let (engine, _, _) = engine_with(1000);
        for _ in 0..5 {
            let decision = engine.admit(&ctx("free"));
            assert!(decision.allowed);
        }
    }

    #[test]
    fn test_forced_tier() {
        let (engine, store, _) = engine_with(1000);
        let decision = engine.admit_as(&ctx("api"), "auth");
        assert_eq!(decision.resource_tier, "auth");
        assert!(store.get("api:10.0.0.1").is_none());

        let decision = engine.admit_as(&ctx("api"), "missing");
        assert_eq!(decision.resource_tier, "api");
    }

    #[test]
    fn test_global_tier_as_resource_is_charged_once() {
        let (engine, store, _) = engine_with(1000);
        engine.admit_as(&ctx("api"), "global");
        assert_eq!(store.get("global:10.0.0.1").unwrap().tokens, 999.0);
    }

    #[derive(Debug)]
    struct FaultyStore;

    impl Store for FaultyStore {
        fn consume(
            &self,
            _key: &str,
            _cost: u32,
            _limits: &BucketLimits,
            _now: Instant,
        ) -> Result<Consumption, StoreError> {
            Err(StoreError::Internal("corrupted bucket".to_string()))
        }

        fn get(&self, _key: &str) -> Option<BucketSnapshot> {
            None
        }

        fn sweep(&self, _now: Instant, _retention_factor: u32) -> usize {
            0
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[derive(Debug)]
    struct PanickingStore;

    impl Store for PanickingStore {
        fn consume(
            &self,
            _key: &str,
            _cost: u32,
            _limits: &BucketLimits,
            _now: Instant,
        ) -> Result<Consumption, StoreError> {
            panic!("bucket map poisoned");
        }

        fn get(&self, _key: &str) -> Option<BucketSnapshot> {
            None
        }

        fn sweep(&self, _now: Instant, _retention_factor: u32) -> usize {
            0
        }

        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_store_error_fails_open() {
        let engine = AdmissionEngine::new(
            Arc::new(FaultyStore),
            Arc::new(registry(1000)),
            Arc::new(MockClock::default()),
        );

        for _ in 0..20 {
            let decision = engine.admit(&ctx("auth"));
            assert!(decision.allowed);
            assert_eq!(decision.reason, DecisionReason::FailOpen);
            assert!(decision.limiting_tier.is_none());
        }
    }

    #[test]
    fn test_store_panic_fails_open() {
        let engine = AdmissionEngine::new(
            Arc::new(PanickingStore),
            Arc::new(registry(1000)),
            Arc::new(MockClock::default()),
        );

        let decision = engine.admit(&ctx("api"));
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::FailOpen);
    }

    #[test]
    fn test_retry_after_secs_rounds_up() {
        let decision = AdmissionDecision {
            allowed: false,
            remaining: 0,
            limit: 3,
            retry_after_ms: 334,
            reset_after_ms: 1_001,
            limiting_tier: Some("api".to_string()),
            resource_tier: "api".to_string(),
            reason: DecisionReason::LimitExceeded,
        };
        assert_eq!(decision.retry_after_secs(), 1);
        assert_eq!(decision.reset_after_secs(), 2);
    }
}
