use std::fmt;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::settings::rate_limiting::{CostRule, KeyRule, TierSettings, ViolationAction};
use crate::store::BucketLimits;

pub type KeyFn = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;
pub type CostFn = Arc<dyn Fn(&RequestContext) -> u32 + Send + Sync>;

/// A named rate limiting policy.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Clone)]
pub struct TierConfig {
    name: String,
    capacity: u32,
    refill_tokens: u32,
    refill_interval_ms: u64,
    key_fn: KeyFn,
    cost_fn: CostFn,
    message: String,
    on_violation: ViolationAction,
}

impl TierConfig {
    /// Tier keyed by identity with a cost of one token per request.
    pub fn new(name: &str, capacity: u32, refill_tokens: u32, refill_interval_ms: u64) -> Self {
        TierConfig {
            name: name.to_string(),
            capacity,
            refill_tokens,
            refill_interval_ms,
            key_fn: KeyRule::Identity.into_key_fn(),
            cost_fn: CostRule::Fixed(1).into_cost_fn(),
            message: default_message(name),
            on_violation: ViolationAction::Report,
        }
    }

    pub fn from_settings(name: &str, settings: &TierSettings) -> Self {
        let tier = TierConfig::new(
            name,
            settings.capacity(),
            settings.tokens_per_interval,
            settings.interval_ms,
        )
        .with_key_fn(settings.key.clone().into_key_fn())
        .with_cost_fn(settings.cost.clone().into_cost_fn())
        .with_violation_action(settings.on_violation);

        match &settings.message {
            Some(message) => tier.with_message(message),
            None => tier,
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn with_cost_fn(mut self, cost_fn: CostFn) -> Self {
        self.cost_fn = cost_fn;
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn with_violation_action(mut self, action: ViolationAction) -> Self {
        self.on_violation = action;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_tokens(&self) -> u32 {
        self.refill_tokens
    }

    pub fn refill_interval_ms(&self) -> u64 {
        self.refill_interval_ms
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn on_violation(&self) -> ViolationAction {
        self.on_violation
    }

    pub fn limits(&self) -> BucketLimits {
        BucketLimits::new(self.capacity, self.refill_tokens, self.refill_interval_ms)
    }

    /// Store key of the bucket this request is charged against.
    pub fn bucket_key(&self, ctx: &RequestContext) -> String {
        format!("{}:{}", self.name, (self.key_fn)(ctx))
    }

    pub fn cost(&self, ctx: &RequestContext) -> u32 {
        (self.cost_fn)(ctx)
    }
}

impl fmt::Debug for TierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierConfig")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("refill_tokens", &self.refill_tokens)
            .field("refill_interval_ms", &self.refill_interval_ms)
            .field("message", &self.message)
            .field("on_violation", &self.on_violation)
            .finish_non_exhaustive()
    }
}

fn default_message(name: &str) -> String {
    format!("Too many requests ({name}), please try again later.")
}

impl KeyRule {
    pub fn into_key_fn(self) -> KeyFn {
        match self {
            KeyRule::Identity => Arc::new(|ctx: &RequestContext| ctx.identity.clone()),
            KeyRule::Ip => Arc::new(|ctx: &RequestContext| ctx.ip_or_unknown()),
            KeyRule::User => Arc::new(|ctx: &RequestContext| match &ctx.user_id {
                Some(user_id) => format!("user:{user_id}"),
                None => format!("ip:{}", ctx.ip_or_unknown()),
            }),
            KeyRule::IpAndPath => {
                Arc::new(|ctx: &RequestContext| format!("{}:{}", ctx.ip_or_unknown(), ctx.path))
            }
            KeyRule::Header(name) => Arc::new(move |ctx: &RequestContext| {
                ctx.header(&name)
                    .map(str::to_string)
                    .unwrap_or_else(|| ctx.identity.clone())
            }),
            KeyRule::Global => Arc::new(|_: &RequestContext| "*".to_string()),
        }
    }
}

impl CostRule {
    pub fn into_cost_fn(self) -> CostFn {
        match self {
            CostRule::Fixed(cost) => Arc::new(move |_: &RequestContext| cost),
            CostRule::ByMethod { read, write } => Arc::new(move |ctx: &RequestContext| {
                if ctx.is_read() {
                    read
                } else {
                    write
                }
            }),
        }
    }
}
