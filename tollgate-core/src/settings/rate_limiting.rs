use serde::Deserialize;
use std::collections::HashMap;

use super::scheduler_interval::SchedulerInterval;

/// Rate limiting configuration validation error
#[derive(Debug)]
pub struct RateLimitingValidationError {
    pub message: String,
}

impl std::fmt::Display for RateLimitingValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rate limiting configuration error: {}", self.message)
    }
}

impl std::error::Error for RateLimitingValidationError {}

/// What happens to the resource tier when the global tier already denied.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChargePolicy {
    /// Charge both buckets on every attempt, so hammering a denied endpoint
    /// keeps draining the resource bucket too.
    #[default]
    AlwaysBoth,
    /// Skip the resource bucket once the global bucket denied.
    StopOnGlobalDeny,
}

/// How the bucket key is derived from a request.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyRule {
    /// Authenticated user id if present, client IP otherwise.
    #[default]
    Identity,
    Ip,
    /// Authenticated user id; anonymous requests fall back to the client IP.
    User,
    IpAndPath,
    /// Value of the named request header.
    Header(String),
    /// A single bucket shared by every caller.
    Global,
}

/// How many tokens a request costs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CostRule {
    Fixed(u32),
    /// GET, HEAD and OPTIONS cost `read`, everything else `write`.
    ByMethod { read: u32, write: u32 },
}

impl Default for CostRule {
    fn default() -> Self {
        CostRule::Fixed(1)
    }
}

impl CostRule {
    /// Highest cost this rule can produce.
    pub fn max_cost(&self) -> u32 {
        match self {
            CostRule::Fixed(cost) => *cost,
            CostRule::ByMethod { read, write } => std::cmp::max(*read, *write),
        }
    }
}

/// What the gate does with a denial caused by this tier.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViolationAction {
    #[default]
    Report,
    Silent,
}

/// Configuration for a single rate limiting tier
#[derive(Debug, Clone, Deserialize)]
pub struct TierSettings {
    /// Tokens added per interval
    pub tokens_per_interval: u32,

    /// Length of the refill interval in milliseconds
    pub interval_ms: u64,

    /// Maximum tokens the bucket holds. Defaults to `tokens_per_interval`.
    #[serde(default)]
    pub burst_capacity: Option<u32>,

    #[serde(default)]
    pub key: KeyRule,

    #[serde(default)]
    pub cost: CostRule,

    /// Message returned in the 429 body
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub on_violation: ViolationAction,
}

impl TierSettings {
    pub fn new(tokens_per_interval: u32, interval_ms: u64) -> Self {
        TierSettings {
            tokens_per_interval,
            interval_ms,
            burst_capacity: None,
            key: KeyRule::default(),
            cost: CostRule::default(),
            message: None,
            on_violation: ViolationAction::default(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.burst_capacity.unwrap_or(self.tokens_per_interval)
    }

    /// Validate the tier configuration
    pub fn validate(&self) -> Result<(), RateLimitingValidationError> {
        if self.tokens_per_interval == 0 {
            return Err(RateLimitingValidationError {
                message: "tokens_per_interval must be greater than 0".to_string(),
            });
        }

        if self.interval_ms == 0 {
            return Err(RateLimitingValidationError {
                message: "interval_ms must be greater than 0".to_string(),
            });
        }

        if self.capacity() == 0 {
            return Err(RateLimitingValidationError {
                message: "burst_capacity must be greater than 0".to_string(),
            });
        }

        // A request that costs more than the bucket can hold would be denied forever.
        if self.cost.max_cost() > self.capacity() {
            return Err(RateLimitingValidationError {
                message: format!(
                    "cost ({}) exceeds burst_capacity ({})",
                    self.cost.max_cost(),
                    self.capacity()
                ),
            });
        }

        if let KeyRule::Header(name) = &self.key {
            if axum::http::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(RateLimitingValidationError {
                    message: format!("invalid header name for key rule: {name}"),
                });
            }
        }

        Ok(())
    }
}

/// Maps a path prefix to a resource type (tier name).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteSettings {
    pub prefix: String,
    pub tier: String,
}

impl RouteSettings {
    pub fn new(prefix: &str, tier: &str) -> Self {
        RouteSettings {
            prefix: prefix.to_string(),
            tier: tier.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
}

fn default_webhook_method() -> String {
    "post".to_string()
}

/// Where violation events go
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportingSettings {
    pub enabled: bool,
    /// Events waiting for delivery; further events are dropped while full.
    pub queue_size: usize,
    /// Upper bound for a single sink delivery
    pub timeout_ms: u64,
    /// Emit events on the `tollgate::audit` tracing target
    pub log: bool,
    pub webhook: Option<WebhookSettings>,
}

impl Default for ReportingSettings {
    fn default() -> Self {
        ReportingSettings {
            enabled: true,
            queue_size: 1024,
            timeout_ms: 2000,
            log: true,
            webhook: None,
        }
    }
}

/// Rate limiting configuration for the API
///
/// Missing fields fall back to [`RateLimitingConfig::default`]. A `tiers`
/// table in the configuration replaces the built-in table as a whole.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Global enable/disable switch for all rate limiting
    pub enabled: bool,

    pub charge_policy: ChargePolicy,

    /// Trust X-Forwarded-For / X-Real-IP. Only enable behind a proxy that sets them.
    pub trust_proxy: bool,

    /// Tier charged on every request
    pub global_tier: String,

    /// Tier used when no route prefix matches
    pub default_tier: String,

    /// Buckets idle for longer than `retention_factor` refill intervals are evicted
    pub retention_factor: u32,

    pub sweep_interval: SchedulerInterval,

    /// Paths that bypass the gate entirely
    pub exempt_paths: Vec<String>,

    pub routes: Vec<RouteSettings>,

    pub tiers: HashMap<String, TierSettings>,

    pub reporting: ReportingSettings,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert("global".to_string(), TierSettings::new(1000, 60_000));
        tiers.insert(
            "auth".to_string(),
            TierSettings {
                message: Some(
                    "Too many authentication attempts, please try again later.".to_string(),
                ),
                key: KeyRule::Ip,
                ..TierSettings::new(5, 900_000)
            },
        );
        tiers.insert(
            "admin".to_string(),
            TierSettings {
                message: Some("Too many admin requests, please slow down.".to_string()),
                ..TierSettings::new(100, 60_000)
            },
        );
        tiers.insert(
            "security".to_string(),
            TierSettings {
                message: Some("Too many security-sensitive requests.".to_string()),
                ..TierSettings::new(10, 60_000)
            },
        );
        tiers.insert(
            "api".to_string(),
            TierSettings {
                cost: CostRule::ByMethod { read: 1, write: 2 },
                ..TierSettings::new(100, 60_000)
            },
        );
        tiers.insert(
            "public".to_string(),
            TierSettings {
                on_violation: ViolationAction::Silent,
                ..TierSettings::new(300, 60_000)
            },
        );

        RateLimitingConfig {
            enabled: true,
            charge_policy: ChargePolicy::default(),
            trust_proxy: false,
            global_tier: "global".to_string(),
            default_tier: "api".to_string(),
            retention_factor: 2,
            sweep_interval: SchedulerInterval::Minutes(1),
            exempt_paths: vec!["/api/health".to_string()],
            routes: vec![
                RouteSettings::new("/api/login", "auth"),
                RouteSettings::new("/api/auth", "auth"),
                RouteSettings::new("/api/admin", "admin"),
                RouteSettings::new("/api/security", "security"),
                RouteSettings::new("/public", "public"),
            ],
            tiers,
            reporting: ReportingSettings::default(),
        }
    }
}

impl RateLimitingConfig {
    /// Validate the rate limiting configuration
    pub fn validate(&self) -> Result<(), RateLimitingValidationError> {
        if !self.enabled {
            return Ok(()); // Skip validation if rate limiting is disabled
        }

        for (name, tier) in &self.tiers {
            tier.validate().map_err(|e| RateLimitingValidationError {
                message: format!("{}: {}", name, e.message),
            })?;
        }

        for (field, tier) in [
            ("global_tier", &self.global_tier),
            ("default_tier", &self.default_tier),
        ] {
            if !self.tiers.contains_key(tier) {
                return Err(RateLimitingValidationError {
                    message: format!("{field} references unknown tier '{tier}'"),
                });
            }
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(RateLimitingValidationError {
                    message: format!("route prefix '{}' must start with '/'", route.prefix),
                });
            }
            if !self.tiers.contains_key(&route.tier) {
                return Err(RateLimitingValidationError {
                    message: format!(
                        "route '{}' references unknown tier '{}'",
                        route.prefix, route.tier
                    ),
                });
            }
        }

        if self.retention_factor == 0 {
            return Err(RateLimitingValidationError {
                message: "retention_factor must be at least 1".to_string(),
            });
        }

        if self.reporting.enabled && self.reporting.queue_size == 0 {
            return Err(RateLimitingValidationError {
                message: "reporting.queue_size must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_config_valid() {
        let config = TierSettings {
            burst_capacity: Some(10),
            ..TierSettings::new(60, 60_000)
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity(), 10);
    }

    #[test]
    fn test_tier_capacity_defaults_to_refill_amount() {
        let config = TierSettings::new(5, 900_000);
        assert_eq!(config.capacity(), 5);
    }

    #[test]
    fn test_tier_config_zero_rate_invalid() {
        let config = TierSettings::new(0, 60_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_config_zero_interval_invalid() {
        let config = TierSettings::new(10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_config_zero_burst_invalid() {
        let config = TierSettings {
            burst_capacity: Some(0),
            ..TierSettings::new(10, 60_000)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_config_cost_exceeds_capacity_invalid() {
        let config = TierSettings {
            cost: CostRule::ByMethod { read: 1, write: 20 },
            ..TierSettings::new(10, 60_000)
        };
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("exceeds burst_capacity"));
    }

    #[test]
    fn test_tier_config_invalid_header_key() {
        let config = TierSettings {
            key: KeyRule::Header("not a header".to_string()),
            ..TierSettings::new(10, 60_000)
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RateLimitingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tiers["auth"].capacity(), 5);
        assert_eq!(config.charge_policy, ChargePolicy::AlwaysBoth);
    }

    #[test]
    fn test_rate_limiting_config_disabled_skips_validation() {
        let mut config = RateLimitingConfig {
            enabled: false,
            ..Default::default()
        };
        config
            .tiers
            .insert("broken".to_string(), TierSettings::new(0, 0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_global_tier_invalid() {
        let config = RateLimitingConfig {
            global_tier: "nope".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.message.contains("global_tier"));
    }

    #[test]
    fn test_route_with_unknown_tier_invalid() {
        let config = RateLimitingConfig {
            routes: vec![RouteSettings::new("/api/upload", "upload")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_route_prefix_must_be_absolute() {
        let config = RateLimitingConfig {
            routes: vec![RouteSettings::new("api/login", "auth")],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tier_error_names_tier() {
        let mut config = RateLimitingConfig::default();
        config
            .tiers
            .insert("upload".to_string(), TierSettings::new(0, 1000));
        let err = config.validate().unwrap_err();
        assert!(err.message.starts_with("upload:"));
    }

    #[test]
    fn test_deserialize_rules() {
        let tier: TierSettings = serde_json::from_value(serde_json::json!({
            "tokens_per_interval": 10,
            "interval_ms": 1000,
            "key": { "header": "x-api-key" },
            "cost": { "by_method": { "read": 1, "write": 3 } },
            "on_violation": "silent"
        }))
        .unwrap();

        assert_eq!(tier.key, KeyRule::Header("x-api-key".to_string()));
        assert_eq!(tier.cost, CostRule::ByMethod { read: 1, write: 3 });
        assert_eq!(tier.on_violation, ViolationAction::Silent);

        let policy: ChargePolicy = serde_json::from_value(serde_json::json!("stop_on_global_deny")).unwrap();
        assert_eq!(policy, ChargePolicy::StopOnGlobalDeny);
    }
}
