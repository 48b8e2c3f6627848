use std::collections::HashMap;

use crate::error::GateError;
use crate::settings::rate_limiting::RateLimitingConfig;
use crate::tier::TierConfig;

/// Immutable table of tiers, assembled once at startup.
#[derive(Debug)]
pub struct TierRegistry {
    tiers: HashMap<String, TierConfig>,
    global: String,
    default: String,
}

impl TierRegistry {
    pub fn builder() -> TierRegistryBuilder {
        TierRegistryBuilder::default()
    }

    /// Build the registry from validated configuration.
    pub fn from_settings(config: &RateLimitingConfig) -> Result<Self, GateError> {
        config.validate()?;

        let builder = config.tiers.iter().fold(
            TierRegistry::builder()
                .global(&config.global_tier)
                .default_tier(&config.default_tier),
            |builder, (name, settings)| builder.tier(TierConfig::from_settings(name, settings)),
        );
        builder.build()
    }

    /// Tier for `resource_type`, or the default tier if none is registered.
    pub fn resolve(&self, resource_type: &str) -> &TierConfig {
        self.tiers
            .get(resource_type)
            .unwrap_or_else(|| &self.tiers[&self.default])
    }

    pub fn global_tier(&self) -> &TierConfig {
        &self.tiers[&self.global]
    }

    pub fn default_tier(&self) -> &TierConfig {
        &self.tiers[&self.default]
    }

    pub fn get(&self, name: &str) -> Option<&TierConfig> {
        self.tiers.get(name)
    }

    pub fn tiers(&self) -> impl Iterator<Item = &TierConfig> {
        self.tiers.values()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TierRegistryBuilder {
    tiers: HashMap<String, TierConfig>,
    global: Option<String>,
    default: Option<String>,
}

impl TierRegistryBuilder {
    pub fn global(mut self, name: &str) -> Self {
        self.global = Some(name.to_string());
        self
    }

    pub fn default_tier(mut self, name: &str) -> Self {
        self.default = Some(name.to_string());
        self
    }

    /// Register a tier. A later tier with the same name replaces the earlier one.
    pub fn tier(mut self, tier: TierConfig) -> Self {
        self.tiers.insert(tier.name().to_string(), tier);
        self
    }

    pub fn build(self) -> Result<TierRegistry, GateError> {
        for tier in self.tiers.values() {
            if tier.capacity() == 0 || tier.refill_tokens() == 0 || tier.refill_interval_ms() == 0
            {
                return Err(GateError::Configuration(format!(
                    "tier '{}' must have a non-zero capacity and refill rate",
                    tier.name()
                )));
            }
        }

        let global = self
            .global
            .ok_or_else(|| GateError::Configuration("no global tier configured".to_string()))?;
        let default = self
            .default
            .ok_or_else(|| GateError::Configuration("no default tier configured".to_string()))?;

        for name in [&global, &default] {
            if !self.tiers.contains_key(name) {
                return Err(GateError::Configuration(format!(
                    "tier '{name}' is referenced but not registered"
                )));
            }
        }

        Ok(TierRegistry {
            tiers: self.tiers,
            global,
            default,
        })
    }
}
