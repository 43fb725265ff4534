//! Collaborator boundaries: availability rules and the service catalog.
//!
//! Both are owned and mutated elsewhere (business management); the core only
//! reads them, fresh per call, so it can never serve stale availability. The
//! in-memory implementations back tests and single-process embeddings.

use async_trait::async_trait;
use chrono::Weekday;
use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_RULES_PER_DAY;
use crate::model::{AvailabilityRule, Service};

/// Read access to a business's recurring weekly open windows.
#[async_trait]
pub trait AvailabilityRules: Send + Sync + 'static {
    async fn rules_for(
        &self,
        business_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<AvailabilityRule>, EngineError>;
}

/// Read access to bookable services and their scheduling policy.
#[async_trait]
pub trait ServiceCatalog: Send + Sync + 'static {
    async fn service(&self, service_id: Ulid) -> Result<Service, EngineError>;
}

// ── In-memory implementations ────────────────────────────

pub struct InMemoryRules {
    rules: DashMap<Ulid, Vec<AvailabilityRule>>,
}

impl Default for InMemoryRules {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRules {
    pub fn new() -> Self {
        Self {
            rules: DashMap::new(),
        }
    }

    /// Add a window. Rules are validated here, at the management boundary,
    /// so the scheduling core can assume well-formed windows.
    pub fn add(&self, rule: AvailabilityRule) -> Result<(), EngineError> {
        rule.validate().map_err(EngineError::LimitExceeded)?;
        let mut entry = self.rules.entry(rule.business_id).or_default();
        let same_day = entry.iter().filter(|r| r.weekday == rule.weekday).count();
        if same_day >= MAX_RULES_PER_DAY {
            return Err(EngineError::LimitExceeded("too many rules for one day"));
        }
        entry.push(rule);
        Ok(())
    }

    pub fn remove(&self, business_id: Ulid, rule_id: Ulid) {
        if let Some(mut entry) = self.rules.get_mut(&business_id) {
            entry.retain(|r| r.id != rule_id);
        }
    }
}

#[async_trait]
impl AvailabilityRules for InMemoryRules {
    async fn rules_for(
        &self,
        business_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<AvailabilityRule>, EngineError> {
        // Unknown business ⇒ no windows, not an error.
        Ok(self
            .rules
            .get(&business_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|r| r.weekday == weekday)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub struct InMemoryCatalog {
    services: DashMap<Ulid, Service>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    pub fn insert(&self, service: Service) -> Result<(), EngineError> {
        if service.duration_min == 0 {
            return Err(EngineError::LimitExceeded("service duration must be positive"));
        }
        self.services.insert(service.id, service);
        Ok(())
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn service(&self, service_id: Ulid) -> Result<Service, EngineError> {
        self.services
            .get(&service_id)
            .map(|s| *s.value())
            .ok_or(EngineError::NotFound(service_id))
    }
}
