//! Health reporting for the long-running loops of the worker and janitor
//! daemons.
//!
//! Each loop registers a component with a reporting deadline and calls
//! `report_healthy` every iteration. The process is healthy while every
//! component either reported recently or is still starting up; a component
//! that misses its deadline marks the whole process unhealthy.

use std::collections::HashMap;
use std::ops::Add;
use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Registered but has not reported yet.
    Starting,
    /// Reported healthy; trusted until the embedded deadline.
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy explicitly.
    Unhealthy,
}

impl ComponentStatus {
    fn is_healthy(&self, now: OffsetDateTime) -> bool {
        match self {
            ComponentStatus::Starting => true,
            ComponentStatus::HealthyUntil(deadline) => *deadline > now,
            ComponentStatus::Unhealthy => false,
        }
    }
}

#[derive(Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    /// 200 when healthy, 500 otherwise, with the per-component breakdown in
    /// the body for debugging.
    fn into_response(self) -> Response {
        let body = format!("{:?}", self);
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Register a component and get a handle it reports through. Must report
    /// more frequently than `deadline` once it has reported at all.
    pub fn register(&self, component: String, deadline: Duration) -> HealthHandle {
        self.components
            .write()
            .expect("health registry lock poisoned")
            .insert(component.clone(), ComponentStatus::Starting);

        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let now = OffsetDateTime::now_utc();
        let components = self
            .components
            .read()
            .expect("health registry lock poisoned")
            .clone();

        let healthy = !components.is_empty() && components.values().all(|c| c.is_healthy(now));
        if !healthy {
            tracing::warn!(registry = %self.name, ?components, "process is unhealthy");
        }

        HealthStatus { healthy, components }
    }
}

pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Report healthy. Must be called again before the deadline elapses.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc().add(self.deadline),
        ));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        self.components
            .write()
            .expect("health registry lock poisoned")
            .insert(self.component.clone(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new("liveness");
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_starting_component_counts_as_healthy() {
        let registry = HealthRegistry::new("liveness");
        let _handle = registry.register("loop".to_owned(), Duration::seconds(30));
        assert!(registry.get_status().healthy);
    }

    #[test]
    fn test_reporting_and_deadline_expiry() {
        let registry = HealthRegistry::new("liveness");
        let handle = registry.register("loop".to_owned(), Duration::seconds(-1));

        // A negative deadline puts the healthy-until instant in the past.
        handle.report_healthy();
        assert!(!registry.get_status().healthy);

        let handle = registry.register("loop".to_owned(), Duration::seconds(30));
        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_status(ComponentStatus::Unhealthy);
        assert!(!registry.get_status().healthy);
    }
}
