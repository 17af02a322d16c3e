// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process service registry with heartbeats and round-robin discovery.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// A registered service instance.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub service_name: String,
    pub address: String,
    pub metadata: HashMap<String, String>,
    pub healthy: bool,
    pub registered_at: DateTime<Utc>,
    #[serde(skip)]
    last_heartbeat: Instant,
}

impl ServiceInstance {
    /// Time since the last heartbeat.
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.elapsed()
    }
}

#[derive(Default)]
struct ServiceEntry {
    instances: Vec<ServiceInstance>,
    next: usize,
}

/// Registry of named services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance and return its id.
    pub async fn register(
        &self,
        service_name: &str,
        address: &str,
        metadata: HashMap<String, String>,
    ) -> String {
        let instance_id = uuid::Uuid::new_v4().to_string();
        let instance = ServiceInstance {
            instance_id: instance_id.clone(),
            service_name: service_name.to_string(),
            address: address.to_string(),
            metadata,
            healthy: true,
            registered_at: Utc::now(),
            last_heartbeat: Instant::now(),
        };

        let mut services = self.services.write().await;
        services
            .entry(service_name.to_string())
            .or_default()
            .instances
            .push(instance);

        info!(service = service_name, instance_id = %instance_id, address, "Registered service instance");
        instance_id
    }

    pub async fn deregister(&self, instance_id: &str) -> Result<ServiceInstance, ServiceError> {
        let mut services = self.services.write().await;
        for entry in services.values_mut() {
            if let Some(pos) = entry
                .instances
                .iter()
                .position(|i| i.instance_id == instance_id)
            {
                let removed = entry.instances.remove(pos);
                debug!(service = %removed.service_name, instance_id, "Deregistered service instance");
                return Ok(removed);
            }
        }
        Err(ServiceError::InstanceNotFound(instance_id.to_string()))
    }

    /// Refresh an instance's heartbeat and mark it healthy.
    pub async fn heartbeat(&self, instance_id: &str) -> Result<(), ServiceError> {
        self.with_instance(instance_id, |instance| {
            instance.last_heartbeat = Instant::now();
            instance.healthy = true;
        })
        .await
    }

    pub async fn set_health(&self, instance_id: &str, healthy: bool) -> Result<(), ServiceError> {
        self.with_instance(instance_id, |instance| instance.healthy = healthy)
            .await
    }

    async fn with_instance(
        &self,
        instance_id: &str,
        f: impl FnOnce(&mut ServiceInstance),
    ) -> Result<(), ServiceError> {
        let mut services = self.services.write().await;
        let instance = services
            .values_mut()
            .flat_map(|entry| entry.instances.iter_mut())
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| ServiceError::InstanceNotFound(instance_id.to_string()))?;
        f(instance);
        Ok(())
    }

    /// Pick a healthy instance, rotating across calls.
    pub async fn discover_service(&self, service_name: &str) -> Result<ServiceInstance, ServiceError> {
        let mut services = self.services.write().await;
        let entry = services
            .get_mut(service_name)
            .ok_or_else(|| ServiceError::ServiceUnavailable(service_name.to_string()))?;

        let healthy: Vec<&ServiceInstance> =
            entry.instances.iter().filter(|i| i.healthy).collect();
        if healthy.is_empty() {
            warn!(service = service_name, "No healthy instances");
            return Err(ServiceError::ServiceUnavailable(service_name.to_string()));
        }

        let chosen = healthy[entry.next % healthy.len()].clone();
        entry.next = entry.next.wrapping_add(1);
        Ok(chosen)
    }

    /// All instances of a service, healthy or not.
    pub async fn instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let services = self.services.read().await;
        services
            .get(service_name)
            .map(|entry| entry.instances.clone())
            .unwrap_or_default()
    }

    pub async fn service_names(&self) -> Vec<String> {
        let services = self.services.read().await;
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove instances whose last heartbeat is older than `timeout`.
    /// Returns the number removed.
    pub async fn prune_stale(&self, timeout: Duration) -> usize {
        let mut services = self.services.write().await;
        let mut removed = 0;
        for (name, entry) in services.iter_mut() {
            let before = entry.instances.len();
            entry
                .instances
                .retain(|i| i.last_heartbeat.elapsed() < timeout);
            let pruned = before - entry.instances.len();
            if pruned > 0 {
                info!(service = %name, pruned, "Pruned stale instances");
            }
            removed += pruned;
        }
        services.retain(|_, entry| !entry.instances.is_empty());
        removed
    }

    pub async fn clear(&self) {
        self.services.write().await.clear();
    }
}
