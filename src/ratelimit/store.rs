use super::resource::{ResourceKey, APP_DEFAULT, NODE, SERVICE_DEFAULT};
use crate::config::{RateLimitDef, ResourceType};
use crate::error::GatewayError;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Runtime form of a rate-limit entry: the scope it covers plus its quotas.
///
/// The resource id is derived once at construction; the admission-control
/// filter looks entries up by that id.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRateLimitConfig {
    pub id: i64,
    pub resource_type: ResourceType,
    pub key: ResourceKey,
    pub qps: u64,
    pub concurrents: u64,
    pub enable: bool,
    pub response_type: Option<String>,
    pub response_content: Option<String>,
    resource_id: String,
}

impl ResourceRateLimitConfig {
    pub fn from_def(def: &RateLimitDef) -> Result<Self, GatewayError> {
        let mut app = non_blank(&def.app);
        let ip = non_blank(&def.ip);
        let mut node = None;
        let mut service = non_blank(&def.service);
        let path = non_blank(&def.path);

        // legacy `resource` field names either the node or a service
        if let Some(r) = non_blank(&def.resource) {
            if r != NODE && service.is_none() {
                service = Some(r);
            }
        }

        match def.resource_type {
            ResourceType::Node => node = Some(NODE),
            ResourceType::ServiceDefault => service = Some(SERVICE_DEFAULT),
            ResourceType::AppDefault => app = Some(APP_DEFAULT),
            _ => {}
        }

        let key = ResourceKey::new(app, ip, node, service, path)?;
        let resource_id = key.encode();
        Ok(Self {
            id: def.id,
            resource_type: def.resource_type,
            key,
            qps: def.qps,
            concurrents: def.concurrents,
            enable: def.enable,
            response_type: def.response_type.clone(),
            response_content: def.response_content.clone(),
            resource_id,
        })
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Concurrent map of live rate-limit entries keyed by resource id.
///
/// Entries are upserted and removed individually as the configuration
/// source reports changes; deleted or disabled entries are never stored.
#[derive(Default)]
pub struct ResourceRateLimitStore {
    by_resource: DashMap<String, Arc<ResourceRateLimitConfig>>,
    /// id -> resource id, so a changed entry can drop its old key.
    by_id: DashMap<i64, String>,
}

impl ResourceRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: &[RateLimitDef]) -> Self {
        let store = Self::new();
        for def in defs {
            if let Err(e) = store.upsert(def) {
                tracing::warn!(id = def.id, "ratelimit: entry dropped: {e}");
            }
        }
        tracing::info!("ratelimit: loaded resource limits, count={}", store.len());
        store
    }

    /// Apply one entry from the configuration source.
    pub fn upsert(&self, def: &RateLimitDef) -> Result<(), GatewayError> {
        if def.is_deleted || !def.enable {
            self.remove(def.id);
            return Ok(());
        }
        let cfg = ResourceRateLimitConfig::from_def(def)?;
        let resource_id = cfg.resource_id().to_string();
        if let Some(old) = self.by_id.insert(def.id, resource_id.clone()) {
            if old != resource_id {
                self.remove_owned(&old, def.id);
            }
        }
        tracing::debug!(id = def.id, resource = %resource_id, "ratelimit: upsert");
        self.by_resource.insert(resource_id, Arc::new(cfg));
        Ok(())
    }

    /// Make the store match `defs` exactly: entries are upserted and ids
    /// missing from `defs` are dropped.
    pub fn sync(&self, defs: &[RateLimitDef]) {
        let live: HashSet<i64> = defs.iter().map(|d| d.id).collect();
        let stale: Vec<i64> = self
            .by_id
            .iter()
            .map(|e| *e.key())
            .filter(|id| !live.contains(id))
            .collect();
        for id in stale {
            self.remove(id);
        }
        for def in defs {
            if let Err(e) = self.upsert(def) {
                tracing::warn!(id = def.id, "ratelimit: entry dropped: {e}");
                self.remove(def.id);
            }
        }
    }

    pub fn remove(&self, id: i64) {
        if let Some((_, resource_id)) = self.by_id.remove(&id) {
            self.remove_owned(&resource_id, id);
        }
    }

    /// Drop the slot for `resource_id` only while entry `id` still holds it;
    /// another entry on the same resource may have taken it over.
    fn remove_owned(&self, resource_id: &str, id: i64) {
        self.by_resource.remove_if(resource_id, |_, cfg| cfg.id == id);
    }

    pub fn get(&self, resource_id: &str) -> Option<Arc<ResourceRateLimitConfig>> {
        self.by_resource.get(resource_id).map(|e| e.value().clone())
    }

    /// Walk the scope chain of a request and return the first configured
    /// entry, most specific scope first.
    pub fn resolve(&self, key: &ResourceKey) -> Option<Arc<ResourceRateLimitConfig>> {
        key.scope_chain()
            .iter()
            .find_map(|scope| self.get(&scope.encode()))
    }

    pub fn len(&self) -> usize {
        self.by_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_resource.is_empty()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
