use crate::config::{ApiConfigDef, PluginConfig, ProxyMode};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend-facing side of a rule, shared by every request that matches it.
///
/// The plugin list is hot-swappable: `set_plugin_configs` installs a new
/// list and bumps `generation`, which in-flight chain cursors compare
/// against to notice the change and rebuild.
#[derive(Debug)]
pub struct Route {
    pub api_id: i64,
    pub route_type: ProxyMode,
    /// `None` means every method.
    pub method: Option<http::Method>,
    /// Client path pattern the rule was declared with.
    pub path: String,
    pub backend_service: String,
    /// Backend path template; `None` forwards the client path unchanged.
    pub backend_path: Option<String>,
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub rpc: Option<RpcTarget>,
    plugin_configs: ArcSwap<Vec<PluginConfig>>,
    generation: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcTarget {
    pub method: String,
    pub param_types: Option<String>,
    pub version: Option<String>,
    pub group: Option<String>,
}

impl Route {
    /// `default_timeout` applies when the rule carries none of its own.
    pub fn from_def(
        def: &ApiConfigDef,
        method: Option<http::Method>,
        path: &str,
        default_timeout: Duration,
    ) -> Self {
        let timeout = if def.timeout_ms > 0 {
            Duration::from_millis(def.timeout_ms)
        } else {
            default_timeout
        };
        let backend_service = def
            .backend_service
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(def.service.trim())
            .to_string();
        let rpc = def.rpc_method.as_ref().map(|m| RpcTarget {
            method: m.clone(),
            param_types: def.rpc_param_types.clone(),
            version: def.rpc_version.clone(),
            group: def.rpc_group.clone(),
        });

        Self {
            api_id: def.id,
            route_type: def.proxy_mode,
            method,
            path: path.to_string(),
            backend_service,
            backend_path: def
                .backend_path
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            timeout,
            retry_count: def.retry_count,
            retry_interval: Duration::from_millis(def.retry_interval_ms),
            rpc,
            plugin_configs: ArcSwap::from_pointee(def.plugins.clone()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn plugin_configs(&self) -> Arc<Vec<PluginConfig>> {
        self.plugin_configs.load_full()
    }

    /// Install a new plugin list. Requests already walking the old list
    /// switch to this one on their next step.
    pub fn set_plugin_configs(&self, configs: Vec<PluginConfig>) {
        self.plugin_configs.store(Arc::new(configs));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(api_id = self.api_id, generation, "routing: plugin configs changed");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Generation and plugin list read together. The list is never older
    /// than the generation, so a racing swap at worst triggers one extra
    /// rebuild.
    pub fn snapshot(&self) -> (u64, Arc<Vec<PluginConfig>>) {
        let generation = self.generation();
        (generation, self.plugin_configs())
    }

    /// Whether `other` targets the same backend in the same way, ignoring
    /// the plugin list. A reload keeps the existing route when this holds.
    pub fn same_target(&self, other: &Route) -> bool {
        self.api_id == other.api_id
            && self.route_type == other.route_type
            && self.method == other.method
            && self.path == other.path
            && self.backend_service == other.backend_service
            && self.backend_path == other.backend_path
            && self.timeout == other.timeout
            && self.retry_count == other.retry_count
            && self.retry_interval == other.retry_interval
            && self.rpc == other.rpc
    }

    pub fn describe(&self) -> serde_json::Value {
        serde_json::json!({
            "api_id": self.api_id,
            "type": self.route_type,
            "method": self.method.as_ref().map_or("ALL", |m| m.as_str()),
            "path": self.path,
            "backend_service": self.backend_service,
            "backend_path": self.backend_path,
            "timeout_ms": self.timeout.as_millis() as u64,
            "retry_count": self.retry_count,
            "retry_interval_ms": self.retry_interval.as_millis() as u64,
            "rpc_method": self.rpc.as_ref().map(|r| r.method.as_str()),
            "plugins": self.plugin_configs().iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "generation": self.generation(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(def: &ApiConfigDef) -> Route {
        Route::from_def(def, None, &def.path, Duration::ZERO)
    }

    #[test]
    fn test_backend_service_defaults_to_service() {
        let def = ApiConfigDef::new(1, "user", "/users");
        assert_eq!(route(&def).backend_service, "user");

        let def = ApiConfigDef {
            backend_service: Some("user-backend".to_string()),
            ..ApiConfigDef::new(1, "user", "/users")
        };
        assert_eq!(route(&def).backend_service, "user-backend");
    }

    #[test]
    fn test_default_timeout_applies_when_unset() {
        let def = ApiConfigDef::new(1, "user", "/users");
        let r = Route::from_def(&def, None, "/users", Duration::from_millis(300));
        assert_eq!(r.timeout, Duration::from_millis(300));

        let def = ApiConfigDef {
            timeout_ms: 50,
            ..def
        };
        let r = Route::from_def(&def, None, "/users", Duration::from_millis(300));
        assert_eq!(r.timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_set_plugin_configs_bumps_generation() {
        let def = ApiConfigDef {
            plugins: vec![PluginConfig::new("auth")],
            ..ApiConfigDef::new(1, "user", "/users")
        };
        let r = route(&def);
        let (g0, before) = r.snapshot();
        assert_eq!(before.len(), 1);

        r.set_plugin_configs(vec![PluginConfig::new("auth"), PluginConfig::new("log")]);
        let (g1, after) = r.snapshot();
        assert_eq!(g1, g0 + 1);
        assert_eq!(after.len(), 2);
        // a reader holding the old list keeps it intact
        assert_eq!(before.len(), 1);
    }

    #[test]
    fn test_same_target_ignores_plugins() {
        let a = ApiConfigDef::new(1, "user", "/users");
        let b = ApiConfigDef {
            plugins: vec![PluginConfig::new("auth")],
            ..a.clone()
        };
        assert!(route(&a).same_target(&route(&b)));

        let c = ApiConfigDef {
            backend_path: Some("/v2/users".to_string()),
            ..a.clone()
        };
        assert!(!route(&a).same_target(&route(&c)));
    }

    #[test]
    fn test_describe() {
        let def = ApiConfigDef {
            plugins: vec![PluginConfig::new("auth")],
            ..ApiConfigDef::new(1, "user", "/users")
        };
        let v = route(&def).describe();
        assert_eq!(v["method"], "ALL");
        assert_eq!(v["type"], "service_discovery");
        assert_eq!(v["plugins"][0], "auth");
    }
}
