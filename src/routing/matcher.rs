use super::api_config::ApiConfig;
use super::route::Route;
use crate::config::{Access, ApiConfigDef, ProxyMode};
use crate::error::GatewayError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Ordering between two rules that both match a request. `Less` means
/// `a` wins.
pub trait MatchPrecedence: Send + Sync {
    fn compare(&self, a: &ApiConfig, b: &ApiConfig) -> Ordering;
}

/// Most specific rule first:
/// 1. exact path over pattern
/// 2. fewer `**` segments
/// 3. fewer single-segment wildcards and variables
/// 4. longer pattern text
/// 5. method-specific over all-methods
/// 6. lower id
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecificityFirst;

impl MatchPrecedence for SpecificityFirst {
    fn compare(&self, a: &ApiConfig, b: &ApiConfig) -> Ordering {
        b.exact_match
            .cmp(&a.exact_match)
            .then_with(|| a.pattern.any_count().cmp(&b.pattern.any_count()))
            .then_with(|| a.pattern.wildcard_count().cmp(&b.pattern.wildcard_count()))
            .then_with(|| b.path().len().cmp(&a.path().len()))
            .then_with(|| b.method.is_some().cmp(&a.method.is_some()))
            .then_with(|| a.id.cmp(&b.id))
    }
}

/// Everything the rest of the pipeline needs from a successful match.
/// Computed per request: the backend path and host pick differ between
/// requests on the same rule.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub api: Arc<ApiConfig>,
    pub route: Arc<Route>,
    pub backend_path: String,
    pub next_http_host_port: Option<String>,
}

/// Immutable rule table for one configuration version, swapped as a whole
/// on reload.
///
/// Rules are partitioned by client service and kept sorted by precedence,
/// so the first rule in a partition that matches is the best one.
#[derive(Default)]
pub struct ApiConfigTable {
    by_service: HashMap<String, Vec<Arc<ApiConfig>>>,
    by_id: HashMap<i64, Arc<ApiConfig>>,
}

impl ApiConfigTable {
    /// Build from rule definitions. Deleted rules and rules not served by
    /// any of `groups` are skipped; invalid ones are logged and dropped.
    ///
    /// When `previous` holds a rule with the same id and an unchanged
    /// backend target, its [`Route`] is carried over so requests already
    /// holding it see plugin changes in place.
    pub fn new(
        defs: &[ApiConfigDef],
        groups: &[String],
        default_timeout: Duration,
        precedence: &dyn MatchPrecedence,
        previous: Option<&ApiConfigTable>,
    ) -> Self {
        let mut by_service: HashMap<String, Vec<Arc<ApiConfig>>> = HashMap::new();
        let mut by_id = HashMap::new();

        for def in defs {
            if def.is_deleted {
                continue;
            }
            let api = match ApiConfig::from_def(def, default_timeout) {
                Ok(api) => api,
                Err(e) => {
                    tracing::warn!(api_id = def.id, "routing: api config dropped: {e}");
                    continue;
                }
            };
            if !api.served_by(groups) {
                tracing::debug!(
                    api_id = def.id,
                    "routing: api config skipped, not in gateway groups {:?}",
                    groups
                );
                continue;
            }

            let api = match previous.and_then(|t| t.get(def.id)) {
                Some(prev) if prev.route().same_target(api.route()) => {
                    let prev_route = Arc::clone(prev.route());
                    if *prev_route.plugin_configs() != def.plugins {
                        prev_route.set_plugin_configs(def.plugins.clone());
                    }
                    api.with_route(prev_route)
                }
                _ => api,
            };

            tracing::debug!(
                "routing: compiled api config, id={}, service={}, path={}, exact={}",
                api.id,
                api.service,
                api.path(),
                api.exact_match,
            );
            let api = Arc::new(api);
            by_id.insert(api.id, Arc::clone(&api));
            by_service.entry(api.service.clone()).or_default().push(api);
        }

        for rules in by_service.values_mut() {
            rules.sort_by(|a, b| precedence.compare(a, b));
        }

        tracing::info!("routing: compiled api config table, count={}", by_id.len());
        Self { by_service, by_id }
    }

    /// Best rule for a request, or `None` when nothing matches.
    pub fn match_api(
        &self,
        service: &str,
        method: &http::Method,
        path: &str,
    ) -> Option<Arc<ApiConfig>> {
        self.by_service
            .get(service)?
            .iter()
            .find(|api| api.matches(method, path))
            .cloned()
    }

    /// Match a request and produce its per-request route data.
    pub fn resolve(
        &self,
        service: &str,
        method: &http::Method,
        path: &str,
    ) -> Result<MatchedRoute, GatewayError> {
        let api = self
            .match_api(service, method, path)
            .ok_or_else(|| GatewayError::NoRouteMatch {
                service: service.to_string(),
                path: path.to_string(),
            })?;

        if api.access == Access::Forbid {
            return Err(GatewayError::AccessForbidden { api_id: api.id });
        }

        let next_http_host_port = api.next_http_host_port().map(str::to_string);
        if api.proxy_mode() == ProxyMode::ReverseProxy && next_http_host_port.is_none() {
            return Err(GatewayError::NoBackendInstance(
                api.route().backend_service.clone(),
            ));
        }

        Ok(MatchedRoute {
            backend_path: api.transform(path),
            route: Arc::clone(api.route()),
            next_http_host_port,
            api,
        })
    }

    pub fn get(&self, id: i64) -> Option<Arc<ApiConfig>> {
        self.by_id.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginConfig;

    fn groups() -> Vec<String> {
        vec!["default".to_string()]
    }

    fn table(defs: &[ApiConfigDef]) -> ApiConfigTable {
        ApiConfigTable::new(defs, &groups(), Duration::ZERO, &SpecificityFirst, None)
    }

    fn get() -> http::Method {
        http::Method::GET
    }

    #[test]
    fn test_exact_over_pattern() {
        let t = table(&[
            ApiConfigDef::new(1, "user", "/users/{id}"),
            ApiConfigDef::new(2, "user", "/users/list"),
        ]);
        assert_eq!(t.match_api("user", &get(), "/users/list").unwrap().id, 2);
        assert_eq!(t.match_api("user", &get(), "/users/7").unwrap().id, 1);
    }

    #[test]
    fn test_single_wildcard_over_double() {
        let t = table(&[
            ApiConfigDef::new(1, "user", "/users/**"),
            ApiConfigDef::new(2, "user", "/users/*"),
        ]);
        assert_eq!(t.match_api("user", &get(), "/users/7").unwrap().id, 2);
        assert_eq!(t.match_api("user", &get(), "/users/7/orders").unwrap().id, 1);
    }

    #[test]
    fn test_tie_breaks_on_lower_id() {
        let t = table(&[
            ApiConfigDef::new(9, "user", "/users/{id}"),
            ApiConfigDef::new(3, "user", "/users/{no}"),
        ]);
        assert_eq!(t.match_api("user", &get(), "/users/7").unwrap().id, 3);
    }

    #[test]
    fn test_method_specific_wins_tie() {
        let t = table(&[
            ApiConfigDef::new(1, "user", "/users"),
            ApiConfigDef {
                method: "POST".to_string(),
                ..ApiConfigDef::new(2, "user", "/users")
            },
        ]);
        assert_eq!(
            t.match_api("user", &http::Method::POST, "/users").unwrap().id,
            2
        );
        assert_eq!(t.match_api("user", &get(), "/users").unwrap().id, 1);
    }

    #[test]
    fn test_service_partition() {
        let t = table(&[ApiConfigDef::new(1, "user", "/**")]);
        assert!(t.match_api("user", &get(), "/a").is_some());
        assert!(t.match_api("order", &get(), "/a").is_none());
    }

    #[test]
    fn test_deleted_and_foreign_group_skipped() {
        let t = table(&[
            ApiConfigDef {
                is_deleted: true,
                ..ApiConfigDef::new(1, "user", "/a")
            },
            ApiConfigDef {
                gateway_groups: vec!["internal".to_string()],
                ..ApiConfigDef::new(2, "user", "/b")
            },
            ApiConfigDef::new(3, "user", "/c"),
        ]);
        assert_eq!(t.len(), 1);
        assert!(t.get(3).is_some());
    }

    #[test]
    fn test_invalid_rule_dropped() {
        let t = table(&[
            ApiConfigDef::new(1, "user", "/a/{id:[}"),
            ApiConfigDef::new(2, "user", "/b"),
        ]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_resolve_no_match() {
        let t = table(&[ApiConfigDef::new(1, "user", "/a")]);
        let err = t.resolve("user", &get(), "/b").unwrap_err();
        assert!(matches!(err, GatewayError::NoRouteMatch { .. }));
    }

    #[test]
    fn test_resolve_forbidden() {
        let t = table(&[ApiConfigDef {
            access: Access::Forbid,
            ..ApiConfigDef::new(4, "user", "/admin/**")
        }]);
        let err = t.resolve("user", &get(), "/admin/x").unwrap_err();
        assert!(matches!(err, GatewayError::AccessForbidden { api_id: 4 }));
    }

    #[test]
    fn test_resolve_reverse_proxy() {
        let t = table(&[ApiConfigDef {
            proxy_mode: ProxyMode::ReverseProxy,
            http_host_ports: vec!["http://a:1".to_string(), "http://b:2".to_string()],
            backend_path: Some("/v1/users/{id}".to_string()),
            ..ApiConfigDef::new(1, "user", "/users/{id}")
        }]);
        let m = t.resolve("user", &get(), "/users/5").unwrap();
        assert_eq!(m.backend_path, "/v1/users/5");
        assert_eq!(m.next_http_host_port.as_deref(), Some("http://a:1"));
        let m = t.resolve("user", &get(), "/users/6").unwrap();
        assert_eq!(m.next_http_host_port.as_deref(), Some("http://b:2"));
    }

    #[test]
    fn test_rebuild_carries_route_and_bumps_generation() {
        let v1 = ApiConfigDef {
            plugins: vec![PluginConfig::new("auth")],
            ..ApiConfigDef::new(1, "user", "/users")
        };
        let t1 = table(&[v1.clone()]);
        let route1 = Arc::clone(t1.get(1).unwrap().route());
        let g1 = route1.generation();

        // plugin-only change keeps the route and bumps its generation
        let v2 = ApiConfigDef {
            plugins: vec![PluginConfig::new("auth"), PluginConfig::new("log")],
            ..v1.clone()
        };
        let t2 = ApiConfigTable::new(
            &[v2],
            &groups(),
            Duration::ZERO,
            &SpecificityFirst,
            Some(&t1),
        );
        let route2 = Arc::clone(t2.get(1).unwrap().route());
        assert!(Arc::ptr_eq(&route1, &route2));
        assert_eq!(route1.generation(), g1 + 1);
        assert_eq!(route1.plugin_configs().len(), 2);

        // unchanged plugins leave the generation alone
        let t3 = ApiConfigTable::new(
            &[ApiConfigDef {
                plugins: vec![PluginConfig::new("auth"), PluginConfig::new("log")],
                ..v1.clone()
            }],
            &groups(),
            Duration::ZERO,
            &SpecificityFirst,
            Some(&t2),
        );
        assert!(Arc::ptr_eq(&route1, t3.get(1).unwrap().route()));
        assert_eq!(route1.generation(), g1 + 1);

        // a backend change builds a fresh route
        let v4 = ApiConfigDef {
            backend_path: Some("/v2/users".to_string()),
            ..v1
        };
        let t4 = ApiConfigTable::new(
            &[v4],
            &groups(),
            Duration::ZERO,
            &SpecificityFirst,
            Some(&t3),
        );
        assert!(!Arc::ptr_eq(&route1, t4.get(1).unwrap().route()));
    }

    struct LowestIdFirst;

    impl MatchPrecedence for LowestIdFirst {
        fn compare(&self, a: &ApiConfig, b: &ApiConfig) -> Ordering {
            a.id.cmp(&b.id)
        }
    }

    #[test]
    fn test_custom_precedence() {
        let defs = [
            ApiConfigDef::new(1, "user", "/users/**"),
            ApiConfigDef::new(2, "user", "/users/list"),
        ];
        let t = ApiConfigTable::new(&defs, &groups(), Duration::ZERO, &LowestIdFirst, None);
        assert_eq!(t.match_api("user", &get(), "/users/list").unwrap().id, 1);
    }
}
