use super::pattern::PathPattern;
use super::route::Route;
use crate::config::{Access, ApiConfigDef, ProxyMode, DEFAULT_GATEWAY_GROUP};
use crate::error::GatewayError;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway group wildcard: the rule is served by every gateway group.
pub const ALL_GATEWAY_GROUPS: &str = "*";

/// Runtime form of a routing rule: what it matches on, where it goes, and
/// the shared [`Route`] the plugin chain reads its plugin list from.
///
/// Identity is the rule id; two configs with the same id are equal
/// regardless of content.
#[derive(Debug)]
pub struct ApiConfig {
    pub id: i64,
    pub service: String,
    pub method: Option<http::Method>,
    pub pattern: PathPattern,
    pub exact_match: bool,
    pub gateway_groups: BTreeSet<String>,
    pub access: Access,
    pub check_app: bool,
    pub http_host_ports: Vec<String>,
    counter: AtomicI32,
    route: Arc<Route>,
}

impl ApiConfig {
    pub fn from_def(def: &ApiConfigDef, default_timeout: Duration) -> Result<Self, GatewayError> {
        let path = normalize_path(&def.path);
        let pattern = PathPattern::new(&path)?;
        let method = parse_method(&def.method);
        let route = Route::from_def(def, method.clone(), &path, default_timeout);

        let mut gateway_groups: BTreeSet<String> = def
            .gateway_groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        if gateway_groups.is_empty() {
            gateway_groups.insert(DEFAULT_GATEWAY_GROUP.to_string());
        }

        Ok(Self {
            id: def.id,
            service: def.service.trim().to_string(),
            method,
            exact_match: pattern.is_exact(),
            pattern,
            gateway_groups,
            access: def.access,
            check_app: def.app_enable,
            http_host_ports: def.http_host_ports.clone(),
            counter: AtomicI32::new(0),
            route: Arc::new(route),
        })
    }

    pub fn route(&self) -> &Arc<Route> {
        &self.route
    }

    /// Swap in a route carried over from a previous table version.
    pub(crate) fn with_route(mut self, route: Arc<Route>) -> Self {
        self.route = route;
        self
    }

    pub fn path(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        self.route.route_type
    }

    pub fn served_by(&self, groups: &[String]) -> bool {
        self.gateway_groups.contains(ALL_GATEWAY_GROUPS)
            || groups.iter().any(|g| self.gateway_groups.contains(g))
    }

    pub fn matches(&self, method: &http::Method, path: &str) -> bool {
        if let Some(m) = &self.method {
            if m != method {
                return false;
            }
        }
        self.pattern.matches(path)
    }

    /// Next backend address, round robin over `http_host_ports`.
    pub fn next_http_host_port(&self) -> Option<&str> {
        if self.http_host_ports.is_empty() {
            return None;
        }
        // the counter wraps past i32::MAX; the magnitude keeps the index valid
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let idx = n.unsigned_abs() as usize % self.http_host_ports.len();
        Some(&self.http_host_ports[idx])
    }

    /// Backend path for a request on `client_path`.
    pub fn transform(&self, client_path: &str) -> String {
        let Some(backend_path) = self.route.backend_path.as_deref() else {
            return client_path.to_string();
        };
        if self.exact_match {
            return backend_path.to_string();
        }
        self.pattern
            .transform(backend_path, client_path)
            .unwrap_or_else(|| backend_path.to_string())
    }

    #[cfg(test)]
    pub(crate) fn set_counter(&self, value: i32) {
        self.counter.store(value, Ordering::Relaxed);
    }
}

impl PartialEq for ApiConfig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ApiConfig {}

impl Hash for ApiConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Blank or `/` matches every path.
fn normalize_path(path: &str) -> String {
    let p = path.trim();
    if p.is_empty() || p == "/" {
        "/**".to_string()
    } else {
        p.to_string()
    }
}

/// Standard verbs only; blank, `ALL` or anything unrecognized means every
/// method.
fn parse_method(method: &str) -> Option<http::Method> {
    match method.trim().to_ascii_uppercase().as_str() {
        "GET" => Some(http::Method::GET),
        "HEAD" => Some(http::Method::HEAD),
        "POST" => Some(http::Method::POST),
        "PUT" => Some(http::Method::PUT),
        "PATCH" => Some(http::Method::PATCH),
        "DELETE" => Some(http::Method::DELETE),
        "OPTIONS" => Some(http::Method::OPTIONS),
        "TRACE" => Some(http::Method::TRACE),
        _ => None,
    }
}
