use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default`, treating JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub api_configs: Vec<ApiConfigDef>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub rate_limits: Vec<RateLimitDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Leading path segment every client request carries, e.g. `/proxy`.
    /// Blank or `/` means requests start directly with the service name.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_test_prefix")]
    pub test_prefix: String,

    /// Gateway groups this instance serves.
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,

    /// Headers searched in order for the calling app id.
    #[serde(default = "default_app_headers")]
    pub app_headers: Vec<String>,

    #[serde(default = "default_trace_header")]
    pub trace_header: String,

    #[serde(default = "default_trace_id_prefix")]
    pub trace_id_prefix: String,

    /// Applied to routes whose own timeout is 0.
    #[serde(default)]
    pub route_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            test_prefix: default_test_prefix(),
            groups: default_groups(),
            app_headers: default_app_headers(),
            trace_header: default_trace_header(),
            trace_id_prefix: default_trace_id_prefix(),
            route_timeout_ms: 0,
        }
    }
}

impl GatewaySettings {
    /// Whether client paths carry no gateway prefix segment.
    pub fn prefix_is_root(&self) -> bool {
        let p = self.prefix.trim();
        p.is_empty() || p == "/"
    }
}

fn default_prefix() -> String {
    "/proxy".to_string()
}

fn default_test_prefix() -> String {
    "/_proxytest".to_string()
}

pub(crate) const DEFAULT_GATEWAY_GROUP: &str = "default";

fn default_groups() -> Vec<String> {
    vec![DEFAULT_GATEWAY_GROUP.to_string()]
}

pub(crate) const DEFAULT_APP_HEADER: &str = "fizz-appid";

fn default_app_headers() -> Vec<String> {
    vec![DEFAULT_APP_HEADER.to_string()]
}

fn default_trace_header() -> String {
    "X-Trace-Id".to_string()
}

fn default_trace_id_prefix() -> String {
    "hermes-".to_string()
}

/// How the gateway reaches the backend of a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    ServiceAggregate,
    #[default]
    ServiceDiscovery,
    ReverseProxy,
    Callback,
    Dubbo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Allow,
    Forbid,
}

/// A plugin reference attached to a rule: plugin name plus its own
/// free-form config map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(alias = "plugin")]
    pub name: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub config: HashMap<String, serde_json::Value>,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A routing rule as it arrives from the configuration source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfigDef {
    pub id: i64,

    #[serde(default)]
    pub is_deleted: bool,

    /// Client-facing service name, the first path segment after the prefix.
    pub service: String,

    #[serde(default)]
    pub backend_service: Option<String>,

    /// Client path pattern. Blank or `/` matches everything.
    #[serde(default)]
    pub path: String,

    /// HTTP method; blank or unknown means all methods.
    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub backend_path: Option<String>,

    #[serde(default)]
    pub proxy_mode: ProxyMode,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub http_host_ports: Vec<String>,

    #[serde(default)]
    pub access: Access,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub plugins: Vec<PluginConfig>,

    /// Whether app-level auth is required.
    #[serde(default)]
    pub app_enable: bool,

    /// Empty means the default group only; `*` means every group.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub gateway_groups: Vec<String>,

    #[serde(default)]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub retry_interval_ms: u64,

    #[serde(default)]
    pub rpc_method: Option<String>,

    #[serde(default)]
    pub rpc_param_types: Option<String>,

    #[serde(default)]
    pub rpc_version: Option<String>,

    #[serde(default)]
    pub rpc_group: Option<String>,
}

impl ApiConfigDef {
    pub fn new(id: i64, service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id,
            is_deleted: false,
            service: service.into(),
            backend_service: None,
            path: path.into(),
            method: String::new(),
            backend_path: None,
            proxy_mode: ProxyMode::default(),
            http_host_ports: Vec::new(),
            access: Access::Allow,
            plugins: Vec::new(),
            app_enable: false,
            gateway_groups: Vec::new(),
            timeout_ms: 0,
            retry_count: 0,
            retry_interval_ms: 0,
            rpc_method: None,
            rpc_param_types: None,
            rpc_version: None,
            rpc_group: None,
        }
    }
}

/// Admission-control scope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Node,
    ServiceDefault,
    Service,
    Api,
    AppDefault,
    App,
    Ip,
}

/// A rate-limit entry as it arrives from the configuration source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitDef {
    pub id: i64,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    #[serde(default)]
    pub is_deleted: bool,

    #[serde(default = "default_enable")]
    pub enable: bool,

    /// Legacy single-field form: `_global` or a service name.
    #[serde(default)]
    pub resource: Option<String>,

    #[serde(default)]
    pub app: Option<String>,

    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub qps: u64,

    #[serde(default)]
    pub concurrents: u64,

    #[serde(default)]
    pub response_type: Option<String>,

    #[serde(default)]
    pub response_content: Option<String>,
}

fn default_enable() -> bool {
    true
}
