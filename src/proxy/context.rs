use crate::config::GatewaySettings;
use crate::error::GatewayError;
use crate::proxy::filter::ChainCursor;
use crate::ratelimit::ResourceKey;
use crate::routing::{ApiConfig, MatchedRoute, Route};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const IPV6_LOOPBACK: &str = "0:0:0:0:0:0:0:1";

/// Outcome a plugin records for itself so later plugins can inspect it.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub filter: String,
    pub success: bool,
    pub data: HashMap<String, serde_json::Value>,
    pub cause: Option<String>,
}

/// Client service, in-service path and prefix split out of the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPath {
    pub service: String,
    pub path: String,
    /// Gateway prefix the request came in on, with trailing `/`.
    pub prefix: String,
}

/// Per-request state carried through matching and the plugin chain.
///
/// Derived values are computed on first read and cached. The context is
/// owned by one request; nothing here is shared across requests except
/// the settings and route handles.
pub struct RequestContext {
    pub method: http::Method,
    pub uri_path: String,
    pub raw_query: Option<String>,
    pub headers: HeaderMap,
    pub peer_ip: IpAddr,
    pub start: Instant,
    /// Skip the plugin chain and go straight to the base handler.
    pub ignore_plugins: bool,
    settings: Arc<GatewaySettings>,
    trace_id: String,
    client_path: Option<ClientPath>,
    app_id: Option<Option<String>>,
    origin_ip: Option<String>,
    matched: Option<MatchedRoute>,
    append_headers: HeaderMap,
    filter_results: HashMap<String, FilterResult>,
    prev_filter: Option<String>,
    direct_response: Option<Response<Bytes>>,
    cancel: CancellationToken,
    pub(crate) cursor: Option<ChainCursor>,
}

impl RequestContext {
    pub fn new(
        method: http::Method,
        uri: &http::Uri,
        headers: HeaderMap,
        peer_ip: IpAddr,
        settings: Arc<GatewaySettings>,
    ) -> Self {
        let trace_id = headers
            .get(settings.trace_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!("{}{:016x}", settings.trace_id_prefix, rand::random::<u64>())
            });

        Self {
            method,
            uri_path: uri.path().to_string(),
            raw_query: uri.query().filter(|q| !q.is_empty()).map(str::to_string),
            headers,
            peer_ip,
            start: Instant::now(),
            ignore_plugins: false,
            settings,
            trace_id,
            client_path: None,
            app_id: None,
            origin_ip: None,
            matched: None,
            append_headers: HeaderMap::new(),
            filter_results: HashMap::new(),
            prev_filter: None,
            direct_response: None,
            cancel: CancellationToken::new(),
            cursor: None,
        }
    }

    pub fn from_request<B>(
        req: &http::Request<B>,
        peer_ip: IpAddr,
        settings: Arc<GatewaySettings>,
    ) -> Self {
        Self::new(
            req.method().clone(),
            req.uri(),
            req.headers().clone(),
            peer_ip,
            settings,
        )
    }

    /// Tie the request to a transport-owned token; cancelling it stops the
    /// plugin chain before its next step.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ---- client path ----

    pub fn client_path_parts(&mut self) -> Result<&ClientPath, GatewayError> {
        let parts = match self.client_path.take() {
            Some(p) => p,
            None => split_client_path(&self.uri_path, &self.settings)?,
        };
        Ok(self.client_path.insert(parts))
    }

    pub fn client_service(&mut self) -> Result<&str, GatewayError> {
        Ok(self.client_path_parts()?.service.as_str())
    }

    pub fn client_path(&mut self) -> Result<&str, GatewayError> {
        Ok(self.client_path_parts()?.path.as_str())
    }

    pub fn client_path_prefix(&mut self) -> Result<&str, GatewayError> {
        Ok(self.client_path_parts()?.prefix.as_str())
    }

    pub fn client_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Client path with the original query string attached.
    pub fn client_path_query(&mut self) -> Result<String, GatewayError> {
        let query = self.raw_query.clone();
        let path = self.client_path()?;
        Ok(append_query(path, query.as_deref()))
    }

    /// `path` with this request's query string attached.
    pub fn append_query(&self, path: &str) -> String {
        append_query(path, self.raw_query.as_deref())
    }

    // ---- caller identity ----

    /// App id from the first configured app header that is present.
    pub fn app_id(&mut self) -> Option<&str> {
        if self.app_id.is_none() {
            let found = self.settings.app_headers.iter().find_map(|h| {
                self.headers
                    .get(h.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            });
            self.app_id = Some(found);
        }
        self.app_id.as_ref().and_then(|a| a.as_deref())
    }

    /// Caller address: the first X-Forwarded-For entry, or the peer when
    /// the header is missing or `unknown`.
    pub fn origin_ip(&mut self) -> &str {
        if self.origin_ip.is_none() {
            let forwarded = self
                .headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
                .map(str::to_string);
            let ip = forwarded.unwrap_or_else(|| self.peer_ip.to_string());
            let ip = if ip == IPV6_LOOPBACK || ip == "::1" {
                "127.0.0.1".to_string()
            } else {
                ip
            };
            self.origin_ip = Some(ip);
        }
        self.origin_ip.as_deref().unwrap_or_default()
    }

    /// Admission-control key for this request: app, origin ip, client
    /// service and client path.
    pub fn resource_key(&mut self) -> Result<ResourceKey, GatewayError> {
        let app = self.app_id().map(str::to_string);
        let ip = self.origin_ip().to_string();
        let parts = self.client_path_parts()?.clone();
        ResourceKey::new(
            app.as_deref(),
            Some(ip.as_str()),
            None,
            Some(parts.service.as_str()),
            Some(parts.path.as_str()),
        )
    }

    // ---- route ----

    pub fn bind_route(&mut self, matched: MatchedRoute) {
        self.matched = Some(matched);
    }

    pub fn matched_route(&self) -> Option<&MatchedRoute> {
        self.matched.as_ref()
    }

    pub fn route(&self) -> Option<&Arc<Route>> {
        self.matched.as_ref().map(|m| &m.route)
    }

    pub fn api_config(&self) -> Option<&Arc<ApiConfig>> {
        self.matched.as_ref().map(|m| &m.api)
    }

    // ---- headers ----

    /// Header to add to the backend request, replacing any client value.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.append_headers.insert(name, value);
    }

    pub fn append_headers(&self) -> &HeaderMap {
        &self.append_headers
    }

    /// Client headers with the appended ones applied on top.
    pub fn merged_headers(&self) -> HeaderMap {
        let mut merged = self.headers.clone();
        for (name, value) in &self.append_headers {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    // ---- filter results ----

    pub fn transmit_success(&mut self, filter: &str, data: HashMap<String, serde_json::Value>) {
        self.record(FilterResult {
            filter: filter.to_string(),
            success: true,
            data,
            cause: None,
        });
    }

    pub fn transmit_fail(&mut self, filter: &str, cause: impl Into<String>) {
        self.record(FilterResult {
            filter: filter.to_string(),
            success: false,
            data: HashMap::new(),
            cause: Some(cause.into()),
        });
    }

    fn record(&mut self, result: FilterResult) {
        self.prev_filter = Some(result.filter.clone());
        self.filter_results.insert(result.filter.clone(), result);
    }

    pub fn filter_result(&self, filter: &str) -> Option<&FilterResult> {
        self.filter_results.get(filter)
    }

    /// Result recorded by the most recent plugin that recorded one.
    pub fn prev_filter_result(&self) -> Option<&FilterResult> {
        self.prev_filter
            .as_deref()
            .and_then(|f| self.filter_results.get(f))
    }

    // ---- direct response ----

    pub fn set_direct_response(&mut self, resp: Response<Bytes>) {
        self.direct_response = Some(resp);
    }

    pub fn has_direct_response(&self) -> bool {
        self.direct_response.is_some()
    }

    pub fn take_direct_response(&mut self) -> Option<Response<Bytes>> {
        self.direct_response.take()
    }
}

/// Split a request path into client service, in-service path and prefix.
///
/// With a root prefix the first segment is the service. Otherwise the
/// first segment must be the gateway or test prefix and the second is
/// the service.
pub fn split_client_path(
    uri_path: &str,
    settings: &GatewaySettings,
) -> Result<ClientPath, GatewayError> {
    let malformed = || GatewayError::MalformedPath(uri_path.to_string());
    let rest = uri_path.strip_prefix('/').ok_or_else(malformed)?;
    let (first, after_first) = rest.split_once('/').ok_or_else(malformed)?;

    if settings.prefix_is_root() {
        if first.is_empty() {
            return Err(malformed());
        }
        return Ok(ClientPath {
            service: first.to_string(),
            path: format!("/{}", after_first),
            prefix: "/".to_string(),
        });
    }

    let prefix = &uri_path[..first.len() + 1];
    if prefix != settings.prefix && prefix != settings.test_prefix {
        return Err(GatewayError::WrongPrefix(prefix.to_string()));
    }
    let (service, path) = after_first.split_once('/').ok_or_else(malformed)?;
    if service.is_empty() {
        return Err(malformed());
    }
    Ok(ClientPath {
        service: service.to_string(),
        path: format!("/{}", path),
        prefix: format!("{}/", prefix),
    })
}

fn append_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if path.contains('?') => format!("{}&{}", path, q),
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

/// Empty 200 response, used when a terminal plugin finishes without
/// producing a response of its own.
pub fn empty_response() -> Response<Bytes> {
    let mut resp = Response::new(Bytes::new());
    *resp.status_mut() = StatusCode::OK;
    resp
}
