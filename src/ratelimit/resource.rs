//! Resource keys identify an admission-control scope.
//!
//! The wire form is `app^ip^node^service^path`: five positional segments,
//! four separators, absent segments left empty. The separator is not
//! escaped, so no segment may contain it; `ResourceKey::new` enforces that.
//! Callers that build keys through the free functions are expected to pass
//! pre-validated values.

use crate::error::GatewayError;
use serde::Serialize;
use std::fmt;

pub const SEPARATOR: char = '^';

pub const NODE: &str = "_global";
pub const NODE_RESOURCE: &str = "^^_global^^";

pub const SERVICE_DEFAULT: &str = "service_default";
pub const SERVICE_DEFAULT_RESOURCE: &str = "^^^service_default^";

pub const APP_DEFAULT: &str = "app_default";
pub const APP_DEFAULT_RESOURCE: &str = "app_default^^^^";

/// Structured form of a resource key. Empty segments are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceKey {
    pub app: Option<String>,
    pub ip: Option<String>,
    pub node: Option<String>,
    pub service: Option<String>,
    pub path: Option<String>,
}

impl ResourceKey {
    pub fn new(
        app: Option<&str>,
        ip: Option<&str>,
        node: Option<&str>,
        service: Option<&str>,
        path: Option<&str>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            app: segment("app", app)?,
            ip: segment("ip", ip)?,
            node: segment("node", node)?,
            service: segment("service", service)?,
            path: segment("path", path)?,
        })
    }

    pub fn node() -> Self {
        Self {
            node: Some(NODE.to_string()),
            ..Self::default()
        }
    }

    pub fn service_default() -> Self {
        Self {
            service: Some(SERVICE_DEFAULT.to_string()),
            ..Self::default()
        }
    }

    pub fn app_default() -> Self {
        Self {
            app: Some(APP_DEFAULT.to_string()),
            ..Self::default()
        }
    }

    /// Recover the structured key from its wire form.
    pub fn parse(resource: &str) -> Self {
        Self {
            app: get_app(resource).map(str::to_string),
            ip: get_ip(resource).map(str::to_string),
            node: get_node(resource).map(str::to_string),
            service: get_service(resource).map(str::to_string),
            path: get_path(resource).map(str::to_string),
        }
    }

    pub fn encode(&self) -> String {
        build_resource_id(
            self.app.as_deref(),
            self.ip.as_deref(),
            self.node.as_deref(),
            self.service.as_deref(),
            self.path.as_deref(),
        )
    }

    /// Keys an admission check should try for this request, most specific
    /// first, ending with the global node scope.
    pub fn scope_chain(&self) -> Vec<ResourceKey> {
        let mut chain: Vec<ResourceKey> = Vec::with_capacity(8);
        let mut push = |key: ResourceKey| {
            if !chain.contains(&key) {
                chain.push(key);
            }
        };

        push(Self {
            node: None,
            ..self.clone()
        });
        if self.app.is_some() && self.service.is_some() {
            push(Self {
                app: self.app.clone(),
                service: self.service.clone(),
                ..Self::default()
            });
        }
        if self.service.is_some() {
            if self.path.is_some() {
                push(Self {
                    service: self.service.clone(),
                    path: self.path.clone(),
                    ..Self::default()
                });
            }
            push(Self {
                service: self.service.clone(),
                ..Self::default()
            });
        }
        push(Self::service_default());
        if self.app.is_some() {
            push(Self {
                app: self.app.clone(),
                ..Self::default()
            });
            push(Self::app_default());
        }
        if self.ip.is_some() {
            push(Self {
                ip: self.ip.clone(),
                ..Self::default()
            });
        }
        push(Self::node());
        chain
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn segment(field: &'static str, value: Option<&str>) -> Result<Option<String>, GatewayError> {
    match value {
        None | Some("") => Ok(None),
        Some(v) if v.contains(SEPARATOR) => Err(GatewayError::InvalidResourceSegment {
            field,
            value: v.to_string(),
        }),
        Some(v) => Ok(Some(v.to_string())),
    }
}

pub fn build_resource_id(
    app: Option<&str>,
    ip: Option<&str>,
    node: Option<&str>,
    service: Option<&str>,
    path: Option<&str>,
) -> String {
    let mut buf = String::with_capacity(32);
    build_resource_id_to(&mut buf, app, ip, node, service, path);
    buf
}

pub fn build_resource_id_to(
    buf: &mut String,
    app: Option<&str>,
    ip: Option<&str>,
    node: Option<&str>,
    service: Option<&str>,
    path: Option<&str>,
) {
    buf.push_str(app.unwrap_or(""));
    buf.push(SEPARATOR);
    buf.push_str(ip.unwrap_or(""));
    buf.push(SEPARATOR);
    buf.push_str(node.unwrap_or(""));
    buf.push(SEPARATOR);
    buf.push_str(service.unwrap_or(""));
    buf.push(SEPARATOR);
    buf.push_str(path.unwrap_or(""));
}

/// Segment before the first separator; `None` when empty or when the key
/// has no separator at all.
pub fn get_app(resource: &str) -> Option<&str> {
    match resource.find(SEPARATOR) {
        Some(0) | None => None,
        Some(i) => Some(&resource[..i]),
    }
}

pub fn get_ip(resource: &str) -> Option<&str> {
    extract(resource, 1)
}

pub fn get_node(resource: &str) -> Option<&str> {
    extract(resource, 2)
}

pub fn get_service(resource: &str) -> Option<&str> {
    extract(resource, 3)
}

/// Everything after the last separator; `None` when the key ends right at it.
pub fn get_path(resource: &str) -> Option<&str> {
    let i = resource.rfind(SEPARATOR)?;
    let path = &resource[i + SEPARATOR.len_utf8()..];
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// The `n`th separator-bounded segment, `None` when missing or empty.
fn extract(resource: &str, n: usize) -> Option<&str> {
    // a key without separators has no bounded segments
    if !resource.contains(SEPARATOR) {
        return None;
    }
    resource.split(SEPARATOR).nth(n).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse_segments() {
        let id = build_resource_id(Some("app1"), Some("10.0.0.1"), Some(""), Some("svc"), Some("/p"));
        assert_eq!(id, "app1^10.0.0.1^^svc^/p");
        assert_eq!(get_app(&id), Some("app1"));
        assert_eq!(get_ip(&id), Some("10.0.0.1"));
        assert_eq!(get_node(&id), None);
        assert_eq!(get_service(&id), Some("svc"));
        assert_eq!(get_path(&id), Some("/p"));
    }

    #[test]
    fn test_separator_count_is_fixed() {
        let id = build_resource_id(None, None, None, None, None);
        assert_eq!(id, "^^^^");
        assert_eq!(id.matches(SEPARATOR).count(), 4);
    }

    #[test]
    fn test_constants_match_builder() {
        assert_eq!(
            NODE_RESOURCE,
            build_resource_id(None, None, Some(NODE), None, None)
        );
        assert_eq!(
            SERVICE_DEFAULT_RESOURCE,
            build_resource_id(None, None, None, Some(SERVICE_DEFAULT), None)
        );
        assert_eq!(
            APP_DEFAULT_RESOURCE,
            build_resource_id(Some(APP_DEFAULT), None, None, None, None)
        );
    }

    #[test]
    fn test_node_resource_parses() {
        assert_eq!(get_node(NODE_RESOURCE), Some("_global"));
        assert_eq!(get_app(NODE_RESOURCE), None);
        assert_eq!(get_ip(NODE_RESOURCE), None);
        assert_eq!(get_service(NODE_RESOURCE), None);
        assert_eq!(get_path(NODE_RESOURCE), None);
        assert_eq!(ResourceKey::parse(NODE_RESOURCE), ResourceKey::node());
    }

    #[test]
    fn test_malformed_keys_yield_none() {
        assert_eq!(get_app("no-separator"), None);
        assert_eq!(get_ip("no-separator"), None);
        assert_eq!(get_service("a^b"), None);
        assert_eq!(get_path("no-separator"), None);
        assert_eq!(get_path(""), None);
    }

    #[test]
    fn test_new_rejects_separator_in_segment() {
        let err = ResourceKey::new(None, None, None, Some("a^b"), None).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidResourceSegment { field: "service", .. }
        ));
    }

    #[test]
    fn test_new_treats_empty_as_absent() {
        let key = ResourceKey::new(Some(""), Some("1.2.3.4"), None, Some("svc"), None).unwrap();
        assert_eq!(key.app, None);
        assert_eq!(key.encode(), "^1.2.3.4^^svc^");
        assert_eq!(ResourceKey::parse(&key.encode()), key);
    }

    #[test]
    fn test_scope_chain_order() {
        let key =
            ResourceKey::new(Some("app1"), Some("10.0.0.1"), None, Some("svc"), Some("/p"))
                .unwrap();
        let chain: Vec<String> = key.scope_chain().iter().map(|k| k.encode()).collect();
        assert_eq!(
            chain,
            vec![
                "app1^10.0.0.1^^svc^/p".to_string(),
                "app1^^^svc^".to_string(),
                "^^^svc^/p".to_string(),
                "^^^svc^".to_string(),
                SERVICE_DEFAULT_RESOURCE.to_string(),
                "app1^^^^".to_string(),
                APP_DEFAULT_RESOURCE.to_string(),
                "^10.0.0.1^^^".to_string(),
                NODE_RESOURCE.to_string(),
            ]
        );
    }

    #[test]
    fn test_scope_chain_service_only_dedups() {
        let key = ResourceKey::new(None, None, None, Some("svc"), None).unwrap();
        let chain: Vec<String> = key.scope_chain().iter().map(|k| k.encode()).collect();
        assert_eq!(
            chain,
            vec![
                "^^^svc^".to_string(),
                SERVICE_DEFAULT_RESOURCE.to_string(),
                NODE_RESOURCE.to_string(),
            ]
        );
    }
}
