use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    NoRouteMatch { service: String, path: String },
    AccessForbidden { api_id: i64 },
    WrongPrefix(String),
    MalformedPath(String),
    UnknownPlugin(String),
    Plugin { plugin: String, source: anyhow::Error },
    BaseHandler(anyhow::Error),
    ClientDisconnected,
    NoBackendInstance(String),
    InvalidResourceSegment { field: &'static str, value: String },
    Config(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::NoRouteMatch { service, path } => {
                write!(f, "no route matched, service={}, path={}", service, path)
            }
            GatewayError::AccessForbidden { api_id } => {
                write!(f, "access forbidden by api config {}", api_id)
            }
            GatewayError::WrongPrefix(prefix) => write!(f, "wrong prefix {}", prefix),
            GatewayError::MalformedPath(path) => write!(f, "malformed request path {}", path),
            GatewayError::UnknownPlugin(name) => write!(f, "no plugin registered as {}", name),
            GatewayError::Plugin { plugin, source } => {
                write!(f, "plugin {} failed: {}", plugin, source)
            }
            GatewayError::BaseHandler(e) => write!(f, "base handler failed: {}", e),
            GatewayError::ClientDisconnected => write!(f, "client disconnected"),
            GatewayError::NoBackendInstance(service) => {
                write!(f, "no backend instance for {}", service)
            }
            GatewayError::InvalidResourceSegment { field, value } => {
                write!(f, "resource {} contains the key delimiter: {}", field, value)
            }
            GatewayError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GatewayError::Plugin { source, .. } => Some(&**source),
            GatewayError::BaseHandler(e) => Some(&**e),
            _ => None,
        }
    }
}

impl GatewayError {
    /// HTTP status the external error renderer should use for this failure.
    pub fn status(&self) -> http::StatusCode {
        match self {
            GatewayError::NoRouteMatch { .. } => http::StatusCode::NOT_FOUND,
            GatewayError::AccessForbidden { .. } => http::StatusCode::FORBIDDEN,
            GatewayError::WrongPrefix(_) | GatewayError::MalformedPath(_) => {
                http::StatusCode::BAD_REQUEST
            }
            GatewayError::NoBackendInstance(_) => http::StatusCode::SERVICE_UNAVAILABLE,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_no_route_match() {
        let e = GatewayError::NoRouteMatch {
            service: "svc".to_string(),
            path: "/a".to_string(),
        };
        assert_eq!(e.to_string(), "no route matched, service=svc, path=/a");
        assert_eq!(e.status(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn display_wrong_prefix() {
        let e = GatewayError::WrongPrefix("/nope".to_string());
        assert_eq!(e.to_string(), "wrong prefix /nope");
        assert_eq!(e.status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn display_unknown_plugin() {
        assert_eq!(
            GatewayError::UnknownPlugin("auth".to_string()).to_string(),
            "no plugin registered as auth"
        );
    }

    #[test]
    fn plugin_error_keeps_source() {
        let e = GatewayError::Plugin {
            plugin: "auth".to_string(),
            source: anyhow::anyhow!("token expired"),
        };
        assert_eq!(e.to_string(), "plugin auth failed: token expired");
        assert_eq!(e.source().unwrap().to_string(), "token expired");
        assert_eq!(e.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn display_client_disconnected() {
        assert_eq!(
            GatewayError::ClientDisconnected.to_string(),
            "client disconnected"
        );
    }

    #[test]
    fn display_invalid_resource_segment() {
        let e = GatewayError::InvalidResourceSegment {
            field: "service",
            value: "a^b".to_string(),
        };
        assert_eq!(e.to_string(), "resource service contains the key delimiter: a^b");
    }

    #[test]
    fn display_config() {
        assert_eq!(
            GatewayError::Config("bad toml".to_string()).to_string(),
            "config error: bad toml"
        );
    }
}
