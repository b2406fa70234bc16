pub mod types;


pub use types::*;

use crate::ratelimit::resource::SEPARATOR;
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

impl PipelineConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides for gateway settings. When the file does not
    /// exist, built-in defaults are used.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: PipelineConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content, path.extension().and_then(|e| e.to_str()))?
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            PipelineConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            api_configs = config.api_configs.len(),
            rate_limits = config.rate_limits.len(),
            prefix = %config.gateway.prefix,
            "loaded pipeline configuration"
        );
        Ok(config)
    }

    /// Parse already-read config content; `ext` picks the format.
    pub fn parse(content: &str, ext: Option<&str>) -> Result<Self> {
        Ok(match ext {
            Some("toml") => toml::from_str(content)?,
            Some("json") => serde_json::from_str(content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
            None => anyhow::bail!("config file has no extension, use .toml or .json"),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HERMES_GATEWAY_PREFIX") {
            self.gateway.prefix = v;
        }
        if let Ok(v) = std::env::var("HERMES_GATEWAY_GROUPS") {
            self.gateway.groups = split_list(&v);
        }
        if let Ok(v) = std::env::var("HERMES_APP_HEADERS") {
            // custom headers extend the built-in one, they never replace it
            let mut headers = vec![DEFAULT_APP_HEADER.to_string()];
            headers.extend(split_list(&v).into_iter().filter(|h| h != DEFAULT_APP_HEADER));
            self.gateway.app_headers = headers;
        }
        if let Ok(v) = std::env::var("HERMES_TRACE_HEADER") {
            self.gateway.trace_header = v;
        }
        if let Ok(v) = std::env::var("HERMES_ROUTE_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.gateway.route_timeout_ms = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let gw = &self.gateway;
        if !gw.prefix_is_root() && !gw.prefix.starts_with('/') {
            anyhow::bail!("gateway prefix '{}' must start with '/'", gw.prefix);
        }
        if !gw.test_prefix.starts_with('/') {
            anyhow::bail!("gateway test prefix '{}' must start with '/'", gw.test_prefix);
        }
        if gw.trace_header.trim().is_empty() {
            anyhow::bail!("gateway trace header must not be empty");
        }

        let mut ids = HashSet::new();
        for api in &self.api_configs {
            if !ids.insert(api.id) {
                anyhow::bail!("duplicate api config id {}", api.id);
            }
            if api.is_deleted {
                continue;
            }
            if api.service.trim().is_empty() {
                anyhow::bail!("api config {} has empty service", api.id);
            }
            if api.proxy_mode == ProxyMode::ReverseProxy && api.http_host_ports.is_empty() {
                anyhow::bail!(
                    "api config {} is a reverse proxy rule without http_host_ports",
                    api.id
                );
            }
            for pc in &api.plugins {
                if pc.name.trim().is_empty() {
                    anyhow::bail!("api config {} has a plugin with empty name", api.id);
                }
            }
        }

        let mut ids = HashSet::new();
        for rl in &self.rate_limits {
            if !ids.insert(rl.id) {
                anyhow::bail!("duplicate rate limit id {}", rl.id);
            }
            let segments = [
                ("app", &rl.app),
                ("ip", &rl.ip),
                ("service", &rl.service),
                ("path", &rl.path),
                ("resource", &rl.resource),
            ];
            for (field, value) in segments {
                if let Some(v) = value {
                    if v.contains(SEPARATOR) {
                        anyhow::bail!(
                            "rate limit {}: {} '{}' contains the resource key delimiter '{}'",
                            rl.id, field, v, SEPARATOR
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Live (non-deleted) rule count.
    pub fn active_api_count(&self) -> usize {
        self.api_configs.iter().filter(|a| !a.is_deleted).count()
    }
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
