use super::{ChainSignal, Plugin, PluginChain, PluginParams, PluginRole};
use crate::proxy::context::RequestContext;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderName, HeaderValue, Response, StatusCode};
use std::collections::HashMap;

/// Adds configured headers to the backend request.
///
/// ```toml
/// plugins = [{ name = "header_append", config = { headers = { "x-from" = "gateway" } } }]
/// ```
pub struct HeaderAppendPlugin;

impl HeaderAppendPlugin {
    pub const NAME: &'static str = "header_append";
}

#[async_trait]
impl Plugin for HeaderAppendPlugin {
    async fn invoke(
        &self,
        ctx: &mut RequestContext,
        config: &PluginParams,
        _chain: &PluginChain,
    ) -> anyhow::Result<ChainSignal> {
        let Some(headers) = config.get("headers").and_then(|h| h.as_object()) else {
            return Ok(ChainSignal::Continue);
        };
        for (name, value) in headers {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name}"))?;
            let value = HeaderValue::from_str(&value)
                .with_context(|| format!("invalid value for header {name}"))?;
            ctx.append_header(name, value);
        }
        ctx.transmit_success(
            Self::NAME,
            HashMap::from([("count".to_string(), headers.len().into())]),
        );
        Ok(ChainSignal::Continue)
    }
}

/// Ends the chain with a canned response instead of calling the backend.
///
/// Config keys: `status` (default 200), `content_type` (default
/// `application/json`) and `body`, a string or any JSON value.
pub struct DirectResponsePlugin;

impl DirectResponsePlugin {
    pub const NAME: &'static str = "direct_response";
}

#[async_trait]
impl Plugin for DirectResponsePlugin {
    fn role(&self) -> PluginRole {
        PluginRole::Terminal
    }

    async fn invoke(
        &self,
        ctx: &mut RequestContext,
        config: &PluginParams,
        _chain: &PluginChain,
    ) -> anyhow::Result<ChainSignal> {
        let status = match config.get("status").and_then(|s| s.as_u64()) {
            Some(code) => u16::try_from(code)
                .ok()
                .and_then(|c| StatusCode::from_u16(c).ok())
                .with_context(|| format!("invalid status {code}"))?,
            None => StatusCode::OK,
        };
        let content_type = config
            .get("content_type")
            .and_then(|c| c.as_str())
            .unwrap_or("application/json");
        let body = match config.get("body") {
            Some(serde_json::Value::String(s)) => Bytes::from(s.clone()),
            Some(v) => Bytes::from(serde_json::to_vec(v)?),
            None => Bytes::new(),
        };

        let mut resp = Response::new(body);
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_str(content_type).context("invalid content_type")?,
        );
        // picked up by the chain when this terminal plugin returns
        ctx.set_direct_response(resp);
        Ok(ChainSignal::Continue)
    }
}
