use super::{BaseHandler, ChainSignal, PluginRegistry, PluginRole};
use crate::config::PluginConfig;
use crate::error::GatewayError;
use crate::proxy::context::{empty_response, RequestContext};
use bytes::Bytes;
use http::Response;
use std::sync::Arc;
use tracing::debug;

/// Position of a request inside its route's plugin list.
///
/// Stored in the request context. `generation` is the route's plugin
/// generation the list was taken from; when the route moves past it the
/// cursor is rebuilt from the route's current list.
#[derive(Debug, Clone)]
pub(crate) struct ChainCursor {
    configs: Arc<Vec<PluginConfig>>,
    position: usize,
    generation: u64,
}

/// Dispatches a request through its route's plugin chain, then the base
/// handler.
///
/// Each call to [`next`](Self::next) advances the cursor kept in the
/// context. Continuing plugins hand control straight to the next entry;
/// a response from any plugin ends the request there.
pub struct PluginChain {
    registry: Arc<PluginRegistry>,
    base: Arc<dyn BaseHandler>,
}

impl PluginChain {
    pub fn new(registry: Arc<PluginRegistry>, base: Arc<dyn BaseHandler>) -> Self {
        Self { registry, base }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Run the remaining plugins for this request and, if none of them
    /// responds, the base handler.
    pub async fn next(&self, ctx: &mut RequestContext) -> Result<Response<Bytes>, GatewayError> {
        if ctx.ignore_plugins {
            debug!(trace_id = %ctx.trace_id(), "plugin: chain skipped");
            return self.call_base(ctx).await;
        }

        loop {
            if ctx.is_cancelled() {
                debug!(trace_id = %ctx.trace_id(), "plugin: client gone, chain stopped");
                metrics::counter!("gateway_plugin_chain_total", "outcome" => "cancelled")
                    .increment(1);
                return Err(GatewayError::ClientDisconnected);
            }

            let Some((configs, idx)) = self.advance(ctx)? else {
                return self.call_base(ctx).await;
            };
            let pc = &configs[idx];
            let plugin = self
                .registry
                .get(&pc.name)
                .ok_or_else(|| GatewayError::UnknownPlugin(pc.name.clone()))?;

            debug!(trace_id = %ctx.trace_id(), plugin = %pc.name, "plugin: start");
            metrics::counter!("gateway_plugin_invocations_total", "plugin" => pc.name.clone())
                .increment(1);

            let signal = match plugin.invoke(ctx, &pc.config, self).await {
                Ok(s) => s,
                Err(source) => {
                    metrics::counter!("gateway_plugin_chain_total", "outcome" => "error")
                        .increment(1);
                    // a plugin that resumed the chain passes its failure through as is
                    return Err(match source.downcast::<GatewayError>() {
                        Ok(inner) => inner,
                        Err(source) => GatewayError::Plugin {
                            plugin: pc.name.clone(),
                            source,
                        },
                    });
                }
            };

            match signal {
                ChainSignal::Respond(resp) => {
                    debug!(
                        trace_id = %ctx.trace_id(),
                        plugin = %pc.name,
                        status = resp.status().as_u16(),
                        "plugin: responded"
                    );
                    metrics::counter!("gateway_plugin_chain_total", "outcome" => "responded")
                        .increment(1);
                    return Ok(resp);
                }
                ChainSignal::Continue if plugin.role() == PluginRole::Terminal => {
                    debug!(trace_id = %ctx.trace_id(), plugin = %pc.name, "plugin: terminal done");
                    metrics::counter!("gateway_plugin_chain_total", "outcome" => "terminal")
                        .increment(1);
                    return Ok(ctx.take_direct_response().unwrap_or_else(empty_response));
                }
                ChainSignal::Continue => {
                    debug!(trace_id = %ctx.trace_id(), plugin = %pc.name, "plugin: continue");
                }
            }
        }
    }

    /// Run the chain over an explicit plugin list instead of the route's.
    ///
    /// The list is used until the route's plugins change, after which the
    /// route's current list takes over.
    #[deprecated(note = "plugin lists belong to the route; use `next`")]
    pub async fn next_with(
        &self,
        ctx: &mut RequestContext,
        configs: Vec<PluginConfig>,
    ) -> Result<Response<Bytes>, GatewayError> {
        let generation = ctx.route().map_or(0, |r| r.generation());
        ctx.cursor = Some(ChainCursor {
            configs: Arc::new(configs),
            position: 0,
            generation,
        });
        self.next(ctx).await
    }

    /// Take the next plugin entry, rebuilding the cursor first when it is
    /// missing or the route's plugins changed since it was built.
    fn advance(
        &self,
        ctx: &mut RequestContext,
    ) -> Result<Option<(Arc<Vec<PluginConfig>>, usize)>, GatewayError> {
        let route = ctx.route().cloned();
        let stale = match (&ctx.cursor, &route) {
            (None, _) => true,
            (Some(cursor), Some(route)) => cursor.generation != route.generation(),
            (Some(_), None) => false,
        };

        if stale {
            let route = match route {
                Some(r) => r,
                None => {
                    return Err(GatewayError::NoRouteMatch {
                        service: String::new(),
                        path: ctx.uri_path.clone(),
                    })
                }
            };
            let (generation, configs) = route.snapshot();
            if ctx.cursor.is_some() {
                debug!(
                    trace_id = %ctx.trace_id(),
                    generation,
                    "plugin: route plugins changed, chain rebuilt"
                );
            }
            ctx.cursor = Some(ChainCursor {
                configs,
                position: 0,
                generation,
            });
        }

        let Some(cursor) = ctx.cursor.as_mut() else {
            return Ok(None);
        };
        if cursor.position >= cursor.configs.len() {
            return Ok(None);
        }
        let idx = cursor.position;
        cursor.position += 1;
        Ok(Some((Arc::clone(&cursor.configs), idx)))
    }

    async fn call_base(&self, ctx: &mut RequestContext) -> Result<Response<Bytes>, GatewayError> {
        if ctx.is_cancelled() {
            metrics::counter!("gateway_plugin_chain_total", "outcome" => "cancelled").increment(1);
            return Err(GatewayError::ClientDisconnected);
        }
        debug!(trace_id = %ctx.trace_id(), "plugin: chain done, calling base handler");
        metrics::counter!("gateway_plugin_chain_total", "outcome" => "base").increment(1);
        self.base.handle(ctx).await.map_err(GatewayError::BaseHandler)
    }
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
