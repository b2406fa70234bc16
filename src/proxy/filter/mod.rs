mod builtin;
mod chain;

pub use builtin::{DirectResponsePlugin, HeaderAppendPlugin};
pub use chain::PluginChain;
pub(crate) use chain::ChainCursor;

use crate::proxy::context::RequestContext;
use async_trait::async_trait;
use bytes::Bytes;
use http::Response;
use std::collections::HashMap;
use std::sync::Arc;

/// Free-form per-route plugin settings, as configured on the rule.
pub type PluginParams = HashMap<String, serde_json::Value>;

/// How the chain treats a plugin that returns [`ChainSignal::Continue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginRole {
    /// Continue means "run the next plugin".
    Continuing,
    /// Continue means "done": the chain ends with the context's direct
    /// response, or an empty 200. A terminal plugin that wants the rest of
    /// the chain to run calls [`PluginChain::next`] itself.
    Terminal,
}

/// Result of one plugin invocation.
pub enum ChainSignal {
    Continue,
    /// Short-circuit: return this response immediately.
    Respond(Response<Bytes>),
}

impl std::fmt::Debug for ChainSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainSignal::Continue => f.write_str("Continue"),
            ChainSignal::Respond(resp) => f
                .debug_tuple("Respond")
                .field(&resp.status())
                .finish(),
        }
    }
}

/// A named step in a route's plugin chain.
///
/// Plugins receive the request context, their own config map from the
/// rule, and the chain itself so a terminal plugin can resume it.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn role(&self) -> PluginRole {
        PluginRole::Continuing
    }

    async fn invoke(
        &self,
        ctx: &mut RequestContext,
        config: &PluginParams,
        chain: &PluginChain,
    ) -> anyhow::Result<ChainSignal>;
}

/// Runs once the plugin list is exhausted; normally forwards the request
/// to the backend.
#[async_trait]
pub trait BaseHandler: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext) -> anyhow::Result<Response<Bytes>>;
}

/// Plugin instances by the name rules refer to them with.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the plugins this crate ships.
    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        registry.register(HeaderAppendPlugin::NAME, Arc::new(HeaderAppendPlugin));
        registry.register(DirectResponsePlugin::NAME, Arc::new(DirectResponsePlugin));
        registry
    }

    /// Add a plugin; a later registration under the same name wins.
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        let name = name.into();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            tracing::warn!("plugin: replaced registration, name={}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
