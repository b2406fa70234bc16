use crate::config::{GatewaySettings, PipelineConfig};
use crate::error::GatewayError;
use crate::proxy::context::RequestContext;
use crate::proxy::filter::PluginChain;
use crate::ratelimit::ResourceRateLimitStore;
use crate::routing::{ApiConfigTable, MatchPrecedence, MatchedRoute, SpecificityFirst};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Routing domain: the current rule table plus the precedence used to
/// order rules when a table is built.
#[derive(Clone)]
pub struct RoutingState {
    pub table: Arc<ArcSwap<ApiConfigTable>>,
    precedence: Arc<dyn MatchPrecedence>,
}

impl RoutingState {
    pub fn new(config: &PipelineConfig, precedence: Arc<dyn MatchPrecedence>) -> Self {
        let table = build_table(config, &*precedence, None);
        Self {
            table: Arc::new(ArcSwap::from_pointee(table)),
            precedence,
        }
    }

    /// Build the next table version from `config`, carrying over routes
    /// whose backend target is unchanged.
    fn rebuild_table(&self, config: &PipelineConfig) {
        let previous = self.table.load_full();
        let table = build_table(config, &*self.precedence, Some(&*previous));
        self.table.store(Arc::new(table));
    }

    pub fn resolve(
        &self,
        service: &str,
        method: &http::Method,
        path: &str,
    ) -> Result<MatchedRoute, GatewayError> {
        self.table.load().resolve(service, method, path)
    }

    pub fn api_count(&self) -> usize {
        self.table.load().len()
    }
}

fn build_table(
    config: &PipelineConfig,
    precedence: &dyn MatchPrecedence,
    previous: Option<&ApiConfigTable>,
) -> ApiConfigTable {
    ApiConfigTable::new(
        &config.api_configs,
        &config.gateway.groups,
        Duration::from_millis(config.gateway.route_timeout_ms),
        precedence,
        previous,
    )
}

/// Shared pipeline state, cheaply cloneable.
///
/// All config mutations are serialized through `config_mu`. Reads via
/// `ArcSwap::load` stay lock-free, so in-flight requests keep the table
/// version they matched against.
#[derive(Clone)]
pub struct PipelineState {
    pub config: Arc<ArcSwap<PipelineConfig>>,
    pub settings: Arc<ArcSwap<GatewaySettings>>,
    pub routing: RoutingState,
    pub rate_limits: Arc<ResourceRateLimitStore>,
    pub chain: Arc<PluginChain>,
    config_mu: Arc<Mutex<()>>,
}

impl PipelineState {
    pub fn new(config: PipelineConfig, chain: PluginChain) -> Result<Self> {
        Self::with_precedence(config, chain, Arc::new(SpecificityFirst))
    }

    pub fn with_precedence(
        config: PipelineConfig,
        chain: PluginChain,
        precedence: Arc<dyn MatchPrecedence>,
    ) -> Result<Self> {
        config.validate()?;
        warn_unregistered_plugins(&config, &chain);

        let routing = RoutingState::new(&config, precedence);
        let rate_limits = ResourceRateLimitStore::from_defs(&config.rate_limits);
        metrics::gauge!("gateway_config_api_configs_total").set(routing.api_count() as f64);

        Ok(Self {
            settings: Arc::new(ArcSwap::from_pointee(config.gateway.clone())),
            config: Arc::new(ArcSwap::from_pointee(config)),
            routing,
            rate_limits: Arc::new(rate_limits),
            chain: Arc::new(chain),
            config_mu: Arc::new(Mutex::new(())),
        })
    }

    /// Apply a new configuration version reported by the configuration
    /// source. Rule tables are rebuilt, rate-limit entries synced, and
    /// routes whose plugin list changed are flagged for in-flight requests.
    pub async fn reload(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.config_mu.lock().await;
        warn_unregistered_plugins(&config, &self.chain);

        self.routing.rebuild_table(&config);
        self.rate_limits.sync(&config.rate_limits);
        self.settings.store(Arc::new(config.gateway.clone()));
        self.config.store(Arc::new(config));

        metrics::counter!("gateway_route_reload_total").increment(1);
        metrics::gauge!("gateway_config_api_configs_total")
            .set(self.routing.api_count() as f64);
        info!(
            "config: reloaded, api_configs={}, rate_limits={}",
            self.routing.api_count(),
            self.rate_limits.len()
        );
        Ok(())
    }

    /// Fresh context for an inbound request under the current settings.
    pub fn new_context<B>(&self, req: &http::Request<B>, peer_ip: IpAddr) -> RequestContext {
        RequestContext::from_request(req, peer_ip, self.settings.load_full())
    }
}

fn warn_unregistered_plugins(config: &PipelineConfig, chain: &PluginChain) {
    for api in config.api_configs.iter().filter(|a| !a.is_deleted) {
        for pc in &api.plugins {
            if !chain.registry().contains(&pc.name) {
                tracing::warn!(
                    api_id = api.id,
                    "config: plugin not registered, name={}",
                    pc.name
                );
            }
        }
    }
}
