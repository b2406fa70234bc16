use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for pipeline latency (seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Thin handle around the global metrics recorder.
///
/// The pipeline records through the `metrics` macros whether or not a
/// recorder is installed; without one the calls are no-ops. The handle is
/// kept only to render a snapshot.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe every metric the
    /// pipeline emits. Fails if a recorder is already installed.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )?
            .install_recorder()?;
        describe();
        Ok(Self { handle })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn describe() {
    // routing
    describe_counter!(
        "gateway_route_match_total",
        Unit::Count,
        "Route match attempts by result (hit, miss, forbidden, error)"
    );
    describe_counter!(
        "gateway_route_reload_total",
        Unit::Count,
        "Configuration versions applied"
    );
    describe_gauge!(
        "gateway_config_api_configs_total",
        Unit::Count,
        "Number of api configs currently loaded"
    );

    // plugin chain
    describe_counter!(
        "gateway_plugin_invocations_total",
        Unit::Count,
        "Plugin invocations by plugin name"
    );
    describe_counter!(
        "gateway_plugin_chain_total",
        Unit::Count,
        "Finished plugin chains by outcome (base, responded, terminal, error, cancelled)"
    );
    describe_histogram!(
        "gateway_pipeline_duration_seconds",
        Unit::Seconds,
        "Time from request entry to pipeline result"
    );
}
