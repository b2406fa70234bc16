use crate::config::PipelineConfig;
use crate::metrics::Metrics;
use crate::proxy::filter::{BaseHandler, PluginChain, PluginRegistry};
use crate::proxy::{self, RequestContext};
use crate::ratelimit::ResourceKey;
use crate::server::PipelineState;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Response};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Notify;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: PathBuf,
    pub command: Command,
}

pub enum Command {
    /// Resolve a client service + path to its route.
    Route {
        service: String,
        method: http::Method,
        path: String,
    },
    /// Print the rate-limit scope chain for a request key and the entry
    /// that would apply.
    Keys {
        app: Option<String>,
        ip: Option<String>,
        service: Option<String>,
        path: Option<String>,
    },
    /// Run one request through the whole pipeline against an echo backend.
    Simulate {
        method: http::Method,
        uri: String,
        headers: Vec<(String, String)>,
        peer: IpAddr,
        print_metrics: bool,
    },
    /// Load the config and reload it whenever the file changes, until
    /// interrupted.
    Watch { interval: Duration },
}

pub async fn run(args: BootstrapArgs) -> Result<()> {
    let _guard = init_tracing();

    let config = PipelineConfig::load(&args.config_path)?;
    let metrics = match &args.command {
        Command::Simulate {
            print_metrics: true,
            ..
        } => Some(Metrics::install()?),
        _ => None,
    };
    let chain = PluginChain::new(
        Arc::new(PluginRegistry::with_builtin_plugins()),
        Arc::new(EchoBackend),
    );
    let state = PipelineState::new(config, chain)?;

    match args.command {
        Command::Route {
            service,
            method,
            path,
        } => {
            let matched = state.routing.resolve(&service, &method, &path)?;
            let out = serde_json::json!({
                "api_id": matched.api.id,
                "service": matched.api.service,
                "exact_match": matched.api.exact_match,
                "backend_path": matched.backend_path,
                "next_http_host_port": matched.next_http_host_port,
                "route": matched.route.describe(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Keys {
            app,
            ip,
            service,
            path,
        } => {
            let key = ResourceKey::new(
                app.as_deref(),
                ip.as_deref(),
                None,
                service.as_deref(),
                path.as_deref(),
            )?;
            let scopes: Vec<String> = key.scope_chain().iter().map(|k| k.encode()).collect();
            let out = serde_json::json!({
                "resource_id": key.encode(),
                "scope_chain": scopes,
                "limit": state.rate_limits.resolve(&key).map(|c| (*c).clone()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Simulate {
            method,
            uri,
            headers,
            peer,
            ..
        } => {
            let mut builder = http::Request::builder().method(method).uri(uri.as_str());
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let req = builder.body(()).context("invalid simulated request")?;
            let mut ctx = state.new_context(&req, peer);
            let resp = match proxy::handle_request(&state, &mut ctx).await {
                Ok(resp) => resp,
                Err(e) => proxy::error_response(&e, ctx.trace_id()),
            };
            println!("HTTP {}", resp.status());
            for (name, value) in resp.headers() {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
            println!("{}", String::from_utf8_lossy(resp.body()));
            if let Some(m) = metrics {
                println!();
                print!("{}", m.render());
            }
        }
        Command::Watch { interval } => {
            let shutdown = Arc::new(Notify::new());
            let watcher = tokio::spawn(watch_config_file(
                state.clone(),
                args.config_path.clone(),
                interval,
                shutdown.clone(),
            ));
            wait_for_shutdown(&shutdown).await;
            if let Err(e) = watcher.await {
                tracing::error!("config: watcher task error: {}", e);
            }
        }
    }
    Ok(())
}

fn init_tracing() -> WorkerGuard {
    // stderr, so command output on stdout stays machine-readable
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stderr());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    guard
}

/// Base handler for simulation: answers with what a real backend call
/// would have been sent.
struct EchoBackend;

#[async_trait]
impl BaseHandler for EchoBackend {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<Response<Bytes>> {
        let (backend_service, backend_path, host) = match ctx.matched_route() {
            Some(m) => (
                m.route.backend_service.clone(),
                m.backend_path.clone(),
                m.next_http_host_port.clone(),
            ),
            None => anyhow::bail!("no route bound"),
        };
        let headers: serde_json::Map<String, serde_json::Value> = ctx
            .merged_headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().into(),
                )
            })
            .collect();
        let app_id = ctx.app_id().map(str::to_string);
        let origin_ip = ctx.origin_ip().to_string();
        let body = serde_json::json!({
            "trace_id": ctx.trace_id(),
            "backend_service": backend_service,
            "backend_url": ctx.append_query(&backend_path),
            "http_host_port": host,
            "app_id": app_id,
            "origin_ip": origin_ip,
            "headers": headers,
        });

        let mut resp = Response::new(Bytes::from(serde_json::to_vec_pretty(&body)?));
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(resp)
    }
}

/// Poll the config file and apply every new version to `state`.
async fn watch_config_file(
    state: PipelineState,
    path: PathBuf,
    interval: Duration,
    shutdown: Arc<Notify>,
) {
    let mut last_modified = modified_at(&path);
    tracing::info!(
        "config: watching {}, interval_ms={}",
        path.display(),
        interval.as_millis()
    );

    loop {
        if sleep_or_shutdown(interval, &shutdown).await {
            tracing::info!("config: watcher stopped");
            return;
        }
        let modified = modified_at(&path);
        if modified == last_modified {
            continue;
        }
        last_modified = modified;

        match PipelineConfig::load(&path) {
            Ok(config) => {
                if let Err(e) = state.reload(config).await {
                    tracing::error!("config: reload rejected, error={}", e);
                }
            }
            Err(e) => tracing::error!("config: reload failed to parse, error={}", e),
        }
    }
}

fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.notified() => true,
    }
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("server: received SIGINT, shutting down"),
        Err(e) => tracing::error!("server: signal handler failed, error={}", e),
    }
    shutdown.notify_one();
}
