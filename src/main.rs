use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hermes_pipeline::server::bootstrap::{self, BootstrapArgs, Command};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hermes-pipeline", about = "API gateway request pipeline")]
struct Cli {
    /// Path to pipeline config file (.toml or .json)
    #[arg(short, long, default_value = "pipeline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Resolve a client service + path to its route
    Route {
        #[arg(long)]
        service: String,
        #[arg(long, default_value = "GET")]
        method: String,
        #[arg(long)]
        path: String,
    },
    /// Print the rate-limit scope chain for a request key
    Keys {
        #[arg(long)]
        app: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Run one request through the pipeline against an echo backend
    Simulate {
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request URI including the gateway prefix, e.g. /proxy/user/users/1
        #[arg(long)]
        uri: String,
        /// Request header as name:value, repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        peer: IpAddr,
        /// Print a metrics snapshot after the response
        #[arg(long)]
        metrics: bool,
    },
    /// Hot-reload the config file on change until Ctrl-C
    Watch {
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = match cli.command {
        Cmd::Route {
            service,
            method,
            path,
        } => Command::Route {
            service,
            method: parse_method(&method)?,
            path,
        },
        Cmd::Keys {
            app,
            ip,
            service,
            path,
        } => Command::Keys {
            app,
            ip,
            service,
            path,
        },
        Cmd::Simulate {
            method,
            uri,
            headers,
            peer,
            metrics,
        } => Command::Simulate {
            method: parse_method(&method)?,
            uri,
            headers: headers
                .iter()
                .map(|h| parse_header(h))
                .collect::<Result<_>>()?,
            peer,
            print_metrics: metrics,
        },
        Cmd::Watch { interval_ms } => Command::Watch {
            interval: Duration::from_millis(interval_ms.max(1)),
        },
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(bootstrap::run(BootstrapArgs {
        config_path: cli.config,
        command,
    }))
}

fn parse_method(raw: &str) -> Result<http::Method> {
    http::Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method {raw}"))
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header must be name:value, got {raw}"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}
