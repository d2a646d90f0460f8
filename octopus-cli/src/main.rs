//! Octopus CLI

mod config;
mod report;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use http::{Request, Response, StatusCode};
use octopus_core::{Body, FilterChain, FilterContext, FilterRegistry, HttpFilterContext, RemoteAddr};
use octopus_scripting::{ScriptCompiler, ScriptFilterSpec, FILTER_NAME};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "octopus")]
#[command(about = "Octopus script filter tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Scripting configuration file (YAML, TOML or JSON)
    #[arg(short, long, global = true, env = "OCTOPUS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a script filter and report its hooks
    Check {
        /// Inline script or path ending in .lua / .rhai
        source: String,

        /// Route parameters (key=value or bare key)
        params: Vec<String>,
    },

    /// Run a script against a synthetic request and print the result as JSON
    Run {
        /// Inline script or path ending in .lua / .rhai
        source: String,

        /// Route parameters (key=value or bare key)
        params: Vec<String>,

        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request URL
        #[arg(short, long, default_value = "http://localhost/")]
        url: String,

        /// Request header as name:value (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Backend URL exposed to the script
        #[arg(long, default_value = "")]
        backend_url: String,

        /// Status of the simulated backend response
        #[arg(long, default_value_t = 200)]
        status: u16,

        /// Hooks to run
        #[arg(long, value_enum, default_value_t = Phase::Both)]
        phase: Phase,
    },

    /// Show version information
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Phase {
    Request,
    Response,
    Both,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { source, params } => {
            init_tracing(&cli.log_level)?;
            let config = config::load(cli.config.as_deref())?;
            let compiler = ScriptCompiler::new(config)?;

            match compiler.build(&filter_args(source, params)) {
                Ok(filter) => {
                    tracing::info!("✓ Script is valid");
                    tracing::info!("  Source: {}", filter.source());
                    tracing::info!("  request hook: {}", filter.has_request_hook());
                    tracing::info!("  response hook: {}", filter.has_response_hook());
                    tracing::info!("  Route params: {}", filter.route_params().len());
                    tracing::info!("  Pooled interpreters: {}", filter.pool().idle());
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Script check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Run {
            source,
            params,
            method,
            url,
            headers,
            backend_url,
            status,
            phase,
        } => {
            init_tracing(&cli.log_level)?;
            let config = config::load(cli.config.as_deref())?;

            let mut registry = FilterRegistry::new();
            registry.register(Arc::new(ScriptFilterSpec::new(config)?));
            let filter = registry.create_filter(FILTER_NAME, &filter_args(source, params))?;
            let chain = FilterChain::new(vec![filter]);

            let request = build_request(&method, &url, &headers)?;
            let status = StatusCode::from_u16(status).context("Invalid backend status")?;
            let ctx = Arc::new(HttpFilterContext::new(request).with_backend_url(backend_url));

            // hooks are synchronous and may block on outbound http calls
            let dyn_ctx: Arc<dyn FilterContext> = ctx.clone();
            tokio::task::spawn_blocking(move || run_chain(&chain, &dyn_ctx, phase, status))
                .await
                .context("Hook execution panicked")?;

            let output = report::render(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }

        Commands::Version => {
            println!("Octopus script filters");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            println!("Filter name: {FILTER_NAME}");
            Ok(())
        }
    }
}

fn filter_args(source: String, params: Vec<String>) -> Vec<serde_json::Value> {
    std::iter::once(source)
        .chain(params)
        .map(serde_json::Value::String)
        .collect()
}

fn build_request(method: &str, url: &str, headers: &[String]) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(url);
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid header '{header}', expected name:value"))?;
        builder = builder.header(name.trim(), value.trim());
    }

    let mut request = builder
        .body(Body::new(Bytes::new()))
        .context("Invalid request")?;
    request
        .extensions_mut()
        .insert(RemoteAddr(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))));
    Ok(request)
}

fn run_chain(chain: &FilterChain, ctx: &Arc<dyn FilterContext>, phase: Phase, status: StatusCode) {
    let ran = match phase {
        Phase::Response => chain.len(),
        Phase::Request | Phase::Both => chain.request(ctx),
    };

    if phase == Phase::Request || ctx.is_served() {
        return;
    }

    let mut response = Response::new(Body::new(Bytes::new()));
    *response.status_mut() = status;
    *ctx.response().lock() = response;
    chain.response(ctx, ran);
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(filter.into())
                .add_directive("reqwest=warn".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopus_core::Filter;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "octopus",
            "run",
            "fn request(ctx) {}",
            "a=1",
            "-H",
            "X-A: 1",
            "--phase",
            "request",
            "-l",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Commands::Run {
                params,
                headers,
                phase,
                method,
                ..
            } => {
                assert_eq!(params, ["a=1"]);
                assert_eq!(headers, ["X-A: 1"]);
                assert_eq!(phase, Phase::Request);
                assert_eq!(method, "GET");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_build_request() {
        let req = build_request("POST", "http://example.org/x", &["X-A: 1".to_string()]).unwrap();
        assert_eq!(req.method(), "POST");
        assert_eq!(req.headers()["x-a"], "1");
        assert!(req.extensions().get::<RemoteAddr>().is_some());
        assert!(build_request("GET", "/", &["missing-colon".to_string()]).is_err());
    }

    #[test]
    fn test_run_chain_both_phases() {
        let compiler = ScriptCompiler::new(Default::default()).unwrap();
        let filter = compiler
            .build(&filter_args(
                r#"fn request(ctx) { ctx.request.header["X-Req"] = "1"; }
                   fn response(ctx) { ctx.state_bag["phase"] = "response"; }"#
                    .to_string(),
                vec![],
            ))
            .unwrap();
        let filter: Arc<dyn Filter> = Arc::new(filter);
        let chain = FilterChain::new(vec![filter]);
        let ctx: Arc<dyn FilterContext> = Arc::new(HttpFilterContext::new(
            build_request("GET", "http://localhost/", &[]).unwrap(),
        ));

        run_chain(&chain, &ctx, Phase::Both, StatusCode::ACCEPTED);
        assert_eq!(ctx.request().lock().headers()["x-req"], "1");
        assert_eq!(ctx.response().lock().status(), StatusCode::ACCEPTED);
        assert!(ctx.state_bag().lock().contains_key("phase"));
    }
}
