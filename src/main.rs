mod analysis;
mod cache;
mod comfy_table;
mod config;
mod error;
mod exchange;
mod find_tickers;
mod indicators;
mod klines;
mod metrics;
mod render;
mod routes;
mod state;
mod storage_utils;

use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use analysis::{ScanJob, Scanner};
use config::AppConfig;
use exchange::{ExchangeId, RestMarketSource};
use state::AppState;
use storage_utils::AsyncStorageManager;

const DEFAULT_TOP: usize = 15;

fn cli() -> Command {
    Command::new("demand-scanner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Scans spot markets for unusual volume and serves ranked results")
        .arg(
            Arg::new("storage")
                .long("storage")
                .value_name("DIR")
                .global(true)
                .help("Directory holding config.json (default: storage/ beside the executable)"),
        )
        .subcommand(Command::new("serve").about("Run the web dashboard (default)"))
        .subcommand(
            Command::new("scan")
                .about("Run one scan and print the ranked table")
                .arg(
                    Arg::new("exchange")
                        .short('e')
                        .long("exchange")
                        .value_name("ID")
                        .help("Exchange to scan (default: scan.default_exchange)"),
                )
                .arg(
                    Arg::new("top")
                        .short('n')
                        .long("top")
                        .value_name("COUNT")
                        .help("Number of rows to print")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("15"),
                ),
        )
}

async fn load_config(matches: &ArgMatches) -> anyhow::Result<AppConfig> {
    let storage = match matches.get_one::<String>("storage") {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };

    let mut config: AppConfig = storage.load_or_init("config").await?;
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("invalid config in {}", storage.path_of("config").display()))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches).await?;

    let source = Arc::new(
        RestMarketSource::new(config.scan.request_timeout())
            .context("failed to build HTTP client")?,
    );
    let scanner = Scanner::new(source, config.scan.clone(), config.indicators);

    match matches.subcommand() {
        Some(("scan", sub)) => {
            let exchange = match sub.get_one::<String>("exchange") {
                Some(id) => id.parse::<ExchangeId>()?,
                None => config.scan.default_exchange,
            };
            let top = sub.get_one::<usize>("top").copied().unwrap_or(DEFAULT_TOP);

            tracing::info!(%exchange, "running one-off scan");
            let result = scanner.run(exchange).await?;
            comfy_table::print(&result, top);
            Ok(())
        }
        _ => serve(config, Arc::new(scanner)).await,
    }
}

async fn serve(config: AppConfig, job: Arc<dyn ScanJob>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.server.bind, config.server.port))?;

    let state = AppState::new(config, job);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("scanner listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received, stopping");
}
