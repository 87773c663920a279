//! Entry point for the 3Commas signing proxy and Binance price feed

use env_logger::Env;
use log::{error, info, LevelFilter};
use std::io::Write;
use std::net::SocketAddr;

use threecommas_proxy::config::Config;
use threecommas_proxy::server::build_router;
use threecommas_proxy::state::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn init_logging(config: &Config) {
    let connector_level = if config.three_commas.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(&config.general.log_level))
        .filter_module("threecommas_proxy::connectors::three_commas", connector_level)
        .format(|buf, record| {
            if record.level() <= log::Level::Info {
                writeln!(
                    buf,
                    "{} [{}] {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} [{} {}:{}] {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            }
        })
        .filter_module("tokio_tungstenite", LevelFilter::Warn)
        .filter_module("tungstenite", LevelFilter::Warn)
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("reqwest", LevelFilter::Warn)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received, stopping");
}

#[tokio::main]
async fn main() {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    info!("Starting threecommas-proxy");

    if config.three_commas.credentials().is_err() {
        error!("THREE_COMMAS_API_KEY / THREE_COMMAS_API_SECRET not set; signed routes will fail");
    }

    let addr: SocketAddr = match format!("{}:{}", config.server.host, config.server.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address {}:{}: {}", config.server.host, config.server.port, e);
            std::process::exit(1);
        }
    };

    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    // The feed runs for the whole process, even before any symbol is wanted.
    state.feed.ensure_connected();

    let app = build_router(state.clone());
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Server listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    state.feed.disconnect();
    info!("threecommas-proxy stopped");
}
