use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod admin;
mod bbox;
mod config;
mod dedup;
mod dispatcher;
mod error;
mod fanout;
mod model;
mod nmea;
mod runtime;
mod source;
mod vessel_state;
mod watchlist;
mod ws_handler;

use config::Config;
use runtime::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");

    let config_path = std::env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.json".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone()));

    // Held for the process lifetime: dropping it stops the background flush
    // thread and the guarded writer silently stops emitting.
    let _file_guard = match &config.log.file_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "fleetwatch.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false).json();
            if config.log.json {
                tracing_subscriber::registry()
                    .with(fmt::layer().json())
                    .with(file_layer)
                    .with(env_filter)
                    .init();
            } else {
                tracing_subscriber::registry().with(fmt::layer()).with(file_layer).with(env_filter).init();
            }
            Some(guard)
        }
        None => {
            if config.log.json {
                tracing_subscriber::registry().with(fmt::layer().json()).with(env_filter).init();
            } else {
                tracing_subscriber::registry().with(fmt::layer()).with(env_filter).init();
            }
            None
        }
    };

    info!("Starting fleetwatch - crate: '{}'", crate_name);

    let runtime = Arc::new(Runtime::new(&config));
    runtime.spawn_all(&config);

    let app = Router::new()
        .route("/ws/raw", get(ws_handler::raw))
        .route("/ws", get(ws_handler::all))
        .route("/ws/watchlist", get(ws_handler::watchlist))
        .route("/ws/geo", get(ws_handler::geo))
        .route("/ws/geo/watchlist", get(ws_handler::geo_watchlist))
        .layer(CorsLayer::permissive())
        .with_state(runtime.clone());

    let listener = tokio::net::TcpListener::bind(&config.fanout.bind_addr).await?;
    info!("Fan-out server listening on {}", config.fanout.bind_addr);

    let shutdown = runtime.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown.trigger_shutdown();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "server exited with error");
            e
        })?;

    Ok(())
}
