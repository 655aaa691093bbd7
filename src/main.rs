//! Wasit HTTP server
//!
//! Starts an Axum web server that proxies completion requests to the
//! upstream generative API.

use axum::{
    Router,
    http::{HeaderName, Method},
    routing::{get, post},
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use wasit::{
    cli::{Cli, Command},
    config::Config,
    handlers,
    middleware::{REQUEST_ID_HEADER, request_id_middleware},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = &cli.command {
        let template = wasit::cli::generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(path, template)?;
                println!("Wrote configuration template to {path}");
            }
            None => print!("{template}"),
        }
        return Ok(());
    }

    // Load configuration
    let config = Config::from_file(&cli.config)?;

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting Wasit server on {}:{}",
        config.server.host,
        config.server.port
    );

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = handlers::AppState::new(Arc::new(config))?;

    // All responses allow any origin; the request-id header is exposed for
    // client-side correlation.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    // Build router
    let app = Router::new()
        .route("/v1/complete", post(handlers::complete::handler))
        .route("/healthz", get(handlers::health::handler))
        .route("/metrics", get(handlers::metrics::handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Create socket address
    let addr = SocketAddr::from((
        host.parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Health check available at http://{}/healthz", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
