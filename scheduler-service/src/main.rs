//! Scheduler Service - the orchestrator/relay for the personal-life
//! scheduling kernel.
//!
//! Hosts the REST surface and the WebSocket stream, drives the
//! background context pollers and the periodic energy recompute, and
//! fans schedule/disruption/energy events out to connected clients.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;
use shared::AppConfig;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

mod background;
mod collaborators;
mod handlers;
mod metrics;
mod state;
mod ws;

use state::AppState;

#[derive(Parser, Debug)]
#[command(name = "scheduler-service")]
#[command(about = "Personal-life scheduling kernel service")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Port to listen on, overrides config
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    shared::tracing_setup::init(&args.log_level);

    let config = AppConfig::load(args.config.as_deref())?;
    let port = args.port.unwrap_or(config.port);

    info!(
        service = shared::SERVICE_NAME,
        version = shared::VERSION,
        port = port,
        "starting scheduler-service"
    );

    let state = Arc::new(AppState::new(config).await?);
    background::spawn_background_tasks(state.clone());

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("scheduler-service listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::readiness))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/v1/schedule", get(handlers::get_schedule))
        .route("/api/v1/schedule/plan-day", post(handlers::plan_day))
        .route("/api/v1/schedule/backlog", get(handlers::get_backlog))
        .route("/api/v1/disruption", post(handlers::post_disruption))
        .route("/api/v1/energy", post(handlers::post_energy))
        .route("/api/v1/energy/status", get(handlers::get_energy_status))
        .route("/api/v1/tasks", post(handlers::create_task))
        .route("/api/v1/tasks/:id", delete(handlers::delete_task))
        .route("/api/v1/tasks/:id/start", post(handlers::start_task))
        .route("/api/v1/tasks/:id/complete", post(handlers::complete_task))
        .route("/api/v1/drafts", post(handlers::create_draft))
        .route("/api/v1/drafts/:id", get(handlers::get_draft))
        .route("/api/v1/drafts/:id/approval", post(handlers::approve_draft))
        .route("/api/v1/profile", get(handlers::get_profile))
        .route("/api/v1/profile/linkedin", get(handlers::get_linkedin_profile))
        .route("/api/v1/schedule/intelligence", get(handlers::get_schedule_intelligence))
        .route("/ws", get(ws::upgrade))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(std::time::Duration::from_secs(30))),
        )
}
