use std::sync::{Arc, Mutex};

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use amenipass::config::AppConfig;
use amenipass::db;
use amenipass::handlers;
use amenipass::services::catalog::DbCatalog;
use amenipass::services::notifications::mailer::HttpMailer;
use amenipass::services::notifications::{LogNotifier, NotificationProvider};
use amenipass::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    let port = config.port;

    let conn = db::init_db(&config.database_url)?;
    let db = Arc::new(Mutex::new(conn));

    let notifier: Box<dyn NotificationProvider> = if config.mailer_api_url.is_empty() {
        tracing::info!("mail API not configured, notifications will be logged only");
        Box::new(LogNotifier)
    } else {
        tracing::info!("using HTTP mailer (url: {})", config.mailer_api_url);
        Box::new(HttpMailer::new(
            config.mailer_api_url.clone(),
            config.mailer_api_key.clone(),
            config.mailer_from.clone(),
        ))
    };

    let (feed_tx, _) = broadcast::channel(64);

    let state = Arc::new(AppState {
        catalog: Box::new(DbCatalog::new(Arc::clone(&db))),
        db,
        config,
        notifier,
        feed_tx,
    });

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/webhook/bookings", post(handlers::intake::booking_intake))
        .route("/api/bookings", get(handlers::bookings::get_bookings))
        .route("/api/bookings/events", get(handlers::bookings::events_stream))
        .route(
            "/api/bookings/:id",
            get(handlers::bookings::get_booking).delete(handlers::bookings::clear_booking),
        )
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/:id/check-in",
            post(handlers::bookings::check_in_booking),
        )
        .route(
            "/api/bookings/:id/check-out",
            post(handlers::bookings::check_out_booking),
        )
        .route("/api/bookings/:id/pass", post(handlers::passes::issue_pass))
        .route("/api/passes/scan", post(handlers::passes::scan_pass))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
