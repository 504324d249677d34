use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use tessera_server::config::Config;
use tessera_server::engine::TicketingEngine;
use tessera_server::gateway::{LogNotifier, MockPaymentProvider};
use tessera_server::handlers::AppState;
use tessera_server::routes::create_routes;
use tessera_server::store::{LedgerStore, PgLedger};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_server=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Successfully connected to database");

    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations run successfully");

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedger::new(pool));
    let engine = Arc::new(TicketingEngine::new(
        store,
        Arc::new(MockPaymentProvider),
        Arc::new(LogNotifier),
        config.engine_policy(),
    ));

    // Background sweep: reclaims abandoned reservations and cascades
    // expired waitlist holds. Without it, capacity leaks.
    let sweeper = engine.clone();
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper.sweep_once(Utc::now()).await {
                Ok(report)
                    if report.released_reservations > 0 || report.expired_holds > 0 =>
                {
                    tracing::info!(
                        released = report.released_reservations,
                        expired = report.expired_holds,
                        "Sweep pass completed"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Sweep pass failed"),
            }
        }
    });

    let app: Router = create_routes(AppState { engine });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.bind_port));
    tracing::info!("🚀 Server running at http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server failed");
}
