mod config;

use std::sync::Arc;

use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rollcall_api::auth::{self, AppState, AppStateInner};
use rollcall_db::Database;

use crate::config::Config;

const DEMO_TEACHER_PASSWORD: &str = "teacher123";
const DEMO_STUDENT_PASSWORD: &str = "student123";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first so .env can also set RUST_LOG
    let config = Config::from_env();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "rollcall=debug,rollcall_api=debug,rollcall_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = config?;

    // Init database
    let db = Database::open(&config.db_path)?;

    if let Some((username, password)) = &config.admin {
        if !auth::bootstrap_admin(&db, username, password)? {
            info!("Admin account already present, bootstrap skipped");
        }
    }

    if config.seed_demo {
        let teacher_hash = auth::hash_password(DEMO_TEACHER_PASSWORD)?;
        let student_hash = auth::hash_password(DEMO_STUDENT_PASSWORD)?;
        match rollcall_db::seed::seed_demo(&db, &teacher_hash, &student_hash, Utc::now())? {
            Some(summary) => info!("Demo data seeded: {:?}", summary),
            None => warn!("ROLLCALL_SEED_DEMO set but database is not empty"),
        }
    }

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
        display_offset: config.display_offset,
    });

    let app = rollcall_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Rollcall server listening on {}", config.bind_address);

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
