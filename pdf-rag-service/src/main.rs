use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod error;
mod index;
mod ingestion;
mod ollama;
mod providers;
mod query;
mod queue;
mod service;
#[cfg(test)]
mod test_support;
mod worker;

use crate::config::{RuntimeConfig, load_static_config};
use crate::db::Database;
use crate::service::PdfRagService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("Starting PDF RAG service v{}", env!("CARGO_PKG_VERSION"));

    // Static config decides where the database lives, so it comes first
    let static_config = load_static_config()?;
    info!(
        host = %static_config.server.host,
        port = static_config.server.port,
        uploads_dir = %static_config.storage.uploads_dir.display(),
        "Static configuration loaded"
    );

    std::fs::create_dir_all(&static_config.storage.data_dir)?;
    std::fs::create_dir_all(&static_config.storage.uploads_dir)?;

    let db_path = static_config.storage.data_dir.join("pdf-rag.db");
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let runtime_config = Arc::new(RuntimeConfig::load(static_config, &db)?);
    info!("Runtime configuration loaded with DB settings");

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder unavailable, /metrics will be empty");
            None
        }
    };

    let service = Arc::new(PdfRagService::new(db, runtime_config.clone()).await?);
    let shutdown = CancellationToken::new();

    // Resumes anything left pending or leased by a previous run
    let workers = tokio::spawn(service.workers.clone().run(shutdown.clone()));
    PdfRagService::start_cleanup_task(service.clone(), shutdown.clone());

    let app = api::router(service.clone(), metrics);

    let addr = format!(
        "{}:{}",
        runtime_config.static_config.server.host, runtime_config.static_config.server.port
    );
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = workers.await {
        warn!(error = %e, "Worker pool exited abnormally");
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pdf_rag_service=info,tower_http=info"));

    let json = std::env::var("PDF_RAG_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .init();
    } else {
        let format = fmt::format()
            .with_target(true)
            .with_thread_ids(true)
            .compact();

        tracing_subscriber::registry()
            .with(fmt::layer().event_format(format))
            .with(filter)
            .init();
    }
}
