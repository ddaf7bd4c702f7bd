mod artifact_store;
mod auth;
mod claim;
mod config;
mod consumers;
mod coordinator;
mod handlers;
mod queue;
mod response;
mod store;
mod types;

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{guard, middleware, web, App, HttpServer};
use anyhow::Context;

use artifact_store::ArtifactStore;
use claim::NullClaimSubmitter;
use config::GatewayConfig;
use coordinator::CoordinatorHandle;
use prover_client::ProverClient;
use queue::SqliteQueue;
use store::JobStore;

pub(crate) use auth::is_request_authorized;
pub(crate) use handlers::{create_job, delete_job, get_job, get_result, health, unauthorized};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: CoordinatorHandle,
    pub(crate) artifacts: Arc<ArtifactStore>,
    pub(crate) prover: Arc<ProverClient>,
    pub(crate) config: Arc<GatewayConfig>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Arc::new(GatewayConfig::from_env());

    tracing::info!(
        bind_addr = %config.bind_addr,
        prover_base_url = %config.prover_base_url,
        max_tape_bytes = config.max_tape_bytes,
        max_frames = config.max_frames,
        max_job_wall_time_ms = config.max_job_wall_time_ms,
        poll_interval_ms = config.poll_interval_ms,
        auth_required = config.api_key.is_some(),
        data_dir = %config.data_dir.display(),
        "starting proof gateway"
    );

    let job_store = JobStore::open(&config.data_dir)
        .map_err(anyhow::Error::msg)
        .context("failed to open job store")?;
    let artifacts = Arc::new(
        ArtifactStore::open(&config.data_dir.join("artifacts"))
            .map_err(anyhow::Error::msg)
            .context("failed to open artifact store")?,
    );
    // Proof and claim messages share one SQLite-backed queue, distinguished
    // by queue name; both logical queues ride the same connection.
    let task_queue = Arc::new(
        SqliteQueue::open(&config.data_dir)
            .map_err(anyhow::Error::msg)
            .context("failed to open task queue")?,
    );
    let prover = Arc::new(ProverClient::new(
        config.prover_base_url.clone(),
        Duration::from_millis(config.prover_request_timeout_ms),
    ));

    let coordinator_handle = coordinator::spawn(
        job_store,
        ArtifactStore::open(&config.data_dir.join("artifacts"))
            .map_err(anyhow::Error::msg)
            .context("failed to reopen artifact store")?,
        task_queue.clone(),
        task_queue.clone(),
        prover.clone(),
        config.clone(),
    );

    consumers::spawn_proof_consumer(
        coordinator_handle.clone(),
        task_queue.clone(),
        artifacts.clone(),
        prover.clone(),
        config.segment_limit_po2_default,
        Duration::from_millis(config.poll_interval_ms),
    );
    consumers::spawn_claim_consumers(
        coordinator_handle.clone(),
        task_queue.clone(),
        Arc::new(NullClaimSubmitter),
        Duration::from_millis(config.poll_interval_ms),
        config.claim_queue_concurrency,
    );

    let state = AppState {
        coordinator: coordinator_handle,
        artifacts,
        prover,
        config: config.clone(),
    };

    let cors_allowed_origin = config.cors_allowed_origin.clone();
    let api_key = config.api_key.clone();
    let max_tape_bytes = config.max_tape_bytes;
    let http_max_connections = config.http_max_connections;
    let http_keep_alive_secs = config.http_keep_alive_secs;
    let http_workers = config.http_workers;

    let mut server = HttpServer::new(move || {
        let cors = if let Some(origin) = cors_allowed_origin.clone() {
            Cors::default()
                .allowed_origin(&origin)
                .allowed_methods(vec!["GET", "POST", "DELETE"])
                .allow_any_header()
                .expose_any_header()
                .max_age(3600)
        } else {
            Cors::default()
        };
        let required_api_key = api_key.clone();

        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(max_tape_bytes))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .route("/api/health", web::get().to(health))
            .service(
                web::scope("/api/proofs")
                    .service(
                        web::scope("")
                            .guard(guard::fn_guard(move |ctx| {
                                is_request_authorized(
                                    ctx.head().headers(),
                                    required_api_key.as_deref(),
                                )
                            }))
                            .route("/jobs", web::post().to(create_job))
                            .route("/jobs/{job_id}", web::get().to(get_job))
                            .route("/jobs/{job_id}/result", web::get().to(get_result))
                            .route("/jobs/{job_id}", web::delete().to(delete_job)),
                    )
                    .route("/jobs", web::post().to(unauthorized))
                    .route("/jobs/{job_id}", web::get().to(unauthorized))
                    .route("/jobs/{job_id}/result", web::get().to(unauthorized))
                    .route("/jobs/{job_id}", web::delete().to(unauthorized)),
            )
    })
    .max_connections(http_max_connections)
    .keep_alive(Duration::from_secs(http_keep_alive_secs));

    if let Some(workers) = http_workers {
        server = server.workers(workers);
    }

    server
        .bind(&config.bind_addr)
        .with_context(|| format!("failed to bind {}", config.bind_addr))?
        .run()
        .await
        .context("HTTP server exited with an error")?;
    Ok(())
}
