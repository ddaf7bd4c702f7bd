use std::env;

pub(crate) const DEFAULT_MAX_TAPE_BYTES: usize = 2 * 1024 * 1024;
pub(crate) const DEFAULT_MAX_JOB_WALL_TIME_MS: u64 = 10 * 60 * 1000;
pub(crate) const DEFAULT_MAX_COMPLETED_JOBS: usize = 200;
pub(crate) const DEFAULT_COMPLETED_JOB_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;
pub(crate) const DEFAULT_POLL_INTERVAL_MS: u64 = 1_500;
pub(crate) const DEFAULT_SEGMENT_LIMIT_PO2: u32 = 20;
pub(crate) const DEFAULT_MAX_PROVER_RECOVERY_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_PROVER_REQUEST_TIMEOUT_MS: u64 = 8_000;
pub(crate) const DEFAULT_HTTP_MAX_CONNECTIONS: usize = 25_000;
pub(crate) const DEFAULT_HTTP_KEEP_ALIVE_SECS: u64 = 75;
pub(crate) const DEFAULT_PRUNE_SWEEP_SECS: u64 = 300;
pub(crate) const DEFAULT_CLAIM_QUEUE_CONCURRENCY: usize = 4;
pub(crate) const MIN_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub(crate) struct GatewayConfig {
    pub(crate) bind_addr: String,
    pub(crate) data_dir: std::path::PathBuf,
    pub(crate) prover_base_url: String,
    pub(crate) prover_request_timeout_ms: u64,
    pub(crate) max_tape_bytes: usize,
    pub(crate) max_frames: u32,
    pub(crate) max_job_wall_time_ms: u64,
    pub(crate) max_completed_jobs: usize,
    pub(crate) completed_job_retention_ms: u64,
    pub(crate) poll_interval_ms: u64,
    pub(crate) segment_limit_po2_default: u32,
    pub(crate) max_prover_recovery_attempts: u32,
    pub(crate) prune_sweep_secs: u64,
    pub(crate) claim_queue_concurrency: usize,
    pub(crate) http_workers: Option<usize>,
    pub(crate) http_max_connections: usize,
    pub(crate) http_keep_alive_secs: u64,
    pub(crate) cors_allowed_origin: Option<String>,
    pub(crate) api_key: Option<String>,
}

impl GatewayConfig {
    pub(crate) fn from_env() -> Self {
        let mut poll_interval_ms = read_env_u64("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        if poll_interval_ms < MIN_POLL_INTERVAL_MS {
            tracing::warn!(
                poll_interval_ms,
                minimum = MIN_POLL_INTERVAL_MS,
                "POLL_INTERVAL_MS below minimum, clamping"
            );
            poll_interval_ms = MIN_POLL_INTERVAL_MS;
        }

        let api_key = env::var("API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self {
            bind_addr: env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            data_dir: std::path::PathBuf::from(
                env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            prover_base_url: env::var("PROVER_BASE_URL")
                .expect("PROVER_BASE_URL must be set to the remote prover's base URL"),
            prover_request_timeout_ms: read_env_u64(
                "PROVER_REQUEST_TIMEOUT_MS",
                DEFAULT_PROVER_REQUEST_TIMEOUT_MS,
            ),
            max_tape_bytes: read_env_usize("MAX_TAPE_BYTES", DEFAULT_MAX_TAPE_BYTES),
            max_frames: read_env_u32("MAX_FRAMES", proof_gateway_core::constants::MAX_FRAMES_DEFAULT),
            max_job_wall_time_ms: read_env_u64(
                "MAX_JOB_WALL_TIME_MS",
                DEFAULT_MAX_JOB_WALL_TIME_MS,
            ),
            max_completed_jobs: read_env_usize("MAX_COMPLETED_JOBS", DEFAULT_MAX_COMPLETED_JOBS),
            completed_job_retention_ms: read_env_u64(
                "COMPLETED_JOB_RETENTION_MS",
                DEFAULT_COMPLETED_JOB_RETENTION_MS,
            ),
            poll_interval_ms,
            segment_limit_po2_default: read_env_u32(
                "SEGMENT_LIMIT_PO2_DEFAULT",
                DEFAULT_SEGMENT_LIMIT_PO2,
            ),
            max_prover_recovery_attempts: read_env_u32(
                "MAX_PROVER_RECOVERY_ATTEMPTS",
                DEFAULT_MAX_PROVER_RECOVERY_ATTEMPTS,
            ),
            prune_sweep_secs: read_env_u64("PRUNE_SWEEP_SECS", DEFAULT_PRUNE_SWEEP_SECS),
            claim_queue_concurrency: read_env_usize(
                "CLAIM_QUEUE_CONCURRENCY",
                DEFAULT_CLAIM_QUEUE_CONCURRENCY,
            ),
            http_workers: read_env_optional_usize("HTTP_WORKERS"),
            http_max_connections: read_env_usize(
                "HTTP_MAX_CONNECTIONS",
                DEFAULT_HTTP_MAX_CONNECTIONS,
            ),
            http_keep_alive_secs: read_env_u64(
                "HTTP_KEEP_ALIVE_SECS",
                DEFAULT_HTTP_KEEP_ALIVE_SECS,
            ),
            cors_allowed_origin,
            api_key,
        }
    }
}

pub(crate) fn read_env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_optional_usize(name: &str) -> Option<usize> {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

pub(crate) fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

pub(crate) fn read_env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
