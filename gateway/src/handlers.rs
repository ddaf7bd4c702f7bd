use actix_web::{
    http::StatusCode,
    web::{Bytes, Data, Path},
    HttpRequest, HttpResponse, Responder,
};
use uuid::Uuid;

use proof_gateway_core::{constants, validate_tape};

use crate::coordinator::{CreateOutcome, DeleteOutcome};
use crate::response::json_error_with_code;
use crate::types::{HealthResponse, JobBusyResponse, JobCreatedResponse};
use crate::AppState;

const CLAIMANT_HEADER: &str = "x-claimant-address";
const STALE_POLL_THRESHOLD_MS: u64 = 2_000;

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

enum TapeSizeError {
    Empty,
    TooLarge { size: usize, max: usize },
}

fn validate_tape_size(size: usize, max_tape_bytes: usize) -> Result<(), TapeSizeError> {
    if size == 0 {
        return Err(TapeSizeError::Empty);
    }
    if size > max_tape_bytes {
        return Err(TapeSizeError::TooLarge {
            size,
            max: max_tape_bytes,
        });
    }
    Ok(())
}

/// Returns `(error_message, error_code)` on failure. A strkey claimant
/// address starts with `G` and is considerably longer than this loose
/// length check; it only needs to be tight enough to reject obvious garbage
/// before it reaches the tape's own embedded claimant comparison.
fn validate_claimant_header(request: &HttpRequest) -> Result<String, (String, &'static str)> {
    let raw = request
        .headers()
        .get(CLAIMANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let Some(address) = raw else {
        return Err((
            format!("missing required header {CLAIMANT_HEADER}"),
            "missing_claimant",
        ));
    };

    if !address.starts_with('G') || address.len() < 8 {
        return Err((
            format!("header {CLAIMANT_HEADER} is not a valid strkey address"),
            "invalid_claimant",
        ));
    }

    Ok(address.to_string())
}

pub(crate) async fn health(state: Data<AppState>) -> impl Responder {
    let active_job = state.coordinator.get_active_job().await;
    let prover_health = state.prover.get_health().await;

    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        service: "proof-gateway",
        active_job_id: active_job.map(|job| job.job_id),
        expected_rules_digest: constants::RULES_DIGEST,
        expected_ruleset: constants::RULESET_NAME,
        prover_reachable: prover_health.reachable,
        prover_image_id: prover_health.image_id,
        max_tape_bytes: state.config.max_tape_bytes,
        max_frames: state.config.max_frames,
        auth_required: state.config.api_key.is_some(),
    })
}

pub(crate) async fn create_job(
    request: HttpRequest,
    state: Data<AppState>,
    body: Bytes,
) -> impl Responder {
    match validate_tape_size(body.len(), state.config.max_tape_bytes) {
        Ok(()) => {}
        Err(TapeSizeError::Empty) => {
            return json_error_with_code(
                StatusCode::BAD_REQUEST,
                "tape payload is empty",
                Some("tape_empty"),
            )
        }
        Err(TapeSizeError::TooLarge { size, max }) => {
            return json_error_with_code(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("tape payload too large: {size} bytes (max {max})"),
                Some("tape_too_large"),
            )
        }
    }

    let claimant_address = match validate_claimant_header(&request) {
        Ok(address) => address,
        Err((message, code)) => {
            return json_error_with_code(StatusCode::BAD_REQUEST, message, Some(code))
        }
    };

    let summary = match validate_tape(body.as_ref(), state.config.max_frames) {
        Ok(summary) => summary,
        Err(e) if matches!(e, proof_gateway_core::TapeError::ZeroScoreNotAllowed) => {
            return json_error_with_code(
                StatusCode::BAD_REQUEST,
                e.to_string(),
                Some("zero_score_not_allowed"),
            )
        }
        Err(e) => {
            return json_error_with_code(
                StatusCode::BAD_REQUEST,
                format!("invalid tape payload: {e}"),
                Some("invalid_tape"),
            )
        }
    };

    if summary.claimant_address != claimant_address {
        return json_error_with_code(
            StatusCode::BAD_REQUEST,
            format!(
                "{CLAIMANT_HEADER} does not match the claimant embedded in the tape"
            ),
            Some("invalid_claimant"),
        );
    }

    match state
        .coordinator
        .create_job(body.to_vec(), summary, claimant_address)
        .await
    {
        CreateOutcome::Accepted(job) => HttpResponse::Accepted().json(JobCreatedResponse {
            accepted: true,
            status_url: format!("/api/proofs/jobs/{}", job.job_id),
            job,
        }),
        CreateOutcome::Busy(active_job) => HttpResponse::TooManyRequests().json(JobBusyResponse {
            accepted: false,
            active_job,
        }),
        CreateOutcome::StorageError(e) => {
            tracing::error!("create_job failed: {e}");
            json_error_with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                "job store error",
                Some("internal_error"),
            )
        }
    }
}

pub(crate) async fn get_job(state: Data<AppState>, path: Path<Uuid>) -> impl Responder {
    let job_id = path.into_inner();
    let Some(mut job) = state.coordinator.get_job(job_id).await else {
        return json_error_with_code(
            StatusCode::NOT_FOUND,
            format!("job not found: {job_id}"),
            Some("job_not_found"),
        );
    };

    let stale_poll = job.prover.job_id.is_some()
        && !job.is_terminal()
        && job
            .prover
            .last_polled_at
            .map(|last| now_ms().saturating_sub(last) > STALE_POLL_THRESHOLD_MS)
            .unwrap_or(true);

    if stale_poll {
        state.coordinator.kick_alarm().await;
        if let Some(refreshed) = state.coordinator.get_job(job_id).await {
            job = refreshed;
        }
    }

    HttpResponse::Ok().json(job)
}

pub(crate) async fn get_result(state: Data<AppState>, path: Path<Uuid>) -> impl Responder {
    let job_id = path.into_inner();

    match state.coordinator.get_job(job_id).await {
        Some(job) => {
            if job.result.is_none() {
                return json_error_with_code(
                    StatusCode::CONFLICT,
                    "job has no result yet",
                    Some("no_result"),
                );
            }
        }
        None => {
            if !state.artifacts.result_exists(job_id) {
                return json_error_with_code(
                    StatusCode::NOT_FOUND,
                    format!("job not found: {job_id}"),
                    Some("job_not_found"),
                );
            }
        }
    }

    match state.artifacts.get_result(job_id) {
        Ok(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => HttpResponse::Ok().json(value),
            Err(e) => {
                tracing::error!(job_id = %job_id, "corrupt result artifact: {e}");
                json_error_with_code(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "result artifact is corrupt",
                    Some("internal_error"),
                )
            }
        },
        Ok(None) => json_error_with_code(
            StatusCode::NOT_FOUND,
            format!("job not found: {job_id}"),
            Some("job_not_found"),
        ),
        Err(e) => {
            tracing::error!(job_id = %job_id, "get_result failed: {e}");
            json_error_with_code(
                StatusCode::INTERNAL_SERVER_ERROR,
                "artifact store error",
                Some("internal_error"),
            )
        }
    }
}

pub(crate) async fn delete_job(state: Data<AppState>, path: Path<Uuid>) -> impl Responder {
    let job_id = path.into_inner();
    match state.coordinator.delete_job(job_id).await {
        DeleteOutcome::Removed(job) => HttpResponse::Ok().json(job),
        DeleteOutcome::NotFound => json_error_with_code(
            StatusCode::NOT_FOUND,
            format!("job not found: {job_id}"),
            Some("job_not_found"),
        ),
    }
}

pub(crate) async fn unauthorized() -> impl Responder {
    json_error_with_code(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        Some("unauthorized"),
    )
}
