use proof_gateway_core::{ClaimStatus, JobStatus, ResultSummary, TapeSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct QueueState {
    pub(crate) attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) last_attempt_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) next_retry_at: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ProverState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) segment_limit_po2: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) last_polled_at: Option<u64>,
    pub(crate) polling_errors: u32,
    pub(crate) recovery_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ClaimState {
    pub(crate) claimant_address: String,
    pub(crate) status: ClaimStatus,
    pub(crate) attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) last_attempt_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) next_retry_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) submitted_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tx_hash: Option<String>,
}

impl ClaimState {
    pub(crate) fn new(claimant_address: String) -> Self {
        Self {
            claimant_address,
            status: ClaimStatus::Queued,
            attempts: 0,
            last_attempt_at: None,
            last_error: None,
            next_retry_at: None,
            submitted_at: None,
            tx_hash: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TapeInfo {
    pub(crate) size_bytes: usize,
    pub(crate) metadata: TapeSummary,
    pub(crate) key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResultInfo {
    pub(crate) artifact_key: String,
    pub(crate) summary: ResultSummary,
}

/// The durable, coordinator-owned record for one proof job. This is the
/// exact shape persisted by the job store and the exact shape returned to
/// HTTP clients (no separate DTO layer: the teacher returns its job struct
/// directly too).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProofJobRecord {
    pub(crate) job_id: Uuid,
    pub(crate) status: JobStatus,
    pub(crate) created_at: u64,
    pub(crate) updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) completed_at: Option<u64>,
    pub(crate) tape: TapeInfo,
    pub(crate) queue: QueueState,
    pub(crate) prover: ProverState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<ResultInfo>,
    pub(crate) claim: ClaimState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
}

impl ProofJobRecord {
    pub(crate) fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JobCreatedResponse {
    pub(crate) accepted: bool,
    pub(crate) status_url: String,
    pub(crate) job: ProofJobRecord,
}

#[derive(Debug, Serialize)]
pub(crate) struct JobBusyResponse {
    pub(crate) accepted: bool,
    pub(crate) active_job: ProofJobRecord,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
    pub(crate) service: &'static str,
    pub(crate) active_job_id: Option<Uuid>,
    pub(crate) expected_rules_digest: u32,
    pub(crate) expected_ruleset: &'static str,
    pub(crate) prover_reachable: bool,
    pub(crate) prover_image_id: Option<String>,
    pub(crate) max_tape_bytes: usize,
    pub(crate) max_frames: u32,
    pub(crate) auth_required: bool,
}
