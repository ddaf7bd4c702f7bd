//! Wire-shared job status and summary types. These are the vocabulary the
//! gateway's store, coordinator, and HTTP layer all speak; none of them is
//! specific to any one component.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatching,
    ProverRunning,
    Retrying,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatching => "dispatching",
            Self::ProverRunning => "prover_running",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "queued" => Self::Queued,
            "dispatching" => Self::Dispatching,
            "prover_running" => Self::ProverRunning,
            "retrying" => Self::Retrying,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Queued,
    Submitting,
    Retrying,
    Succeeded,
    Failed,
}

impl ClaimStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Submitting => "submitting",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Some(match value {
            "queued" => Self::Queued,
            "submitting" => Self::Submitting,
            "retrying" => Self::Retrying,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Deterministic projection of a prover's success payload, stored alongside
/// the raw response in the result artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub seed: u32,
    pub frame_count: u32,
    pub final_score: u32,
    pub final_rng_state: u32,
    pub checksum: u32,
    pub rules_digest: u32,
}

/// Exponential back-off with a 300s cap, shared by the proof and claim
/// lifecycles. `attempt` is the number of attempts already made (0-based).
pub fn retry_delay_seconds(attempt: u32) -> u64 {
    const INITIAL_SECS: u64 = 2;
    const CAP_SECS: u64 = 300;
    INITIAL_SECS.saturating_mul(1u64 << attempt.min(32)).min(CAP_SECS)
}

/// Picks the segment limit for a job's first submission. Longer tapes need
/// more segments to prove without running out of memory, so the limit scales
/// up with frame count rather than always starting at the conservative
/// default; an OOM retry falls back to `default` regardless of tape size.
pub fn initial_segment_limit_po2(frame_count: u32, default: u32) -> u32 {
    if frame_count > 500_000 {
        default + 2
    } else if frame_count > 100_000 {
        default + 1
    } else {
        default
    }
}

/// True if a prover-reported failure message looks like an out-of-memory
/// condition that a smaller segment limit would likely resolve.
pub fn is_oom_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory") || lower.contains("allocation failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(retry_delay_seconds(0), 2);
        assert_eq!(retry_delay_seconds(1), 4);
        assert_eq!(retry_delay_seconds(2), 8);
        assert_eq!(retry_delay_seconds(10), 300);
        assert_eq!(retry_delay_seconds(40), 300);
    }

    #[test]
    fn segment_limit_scales_with_frame_count() {
        assert_eq!(initial_segment_limit_po2(10, 20), 20);
        assert_eq!(initial_segment_limit_po2(100_001, 20), 21);
        assert_eq!(initial_segment_limit_po2(500_001, 20), 22);
    }

    #[test]
    fn oom_message_detection() {
        assert!(is_oom_message("Out Of Memory while proving"));
        assert!(is_oom_message("allocation failed: bad_alloc"));
        assert!(!is_oom_message("malformed tape rejected"));
    }

    #[test]
    fn job_status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Dispatching,
            JobStatus::ProverRunning,
            JobStatus::Retrying,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn claim_status_round_trips_through_str() {
        for status in [
            ClaimStatus::Queued,
            ClaimStatus::Submitting,
            ClaimStatus::Retrying,
            ClaimStatus::Succeeded,
            ClaimStatus::Failed,
        ] {
            assert_eq!(ClaimStatus::from_str(status.as_str()), Some(status));
        }
    }
}
