//! The on-chain claim submission boundary. Constructing and signing the
//! actual transaction is out of scope here; this trait is the seam the
//! coordinator calls through, so a real signer can be dropped in without
//! touching the claim state machine.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub(crate) enum ClaimSubmitOutcome {
    Success { tx_hash: String },
    Retry { message: String },
    Fatal { message: String },
}

#[async_trait]
pub(crate) trait ClaimSubmitter: Send + Sync {
    async fn submit_claim(
        &self,
        claimant_address: &str,
        final_score: u32,
        result_summary_json: &serde_json::Value,
    ) -> ClaimSubmitOutcome;
}

/// A submitter with nowhere real to send the claim; it always succeeds with
/// a deterministic placeholder hash. Deployments wire in a real signer that
/// implements the same trait.
pub(crate) struct NullClaimSubmitter;

#[async_trait]
impl ClaimSubmitter for NullClaimSubmitter {
    async fn submit_claim(
        &self,
        claimant_address: &str,
        final_score: u32,
        _result_summary_json: &serde_json::Value,
    ) -> ClaimSubmitOutcome {
        tracing::info!(claimant_address, final_score, "submitting null claim");
        ClaimSubmitOutcome::Success {
            tx_hash: format!("null-claim:{claimant_address}:{final_score}"),
        }
    }
}
