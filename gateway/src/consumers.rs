//! Queue consumer loops. Each one leases a message, asks the coordinator to
//! begin an attempt, does the actual network call itself (outside the
//! coordinator's command loop, so a slow prover or claim submitter never
//! blocks unrelated coordinator operations), then reports the outcome back.

use std::sync::Arc;
use std::time::Duration;

use prover_client::{ProverClient, ReceiptKind, SubmitOptions};

use crate::claim::ClaimSubmitter;
use crate::coordinator::{ConsumerAction, CoordinatorHandle};
use crate::queue::{wait_for_message, SqliteQueue, CLAIM_QUEUE, PROOF_QUEUE};

const LEASE_SECS: u64 = 120;

fn apply_action(queue: &SqliteQueue, message_id: i64, action: ConsumerAction) {
    match action {
        ConsumerAction::Ack => {
            if let Err(e) = queue.ack(message_id) {
                tracing::error!("failed to ack queue message {message_id}: {e}");
            }
        }
        ConsumerAction::RetryAfter(delay_secs) => {
            if let Err(e) = queue.nack(message_id, delay_secs) {
                tracing::error!("failed to nack queue message {message_id}: {e}");
            }
        }
    }
}

/// Drains the proof queue: reads the tape artifact for each leased job and
/// submits it to the remote prover, translating the outcome into a
/// coordinator mutation.
pub(crate) fn spawn_proof_consumer(
    coordinator: CoordinatorHandle,
    proof_queue: Arc<SqliteQueue>,
    artifacts: Arc<crate::artifact_store::ArtifactStore>,
    prover: Arc<ProverClient>,
    segment_limit_po2_default: u32,
    poll_interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            let message = match wait_for_message(&proof_queue, PROOF_QUEUE, LEASE_SECS, poll_interval)
                .await
            {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("proof queue wait failed: {e}");
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
            };

            let Some(job) = coordinator.begin_queue_attempt(message.job_id).await else {
                if let Err(e) = proof_queue.ack(message.id) {
                    tracing::error!("failed to ack stale proof message {}: {e}", message.id);
                }
                continue;
            };

            if job.prover.job_id.is_some() {
                // Redelivery after a crash or lease expiry that happened
                // after the prover already accepted the job. The timer
                // handles polling from here; resubmitting would create a
                // duplicate prover job.
                if let Err(e) = proof_queue.ack(message.id) {
                    tracing::error!("failed to ack redelivered proof message {}: {e}", message.id);
                }
                continue;
            }

            let tape = match artifacts.get_tape(job.job_id) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    tracing::error!(job_id = %job.job_id, "tape artifact missing for queued job");
                    coordinator
                        .apply_submit_outcome(
                            job.job_id,
                            prover_client::SubmitOutcome::Fatal {
                                message: "tape artifact missing".to_string(),
                                error_code: Some("internal_error".to_string()),
                            },
                        )
                        .await;
                    if let Err(e) = proof_queue.ack(message.id) {
                        tracing::error!("failed to ack proof message {}: {e}", message.id);
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.job_id, "failed to read tape artifact: {e}");
                    if let Err(e) = proof_queue.nack(message.id, 5) {
                        tracing::error!("failed to nack proof message {}: {e}", message.id);
                    }
                    continue;
                }
            };

            let segment_limit_po2 = job.prover.segment_limit_po2.unwrap_or(segment_limit_po2_default);
            let outcome = prover
                .submit(
                    &tape,
                    SubmitOptions {
                        segment_limit_po2,
                        receipt_kind: ReceiptKind::Succinct,
                    },
                )
                .await;
            let action = coordinator.apply_submit_outcome(job.job_id, outcome).await;
            apply_action(&proof_queue, message.id, action);
        }
    });
}

/// Drains the claim queue: submits each succeeded job's claim through the
/// collaborator-supplied `ClaimSubmitter`. `concurrency` independent loops
/// run so a slow on-chain submission doesn't stall every other claim.
pub(crate) fn spawn_claim_consumers(
    coordinator: CoordinatorHandle,
    claim_queue: Arc<SqliteQueue>,
    claim_submitter: Arc<dyn ClaimSubmitter>,
    poll_interval: Duration,
    concurrency: usize,
) {
    for _ in 0..concurrency.max(1) {
        let coordinator = coordinator.clone();
        let claim_queue = claim_queue.clone();
        let claim_submitter = claim_submitter.clone();
        tokio::spawn(async move {
            loop {
                let message =
                    match wait_for_message(&claim_queue, CLAIM_QUEUE, LEASE_SECS, poll_interval).await
                    {
                        Ok(message) => message,
                        Err(e) => {
                            tracing::error!("claim queue wait failed: {e}");
                            tokio::time::sleep(poll_interval).await;
                            continue;
                        }
                    };

                let Some(job) = coordinator.begin_claim_attempt(message.job_id).await else {
                    if let Err(e) = claim_queue.ack(message.id) {
                        tracing::error!("failed to ack stale claim message {}: {e}", message.id);
                    }
                    continue;
                };

                let Some(result) = job.result.as_ref() else {
                    tracing::error!(job_id = %job.job_id, "claim queued for job with no result");
                    if let Err(e) = claim_queue.ack(message.id) {
                        tracing::error!("failed to ack orphaned claim message {}: {e}", message.id);
                    }
                    continue;
                };

                let summary_json = match serde_json::to_value(&result.summary) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::error!(job_id = %job.job_id, "failed to encode result summary: {e}");
                        if let Err(e) = claim_queue.nack(message.id, 5) {
                            tracing::error!("failed to nack claim message {}: {e}", message.id);
                        }
                        continue;
                    }
                };

                let outcome = claim_submitter
                    .submit_claim(
                        &job.claim.claimant_address,
                        result.summary.final_score,
                        &summary_json,
                    )
                    .await;
                let action = coordinator.apply_claim_outcome(job.job_id, outcome).await;
                apply_action(&claim_queue, message.id, action);
            }
        });
    }
}
