//! The single place that mutates proof-job and claim state.
//!
//! Everything here runs inside one `tokio::mpsc` command loop, so at most one
//! mutation is ever in flight: two HTTP requests, a queue consumer, and the
//! alarm tick all serialize through the same actor. Callers get a cheap,
//! cloneable `CoordinatorHandle` and never see the store or artifact tree
//! directly.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use proof_gateway_core::{
    initial_segment_limit_po2, is_oom_message, retry_delay_seconds, ClaimStatus, JobStatus,
    ResultSummary, TapeSummary,
};
use prover_client::{PollResult, ProverClient, ProverJournal, SubmitOutcome};

use crate::artifact_store::ArtifactStore;
use crate::claim::ClaimSubmitOutcome;
use crate::config::GatewayConfig;
use crate::queue::{SqliteQueue, CLAIM_QUEUE, PROOF_QUEUE};
use crate::store::JobStore;
use crate::types::{ClaimState, ProofJobRecord, ProverState, QueueState, ResultInfo, TapeInfo};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Result handed back to a consumer after it reports a submit or claim
/// outcome: either the message is done (ack it) or it should be redelivered
/// after a back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumerAction {
    Ack,
    RetryAfter(u64),
}

#[derive(Debug)]
pub(crate) enum CreateOutcome {
    Accepted(ProofJobRecord),
    Busy(ProofJobRecord),
    StorageError(String),
}

#[derive(Debug)]
pub(crate) enum DeleteOutcome {
    Removed(ProofJobRecord),
    NotFound,
}

enum Command {
    CreateJob {
        tape_bytes: Vec<u8>,
        tape_summary: TapeSummary,
        claimant_address: String,
        reply: oneshot::Sender<CreateOutcome>,
    },
    GetJob {
        job_id: Uuid,
        reply: oneshot::Sender<Option<ProofJobRecord>>,
    },
    GetActiveJob {
        reply: oneshot::Sender<Option<ProofJobRecord>>,
    },
    ListSucceeded {
        limit: usize,
        reply: oneshot::Sender<Vec<ProofJobRecord>>,
    },
    DeleteJob {
        job_id: Uuid,
        reply: oneshot::Sender<DeleteOutcome>,
    },
    BeginQueueAttempt {
        job_id: Uuid,
        reply: oneshot::Sender<Option<ProofJobRecord>>,
    },
    SubmitOutcome {
        job_id: Uuid,
        outcome: SubmitOutcome,
        reply: oneshot::Sender<ConsumerAction>,
    },
    BeginClaimAttempt {
        job_id: Uuid,
        reply: oneshot::Sender<Option<ProofJobRecord>>,
    },
    ClaimOutcome {
        job_id: Uuid,
        outcome: ClaimSubmitOutcome,
        reply: oneshot::Sender<ConsumerAction>,
    },
    Alarm {
        reply: oneshot::Sender<()>,
    },
    KickAlarm {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable front for the coordinator actor. Every method sends a
/// command and awaits its reply; none of them touch the store or artifact
/// tree directly.
#[derive(Clone)]
pub(crate) struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .expect("coordinator actor task is no longer running");
        reply_rx
            .await
            .expect("coordinator actor dropped its reply sender")
    }

    pub(crate) async fn create_job(
        &self,
        tape_bytes: Vec<u8>,
        tape_summary: TapeSummary,
        claimant_address: String,
    ) -> CreateOutcome {
        self.call(|reply| Command::CreateJob {
            tape_bytes,
            tape_summary,
            claimant_address,
            reply,
        })
        .await
    }

    pub(crate) async fn get_job(&self, job_id: Uuid) -> Option<ProofJobRecord> {
        self.call(|reply| Command::GetJob { job_id, reply }).await
    }

    pub(crate) async fn get_active_job(&self) -> Option<ProofJobRecord> {
        self.call(|reply| Command::GetActiveJob { reply }).await
    }

    #[allow(dead_code)]
    pub(crate) async fn list_succeeded(&self, limit: usize) -> Vec<ProofJobRecord> {
        self.call(|reply| Command::ListSucceeded { limit, reply })
            .await
    }

    pub(crate) async fn delete_job(&self, job_id: Uuid) -> DeleteOutcome {
        self.call(|reply| Command::DeleteJob { job_id, reply })
            .await
    }

    pub(crate) async fn begin_queue_attempt(&self, job_id: Uuid) -> Option<ProofJobRecord> {
        self.call(|reply| Command::BeginQueueAttempt { job_id, reply })
            .await
    }

    pub(crate) async fn apply_submit_outcome(
        &self,
        job_id: Uuid,
        outcome: SubmitOutcome,
    ) -> ConsumerAction {
        self.call(|reply| Command::SubmitOutcome {
            job_id,
            outcome,
            reply,
        })
        .await
    }

    pub(crate) async fn begin_claim_attempt(&self, job_id: Uuid) -> Option<ProofJobRecord> {
        self.call(|reply| Command::BeginClaimAttempt { job_id, reply })
            .await
    }

    pub(crate) async fn apply_claim_outcome(
        &self,
        job_id: Uuid,
        outcome: ClaimSubmitOutcome,
    ) -> ConsumerAction {
        self.call(|reply| Command::ClaimOutcome {
            job_id,
            outcome,
            reply,
        })
        .await
    }

    /// Full tick: zombie recovery, one poll of the active job if running,
    /// a prune sweep, then reschedules itself.
    pub(crate) async fn alarm(&self) {
        self.call(|reply| Command::Alarm { reply }).await
    }

    /// Opportunistic nudge from a hot HTTP read: zombie recovery and one
    /// poll, nothing else. Safe to call as often as callers like.
    pub(crate) async fn kick_alarm(&self) {
        self.call(|reply| Command::KickAlarm { reply }).await
    }
}

struct Coordinator {
    store: JobStore,
    artifacts: ArtifactStore,
    proof_queue: Arc<SqliteQueue>,
    claim_queue: Arc<SqliteQueue>,
    prover: Arc<ProverClient>,
    config: Arc<GatewayConfig>,
    alarm_tx: watch::Sender<Option<Instant>>,
}

/// Builds the actor, its alarm sleeper, and hands back the handle. The
/// channel capacity bounds in-flight commands; the actor never builds up an
/// unbounded queue of pending HTTP requests.
pub(crate) fn spawn(
    store: JobStore,
    artifacts: ArtifactStore,
    proof_queue: Arc<SqliteQueue>,
    claim_queue: Arc<SqliteQueue>,
    prover: Arc<ProverClient>,
    config: Arc<GatewayConfig>,
) -> CoordinatorHandle {
    let (tx, mut rx) = mpsc::channel::<Command>(256);
    let (alarm_tx, alarm_rx) = watch::channel(None);

    let mut coordinator = Coordinator {
        store,
        artifacts,
        proof_queue,
        claim_queue,
        prover,
        config,
        alarm_tx: alarm_tx.clone(),
    };
    coordinator.schedule_alarm(Duration::from_millis(coordinator.config.poll_interval_ms));

    let handle = CoordinatorHandle { tx };
    tokio::spawn(alarm_sleeper(alarm_rx, handle.clone()));

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            coordinator.handle_command(command).await;
        }
    });

    handle
}

/// Sleeps until the coordinator's next scheduled deadline, fires `alarm()`,
/// and repeats. Races the sleep against the watch channel so a new, earlier
/// deadline wakes it immediately instead of waiting out the old one.
async fn alarm_sleeper(mut alarm_rx: watch::Receiver<Option<Instant>>, handle: CoordinatorHandle) {
    loop {
        let deadline = *alarm_rx.borrow();
        match deadline {
            Some(instant) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(instant) => {
                        handle.alarm().await;
                    }
                    changed = alarm_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                if alarm_rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Coordinator {
    fn schedule_alarm(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let should_update = match *self.alarm_tx.borrow() {
            Some(current) => deadline < current,
            None => true,
        };
        if should_update {
            let _ = self.alarm_tx.send(Some(deadline));
        }
    }

    fn is_zombie(&self, record: &ProofJobRecord) -> bool {
        !record.is_terminal()
            && now_ms().saturating_sub(record.created_at) > self.config.max_job_wall_time_ms
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::CreateJob {
                tape_bytes,
                tape_summary,
                claimant_address,
                reply,
            } => {
                let outcome = self.create_job(tape_bytes, tape_summary, claimant_address).await;
                let _ = reply.send(outcome);
            }
            Command::GetJob { job_id, reply } => {
                let record = self.store.get(job_id).unwrap_or(None);
                let _ = reply.send(record);
            }
            Command::GetActiveJob { reply } => {
                let record = self
                    .store
                    .get_active_job_id()
                    .unwrap_or(None)
                    .and_then(|id| self.store.get(id).unwrap_or(None));
                let _ = reply.send(record);
            }
            Command::ListSucceeded { limit, reply } => {
                let jobs = self.list_succeeded(limit);
                let _ = reply.send(jobs);
            }
            Command::DeleteJob { job_id, reply } => {
                let outcome = self.delete_job(job_id).await;
                let _ = reply.send(outcome);
            }
            Command::BeginQueueAttempt { job_id, reply } => {
                let record = self.begin_queue_attempt(job_id);
                let _ = reply.send(record);
            }
            Command::SubmitOutcome {
                job_id,
                outcome,
                reply,
            } => {
                let action = self.apply_submit_outcome(job_id, outcome);
                let _ = reply.send(action);
            }
            Command::BeginClaimAttempt { job_id, reply } => {
                let record = self.begin_claim_attempt(job_id);
                let _ = reply.send(record);
            }
            Command::ClaimOutcome {
                job_id,
                outcome,
                reply,
            } => {
                let action = self.apply_claim_outcome(job_id, outcome);
                let _ = reply.send(action);
            }
            Command::Alarm { reply } => {
                self.alarm_tick(true).await;
                let _ = reply.send(());
            }
            Command::KickAlarm { reply } => {
                self.alarm_tick(false).await;
                let _ = reply.send(());
            }
        }
    }

    async fn create_job(
        &mut self,
        tape_bytes: Vec<u8>,
        tape_summary: TapeSummary,
        claimant_address: String,
    ) -> CreateOutcome {
        if let Some(active_id) = self.store.get_active_job_id().unwrap_or(None) {
            match self.store.get(active_id) {
                Ok(Some(active)) => {
                    if !active.is_terminal() {
                        if self.is_zombie(&active) {
                            self.force_fail_zombie(active).await;
                        } else {
                            return CreateOutcome::Busy(active);
                        }
                    }
                }
                Ok(None) => {
                    let _ = self.store.clear_active_job_id_if_matches(active_id);
                }
                Err(e) => return CreateOutcome::StorageError(e),
            }
        }

        let job_id = Uuid::new_v4();
        if let Err(e) = self.artifacts.put_tape(job_id, &tape_bytes) {
            tracing::error!(job_id = %job_id, "failed to persist tape artifact: {e}");
            return CreateOutcome::StorageError(e);
        }

        let now = now_ms();
        let record = ProofJobRecord {
            job_id,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            completed_at: None,
            tape: TapeInfo {
                size_bytes: tape_bytes.len(),
                metadata: tape_summary,
                key: ArtifactStore::tape_key(job_id),
            },
            queue: QueueState::default(),
            prover: ProverState::default(),
            result: None,
            claim: ClaimState::new(claimant_address),
            error: None,
        };

        if let Err(e) = self.store.insert(&record) {
            tracing::error!(job_id = %job_id, "failed to persist job record: {e}");
            return CreateOutcome::StorageError(e);
        }
        if let Err(e) = self.store.set_active_job_id(job_id) {
            tracing::error!(job_id = %job_id, "failed to set active job pointer: {e}");
        }
        if let Err(e) = self.proof_queue.enqueue(PROOF_QUEUE, job_id) {
            tracing::error!(job_id = %job_id, "failed to enqueue proof job: {e}");
        }
        self.schedule_alarm(Duration::from_millis(0));

        CreateOutcome::Accepted(record)
    }

    fn list_succeeded(&self, limit: usize) -> Vec<ProofJobRecord> {
        match self
            .store
            .terminal_jobs_oldest_first(limit.saturating_mul(4).max(limit).max(1))
        {
            Ok(mut jobs) => {
                jobs.retain(|job| job.status == JobStatus::Succeeded);
                jobs.reverse();
                jobs.truncate(limit);
                jobs
            }
            Err(e) => {
                tracing::warn!("list_succeeded scan failed: {e}");
                Vec::new()
            }
        }
    }

    async fn delete_job(&mut self, job_id: Uuid) -> DeleteOutcome {
        let Some(mut record) = self.store.get(job_id).unwrap_or(None) else {
            return DeleteOutcome::NotFound;
        };
        if !record.is_terminal() {
            self.fail_job(&mut record, "cancelled by user".to_string());
        }
        DeleteOutcome::Removed(record)
    }

    fn begin_queue_attempt(&mut self, job_id: Uuid) -> Option<ProofJobRecord> {
        let mut record = self.store.get(job_id).unwrap_or(None)?;
        if record.is_terminal() {
            return None;
        }
        record.status = if record.prover.job_id.is_some() {
            JobStatus::ProverRunning
        } else {
            JobStatus::Dispatching
        };
        record.queue.attempts += 1;
        record.queue.last_attempt_at = Some(now_ms());
        if record.prover.segment_limit_po2.is_none() {
            record.prover.segment_limit_po2 = Some(initial_segment_limit_po2(
                record.tape.metadata.frame_count,
                self.config.segment_limit_po2_default,
            ));
        }
        record.updated_at = now_ms();
        if let Err(e) = self.store.replace(&record) {
            tracing::error!(job_id = %job_id, "failed to persist dispatch attempt: {e}");
            return None;
        }
        Some(record)
    }

    fn apply_submit_outcome(&mut self, job_id: Uuid, outcome: SubmitOutcome) -> ConsumerAction {
        let Some(mut record) = self.store.get(job_id).unwrap_or(None) else {
            return ConsumerAction::Ack;
        };
        if record.is_terminal() {
            return ConsumerAction::Ack;
        }

        match outcome {
            SubmitOutcome::Success {
                prover_job_id,
                status_url,
            } => {
                record.status = JobStatus::ProverRunning;
                record.prover.job_id = Some(prover_job_id);
                record.prover.status_url = Some(status_url);
                if record.prover.segment_limit_po2.is_none() {
                    record.prover.segment_limit_po2 = Some(self.config.segment_limit_po2_default);
                }
                record.queue.last_error = None;
                record.queue.next_retry_at = None;
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %job_id, "failed to persist prover acceptance: {e}");
                }
                self.schedule_alarm(Duration::from_millis(self.config.poll_interval_ms));
                ConsumerAction::Ack
            }
            SubmitOutcome::Retry { message } => {
                let delay = retry_delay_seconds(record.queue.attempts.saturating_sub(1));
                record.status = JobStatus::Retrying;
                record.queue.last_error = Some(message);
                record.queue.next_retry_at = Some(now_ms() + delay * 1000);
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %job_id, "failed to persist submit retry: {e}");
                }
                ConsumerAction::RetryAfter(delay)
            }
            SubmitOutcome::Fatal { message, error_code } => {
                let full_message = match error_code {
                    Some(code) => format!("{message} ({code})"),
                    None => message,
                };
                self.fail_job(&mut record, full_message);
                ConsumerAction::Ack
            }
        }
    }

    fn begin_claim_attempt(&mut self, job_id: Uuid) -> Option<ProofJobRecord> {
        let mut record = self.store.get(job_id).unwrap_or(None)?;
        if record.status != JobStatus::Succeeded || record.claim.status.is_terminal() {
            return None;
        }
        record.claim.status = ClaimStatus::Submitting;
        record.claim.attempts += 1;
        record.claim.last_attempt_at = Some(now_ms());
        record.updated_at = now_ms();
        if let Err(e) = self.store.replace(&record) {
            tracing::error!(job_id = %job_id, "failed to persist claim attempt: {e}");
            return None;
        }
        Some(record)
    }

    fn apply_claim_outcome(&mut self, job_id: Uuid, outcome: ClaimSubmitOutcome) -> ConsumerAction {
        let Some(mut record) = self.store.get(job_id).unwrap_or(None) else {
            return ConsumerAction::Ack;
        };
        if record.claim.status.is_terminal() {
            return ConsumerAction::Ack;
        }

        match outcome {
            ClaimSubmitOutcome::Success { tx_hash } => {
                record.claim.status = ClaimStatus::Succeeded;
                record.claim.tx_hash = Some(tx_hash);
                record.claim.submitted_at = Some(now_ms());
                record.claim.last_error = None;
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %job_id, "failed to persist claim success: {e}");
                }
                ConsumerAction::Ack
            }
            ClaimSubmitOutcome::Retry { message } => {
                let delay = retry_delay_seconds(record.claim.attempts.saturating_sub(1));
                record.claim.status = ClaimStatus::Retrying;
                record.claim.last_error = Some(message);
                record.claim.next_retry_at = Some(now_ms() + delay * 1000);
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %job_id, "failed to persist claim retry: {e}");
                }
                ConsumerAction::RetryAfter(delay)
            }
            ClaimSubmitOutcome::Fatal { message } => {
                record.claim.status = ClaimStatus::Failed;
                record.claim.last_error = Some(message);
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %job_id, "failed to persist claim failure: {e}");
                }
                ConsumerAction::Ack
            }
        }
    }

    /// Shared by the scheduled `alarm` tick and the opportunistic
    /// `kickAlarm` nudge. `full` gates the parts that are only safe to run
    /// once per tick: the prune sweep and rescheduling the next alarm.
    async fn alarm_tick(&mut self, full: bool) {
        if let Some(active_id) = self.store.get_active_job_id().unwrap_or(None) {
            if let Ok(Some(active)) = self.store.get(active_id) {
                if !active.is_terminal() && self.is_zombie(&active) {
                    self.force_fail_zombie(active).await;
                } else if active.status == JobStatus::ProverRunning {
                    self.poll_active_job(active).await;
                }
            }
        }

        if full {
            self.sweep_prune();
            self.schedule_alarm(Duration::from_millis(self.config.poll_interval_ms));
        }
    }

    async fn poll_active_job(&mut self, mut record: ProofJobRecord) {
        let Some(prover_job_id) = record.prover.job_id.clone() else {
            return;
        };
        let result = self.prover.poll_once(&prover_job_id).await;
        record.prover.last_polled_at = Some(now_ms());
        self.apply_poll_result(record, result).await;
    }

    /// Applies one tagged `PollResult` to a job record. Split out from
    /// `poll_active_job` so the state-machine dispatch can be exercised
    /// directly in tests without a live prover to poll.
    async fn apply_poll_result(&mut self, mut record: ProofJobRecord, result: PollResult) {
        match result {
            PollResult::Running { status } => {
                record.prover.status = Some(status);
                record.updated_at = now_ms();
                if let Err(e) = self.store.replace(&record) {
                    tracing::error!(job_id = %record.job_id, "failed to persist poll status: {e}");
                }
            }
            PollResult::Success { response, journal } => {
                self.complete_job_success(record, response, journal).await;
            }
            PollResult::Retry {
                message,
                clear_prover_job,
            } => {
                record.prover.polling_errors += 1;
                if clear_prover_job {
                    record.prover.job_id = None;
                    record.prover.status_url = None;
                    record.prover.recovery_attempts += 1;
                    if record.prover.recovery_attempts > self.config.max_prover_recovery_attempts {
                        self.fail_job(
                            &mut record,
                            format!("prover lost the job too many times: {message}"),
                        );
                        return;
                    }
                    if is_oom_message(&message) {
                        let default = self.config.segment_limit_po2_default;
                        let exceeds_default = record
                            .prover
                            .segment_limit_po2
                            .map(|n| n > default)
                            .unwrap_or(true);
                        if exceeds_default {
                            tracing::info!(
                                job_id = %record.job_id,
                                "downscaling segment_limit_po2 to default after OOM retry"
                            );
                            record.prover.segment_limit_po2 = Some(default);
                        }
                    }
                    record.status = JobStatus::Retrying;
                    record.error = Some(message);
                    record.updated_at = now_ms();
                    if let Err(e) = self.store.replace(&record) {
                        tracing::error!(job_id = %record.job_id, "failed to persist recovery retry: {e}");
                    }
                    if let Err(e) = self.proof_queue.enqueue(PROOF_QUEUE, record.job_id) {
                        tracing::error!(job_id = %record.job_id, "failed to re-enqueue lost job: {e}");
                    }
                } else {
                    record.updated_at = now_ms();
                    if let Err(e) = self.store.replace(&record) {
                        tracing::error!(job_id = %record.job_id, "failed to persist poll retry: {e}");
                    }
                }
            }
            PollResult::Fatal { message } => {
                self.fail_job(&mut record, message);
            }
        }
    }

    async fn complete_job_success(
        &mut self,
        mut record: ProofJobRecord,
        response: serde_json::Value,
        journal: ProverJournal,
    ) {
        // The journal is what the proof actually attests to; the tape's own
        // metadata is only the client's unverified claim about those same
        // values and must never be the source of the stored summary.
        let summary = ResultSummary {
            seed: journal.seed,
            frame_count: journal.frame_count,
            final_score: journal.final_score,
            final_rng_state: journal.final_rng_state,
            checksum: journal.tape_checksum,
            rules_digest: journal.rules_digest,
        };

        let envelope = serde_json::json!({
            "stored_at": now_ms(),
            "prover_response": response,
        });
        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail_job(&mut record, format!("failed to serialize result envelope: {e}"));
                return;
            }
        };
        if let Err(e) = self.artifacts.put_result(record.job_id, &bytes) {
            tracing::warn!(job_id = %record.job_id, "result artifact write failed, will retry: {e}");
            record.prover.polling_errors += 1;
            record.queue.last_error = Some(format!("failed to persist result artifact: {e}"));
            record.updated_at = now_ms();
            if let Err(e) = self.store.replace(&record) {
                tracing::error!(job_id = %record.job_id, "failed to persist artifact-write retry: {e}");
            }
            self.schedule_alarm(Duration::from_millis(
                retry_delay_seconds(record.prover.polling_errors.saturating_sub(1)) * 1000,
            ));
            return;
        }

        record.status = JobStatus::Succeeded;
        record.result = Some(ResultInfo {
            artifact_key: ArtifactStore::result_key(record.job_id),
            summary,
        });
        record.error = None;
        record.updated_at = now_ms();
        record.completed_at = Some(record.updated_at);
        if let Err(e) = self.store.replace(&record) {
            tracing::error!(job_id = %record.job_id, "failed to persist job success: {e}");
        }
        let _ = self.store.clear_active_job_id_if_matches(record.job_id);
        self.artifacts.remove_tape_best_effort(record.job_id);

        if let Err(e) = self.claim_queue.enqueue(CLAIM_QUEUE, record.job_id) {
            tracing::error!(job_id = %record.job_id, "failed to enqueue claim submission: {e}");
        }
    }

    fn fail_job(&mut self, record: &mut ProofJobRecord, message: String) {
        record.status = JobStatus::Failed;
        record.error = Some(message);
        record.updated_at = now_ms();
        record.completed_at = Some(record.updated_at);
        if let Err(e) = self.store.replace(record) {
            tracing::error!(job_id = %record.job_id, "failed to persist job failure: {e}");
        }
        let _ = self.store.clear_active_job_id_if_matches(record.job_id);
        self.artifacts.remove_tape_best_effort(record.job_id);
    }

    async fn force_fail_zombie(&mut self, mut record: ProofJobRecord) {
        tracing::warn!(job_id = %record.job_id, "force-failing job that exceeded the wall-clock budget");
        self.fail_job(&mut record, "job exceeded maximum wall-clock time".to_string());
    }

    /// Best-effort: caps the number of retained terminal jobs and evicts
    /// anything past the retention window. Never fatal; a failed delete is
    /// logged and skipped rather than aborting the sweep.
    fn sweep_prune(&mut self) {
        let counts = self.store.count_by_status().unwrap_or_default();
        let terminal_count: i64 = counts
            .iter()
            .filter(|(status, _)| status.is_terminal())
            .map(|(_, count)| *count)
            .sum();
        let over_cap = (terminal_count - self.config.max_completed_jobs as i64).max(0) as usize;

        let page = match self
            .store
            .terminal_jobs_oldest_first(over_cap.max(64))
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("prune scan failed: {e}");
                return;
            }
        };

        let cutoff = now_ms().saturating_sub(self.config.completed_job_retention_ms);
        let mut pruned = 0usize;
        for (index, record) in page.iter().enumerate() {
            let age_expired = record.completed_at.unwrap_or(record.updated_at) < cutoff;
            let over_count_budget = index < over_cap;
            if !age_expired && !over_count_budget {
                continue;
            }
            if let Err(e) = self.store.delete(record.job_id) {
                tracing::warn!(job_id = %record.job_id, "prune delete failed: {e}");
                continue;
            }
            self.artifacts.remove_tape_best_effort(record.job_id);
            pruned += 1;
        }
        if pruned > 0 {
            tracing::info!(pruned, "pruned terminal job records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_coordinator() -> Coordinator {
        test_coordinator_with_root().0
    }

    fn test_coordinator_with_root() -> (Coordinator, std::path::PathBuf) {
        let root = tempfile::TempDir::new().unwrap().into_path();
        let (alarm_tx, _alarm_rx) = watch::channel(None);
        let coordinator = Coordinator {
            store: JobStore::open_in_memory(),
            artifacts: ArtifactStore::open(&root).unwrap(),
            proof_queue: Arc::new(SqliteQueue::open_in_memory()),
            claim_queue: Arc::new(SqliteQueue::open_in_memory()),
            prover: Arc::new(ProverClient::new(
                "http://127.0.0.1:0",
                StdDuration::from_millis(50),
            )),
            config: Arc::new(test_config()),
            alarm_tx,
        };
        (coordinator, root)
    }

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            data_dir: std::env::temp_dir(),
            prover_base_url: "http://127.0.0.1:0".to_string(),
            prover_request_timeout_ms: 50,
            max_tape_bytes: 1024,
            max_frames: 1000,
            max_job_wall_time_ms: 60_000,
            max_completed_jobs: 2,
            completed_job_retention_ms: 3_600_000,
            poll_interval_ms: 500,
            segment_limit_po2_default: 20,
            max_prover_recovery_attempts: 2,
            prune_sweep_secs: 60,
            claim_queue_concurrency: 1,
            http_workers: None,
            http_max_connections: 100,
            http_keep_alive_secs: 5,
            cors_allowed_origin: None,
            api_key: None,
        }
    }

    fn sample_summary() -> TapeSummary {
        TapeSummary {
            seed: 1,
            frame_count: 10,
            final_score: 500,
            final_rng_state: 7,
            checksum: 99,
            claimant_address: "GTEST".to_string(),
        }
    }

    #[tokio::test]
    async fn create_job_then_busy_then_zombie_recovers() {
        let mut coordinator = test_coordinator();
        let first = coordinator
            .create_job(b"tape-a".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await;
        let first_id = match first {
            CreateOutcome::Accepted(record) => record.job_id,
            other => panic!("expected Accepted, got {other:?}"),
        };

        let second = coordinator
            .create_job(b"tape-b".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await;
        match second {
            CreateOutcome::Busy(record) => assert_eq!(record.job_id, first_id),
            other => panic!("expected Busy, got {other:?}"),
        }

        // Force the active job to look old enough to be a zombie.
        let mut stale = coordinator.store.get(first_id).unwrap().unwrap();
        stale.created_at = 0;
        stale.updated_at = 0;
        coordinator.store.replace(&stale).unwrap();

        let third = coordinator
            .create_job(b"tape-c".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await;
        match third {
            CreateOutcome::Accepted(record) => assert_ne!(record.job_id, first_id),
            other => panic!("expected Accepted after zombie recovery, got {other:?}"),
        }

        let reaped = coordinator.store.get(first_id).unwrap().unwrap();
        assert_eq!(reaped.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn begin_queue_attempt_transitions_to_dispatching() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };

        let dispatching = coordinator.begin_queue_attempt(record.job_id).unwrap();
        assert_eq!(dispatching.status, JobStatus::Dispatching);
        assert_eq!(dispatching.queue.attempts, 1);
    }

    #[tokio::test]
    async fn submit_retry_then_fatal_fails_job() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        coordinator.begin_queue_attempt(record.job_id).unwrap();

        let action = coordinator.apply_submit_outcome(
            record.job_id,
            SubmitOutcome::Retry {
                message: "503".to_string(),
            },
        );
        assert!(matches!(action, ConsumerAction::RetryAfter(_)));
        assert_eq!(
            coordinator.store.get(record.job_id).unwrap().unwrap().status,
            JobStatus::Retrying
        );

        coordinator.begin_queue_attempt(record.job_id).unwrap();
        let action = coordinator.apply_submit_outcome(
            record.job_id,
            SubmitOutcome::Fatal {
                message: "rejected".to_string(),
                error_code: Some("invalid_tape".to_string()),
            },
        );
        assert_eq!(action, ConsumerAction::Ack);
        let failed = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("invalid_tape"));
    }

    #[tokio::test]
    async fn submit_success_moves_to_prover_running() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        coordinator.begin_queue_attempt(record.job_id).unwrap();

        let action = coordinator.apply_submit_outcome(
            record.job_id,
            SubmitOutcome::Success {
                prover_job_id: "p-1".to_string(),
                status_url: "https://prover.example/job/p-1".to_string(),
            },
        );
        assert_eq!(action, ConsumerAction::Ack);
        let running = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(running.status, JobStatus::ProverRunning);
        assert_eq!(running.prover.job_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn claim_lifecycle_succeeds() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };

        // A claim can't start before the job has succeeded.
        assert!(coordinator.begin_claim_attempt(record.job_id).is_none());

        let mut succeeded = coordinator.store.get(record.job_id).unwrap().unwrap();
        succeeded.status = JobStatus::Succeeded;
        coordinator.store.replace(&succeeded).unwrap();

        let attempt = coordinator.begin_claim_attempt(record.job_id).unwrap();
        assert_eq!(attempt.claim.status, ClaimStatus::Submitting);

        let action = coordinator.apply_claim_outcome(
            record.job_id,
            ClaimSubmitOutcome::Success {
                tx_hash: "0xabc".to_string(),
            },
        );
        assert_eq!(action, ConsumerAction::Ack);
        let done = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(done.claim.status, ClaimStatus::Succeeded);
        assert_eq!(done.claim.tx_hash.as_deref(), Some("0xabc"));
    }

    #[tokio::test]
    async fn delete_job_force_fails_active_job() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };

        match coordinator.delete_job(record.job_id).await {
            DeleteOutcome::Removed(removed) => assert_eq!(removed.status, JobStatus::Failed),
            DeleteOutcome::NotFound => panic!("expected job to be found"),
        }
        assert!(coordinator.store.get_active_job_id().unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_job_not_found_reports_missing() {
        let mut coordinator = test_coordinator();
        assert!(matches!(
            coordinator.delete_job(Uuid::new_v4()).await,
            DeleteOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn lost_prover_job_oom_retry_downscales_segment_limit() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        let mut record = coordinator.begin_queue_attempt(record.job_id).unwrap();
        // Simulate a prior submission that picked a segment limit above the
        // configured default, as a large tape would.
        record.prover.segment_limit_po2 = Some(coordinator.config.segment_limit_po2_default + 2);
        record.prover.job_id = Some("p-1".to_string());
        coordinator.store.replace(&record).unwrap();

        coordinator
            .apply_poll_result(
                record.clone(),
                PollResult::Retry {
                    message: "prover reported: out of memory".to_string(),
                    clear_prover_job: true,
                },
            )
            .await;

        let retried = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Retrying);
        assert_eq!(retried.prover.job_id, None);
        assert_eq!(retried.prover.recovery_attempts, 1);
        assert_eq!(
            retried.prover.segment_limit_po2,
            Some(coordinator.config.segment_limit_po2_default)
        );

        // A second OOM at the default does not downscale further (B4).
        let mut again = retried.clone();
        again.prover.job_id = Some("p-2".to_string());
        coordinator.store.replace(&again).unwrap();
        coordinator
            .apply_poll_result(
                again,
                PollResult::Retry {
                    message: "prover reported: out of memory".to_string(),
                    clear_prover_job: true,
                },
            )
            .await;
        let second = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(
            second.prover.segment_limit_po2,
            Some(coordinator.config.segment_limit_po2_default)
        );
        assert_eq!(second.prover.recovery_attempts, 2);
    }

    #[tokio::test]
    async fn recovery_attempts_exhaustion_fails_job() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        let mut record = coordinator.begin_queue_attempt(record.job_id).unwrap();
        record.prover.job_id = Some("p-1".to_string());
        record.prover.recovery_attempts = coordinator.config.max_prover_recovery_attempts;
        coordinator.store.replace(&record).unwrap();

        coordinator
            .apply_poll_result(
                record.clone(),
                PollResult::Retry {
                    message: "unknown job".to_string(),
                    clear_prover_job: true,
                },
            )
            .await;

        let failed = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(coordinator.store.get_active_job_id().unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_evicts_terminal_jobs_over_cap() {
        let mut coordinator = test_coordinator();
        for i in 0..4u64 {
            let outcome = coordinator
                .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
                .await;
            let job_id = match outcome {
                CreateOutcome::Accepted(record) => record.job_id,
                CreateOutcome::Busy(record) => record.job_id,
                other => panic!("unexpected outcome: {other:?}"),
            };
            let mut record = coordinator.store.get(job_id).unwrap().unwrap();
            record.status = JobStatus::Succeeded;
            record.completed_at = Some(i);
            record.updated_at = i;
            coordinator.store.replace(&record).unwrap();
            let _ = coordinator.store.clear_active_job_id_if_matches(job_id);
        }

        coordinator.sweep_prune();
        let counts = coordinator.store.count_by_status().unwrap();
        let remaining: i64 = counts.iter().map(|(_, count)| *count).sum();
        assert!(remaining as usize <= coordinator.config.max_completed_jobs);
    }

    #[tokio::test]
    async fn result_artifact_write_failure_retries_instead_of_failing() {
        let (mut coordinator, root) = test_coordinator_with_root();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        let mut record = coordinator.begin_queue_attempt(record.job_id).unwrap();
        record.status = JobStatus::ProverRunning;
        record.prover.job_id = Some("p-1".to_string());
        coordinator.store.replace(&record).unwrap();

        // Block the artifact write by placing a plain file where the job's
        // artifact directory needs to be created.
        let job_dir = root.join("proof-jobs").join(record.job_id.to_string());
        std::fs::create_dir_all(&root.join("proof-jobs")).unwrap();
        std::fs::write(&job_dir, b"blocking file").unwrap();

        let journal = ProverJournal {
            seed: record.tape.metadata.seed,
            frame_count: record.tape.metadata.frame_count,
            final_score: record.tape.metadata.final_score,
            final_rng_state: record.tape.metadata.final_rng_state,
            tape_checksum: record.tape.metadata.checksum,
            rules_digest: 1,
        };
        coordinator
            .apply_poll_result(
                record.clone(),
                PollResult::Success {
                    response: serde_json::json!({"journal": journal}),
                    journal,
                },
            )
            .await;

        let after = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(after.status, JobStatus::ProverRunning);
        assert_eq!(after.prover.polling_errors, 1);
        assert!(after.queue.last_error.is_some());
        assert!(coordinator.store.get_active_job_id().unwrap().is_some());
    }

    #[tokio::test]
    async fn result_summary_is_taken_from_the_prover_journal_not_the_tape() {
        let mut coordinator = test_coordinator();
        let mut summary = sample_summary();
        summary.final_score = 500;
        let record = match coordinator
            .create_job(b"tape".to_vec(), summary, "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };
        let mut record = coordinator.begin_queue_attempt(record.job_id).unwrap();
        record.status = JobStatus::ProverRunning;
        record.prover.job_id = Some("p-1".to_string());
        coordinator.store.replace(&record).unwrap();

        let journal = ProverJournal {
            seed: record.tape.metadata.seed,
            frame_count: record.tape.metadata.frame_count,
            final_score: 2040,
            final_rng_state: record.tape.metadata.final_rng_state,
            tape_checksum: record.tape.metadata.checksum,
            rules_digest: 1,
        };
        coordinator
            .apply_poll_result(
                record.clone(),
                PollResult::Success {
                    response: serde_json::json!({"journal": journal}),
                    journal,
                },
            )
            .await;

        let after = coordinator.store.get(record.job_id).unwrap().unwrap();
        assert_eq!(after.status, JobStatus::Succeeded);
        let result = after.result.expect("job should have a result");
        assert_eq!(result.summary.final_score, 2040);
        assert_ne!(result.summary.final_score, after.tape.metadata.final_score);
    }

    #[tokio::test]
    async fn begin_queue_attempt_sets_prover_running_when_prover_job_already_exists() {
        let mut coordinator = test_coordinator();
        let record = match coordinator
            .create_job(b"tape".to_vec(), sample_summary(), "GCLAIM".to_string())
            .await
        {
            CreateOutcome::Accepted(record) => record,
            other => panic!("expected Accepted, got {other:?}"),
        };

        let mut record = coordinator.begin_queue_attempt(record.job_id).unwrap();
        record.status = JobStatus::ProverRunning;
        record.prover.job_id = Some("p-1".to_string());
        coordinator.store.replace(&record).unwrap();

        let redelivered = coordinator.begin_queue_attempt(record.job_id).unwrap();
        assert_eq!(redelivered.status, JobStatus::ProverRunning);
        assert_eq!(redelivered.prover.job_id.as_deref(), Some("p-1"));
    }
}
