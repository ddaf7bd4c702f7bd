use super::*;
use crate::types::{ClaimState, ProverState, QueueState, TapeInfo};
use proof_gateway_core::TapeSummary;

fn sample_record(job_id: Uuid, status: JobStatus, created_at: u64) -> ProofJobRecord {
    ProofJobRecord {
        job_id,
        status,
        created_at,
        updated_at: created_at,
        completed_at: None,
        tape: TapeInfo {
            size_bytes: 128,
            metadata: TapeSummary {
                seed: 1,
                frame_count: 10,
                final_score: 100,
                final_rng_state: 2,
                checksum: 3,
                claimant_address: "GTEST".to_string(),
            },
            key: format!("proof-jobs/{job_id}/input.tape"),
        },
        queue: QueueState::default(),
        prover: ProverState::default(),
        result: None,
        claim: ClaimState::new("GTEST".to_string()),
        error: None,
    }
}

#[test]
fn insert_and_get_round_trips() {
    let store = JobStore::open_in_memory();
    let job_id = Uuid::new_v4();
    let record = sample_record(job_id, JobStatus::Queued, 1_000);

    store.insert(&record).unwrap();
    let fetched = store.get(job_id).unwrap().unwrap();
    assert_eq!(fetched.job_id, job_id);
    assert_eq!(fetched.status, JobStatus::Queued);
    assert_eq!(fetched.tape.metadata.final_score, 100);
}

#[test]
fn get_missing_job_returns_none() {
    let store = JobStore::open_in_memory();
    assert!(store.get(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn replace_updates_status_and_json() {
    let store = JobStore::open_in_memory();
    let job_id = Uuid::new_v4();
    let mut record = sample_record(job_id, JobStatus::Queued, 1_000);
    store.insert(&record).unwrap();

    record.status = JobStatus::Succeeded;
    record.completed_at = Some(2_000);
    record.updated_at = 2_000;
    store.replace(&record).unwrap();

    let fetched = store.get(job_id).unwrap().unwrap();
    assert_eq!(fetched.status, JobStatus::Succeeded);
    assert_eq!(fetched.completed_at, Some(2_000));
}

#[test]
fn active_job_pointer_set_and_clear() {
    let store = JobStore::open_in_memory();
    assert!(store.get_active_job_id().unwrap().is_none());

    let job_id = Uuid::new_v4();
    store.set_active_job_id(job_id).unwrap();
    assert_eq!(store.get_active_job_id().unwrap(), Some(job_id));

    // Clearing with a non-matching id is a no-op.
    store.clear_active_job_id_if_matches(Uuid::new_v4()).unwrap();
    assert_eq!(store.get_active_job_id().unwrap(), Some(job_id));

    store.clear_active_job_id_if_matches(job_id).unwrap();
    assert!(store.get_active_job_id().unwrap().is_none());
}

#[test]
fn terminal_jobs_oldest_first_excludes_active_jobs() {
    let store = JobStore::open_in_memory();

    let active = Uuid::new_v4();
    store
        .insert(&sample_record(active, JobStatus::ProverRunning, 500))
        .unwrap();

    let mut older = sample_record(Uuid::new_v4(), JobStatus::Succeeded, 100);
    older.completed_at = Some(100);
    store.insert(&older).unwrap();

    let mut newer = sample_record(Uuid::new_v4(), JobStatus::Failed, 300);
    newer.completed_at = Some(300);
    store.insert(&newer).unwrap();

    let page = store.terminal_jobs_oldest_first(10).unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].job_id, older.job_id);
    assert_eq!(page[1].job_id, newer.job_id);
}

#[test]
fn count_by_status_groups_correctly() {
    let store = JobStore::open_in_memory();
    store
        .insert(&sample_record(Uuid::new_v4(), JobStatus::Queued, 1))
        .unwrap();
    store
        .insert(&sample_record(Uuid::new_v4(), JobStatus::Queued, 2))
        .unwrap();
    store
        .insert(&sample_record(Uuid::new_v4(), JobStatus::Succeeded, 3))
        .unwrap();

    let counts = store.count_by_status().unwrap();
    let queued = counts
        .iter()
        .find(|(status, _)| *status == JobStatus::Queued)
        .unwrap()
        .1;
    let succeeded = counts
        .iter()
        .find(|(status, _)| *status == JobStatus::Succeeded)
        .unwrap()
        .1;
    assert_eq!(queued, 2);
    assert_eq!(succeeded, 1);
}

#[test]
fn delete_removes_row() {
    let store = JobStore::open_in_memory();
    let job_id = Uuid::new_v4();
    store
        .insert(&sample_record(job_id, JobStatus::Failed, 10))
        .unwrap();

    assert!(store.delete(job_id).unwrap());
    assert!(store.get(job_id).unwrap().is_none());
    assert!(!store.delete(job_id).unwrap());
}
