//! Filesystem-backed blob store keyed by job id, standing in for whatever
//! durable blob tier a real deployment fronts it with. Layout:
//! `{root}/proof-jobs/{jobId}/input.tape` and `.../result.json`.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

pub(crate) struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub(crate) fn open(root: &Path) -> Result<Self, String> {
        fs::create_dir_all(root)
            .map_err(|e| format!("failed to create artifact root {}: {e}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join("proof-jobs").join(job_id.to_string())
    }

    pub(crate) fn tape_key(job_id: Uuid) -> String {
        format!("proof-jobs/{job_id}/input.tape")
    }

    pub(crate) fn result_key(job_id: Uuid) -> String {
        format!("proof-jobs/{job_id}/result.json")
    }

    pub(crate) fn put_tape(&self, job_id: Uuid, bytes: &[u8]) -> Result<(), String> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).map_err(|e| format!("failed to create job dir: {e}"))?;
        fs::write(dir.join("input.tape"), bytes).map_err(|e| format!("failed to write tape: {e}"))
    }

    pub(crate) fn get_tape(&self, job_id: Uuid) -> Result<Option<Vec<u8>>, String> {
        let path = self.job_dir(job_id).join("input.tape");
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read tape: {e}")),
        }
    }

    pub(crate) fn put_result(&self, job_id: Uuid, json_bytes: &[u8]) -> Result<(), String> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir).map_err(|e| format!("failed to create job dir: {e}"))?;
        fs::write(dir.join("result.json"), json_bytes)
            .map_err(|e| format!("failed to write result: {e}"))
    }

    pub(crate) fn get_result(&self, job_id: Uuid) -> Result<Option<Vec<u8>>, String> {
        let path = self.job_dir(job_id).join("result.json");
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read result: {e}")),
        }
    }

    pub(crate) fn result_exists(&self, job_id: Uuid) -> bool {
        self.job_dir(job_id).join("result.json").exists()
    }

    /// Removes the tape artifact only; the result artifact survives record
    /// pruning and is reclaimed separately by an external retention policy.
    pub(crate) fn remove_tape_best_effort(&self, job_id: Uuid) {
        let path = self.job_dir(job_id).join("input.tape");
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(job_id = %job_id, "failed to remove tape artifact: {e}");
            }
        }
    }
}
