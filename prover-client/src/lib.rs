//! HTTP adapter to the remote proving service.
//!
//! The coordinator never sees a raw network error: every call here resolves
//! to a tagged outcome (`SubmitOutcome` / `PollResult`) that already carries
//! the transient-vs-fatal classification, exactly the data the coordinator's
//! state machine needs to decide its next transition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptKind {
    #[default]
    Succinct,
    Composite,
}

impl ReceiptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succinct => "succinct",
            Self::Composite => "composite",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub segment_limit_po2: u32,
    pub receipt_kind: ReceiptKind,
}

/// Outcome of `submit`. Tagged, not an exception: the coordinator dispatches
/// on this value rather than on a caught error.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Success {
        prover_job_id: String,
        status_url: String,
    },
    Retry {
        message: String,
    },
    Fatal {
        message: String,
        error_code: Option<String>,
    },
}

/// Outcome of `poll_once`.
#[derive(Debug, Clone)]
pub enum PollResult {
    Running {
        status: String,
    },
    Success {
        response: serde_json::Value,
        journal: ProverJournal,
    },
    Retry {
        message: String,
        clear_prover_job: bool,
    },
    Fatal {
        message: String,
    },
}

/// Deterministic projection of a prover's success payload. This is what the
/// proof is actually about: the tape the client uploaded only declares these
/// values, the journal is what the zero-knowledge proof attests to them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProverJournal {
    pub seed: u32,
    pub frame_count: u32,
    pub final_score: u32,
    pub final_rng_state: u32,
    pub tape_checksum: u32,
    pub rules_digest: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverHealthSummary {
    pub reachable: bool,
    pub image_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponseBody {
    job_id: String,
    status_url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollResponseBody {
    status: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProverResultBody {
    journal: ProverJournal,
}

#[derive(Debug, Deserialize)]
struct HealthResponseBody {
    #[serde(default)]
    image_id: Option<String>,
}

pub struct ProverClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProverClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client builder should not fail with only a timeout set");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn submit(&self, tape: &[u8], options: SubmitOptions) -> SubmitOutcome {
        let url = format!(
            "{}/submit?segment_limit_po2={}&receipt_kind={}",
            self.base_url,
            options.segment_limit_po2,
            options.receipt_kind.as_str()
        );

        let response = match self
            .http
            .post(&url)
            .body(tape.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return SubmitOutcome::Retry {
                    message: format!("prover submit request failed: {err}"),
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<SubmitResponseBody>().await {
                Ok(body) => SubmitOutcome::Success {
                    prover_job_id: body.job_id,
                    status_url: body.status_url,
                },
                Err(err) => SubmitOutcome::Fatal {
                    message: format!("prover submit returned an unparseable success body: {err}"),
                    error_code: Some("bad_submit_response".to_string()),
                },
            };
        }

        if status.as_u16() == 429 || status.is_server_error() {
            return SubmitOutcome::Retry {
                message: format!("prover submit returned transient status {status}"),
            };
        }

        let body = response.json::<SubmitErrorBody>().await.ok();
        SubmitOutcome::Fatal {
            message: body
                .as_ref()
                .and_then(|b| b.error.clone())
                .unwrap_or_else(|| format!("prover submit rejected the tape: {status}")),
            error_code: body.and_then(|b| b.error_code),
        }
    }

    pub async fn poll_once(&self, prover_job_id: &str) -> PollResult {
        let url = format!("{}/job/{}", self.base_url, prover_job_id);

        let response = match self.http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                return PollResult::Retry {
                    message: format!("prover poll request failed: {err}"),
                    clear_prover_job: false,
                }
            }
        };

        let status = response.status();

        if status.as_u16() == 404 || status.as_u16() == 410 {
            return PollResult::Retry {
                message: format!("prover job {prover_job_id} is unknown to the prover"),
                clear_prover_job: true,
            };
        }

        if status.as_u16() == 429 || status.is_server_error() {
            return PollResult::Retry {
                message: format!("prover poll returned transient status {status}"),
                clear_prover_job: false,
            };
        }

        if !status.is_success() {
            return PollResult::Fatal {
                message: format!("prover poll returned fatal status {status}"),
            };
        }

        let body = match response.json::<PollResponseBody>().await {
            Ok(body) => body,
            Err(err) => {
                return PollResult::Fatal {
                    message: format!("prover poll returned an unparseable body: {err}"),
                }
            }
        };

        match body.status.as_str() {
            "succeeded" => classify_success_result(body.result),
            "failed" => {
                let message = body
                    .error
                    .unwrap_or_else(|| "prover reported failure with no detail".to_string());
                if is_recoverable_message(&message) {
                    PollResult::Retry {
                        message,
                        clear_prover_job: true,
                    }
                } else {
                    PollResult::Fatal { message }
                }
            }
            "not_found" => PollResult::Retry {
                message: format!("prover job {prover_job_id} is unknown to the prover"),
                clear_prover_job: true,
            },
            other => PollResult::Running {
                status: other.to_string(),
            },
        }
    }

    pub async fn get_health(&self) -> ProverHealthSummary {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<HealthResponseBody>().await {
                    Ok(body) => ProverHealthSummary {
                        reachable: true,
                        image_id: body.image_id,
                    },
                    Err(_) => ProverHealthSummary {
                        reachable: true,
                        image_id: None,
                    },
                }
            }
            _ => ProverHealthSummary {
                reachable: false,
                image_id: None,
            },
        }
    }
}

/// A `succeeded` poll body's `result` is only trustworthy once it deserializes
/// against the journal schema; a body that omits the journal or mangles a
/// field is fatal, not a silent pass-through of whatever the prover sent.
fn classify_success_result(result: Option<serde_json::Value>) -> PollResult {
    let Some(result) = result else {
        return PollResult::Fatal {
            message: "prover reported success with no result payload".to_string(),
        };
    };
    match serde_json::from_value::<ProverResultBody>(result.clone()) {
        Ok(parsed) => PollResult::Success {
            response: result,
            journal: parsed.journal,
        },
        Err(err) => PollResult::Fatal {
            message: format!("prover success payload failed journal schema validation: {err}"),
        },
    }
}

/// An OOM or allocation failure is re-submitted at a smaller segment limit
/// rather than treated as a dead end; everything else "failed"-shaped is
/// still routed through recovery since the prover may have simply lost the
/// job record across a restart.
fn is_recoverable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("out of memory")
        || lower.contains("allocation failed")
        || lower.contains("lost")
        || lower.contains("unknown job")
}
