pub mod constants;
pub mod error;
pub mod job;
pub mod tape;

pub use error::TapeError;
pub use job::{
    initial_segment_limit_po2, is_oom_message, retry_delay_seconds, ClaimStatus, JobStatus,
    ResultSummary,
};
pub use tape::{parse_tape, serialize_tape, validate_tape, TapeSummary, TapeView};
