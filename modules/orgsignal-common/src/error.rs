use thiserror::Error;

use crate::types::StageId;

#[derive(Error, Debug)]
pub enum OrgSignalError {
    #[error("Analysis backend error: {0}")]
    Backend(String),

    #[error("Stage {stage} timed out after {timeout_secs}s")]
    StageTimeout { stage: StageId, timeout_secs: u64 },

    #[error("All collectors failed for stage {stage}")]
    AllCollectorsFailed { stage: StageId },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
