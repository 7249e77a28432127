use thiserror::Error;

use super::Stage;
use crate::cache::CacheError;
use crate::join::JoinError;

/// Why a run stopped. Every variant names the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage {stage}: fetching {dataset} failed")]
    Fetch {
        stage: Stage,
        dataset: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("stage {stage}: join failed")]
    Join {
        stage: Stage,
        #[source]
        source: JoinError,
    },
    #[error("stage {stage}: artifact unavailable")]
    Cache {
        stage: Stage,
        #[source]
        source: CacheError,
    },
    #[error("stage {stage}: worker task did not finish")]
    Task {
        stage: Stage,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("stage {stage} produced no rows")]
    Empty { stage: Stage },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Fetch { stage, .. }
            | PipelineError::Join { stage, .. }
            | PipelineError::Cache { stage, .. }
            | PipelineError::Task { stage, .. }
            | PipelineError::Empty { stage } => *stage,
        }
    }
}
