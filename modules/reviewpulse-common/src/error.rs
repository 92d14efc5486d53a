use thiserror::Error;

use crate::types::SourceId;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// One collection adapter failed. Recovered locally: logged and excluded
    /// from the run.
    #[error("source {source} unavailable: {reason}")]
    SourceUnavailable { source: SourceId, reason: String },

    /// Every configured source failed or returned nothing.
    #[error("no data collected from any source")]
    NoDataCollected,

    /// The classification adapter failed and the rule-based fallback ran
    /// instead. Recorded as a warning; the job proceeds.
    #[error("classification degraded to rule-based fallback: {0}")]
    ClassificationDegraded(String),

    /// One analysis agent failed; its result section is marked unavailable.
    #[error("analysis agent {agent} unavailable: {reason}")]
    AgentUnavailable { agent: String, reason: String },

    /// All four analysis agents failed.
    #[error("all analysis agents failed")]
    AllAgentsFailed,

    /// User-initiated cancellation. Not an error.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Short machine-readable kind, used in transition-log notes.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceUnavailable { .. } => "source_unavailable",
            PipelineError::NoDataCollected => "no_data_collected",
            PipelineError::ClassificationDegraded(_) => "classification_degraded",
            PipelineError::AgentUnavailable { .. } => "agent_unavailable",
            PipelineError::AllAgentsFailed => "all_agents_failed",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal(_) => "internal_fault",
        }
    }

    /// The error string stored on the job row and exposed to callers.
    /// Internal faults are masked: the full diagnostic goes to the transition
    /// log only, and the caller sees a generic message with the job id as
    /// the support reference.
    pub fn user_message(&self, reference: uuid::Uuid) -> String {
        match self {
            PipelineError::Internal(_) => {
                format!("internal error; reference {reference}")
            }
            other => other.to_string(),
        }
    }
}
