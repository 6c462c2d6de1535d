use thiserror::Error;

pub type OptrResult<T> = Result<T, OptrError>;

#[derive(Debug, Error)]
pub enum OptrError {
    #[error("no candidate paths supplied")]
    NoCandidates,

    #[error("candidate {0} has no actions")]
    EmptyCandidate(String),

    #[error("candidate {id} has invalid features: {reason}")]
    InvalidFeatures { id: String, reason: String },
}
