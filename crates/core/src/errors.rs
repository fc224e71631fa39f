use thiserror::Error;

use crate::domain::lost::LostSource;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("lost opportunity from `{}` requires a matching reason", lost_source.as_str())]
    MissingLostReason { lost_source: LostSource },
    #[error("unsupported lost opportunity source `{0}`")]
    InvalidLostSource(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
