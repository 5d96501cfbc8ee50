use std::fmt::Display;

/// Rejected input; the operation is aborted without any state change
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Join or create a group first")]
    NoActiveGroup,

    #[error("Please enter a Group ID")]
    EmptyGroupId,

    #[error("Group ID '{0}' contains characters that cannot be used")]
    InvalidGroupId(String),

    #[error("Capture your location before submitting preferences")]
    MissingLocation,

    #[error("Location ({latitude}, {longitude}) is not a valid coordinate")]
    InvalidLocation { latitude: f64, longitude: f64 },

    #[error("{field} must be between 1 and 5, got {value}")]
    LevelOutOfRange { field: &'static str, value: u8 },

    #[error("Add members first")]
    NoMembers,

    #[error("Ensure all members captured location")]
    MembersMissingLocation,

    #[error("No restaurants to choose from")]
    EmptyCandidateSet,

    #[error("'{0}' is not one of the current restaurant options")]
    UnknownCandidate(String),

    #[error("The group changed while recommendations were loading")]
    GroupChanged,
}

/// Errors reported by the group coordination core
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Any store or network failure, normalized to "failed, try again"
    #[error("Could not {action}. Please try again.")]
    Remote { action: &'static str },

    #[error("{0}")]
    Recommendation(String),
}

impl CoreError {
    /// Log the underlying failure and normalize it for the UI
    pub fn remote(action: &'static str, cause: impl Display) -> Self {
        tracing::error!("Failed to {}: {}", action, cause);
        CoreError::Remote { action }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
