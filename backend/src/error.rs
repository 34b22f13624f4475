use thiserror::Error;

/// Errors surfaced by the outcome engine.
///
/// Validation variants are meant for direct display to the user and never
/// leave partial state behind. `DatabaseError` is critical: callers log it and
/// forward it to the admin channel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("You are not a participant in this match")]
    NotParticipant,

    #[error("You have already reported a score for this match")]
    AlreadyReported,

    #[error("Match not found")]
    MatchNotFound,

    #[error("Match is closed for reporting ({0})")]
    MatchClosed(String),

    #[error("Challenge is not active")]
    ChallengeNotActive,

    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Already participating in this challenge")]
    AlreadyJoined,

    #[error("Not enough club league tickets")]
    InsufficientTickets,

    #[error("Club league ineligible: {0}")]
    ClubIneligible(String),

    #[error("Invalid duration '{0}', expected a number followed by h or d")]
    InvalidDuration(String),

    #[error("Hypercharge multiplier must be between 10 and 200 percent, got {0}")]
    InvalidMultiplier(u32),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Notification delivery failed: {0}")]
    NotificationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl EngineError {
    pub fn database(msg: impl Into<String>) -> Self {
        EngineError::DatabaseError(msg.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> Self {
        EngineError::InvalidTransition {
            from: format!("{:?}", from),
            to: format!("{:?}", to),
        }
    }

    /// Critical errors abort the operation and page an administrator.
    pub fn is_critical(&self) -> bool {
        matches!(self, EngineError::DatabaseError(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::DatabaseError(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        EngineError::DatabaseError(format!("redis: {}", err))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::DatabaseError(format!("document shape: {}", err))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(err: validator::ValidationErrors) -> Self {
        EngineError::Validation(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
