use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::error::EngineError;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    details: Option<String>,
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotParticipant => StatusCode::FORBIDDEN,
            EngineError::MatchNotFound | EngineError::ChallengeNotFound => StatusCode::NOT_FOUND,
            EngineError::AlreadyReported
            | EngineError::AlreadyJoined
            | EngineError::MatchClosed(_)
            | EngineError::ChallengeNotActive
            | EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
            EngineError::InsufficientTickets | EngineError::ClubIneligible(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::InvalidDuration(_)
            | EngineError::InvalidMultiplier(_)
            | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::NotificationFailed(_) => StatusCode::BAD_GATEWAY,
            EngineError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // Storage failures are paged to admins; callers only see a generic message.
        let (message, details) = match self {
            EngineError::DatabaseError(_) => ("Internal server error".to_string(), None),
            EngineError::RateLimited { retry_after_secs } => {
                (self.to_string(), Some(format!("retry_after_secs={}", retry_after_secs)))
            }
            _ => (self.to_string(), None),
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: message,
            code: status.as_u16(),
            details,
        })
    }
}
