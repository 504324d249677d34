use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

/// Application error taxonomy.
///
/// The domain variants (`SoldOut`, `AlreadyUsed`, `PromoExhausted`, ...) are
/// expected, user-facing outcomes of the ticketing engine, not defects; they
/// carry enough data for the caller to act on. The generic variants at the
/// bottom cover infrastructure failures.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Event is sold out")]
    SoldOut,

    #[error("User is already on the waitlist")]
    AlreadyWaiting,

    #[error("User is not on the waitlist")]
    NotWaiting,

    #[error("Ticket was already checked in at {scanned_at}")]
    AlreadyUsed { scanned_at: DateTime<Utc> },

    #[error("Ticket has been cancelled")]
    TicketCancelled,

    #[error("Promo code is not valid: {0}")]
    PromoInvalid(String),

    #[error("Promo code has no uses left")]
    PromoExhausted,

    #[error("Payment failed")]
    PaymentFailed,

    #[error("Reservation expired before the purchase completed")]
    ReservationExpired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::SoldOut => StatusCode::CONFLICT,
            AppError::AlreadyWaiting => StatusCode::CONFLICT,
            AppError::NotWaiting => StatusCode::NOT_FOUND,
            AppError::AlreadyUsed { .. } => StatusCode::CONFLICT,
            AppError::TicketCancelled => StatusCode::GONE,
            AppError::PromoInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PromoExhausted => StatusCode::CONFLICT,
            AppError::PaymentFailed => StatusCode::PAYMENT_REQUIRED,
            AppError::ReservationExpired => StatusCode::GONE,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::SoldOut => "SOLD_OUT",
            AppError::AlreadyWaiting => "ALREADY_WAITING",
            AppError::NotWaiting => "NOT_WAITING",
            AppError::AlreadyUsed { .. } => "ALREADY_USED",
            AppError::TicketCancelled => "TICKET_CANCELLED",
            AppError::PromoInvalid(_) => "PROMO_INVALID",
            AppError::PromoExhausted => "PROMO_EXHAUSTED",
            AppError::PaymentFailed => "PAYMENT_FAILED",
            AppError::ReservationExpired => "RESERVATION_EXPIRED",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            // Expected outcomes are not worth more than a debug line.
            AppError::SoldOut
            | AppError::AlreadyWaiting
            | AppError::NotWaiting
            | AppError::AlreadyUsed { .. }
            | AppError::TicketCancelled
            | AppError::PromoInvalid(_)
            | AppError::PromoExhausted
            | AppError::PaymentFailed
            | AppError::ReservationExpired => {
                tracing::debug!(code = self.code(), "Domain outcome");
            }
            AppError::ValidationError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::ExternalServiceError(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        // Domain outcomes are safe to echo back verbatim; infrastructure
        // details are not.
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        // Give the operator the prior scan time on a duplicate check-in.
        let details = match &self {
            AppError::AlreadyUsed { scanned_at } => {
                Some(serde_json::json!({ "scanned_at": scanned_at }))
            }
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}
