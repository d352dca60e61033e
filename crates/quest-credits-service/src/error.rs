//! API error types and responses.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use quest_credits_core::{CreditError, RegenerationError};
use quest_credits_store::StoreError;

use crate::coordinator::GenerationError;
use crate::purchases::PurchaseError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The account cannot pay for the generation.
    #[error("insufficient credits for {purpose}: balance={balance}")]
    InsufficientCredits {
        /// What the credit would have paid for.
        purpose: String,
        /// Current balance.
        balance: i64,
    },

    /// The adventure's regeneration counter is exhausted.
    #[error("{used}/{limit} {counter} regenerations used")]
    RegenerationLimitExceeded {
        /// Counter name.
        counter: String,
        /// Regenerations used.
        used: u32,
        /// The cap.
        limit: u32,
    },

    /// The adventure's phase has no regenerations.
    #[error("regenerations are closed in phase {0}")]
    PhaseClosed(String),

    /// The generation call failed.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientCredits { balance, .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_credits",
                self.to_string(),
                Some(serde_json::json!({ "balance": balance })),
            ),
            Self::RegenerationLimitExceeded {
                counter,
                used,
                limit,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "regeneration_limit_exceeded",
                self.to_string(),
                Some(serde_json::json!({
                    "counter": counter,
                    "used": used,
                    "limit": limit
                })),
            ),
            Self::PhaseClosed(_) => (
                StatusCode::CONFLICT,
                "phase_closed",
                self.to_string(),
                None,
            ),
            Self::GenerationFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                "generation_failed",
                msg.clone(),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<CreditError> for ApiError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::InsufficientCredits { purpose, balance } => Self::InsufficientCredits {
                purpose: purpose.to_string(),
                balance,
            },
            CreditError::AccountNotFound { account_id } => {
                Self::NotFound(format!("account not found: {account_id}"))
            }
            CreditError::AccountExists { account_id } => {
                Self::Conflict(format!("account already exists: {account_id}"))
            }
            CreditError::InvalidAmount(_) => Self::BadRequest(err.to_string()),
            CreditError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<RegenerationError> for ApiError {
    fn from(err: RegenerationError) -> Self {
        match err {
            RegenerationError::LimitExceeded {
                counter,
                used,
                limit,
            } => Self::RegenerationLimitExceeded {
                counter: counter.to_string(),
                used,
                limit,
            },
            RegenerationError::PhaseClosed { phase } => Self::PhaseClosed(phase.to_string()),
            RegenerationError::AdventureNotFound { adventure_id } => {
                Self::NotFound(format!("adventure not found: {adventure_id}"))
            }
            RegenerationError::Storage(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::AlreadyExists { .. } | StoreError::DuplicatePurchase { .. } => {
                Self::Conflict(err.to_string())
            }
            StoreError::Database(msg)
            | StoreError::Serialization(msg)
            | StoreError::ConstraintViolation(msg) => Self::Internal(msg),
        }
    }
}

impl From<PurchaseError> for ApiError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::InvalidCredits(_) => Self::BadRequest(err.to_string()),
            PurchaseError::NotFound(e) | PurchaseError::Store(e) => e.into(),
        }
    }
}

impl<E: fmt::Display> From<GenerationError<E>> for ApiError {
    fn from(err: GenerationError<E>) -> Self {
        match err {
            GenerationError::Credit(e) => e.into(),
            GenerationError::Regeneration(e) => e.into(),
            GenerationError::GenerationFailed { .. } => Self::GenerationFailed(err.to_string()),
            GenerationError::RefundFailed { .. } | GenerationError::Aborted(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use quest_credits_core::{AccountId, AdventurePhase, CreditPurpose, RegenerationCounter};

    use super::*;
    use crate::coordinator::GenerationFailure;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn business_rules_map_to_client_statuses() {
        assert_eq!(
            status_of(CreditError::InsufficientCredits {
                purpose: CreditPurpose::AdventureGeneration,
                balance: 0,
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(RegenerationError::LimitExceeded {
                counter: RegenerationCounter::Scaffold,
                used: 10,
                limit: 10,
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(RegenerationError::PhaseClosed {
                phase: AdventurePhase::Finalized,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn storage_failures_are_internal() {
        assert_eq!(
            status_of(CreditError::Storage("pool timed out".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::Database("connection reset".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_account_is_conflict() {
        assert_eq!(
            status_of(StoreError::AlreadyExists {
                entity: "account",
                id: "a".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CreditError::AccountExists {
                account_id: AccountId::generate(),
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn generation_outcomes_map_to_gateway_and_internal() {
        let failed: GenerationError<String> = GenerationError::GenerationFailed {
            failure: GenerationFailure::Error("model timed out".into()),
            refunded_balance: Some(3),
        };
        let response = ApiError::from(failed).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let refund_failed: GenerationError<String> = GenerationError::RefundFailed {
            failure: GenerationFailure::Error("model timed out".into()),
            refund: CreditError::Storage("connection reset".into()),
        };
        assert_eq!(status_of(refund_failed), StatusCode::INTERNAL_SERVER_ERROR);

        let aborted: GenerationError<String> = GenerationError::Aborted("task panicked".into());
        assert_eq!(status_of(aborted), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn generation_rejections_keep_their_status() {
        let credit: GenerationError<String> = CreditError::InsufficientCredits {
            purpose: CreditPurpose::AdventureGeneration,
            balance: 0,
        }
        .into();
        assert_eq!(status_of(credit), StatusCode::PAYMENT_REQUIRED);

        let regeneration: GenerationError<String> = RegenerationError::LimitExceeded {
            counter: RegenerationCounter::Movement,
            used: 20,
            limit: 20,
        }
        .into();
        assert_eq!(status_of(regeneration), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn generation_failure_body_uses_gateway_code() {
        let failed: GenerationError<String> = GenerationError::GenerationFailed {
            failure: GenerationFailure::Aborted("worker dropped".into()),
            refunded_balance: None,
        };
        let response = ApiError::from(failed).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "generation_failed");
    }
}
