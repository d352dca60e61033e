//! Quest Credits service.
//!
//! Charges one credit per paid adventure generation, refunds it when the
//! generation fails, and caps free regenerations per adventure phase.
//!
//! - [`CreditLedger`] - atomic consume/refund/grant on account balances
//! - [`RegenerationLimiter`] - per-adventure regeneration caps
//! - [`GenerationCoordinator`] - wraps a generation call in the charge/refund
//!   or check/increment workflow
//! - [`PurchaseFulfilment`] - idempotent payment-completion path
//!
//! The HTTP surface is thin: balances, regeneration usage, adventure
//! lifecycle registration and Stripe payment webhooks.
//!
//! # Authentication
//!
//! `/v1` routes require the shared service API key in `x-api-key`.
//! `/webhooks/stripe` requires a valid `Stripe-Signature`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)]

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod limiter;
pub mod purchases;
pub mod routes;
pub mod state;

pub use config::{ServiceConfig, StoreBackend};
pub use coordinator::{
    CreditReservation, GenerationCoordinator, GenerationError, GenerationFailure,
    PaidGeneration, PaidRequest, PaidState, Regeneration, RegenerationStep,
};
pub use error::ApiError;
pub use ledger::CreditLedger;
pub use limiter::{RegenerationLimiter, RegenerationPermit};
pub use purchases::{Fulfilment, PurchaseError, PurchaseFulfilment};
pub use routes::create_router;
pub use state::AppState;
