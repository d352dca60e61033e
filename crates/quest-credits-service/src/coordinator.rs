//! Generation workflow coordinator.
//!
//! Wraps the opaque generation call in one of two small state machines:
//!
//! ```text
//! paid:          Idle -> Reserved -> Completed
//!                                 -> Refunded
//! regeneration:  Idle -> Checked  -> Completed
//!                                 -> Rejected
//! ```
//!
//! A paid attempt charges before the call and compensates with a refund on
//! failure. A regeneration checks before the call and only increments its
//! counter after a successful call, so a failed regeneration costs nothing and
//! has nothing to compensate.
//!
//! The reservation is a move-only token: `complete` and `refund` both consume
//! it, so a refund is reachable at most once per consumed credit.
//!
//! Both flows run on a spawned task. If the caller's future is dropped (for
//! example on client disconnect) the attempt still runs to `Completed` or
//! `Refunded` and the credit is never stranded.

use std::fmt;
use std::future::Future;

use quest_credits_core::{
    AccountId, AdventureId, AttemptId, CreditError, CreditPurpose, RegenerationCounter,
    RegenerationError,
};

use crate::ledger::CreditLedger;
use crate::limiter::{RegenerationLimiter, RegenerationPermit};

/// States of a paid generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaidState {
    /// Nothing charged yet.
    Idle,
    /// One credit consumed; generation in flight.
    Reserved,
    /// Generation succeeded; the charge is final.
    Completed,
    /// Generation failed; the credit was returned.
    Refunded,
}

/// States of a free-but-limited regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationStep {
    /// Nothing checked yet.
    Idle,
    /// Limit check passed; generation in flight.
    Checked,
    /// Generation succeeded; the counter was incremented.
    Completed,
    /// Generation failed; nothing was counted.
    Rejected,
}

/// Why the generation call itself failed.
#[derive(Debug, thiserror::Error)]
pub enum GenerationFailure<E> {
    /// The generation call returned an error.
    #[error("{0}")]
    Error(E),

    /// The generation call panicked or was cancelled.
    #[error("generation task aborted: {0}")]
    Aborted(String),
}

/// Errors from a coordinated generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError<E> {
    /// Credit ledger rejection or failure.
    #[error(transparent)]
    Credit(#[from] CreditError),

    /// Regeneration limit rejection or failure.
    #[error(transparent)]
    Regeneration(#[from] RegenerationError),

    /// The generation call failed. For paid attempts the credit was refunded
    /// and `refunded_balance` holds the balance afterwards.
    #[error("generation failed: {failure}")]
    GenerationFailed {
        /// The underlying failure.
        failure: GenerationFailure<E>,
        /// Balance after the refund, for paid attempts.
        refunded_balance: Option<i64>,
    },

    /// The generation call failed and the compensating refund failed too.
    /// The credit is stuck consumed; this is logged as an error.
    #[error("generation failed ({failure}) and the refund failed: {refund}")]
    RefundFailed {
        /// The underlying generation failure.
        failure: GenerationFailure<E>,
        /// The refund error.
        refund: CreditError,
    },

    /// The coordinating task itself panicked.
    #[error("coordinator task aborted: {0}")]
    Aborted(String),
}

impl<E> GenerationError<E> {
    /// Whether this is an expected, user-facing rejection rather than an incident.
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        match self {
            Self::Credit(e) => e.is_business_rule(),
            Self::Regeneration(e) => e.is_business_rule(),
            Self::GenerationFailed { .. } | Self::RefundFailed { .. } | Self::Aborted(_) => false,
        }
    }
}

/// A paid generation request.
#[derive(Debug, Clone)]
pub struct PaidRequest {
    /// The account to charge.
    pub account_id: AccountId,
    /// What the credit pays for.
    pub purpose: CreditPurpose,
    /// Free-form context carried into the ledger log lines.
    pub metadata: serde_json::Value,
}

/// A completed paid generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaidGeneration<T> {
    /// The generated content.
    pub output: T,
    /// Correlation ID of the attempt.
    pub attempt_id: AttemptId,
    /// Balance after the charge.
    pub balance: i64,
}

/// A completed regeneration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regeneration<T> {
    /// The regenerated content.
    pub output: T,
    /// The counter that was charged.
    pub counter: RegenerationCounter,
    /// The counter's value after the increment.
    pub used: u32,
    /// The cap in force.
    pub limit: u32,
}

/// One consumed credit awaiting the outcome of its generation.
///
/// Resolve it with [`complete`](Self::complete) or [`refund`](Self::refund).
/// Both consume the reservation. Dropping it unresolved logs an error, since
/// the credit then stays consumed with no generation to show for it.
#[must_use = "a reservation must be completed or refunded"]
pub struct CreditReservation {
    ledger: CreditLedger,
    account_id: AccountId,
    purpose: CreditPurpose,
    attempt_id: AttemptId,
    metadata: serde_json::Value,
    balance: i64,
    resolved: bool,
}

impl CreditReservation {
    /// Charge one credit and move to `Reserved`.
    ///
    /// # Errors
    ///
    /// Returns the ledger error unchanged; nothing is reserved.
    pub async fn reserve(ledger: &CreditLedger, request: PaidRequest) -> Result<Self, CreditError> {
        let attempt_id = AttemptId::generate();
        let balance = ledger
            .consume(
                &request.account_id,
                &request.purpose,
                attempt_id,
                &request.metadata,
            )
            .await?;

        log_paid(attempt_id, PaidState::Idle, PaidState::Reserved);

        Ok(Self {
            ledger: ledger.clone(),
            account_id: request.account_id,
            purpose: request.purpose,
            attempt_id,
            metadata: request.metadata,
            balance,
            resolved: false,
        })
    }

    /// Correlation ID of this attempt.
    #[must_use]
    pub const fn attempt_id(&self) -> AttemptId {
        self.attempt_id
    }

    /// Balance right after the charge.
    #[must_use]
    pub const fn balance(&self) -> i64 {
        self.balance
    }

    /// Keep the charge. Moves to `Completed`.
    pub fn complete(mut self) -> PaidState {
        self.resolved = true;
        log_paid(self.attempt_id, PaidState::Reserved, PaidState::Completed);
        PaidState::Completed
    }

    /// Return the credit. Moves to `Refunded`.
    ///
    /// # Errors
    ///
    /// Returns the ledger error if the refund could not be applied. The
    /// reservation is spent either way; retrying is not possible from here.
    pub async fn refund(mut self, reason: &str) -> Result<i64, CreditError> {
        self.resolved = true;
        let result = self
            .ledger
            .refund(
                &self.account_id,
                &self.purpose,
                reason,
                self.attempt_id,
                &self.metadata,
            )
            .await;

        match &result {
            Ok(_) => log_paid(self.attempt_id, PaidState::Reserved, PaidState::Refunded),
            Err(e) => tracing::error!(
                account_id = %self.account_id,
                attempt_id = %self.attempt_id,
                error = %e,
                "Refund failed; credit is stuck consumed"
            ),
        }

        result
    }
}

impl fmt::Debug for CreditReservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditReservation")
            .field("account_id", &self.account_id)
            .field("attempt_id", &self.attempt_id)
            .field("purpose", &self.purpose)
            .field("resolved", &self.resolved)
            .finish_non_exhaustive()
    }
}

impl Drop for CreditReservation {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::error!(
                account_id = %self.account_id,
                attempt_id = %self.attempt_id,
                purpose = %self.purpose,
                "Credit reservation dropped unresolved; credit is stuck consumed"
            );
        }
    }
}

/// Runs paid generations and regenerations.
#[derive(Clone)]
pub struct GenerationCoordinator {
    ledger: CreditLedger,
    limiter: RegenerationLimiter,
}

impl GenerationCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub const fn new(ledger: CreditLedger, limiter: RegenerationLimiter) -> Self {
        Self { ledger, limiter }
    }

    /// The credit ledger.
    #[must_use]
    pub const fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// The regeneration limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RegenerationLimiter {
        &self.limiter
    }

    /// Charge one credit, run `generate`, and refund the credit if it fails.
    ///
    /// # Errors
    ///
    /// - `GenerationError::Credit` if the charge is rejected; `generate` is not called.
    /// - `GenerationError::GenerationFailed` if `generate` fails; the credit was refunded.
    /// - `GenerationError::RefundFailed` if `generate` fails and the refund fails too.
    /// - `GenerationError::Aborted` if the coordinating task panics.
    pub async fn run_paid<T, E, F, Fut>(
        &self,
        request: PaidRequest,
        generate: F,
    ) -> Result<PaidGeneration<T>, GenerationError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let ledger = self.ledger.clone();
        let task = tokio::spawn(async move { paid_attempt(&ledger, request, generate).await });
        task.await
            .map_err(|e| GenerationError::Aborted(e.to_string()))?
    }

    /// Check the adventure's current regeneration limit, run `generate`, and
    /// count the regeneration only if it succeeds.
    ///
    /// # Errors
    ///
    /// - `GenerationError::Regeneration` if the check is rejected; `generate` is not called.
    /// - `GenerationError::GenerationFailed` if `generate` fails; nothing was counted.
    /// - `GenerationError::Aborted` if the coordinating task panics.
    pub async fn run_regeneration<T, E, F, Fut>(
        &self,
        adventure_id: AdventureId,
        generate: F,
    ) -> Result<Regeneration<T>, GenerationError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let limiter = self.limiter.clone();
        let task =
            tokio::spawn(async move { regeneration_attempt(&limiter, adventure_id, generate).await });
        task.await
            .map_err(|e| GenerationError::Aborted(e.to_string()))?
    }
}

async fn paid_attempt<T, E, F, Fut>(
    ledger: &CreditLedger,
    request: PaidRequest,
    generate: F,
) -> Result<PaidGeneration<T>, GenerationError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let reservation = CreditReservation::reserve(ledger, request).await?;
    let attempt_id = reservation.attempt_id();
    let balance = reservation.balance();

    match call_generation(generate).await {
        Ok(output) => {
            reservation.complete();
            Ok(PaidGeneration {
                output,
                attempt_id,
                balance,
            })
        }
        Err(failure) => {
            tracing::warn!(attempt_id = %attempt_id, error = %failure, "Paid generation failed");
            match reservation.refund(&failure.to_string()).await {
                Ok(refunded) => Err(GenerationError::GenerationFailed {
                    failure,
                    refunded_balance: Some(refunded),
                }),
                Err(refund) => Err(GenerationError::RefundFailed { failure, refund }),
            }
        }
    }
}

async fn regeneration_attempt<T, E, F, Fut>(
    limiter: &RegenerationLimiter,
    adventure_id: AdventureId,
    generate: F,
) -> Result<Regeneration<T>, GenerationError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let phase = limiter.current_phase(&adventure_id).await?;
    let permit: RegenerationPermit = limiter.check_limit(&adventure_id, phase).await?;
    log_regeneration(&adventure_id, RegenerationStep::Idle, RegenerationStep::Checked);

    match call_generation(generate).await {
        Ok(output) => {
            let counter = permit.counter;
            let limit = permit.limit;
            let used = permit.commit(limiter).await?;
            log_regeneration(&adventure_id, RegenerationStep::Checked, RegenerationStep::Completed);
            Ok(Regeneration {
                output,
                counter,
                used,
                limit,
            })
        }
        Err(failure) => {
            tracing::warn!(adventure_id = %adventure_id, error = %failure, "Regeneration failed");
            permit.reject();
            log_regeneration(&adventure_id, RegenerationStep::Checked, RegenerationStep::Rejected);
            Err(GenerationError::GenerationFailed {
                failure,
                refunded_balance: None,
            })
        }
    }
}

/// Run the generation call on its own task so a panic surfaces as a failure
/// instead of tearing down the attempt that owns the reservation.
async fn call_generation<T, E, F, Fut>(generate: F) -> Result<T, GenerationFailure<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    match tokio::spawn(generate()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(GenerationFailure::Error(e)),
        Err(join) => Err(GenerationFailure::Aborted(join.to_string())),
    }
}

fn log_paid(attempt_id: AttemptId, from: PaidState, to: PaidState) {
    tracing::debug!(attempt_id = %attempt_id, from = ?from, to = ?to, "Paid generation transition");
}

fn log_regeneration(adventure_id: &AdventureId, from: RegenerationStep, to: RegenerationStep) {
    tracing::debug!(adventure_id = %adventure_id, from = ?from, to = ?to, "Regeneration transition");
}
