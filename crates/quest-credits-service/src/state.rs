//! Application state.

use std::sync::Arc;

use quest_credits_store::Store;

use crate::config::ServiceConfig;
use crate::coordinator::GenerationCoordinator;
use crate::ledger::CreditLedger;
use crate::limiter::RegenerationLimiter;
use crate::purchases::PurchaseFulfilment;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Paid generations and regenerations.
    pub coordinator: GenerationCoordinator,

    /// Payment-completion path.
    pub purchases: PurchaseFulfilment,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let ledger = CreditLedger::new(store.clone());
        let limiter = RegenerationLimiter::new(store.clone(), config.regeneration_limits);
        let coordinator = GenerationCoordinator::new(ledger, limiter);
        let purchases = PurchaseFulfilment::new(store.clone());

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - payment webhooks will be rejected");
        }

        Self {
            store,
            config,
            coordinator,
            purchases,
        }
    }

    /// The credit ledger.
    #[must_use]
    pub const fn ledger(&self) -> &CreditLedger {
        self.coordinator.ledger()
    }

    /// The regeneration limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RegenerationLimiter {
        self.coordinator.limiter()
    }
}
