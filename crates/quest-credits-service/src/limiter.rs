//! Regeneration limit checker.
//!
//! `check_limit` and `increment_counter` are separate calls, each atomic on its
//! own. The generation call runs between them and can take tens of seconds,
//! so no lock is held across it.
//!
//! # Bounded overshoot
//!
//! Two requests for the same adventure that both pass `check_limit` at
//! `used = limit - 1` will both increment, leaving the counter at `limit + 1`.
//! In general a counter can exceed its cap by at most the number of concurrent
//! requests racing the same check, minus one. This is accepted: increments are
//! never lost and counters never go down, and `get_counts` reports zero
//! remaining for an overshot counter.

use std::sync::Arc;

use quest_credits_core::{
    AdventureId, AdventurePhase, RegenerationCounter, RegenerationCounts, RegenerationError,
    RegenerationLimits, RegenerationState,
};
use quest_credits_store::{Store, StoreError};

/// Proof that a regeneration passed its limit check.
///
/// Produced only by [`RegenerationLimiter::check_limit`]. Holding one does not
/// reserve anything; it records what was checked so the increment after a
/// successful generation hits the same counter. Resolve it with
/// [`commit`](Self::commit) or [`reject`](Self::reject).
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a permit should be committed or rejected"]
pub struct RegenerationPermit {
    /// The adventure being regenerated.
    pub adventure_id: AdventureId,
    /// The counter the regeneration draws from.
    pub counter: RegenerationCounter,
    /// Usage observed by the check.
    pub used: u32,
    /// The cap in force.
    pub limit: u32,
}

impl RegenerationPermit {
    /// Count the regeneration after it succeeded. Returns the counter's new value.
    ///
    /// # Errors
    ///
    /// - `RegenerationError::AdventureNotFound` if the adventure was removed.
    /// - `RegenerationError::Storage` if the store fails.
    pub async fn commit(self, limiter: &RegenerationLimiter) -> Result<u32, RegenerationError> {
        limiter
            .increment_counter(&self.adventure_id, self.counter)
            .await
    }

    /// Drop the permit after a failed regeneration. Nothing is counted.
    pub fn reject(self) {
        tracing::debug!(
            adventure_id = %self.adventure_id,
            counter = %self.counter,
            used = self.used,
            "Regeneration permit rejected"
        );
    }
}

/// Per-adventure regeneration counters with fixed caps.
#[derive(Clone)]
pub struct RegenerationLimiter {
    store: Arc<dyn Store>,
    limits: RegenerationLimits,
}

impl RegenerationLimiter {
    /// Create a limiter over a store with the given caps.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, limits: RegenerationLimits) -> Self {
        Self { store, limits }
    }

    /// The caps in force.
    #[must_use]
    pub const fn limits(&self) -> RegenerationLimits {
        self.limits
    }

    /// Look up an adventure's current lifecycle phase.
    ///
    /// # Errors
    ///
    /// - `RegenerationError::AdventureNotFound` if the adventure doesn't exist.
    /// - `RegenerationError::Storage` if the store fails.
    pub async fn current_phase(
        &self,
        adventure_id: &AdventureId,
    ) -> Result<AdventurePhase, RegenerationError> {
        Ok(self.load(adventure_id).await?.phase)
    }

    /// Check whether one more regeneration is allowed in `phase`. Read-only.
    ///
    /// # Errors
    ///
    /// - `RegenerationError::LimitExceeded` if `used >= limit` for the phase's counter.
    /// - `RegenerationError::PhaseClosed` if the phase has no counter.
    /// - `RegenerationError::AdventureNotFound` if the adventure doesn't exist.
    /// - `RegenerationError::Storage` if the store fails.
    pub async fn check_limit(
        &self,
        adventure_id: &AdventureId,
        phase: AdventurePhase,
    ) -> Result<RegenerationPermit, RegenerationError> {
        let counter = phase
            .counter()
            .ok_or(RegenerationError::PhaseClosed { phase })?;
        let state = self.load(adventure_id).await?;

        let used = state.used(counter);
        let limit = self.limits.limit_for(counter);

        if used >= limit {
            tracing::debug!(
                adventure_id = %adventure_id,
                counter = %counter,
                used,
                limit,
                "Regeneration limit reached"
            );
            return Err(RegenerationError::LimitExceeded {
                counter,
                used,
                limit,
            });
        }

        Ok(RegenerationPermit {
            adventure_id: *adventure_id,
            counter,
            used,
            limit,
        })
    }

    /// Atomically add one to a counter and return its new value.
    ///
    /// # Errors
    ///
    /// - `RegenerationError::AdventureNotFound` if the adventure doesn't exist.
    /// - `RegenerationError::Storage` if the store fails.
    pub async fn increment_counter(
        &self,
        adventure_id: &AdventureId,
        counter: RegenerationCounter,
    ) -> Result<u32, RegenerationError> {
        let used = self
            .store
            .increment_regenerations(adventure_id, counter)
            .await
            .map_err(|e| storage_error(e, adventure_id))?;

        let limit = self.limits.limit_for(counter);
        if used > limit {
            tracing::warn!(
                adventure_id = %adventure_id,
                counter = %counter,
                used,
                limit,
                "Regeneration counter overshot its cap under concurrency"
            );
        } else {
            tracing::info!(
                adventure_id = %adventure_id,
                counter = %counter,
                used,
                limit,
                "Regeneration counted"
            );
        }

        Ok(used)
    }

    /// Usage and remaining allowance for both counters. Display only.
    ///
    /// # Errors
    ///
    /// - `RegenerationError::AdventureNotFound` if the adventure doesn't exist.
    /// - `RegenerationError::Storage` if the store fails.
    pub async fn get_counts(
        &self,
        adventure_id: &AdventureId,
    ) -> Result<RegenerationCounts, RegenerationError> {
        Ok(self.load(adventure_id).await?.counts(&self.limits))
    }

    async fn load(&self, adventure_id: &AdventureId) -> Result<RegenerationState, RegenerationError> {
        self.store
            .get_adventure(adventure_id)
            .await
            .map_err(|e| storage_error(e, adventure_id))?
            .ok_or(RegenerationError::AdventureNotFound {
                adventure_id: *adventure_id,
            })
    }
}

fn storage_error(err: StoreError, adventure_id: &AdventureId) -> RegenerationError {
    match err {
        StoreError::NotFound {
            entity: "adventure",
            ..
        } => RegenerationError::AdventureNotFound {
            adventure_id: *adventure_id,
        },
        other => {
            tracing::error!(adventure_id = %adventure_id, error = %other, "Regeneration store failure");
            RegenerationError::Storage(other.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use quest_credits_core::AccountId;
    use quest_credits_store::MemoryStore;

    use super::*;

    async fn limiter_with(phase: AdventurePhase) -> (RegenerationLimiter, Arc<MemoryStore>, AdventureId) {
        let store = Arc::new(MemoryStore::new());
        let owner = AccountId::generate();
        let adventure_id = AdventureId::generate();
        store.create_account(&owner).await.unwrap();
        store
            .create_adventure(&adventure_id, &owner, phase)
            .await
            .unwrap();
        let limiter = RegenerationLimiter::new(store.clone(), RegenerationLimits::default());
        (limiter, store, adventure_id)
    }

    async fn bump(store: &MemoryStore, adventure_id: &AdventureId, counter: RegenerationCounter, times: u32) {
        for _ in 0..times {
            store
                .increment_regenerations(adventure_id, counter)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn at_limit_is_rejected_with_usage() {
        let (limiter, store, adventure_id) = limiter_with(AdventurePhase::Scaffold).await;
        bump(&store, &adventure_id, RegenerationCounter::Scaffold, 10).await;

        let err = limiter
            .check_limit(&adventure_id, AdventurePhase::Scaffold)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegenerationError::LimitExceeded {
                counter: RegenerationCounter::Scaffold,
                used: 10,
                limit: 10,
            }
        );
    }

    #[tokio::test]
    async fn one_below_limit_allows_exactly_one_more() {
        let (limiter, store, adventure_id) = limiter_with(AdventurePhase::Scaffold).await;
        bump(&store, &adventure_id, RegenerationCounter::Scaffold, 9).await;

        let permit = limiter
            .check_limit(&adventure_id, AdventurePhase::Scaffold)
            .await
            .unwrap();
        assert_eq!(permit.used, 9);

        let used = permit.commit(&limiter).await.unwrap();
        assert_eq!(used, 10);

        assert!(limiter
            .check_limit(&adventure_id, AdventurePhase::Scaffold)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn check_is_a_pure_read() {
        let (limiter, store, adventure_id) = limiter_with(AdventurePhase::Movements).await;
        bump(&store, &adventure_id, RegenerationCounter::Movement, 4).await;

        for _ in 0..25 {
            limiter
                .check_limit(&adventure_id, AdventurePhase::Movements)
                .await
                .unwrap()
                .reject();
        }

        let counts = limiter.get_counts(&adventure_id).await.unwrap();
        assert_eq!(counts.movements_used, 4);
        assert_eq!(counts.movements_remaining, 16);
    }

    #[tokio::test]
    async fn finalized_phase_is_closed() {
        let (limiter, _store, adventure_id) = limiter_with(AdventurePhase::Finalized).await;

        let err = limiter
            .check_limit(&adventure_id, AdventurePhase::Finalized)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RegenerationError::PhaseClosed {
                phase: AdventurePhase::Finalized
            }
        );
    }

    #[tokio::test]
    async fn movement_counter_reaches_zero_remaining() {
        let (limiter, store, adventure_id) = limiter_with(AdventurePhase::Movements).await;
        bump(&store, &adventure_id, RegenerationCounter::Movement, 19).await;

        let used = limiter
            .increment_counter(&adventure_id, RegenerationCounter::Movement)
            .await
            .unwrap();
        assert_eq!(used, 20);

        let counts = limiter.get_counts(&adventure_id).await.unwrap();
        assert_eq!(counts.movements_remaining, 0);
        assert_eq!(counts.scaffold_remaining, 10);
    }

    #[tokio::test]
    async fn unknown_adventure_is_reported() {
        let limiter = RegenerationLimiter::new(
            Arc::new(MemoryStore::new()),
            RegenerationLimits::default(),
        );
        let adventure_id = AdventureId::generate();

        assert_eq!(
            limiter.get_counts(&adventure_id).await.unwrap_err(),
            RegenerationError::AdventureNotFound { adventure_id }
        );
    }
}
