//! Adventure regeneration handlers.
//!
//! The adventure backend registers each adventure and moves it through its
//! lifecycle here; the counters themselves only change through the
//! generation coordinator.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use quest_credits_core::{AccountId, AdventureId, AdventurePhase, RegenerationCounts};

use super::parse_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Regeneration usage response.
#[derive(Debug, Serialize)]
pub struct RegenerationsResponse {
    /// Adventure ID.
    pub adventure_id: String,
    /// Current lifecycle phase.
    pub phase: String,
    /// Usage and remaining allowance per counter.
    #[serde(flatten)]
    pub counts: RegenerationCounts,
    /// Cap on scaffold regenerations.
    pub scaffold_limit: u32,
    /// Cap on movement regenerations.
    pub movements_limit: u32,
}

/// Register adventure request.
#[derive(Debug, Deserialize)]
pub struct CreateAdventureRequest {
    /// The adventure.
    pub adventure_id: String,
    /// The owning account.
    pub owner_id: String,
    /// Starting phase (default: scaffold).
    #[serde(default)]
    pub phase: Option<String>,
}

/// Change phase request.
#[derive(Debug, Deserialize)]
pub struct SetPhaseRequest {
    /// The new phase.
    pub phase: String,
}

fn parse_phase(value: &str) -> Result<AdventurePhase, ApiError> {
    AdventurePhase::parse(value)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid phase: {value}")))
}

/// Register an adventure with zeroed regeneration counters.
pub async fn create_adventure(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CreateAdventureRequest>,
) -> Result<Json<RegenerationsResponse>, ApiError> {
    let adventure_id: AdventureId = parse_id("adventure_id", &body.adventure_id)?;
    let owner: AccountId = parse_id("owner_id", &body.owner_id)?;
    let phase = body
        .phase
        .as_deref()
        .map_or(Ok(AdventurePhase::Scaffold), parse_phase)?;

    state
        .store
        .create_adventure(&adventure_id, &owner, phase)
        .await?;

    tracing::info!(adventure_id = %adventure_id, owner = %owner, phase = %phase, "Adventure registered");

    regenerations_response(&state, &adventure_id).await.map(Json)
}

/// Move an adventure to another lifecycle phase.
pub async fn set_phase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(adventure_id): Path<String>,
    Json(body): Json<SetPhaseRequest>,
) -> Result<Json<RegenerationsResponse>, ApiError> {
    let adventure_id: AdventureId = parse_id("adventure_id", &adventure_id)?;
    let phase = parse_phase(&body.phase)?;

    state.store.set_phase(&adventure_id, phase).await?;

    tracing::info!(adventure_id = %adventure_id, phase = %phase, "Adventure phase changed");

    regenerations_response(&state, &adventure_id).await.map(Json)
}

/// Get regeneration usage for an adventure.
pub async fn get_regenerations(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(adventure_id): Path<String>,
) -> Result<Json<RegenerationsResponse>, ApiError> {
    let adventure_id: AdventureId = parse_id("adventure_id", &adventure_id)?;
    regenerations_response(&state, &adventure_id).await.map(Json)
}

async fn regenerations_response(
    state: &AppState,
    adventure_id: &AdventureId,
) -> Result<RegenerationsResponse, ApiError> {
    let limiter = state.limiter();
    let phase = limiter.current_phase(adventure_id).await?;
    let counts = limiter.get_counts(adventure_id).await?;
    let limits = limiter.limits();

    Ok(RegenerationsResponse {
        adventure_id: adventure_id.to_string(),
        phase: phase.to_string(),
        counts,
        scaffold_limit: limits.scaffold,
        movements_limit: limits.movements,
    })
}
