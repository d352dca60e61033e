//! Purchase handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use quest_credits_core::{AccountId, PurchaseRecord};

use super::parse_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Start purchase request, sent when a checkout session is created.
#[derive(Debug, Deserialize)]
pub struct BeginPurchaseRequest {
    /// Payment provider reference (the checkout session ID).
    pub payment_reference: String,
    /// The account receiving the credits.
    pub account_id: String,
    /// Amount charged, in cents.
    pub amount_cents: i64,
    /// Credits granted once the payment succeeds.
    pub credits: i64,
}

/// Purchase response.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    /// Payment provider reference.
    pub payment_reference: String,
    /// The account receiving the credits.
    pub account_id: String,
    /// Amount charged, in cents.
    pub amount_cents: i64,
    /// Credits granted on success.
    pub credits: i64,
    /// Settlement status.
    pub status: String,
}

impl From<&PurchaseRecord> for PurchaseResponse {
    fn from(record: &PurchaseRecord) -> Self {
        Self {
            payment_reference: record.payment_reference.clone(),
            account_id: record.account_id.to_string(),
            amount_cents: record.amount_cents,
            credits: record.credits,
            status: record.status.to_string(),
        }
    }
}

/// Record a pending purchase.
pub async fn begin_purchase(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<BeginPurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let account_id: AccountId = parse_id("account_id", &body.account_id)?;

    if body.payment_reference.trim().is_empty() {
        return Err(ApiError::BadRequest("payment_reference is required".into()));
    }

    if state.store.get_account(&account_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("account not found: {account_id}")));
    }

    let record = state
        .purchases
        .begin(
            &body.payment_reference,
            account_id,
            body.amount_cents,
            body.credits,
        )
        .await?;

    Ok(Json(PurchaseResponse::from(&record)))
}
