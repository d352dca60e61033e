//! Account balance handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use quest_credits_core::{AccountBalance, AccountId};

use super::parse_id;
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Account ID.
    pub account_id: String,
    /// Credits available.
    pub credits: i64,
    /// Lifetime credits purchased.
    pub total_purchased: i64,
    /// Whether the balance covers one more generation.
    pub can_generate: bool,
}

impl From<&AccountBalance> for BalanceResponse {
    fn from(balance: &AccountBalance) -> Self {
        Self {
            account_id: balance.account_id.to_string(),
            credits: balance.credits,
            total_purchased: balance.total_purchased,
            can_generate: balance.can_afford_generation(),
        }
    }
}

/// Create account request.
#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    /// The account to open a balance for.
    pub account_id: String,
}

/// Open a zero balance for an account.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id: AccountId = parse_id("account_id", &body.account_id)?;
    let balance = state.ledger().open_account(&account_id).await?;

    tracing::info!(
        account_id = %account_id,
        service = %auth.service_name,
        "Account created"
    );

    Ok(Json(BalanceResponse::from(&balance)))
}

/// Get an account's credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id: AccountId = parse_id("account_id", &account_id)?;
    let balance = state.ledger().balance(&account_id).await?;
    Ok(Json(BalanceResponse::from(&balance)))
}
