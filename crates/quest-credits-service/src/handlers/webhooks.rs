//! Stripe payment webhooks.
//!
//! Stripe delivers at least once, so every handler here is safe to repeat:
//! purchases are keyed on the checkout session ID and settle exactly once.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use quest_credits_core::AccountId;

use super::parse_id;
use crate::crypto::verify_stripe_signature;
use crate::error::ApiError;
use crate::purchases::{Fulfilment, PurchaseError};
use crate::state::AppState;

/// Stripe webhook payload (simplified).
#[derive(Debug, Deserialize)]
pub struct StripeWebhook {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event ID.
    pub id: String,
    /// Event data.
    pub data: StripeEventData,
}

/// Stripe event data container.
#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    /// Event object.
    pub object: serde_json::Value,
}

/// The checkout session fields the ledger reads.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    /// Session ID; used as the payment reference.
    pub id: String,
    /// Our account ID, set when the session was created.
    #[serde(default)]
    pub client_reference_id: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Total charged, in cents.
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Session metadata; `credits` holds the pack size.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl CheckoutSession {
    fn account_id(&self) -> Result<AccountId, ApiError> {
        let raw = self
            .client_reference_id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("Missing client_reference_id".into()))?;
        parse_id("client_reference_id", raw)
    }

    /// Stripe metadata values are strings, but accept numbers too.
    fn credits(&self) -> Result<i64, ApiError> {
        let value = self
            .metadata
            .get("credits")
            .ok_or_else(|| ApiError::BadRequest("Missing metadata.credits".into()))?;

        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid metadata.credits: {value}")))
    }

    fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        tracing::warn!("Stripe webhook received but no signing secret is configured");
        ApiError::Unauthorized
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    verify_stripe_signature(secret, &body, signature).map_err(|e| {
        tracing::warn!(error = %e, "Invalid Stripe webhook signature");
        ApiError::Unauthorized
    })?;

    let webhook: StripeWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.id,
        "Received Stripe webhook"
    );

    match webhook.event_type.as_str() {
        "checkout.session.completed" => {
            handle_checkout_completed(&state, &checkout_session(webhook.data.object)?).await?;
        }
        "checkout.session.async_payment_succeeded" => {
            handle_payment_succeeded(&state, &checkout_session(webhook.data.object)?).await?;
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            handle_payment_failed(&state, &checkout_session(webhook.data.object)?).await?;
        }
        _ => {
            tracing::debug!(event_type = %webhook.event_type, "Unhandled Stripe event");
        }
    }

    Ok(Json(WebhookResponse { received: true }))
}

fn checkout_session(object: serde_json::Value) -> Result<CheckoutSession, ApiError> {
    serde_json::from_value(object)
        .map_err(|e| ApiError::BadRequest(format!("Invalid checkout session: {e}")))
}

async fn handle_checkout_completed(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<(), ApiError> {
    record_pending(state, session).await?;

    if !session.is_paid() {
        tracing::info!(
            session_id = %session.id,
            payment_status = ?session.payment_status,
            "Checkout completed without payment, awaiting async settlement"
        );
        return Ok(());
    }

    fulfil(state, &session.id).await
}

async fn handle_payment_succeeded(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<(), ApiError> {
    record_pending(state, session).await?;
    fulfil(state, &session.id).await
}

async fn handle_payment_failed(
    state: &AppState,
    session: &CheckoutSession,
) -> Result<(), ApiError> {
    match state.purchases.fail(&session.id).await {
        Ok(Fulfilment::Duplicate { record }) => {
            tracing::info!(
                session_id = %session.id,
                status = %record.status,
                "Purchase already settled, ignoring failure event"
            );
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(PurchaseError::NotFound(_)) => {
            tracing::info!(session_id = %session.id, "Failure event for unknown purchase, ignoring");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn record_pending(state: &AppState, session: &CheckoutSession) -> Result<(), ApiError> {
    let account_id = session.account_id()?;
    let credits = session.credits()?;
    let amount_cents = session.amount_total.unwrap_or(0);

    state
        .purchases
        .begin(&session.id, account_id, amount_cents, credits)
        .await?;
    Ok(())
}

async fn fulfil(state: &AppState, session_id: &str) -> Result<(), ApiError> {
    match state.purchases.complete(session_id).await? {
        Fulfilment::Granted { record, balance } => {
            tracing::info!(
                session_id = %session_id,
                account_id = %record.account_id,
                credits = record.credits,
                balance,
                "Credits granted from checkout"
            );
        }
        Fulfilment::Duplicate { .. } | Fulfilment::Failed { .. } => {}
    }
    Ok(())
}
