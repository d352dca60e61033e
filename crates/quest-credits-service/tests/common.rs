//! Common test utilities for quest-credits integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use serde_json::json;

use quest_credits_core::{AccountId, AdventureId, AdventurePhase};
use quest_credits_service::crypto::sign_stripe_payload;
use quest_credits_service::{create_router, AppState, ServiceConfig};
use quest_credits_store::{MemoryStore, Store};

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The application state behind the server, for driving the coordinator.
    pub state: AppState,
    /// Direct store access for seeding and assertions.
    pub store: Arc<dyn Store>,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            stripe_webhook_secret: Some(STRIPE_WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            store,
        }
    }

    /// The `x-api-key` header name.
    pub fn api_key_header() -> HeaderName {
        HeaderName::from_static("x-api-key")
    }

    /// The configured service API key as a header value.
    pub fn api_key() -> HeaderValue {
        HeaderValue::from_static(SERVICE_API_KEY)
    }

    /// Open an account with `credits` purchased credits.
    pub async fn account_with_credits(&self, credits: i64) -> AccountId {
        let account_id = AccountId::generate();
        self.store.create_account(&account_id).await.unwrap();
        if credits > 0 {
            self.store.add_credits(&account_id, credits).await.unwrap();
        }
        account_id
    }

    /// Register an adventure in `phase` owned by a fresh account.
    pub async fn adventure_in(&self, phase: AdventurePhase) -> AdventureId {
        let owner = self.account_with_credits(0).await;
        let adventure_id = AdventureId::generate();
        self.store
            .create_adventure(&adventure_id, &owner, phase)
            .await
            .unwrap();
        adventure_id
    }

    /// Current credit balance of an account.
    pub async fn credits(&self, account_id: &AccountId) -> i64 {
        self.store
            .get_account(account_id)
            .await
            .unwrap()
            .unwrap()
            .credits
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a checkout session event body.
pub fn checkout_event(
    event_type: &str,
    session_id: &str,
    account_id: &AccountId,
    credits: i64,
    payment_status: &str,
) -> String {
    json!({
        "id": format!("evt_{session_id}"),
        "type": event_type,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "client_reference_id": account_id.to_string(),
                "payment_status": payment_status,
                "amount_total": credits * 100,
                "metadata": { "credits": credits.to_string() }
            }
        }
    })
    .to_string()
}

/// `Stripe-Signature` header for a payload, signed with the test secret.
pub fn stripe_signature(payload: &str) -> HeaderValue {
    let header = sign_stripe_payload(STRIPE_WEBHOOK_SECRET, 1_700_000_000, payload).unwrap();
    HeaderValue::from_str(&header).unwrap()
}

pub fn stripe_signature_header() -> HeaderName {
    HeaderName::from_static("stripe-signature")
}
