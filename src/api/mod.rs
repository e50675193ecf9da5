//! HTTP interface.
//!
//! Thin axum handlers over [`crate::core`]. Every route answers JSON; failures use the
//! shape produced by [`error`].

pub mod checkout;
pub mod credits;
pub mod error;
pub mod purchase;
pub mod status;
pub mod verify;
pub mod webhook;

use crate::{
    core::{catalog::CreditCatalog, poller::PollerConfig},
    provider::{PaymentProvider, signature::WebhookVerifier},
};
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Ledger database
    pub db: Arc<DatabaseConnection>,
    /// Server-trusted package catalog
    pub catalog: Arc<CreditCatalog>,
    /// Payment provider client
    pub provider: Arc<dyn PaymentProvider>,
    /// Webhook signature verifier
    pub verifier: Arc<WebhookVerifier>,
    /// Cadence of pollers started at checkout
    pub poller: PollerConfig,
    /// Credits granted to new accounts
    pub free_credits: i64,
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process-purchase", post(purchase::process_purchase))
        .route(
            "/api/verify-payment",
            post(verify::verify_payment).get(verify::list_unprocessed),
        )
        .route("/api/check-payment-status", post(status::check_payment_status))
        .route(
            "/api/webhooks/lemon-squeezy",
            post(webhook::receive).get(webhook::health),
        )
        .route("/api/checkout", post(checkout::create_checkout))
        .route("/api/users", post(credits::create_account))
        .route("/api/credits/{user_id}", get(credits::get_credits))
        .route("/api/credits/{user_id}/consume", post(credits::consume))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::{errors::Result, test_utils::*};
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_cloned_state_shares_one_ledger() -> Result<()> {
        let (state, _) = test_state().await?;
        let other = state.clone();
        assert!(Arc::ptr_eq(&state.db, &other.db));

        let (status, _) = send_json(
            router(state),
            "POST",
            "/api/users",
            json!({"userId": "u1", "email": "u1@example.com"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send_empty(router(other), "GET", "/api/credits/u1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["credits"], TEST_FREE_CREDITS);
        Ok(())
    }
}
