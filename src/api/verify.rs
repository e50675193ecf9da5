//! `/api/verify-payment` - checkout-session verification and the unprocessed-order
//! listing.

use super::AppState;
use crate::{
    core::reconcile::{self, VerifyOutcome},
    errors::{Error, Result},
    provider::{OrderStatus, ProviderOrder},
};
use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `POST` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    /// Checkout session id from the return URL
    pub session_id: Option<String>,
    /// Caller's user id; must match the session's purchaser when given
    pub user_id: Option<String>,
    /// Package the caller believes was bought; informational
    pub package_id: Option<String>,
}

/// `POST` response.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    /// Whether the order is paid
    pub verified: bool,
    /// Credits were applied by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
    /// Credits had already been applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_processed: Option<bool>,
    /// Credits added by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits: Option<i64>,
    /// Balance after the call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
    /// Provider status of an unpaid order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
}

/// Verifies the payment behind a checkout session and credits it if unclaimed.
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>> {
    let session_id = req
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation("sessionId is required"))?;

    if let Some(package_id) = &req.package_id {
        tracing::debug!(session_id, package_id, "Client-reported package ignored; using checkout intent");
    }

    let outcome = reconcile::verify_checkout(
        &*state.db,
        &state.catalog,
        state.provider.as_ref(),
        session_id,
        req.user_id.as_deref(),
    )
    .await?;

    let response = match outcome {
        VerifyOutcome::Unpaid { status, .. } => VerifyPaymentResponse {
            verified: false,
            status: Some(status),
            ..VerifyPaymentResponse::default()
        },
        VerifyOutcome::Paid(outcome) => VerifyPaymentResponse {
            verified: true,
            processed: Some(!outcome.is_duplicate()),
            already_processed: Some(outcome.is_duplicate()),
            credits: Some(outcome.credits_delta()),
            new_balance: Some(outcome.balance()),
            status: None,
        },
    };
    Ok(Json(response))
}

/// `GET` query.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprocessedQuery {
    /// User whose orders to list
    pub user_id: Option<String>,
    /// Look-back window in hours, default 24
    pub hours_back: Option<i64>,
}

/// One unprocessed paid order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprocessedOrder {
    /// Provider order id
    pub order_id: String,
    /// Total in currency units
    pub total: f64,
    /// Currency code
    pub currency: String,
    /// Package from the order's custom data, if any
    pub package_id: Option<String>,
    /// When the order was placed
    pub created_at: DateTime<Utc>,
}

impl From<ProviderOrder> for UnprocessedOrder {
    fn from(order: ProviderOrder) -> Self {
        Self {
            total: order.total(),
            order_id: order.id,
            currency: order.currency,
            package_id: order.custom.package_id,
            created_at: order.created_at,
        }
    }
}

/// `GET` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnprocessedResponse {
    /// User the orders belong to
    pub user_id: String,
    /// Paid orders without a purchase record
    pub orders: Vec<UnprocessedOrder>,
}

/// Lists a user's paid orders that have not been credited. Read-only.
pub async fn list_unprocessed(
    State(state): State<AppState>,
    Query(query): Query<UnprocessedQuery>,
) -> Result<Json<UnprocessedResponse>> {
    let user_id = query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::validation("userId is required"))?;
    let orders = reconcile::unprocessed_paid_orders(
        &*state.db,
        state.provider.as_ref(),
        &user_id,
        query.hours_back.unwrap_or(24),
    )
    .await?;

    Ok(Json(UnprocessedResponse {
        user_id,
        orders: orders.into_iter().map(Into::into).collect(),
    }))
}
