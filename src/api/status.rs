//! `POST /api/check-payment-status` - on-demand reconciliation of a user's recent orders.

use super::AppState;
use crate::{
    core::{ledger, reconcile},
    errors::{Error, Result},
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPaymentStatusRequest {
    /// User to reconcile
    pub user_id: Option<String>,
    /// Email the client believes the user paid with; the account's email is used
    pub email: Option<String>,
    /// Look-back window in hours, default 24
    pub hours_back: Option<i64>,
}

/// Response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPaymentStatusResponse {
    /// A paid order for the user exists in the window
    pub payment_found: bool,
    /// Credits added by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_added: Option<i64>,
    /// Every paid order found had already been credited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_processed: Option<bool>,
    /// Balance after the call
    pub new_balance: i64,
}

/// Credits any paid, unclaimed orders the provider lists for the user.
pub async fn check_payment_status(
    State(state): State<AppState>,
    Json(req): Json<CheckPaymentStatusRequest>,
) -> Result<Json<CheckPaymentStatusResponse>> {
    let user_id = req
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::validation("userId is required"))?;
    let since = reconcile::lookback_start(req.hours_back.unwrap_or(24))?;

    let account = ledger::require_user_account(&*state.db, &user_id).await?;
    let reported = req.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    if reported.is_some_and(|e| !e.eq_ignore_ascii_case(&account.email)) {
        warn!(user_id, "Reported email differs from account; using account email");
    }

    let summary = reconcile::reconcile_user_orders(
        &*state.db,
        &state.catalog,
        state.provider.as_ref(),
        &user_id,
        Some(since),
    )
    .await?;

    let payment_found = summary.payment_found();
    Ok(Json(CheckPaymentStatusResponse {
        payment_found,
        credits_added: payment_found.then(|| summary.credits_added()),
        already_processed: payment_found.then_some(summary.applied.is_empty()),
        new_balance: summary.balance,
    }))
}
