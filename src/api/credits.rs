//! Account provisioning, balance lookup and credit consumption.

use super::AppState;
use crate::{
    core::{credits as credit_service, ledger},
    entities::purchase,
    errors::{Error, Result},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `POST /api/users` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// Identity provider user id
    pub user_id: String,
    /// Email the user pays with
    pub email: String,
}

/// An account and its balance.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    /// User id
    pub user_id: String,
    /// Email
    pub email: String,
    /// Balance
    pub credits: i64,
}

/// Creates an account with the configured free balance.
pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>)> {
    let account =
        ledger::create_user_account(&*state.db, &req.user_id, &req.email, state.free_credits)
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            user_id: account.id,
            email: account.email,
            credits: account.credits,
        }),
    ))
}

/// One ledger entry.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEntry {
    /// Transaction key
    pub id: String,
    /// Package
    pub package_id: String,
    /// Signed credit change
    pub credits: i64,
    /// Trigger that recorded it
    pub source: String,
    /// When
    pub created_at: DateTime<Utc>,
}

impl From<purchase::Model> for PurchaseEntry {
    fn from(model: purchase::Model) -> Self {
        Self {
            id: model.id,
            package_id: model.package_id,
            credits: model.credits,
            source: model.source,
            created_at: model.created_at,
        }
    }
}

/// `GET /api/credits/{user_id}` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    /// User id
    pub user_id: String,
    /// Balance
    pub credits: i64,
    /// Ledger entries, newest first
    pub purchases: Vec<PurchaseEntry>,
}

/// Returns a user's balance and ledger.
pub async fn get_credits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CreditsResponse>> {
    let account = ledger::require_user_account(&*state.db, &user_id).await?;
    let purchases = ledger::get_purchases_for_user(&*state.db, &user_id).await?;

    Ok(Json(CreditsResponse {
        user_id: account.id,
        credits: account.credits,
        purchases: purchases.into_iter().map(Into::into).collect(),
    }))
}

/// `POST /api/credits/{user_id}/consume` body.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// Credits to spend, default 1
    pub amount: Option<i64>,
}

/// `POST /api/credits/{user_id}/consume` response.
#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    /// Always true; failures are error responses
    pub success: bool,
    /// Balance after spending
    pub credits: i64,
}

/// Spends credits.
pub async fn consume(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>> {
    let amount = req.amount.unwrap_or(1);
    if amount <= 0 {
        return Err(Error::validation("amount must be positive"));
    }
    let credits = credit_service::consume_credits(&*state.db, &user_id, amount).await?;
    Ok(Json(ConsumeResponse {
        success: true,
        credits,
    }))
}
