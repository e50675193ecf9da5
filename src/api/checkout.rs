//! `POST /api/checkout` - opens a provider checkout and starts a poller for it.

use super::AppState;
use crate::{
    core::{checkout, poller::CheckoutPoller},
    errors::{Error, Result},
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequestBody {
    /// Purchasing user
    pub user_id: Option<String>,
    /// Package to buy
    pub package_id: Option<String>,
}

/// Response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    /// Session id to pass back on the return page
    pub session_id: String,
    /// Provider checkout URL
    pub checkout_url: String,
}

/// Opens a checkout for a registered user.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequestBody>,
) -> Result<Json<CheckoutResponse>> {
    let user_id = req
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::validation("userId is required"))?;
    let package_id = req
        .package_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Error::validation("packageId is required"))?;

    let opened = checkout::open_checkout(
        &*state.db,
        &state.catalog,
        state.provider.as_ref(),
        &user_id,
        &package_id,
    )
    .await?;

    // Detached; the poller stops on its own
    CheckoutPoller::new(
        Arc::clone(&state.db),
        Arc::clone(&state.catalog),
        Arc::clone(&state.provider),
        state.poller,
    )
    .spawn(user_id, opened.intent.created_at);

    Ok(Json(CheckoutResponse {
        session_id: opened.session_id,
        checkout_url: opened.checkout_url,
    }))
}
