//! `POST /api/process-purchase` - the return page's direct, authenticated and retry
//! triggers.

use super::AppState;
use crate::{
    core::{
        attempt::{AttemptStatus, PurchaseAttempt},
        identity::{Identity, RegisteredUser},
        ledger,
        return_page::{ReturnPageProcessor, ReturnVisit},
    },
    errors::{Error, Result},
};
use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPurchaseRequest {
    /// Signed-in user, if the page knows one
    pub user_id: Option<String>,
    /// Client token of an anonymous visitor
    pub guest_token: Option<String>,
    /// User id cached by the client from an earlier session
    pub cached_user_id: Option<String>,
    /// Package the client believes was bought
    pub package_id: Option<String>,
    /// Amount the client believes was paid
    pub amount: Option<f64>,
    /// Credits the client believes it is owed; ignored for known packages
    pub credits: Option<i64>,
    /// Key from an earlier attempt
    pub transaction_id: Option<String>,
    /// Checkout session id from the return URL
    pub session_id: Option<String>,
    /// Provider order id from the return URL
    pub order_id: Option<String>,
    /// Client asks to re-apply; still subject to the idempotency guard
    #[serde(default)]
    pub force_update: bool,
    /// Manual retry after an error
    #[serde(default)]
    pub is_retry: bool,
    /// Error the client saw on the previous attempt
    pub previous_error: Option<String>,
}

/// Response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPurchaseResponse {
    /// Always true; failures are error responses
    pub success: bool,
    /// Balance after processing
    pub credits: i64,
    /// Credits added by this call
    pub credits_added: i64,
    /// The payment had already been credited
    pub duplicate: bool,
    /// Key the purchase is recorded under
    pub transaction_id: String,
    /// Final attempt state
    pub status: AttemptStatus,
    /// Who was credited
    pub user_id: String,
}

async fn registered(state: &AppState, user_id: &str) -> Result<Identity> {
    let account = ledger::require_user_account(&*state.db, user_id).await?;
    Ok(Identity::Registered(RegisteredUser {
        id: account.id,
        email: account.email,
    }))
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Applies credits for a returning buyer.
///
/// Requires a transaction id, an order id or a checkout session id. Known packages are
/// credited from the catalog; `credits` is only consulted for unknown ones.
pub async fn process_purchase(
    State(state): State<AppState>,
    Json(req): Json<ProcessPurchaseRequest>,
) -> Result<Json<ProcessPurchaseResponse>> {
    if present(req.transaction_id.as_ref()).is_none()
        && present(req.session_id.as_ref()).is_none()
        && present(req.order_id.as_ref()).is_none()
    {
        return Err(Error::validation(
            "transactionId, orderId or sessionId is required",
        ));
    }

    let active_session = match (present(req.user_id.as_ref()), present(req.guest_token.as_ref())) {
        (Some(user_id), _) => Some(registered(&state, user_id).await?),
        (None, Some(token)) => Some(Identity::Guest {
            local_token: token.to_string(),
        }),
        (None, None) => None,
    };
    let cached_session = match present(req.cached_user_id.as_ref()) {
        Some(user_id) => ledger::get_user_account(&*state.db, user_id)
            .await?
            .map(|account| {
                Identity::Registered(RegisteredUser {
                    id: account.id,
                    email: account.email,
                })
            }),
        None => None,
    };

    let authenticated = matches!(active_session, Some(Identity::Registered(_)));
    let visit = ReturnVisit {
        active_session,
        cached_session,
        checkout_session_id: req.session_id,
        order_id: req.order_id,
        transaction_id: req.transaction_id,
        package_id: req.package_id,
        paid_amount: req.amount,
        client_credits: req.credits,
    };

    if req.force_update {
        info!("Client requested forced update; idempotency still applies");
    }

    let processor = ReturnPageProcessor::new(&*state.db, &state.catalog);
    let result = if req.is_retry {
        let attempt = PurchaseAttempt::resumed_after_error(
            req.previous_error
                .unwrap_or_else(|| "retry requested".to_string()),
        );
        processor.retry(attempt, &visit).await?
    } else if authenticated {
        processor.process_authenticated(&visit).await?
    } else {
        processor.process_direct(&visit).await?
    };

    let outcome = result
        .attempt
        .outcome()
        .ok_or_else(|| Error::InvalidTransition {
            from: result.attempt.status().as_str().to_string(),
            to: "finished".to_string(),
        })?;

    Ok(Json(ProcessPurchaseResponse {
        success: true,
        credits: outcome.balance(),
        credits_added: outcome.credits_delta(),
        duplicate: outcome.is_duplicate(),
        transaction_id: outcome.key().to_string(),
        status: result.attempt.status(),
        user_id: result.purchaser.id.clone(),
    }))
}
