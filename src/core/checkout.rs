//! Checkout intents - who opened which checkout for which package.
//!
//! An intent is recorded before the buyer is sent to the payment provider, keyed by a
//! session id we generate and pass along as custom data. The return page and
//! `verify-payment` use it to recover the purchaser when the browser session cannot.

use crate::{
    core::{catalog::CreditCatalog, identity::RegisteredUser, ledger},
    entities::{CheckoutIntent, checkout_intent},
    errors::{Error, Result},
    provider::{CheckoutRequest, PaymentProvider},
};
use chrono::Utc;
use sea_orm::{Set, prelude::*};
use tracing::info;
use uuid::Uuid;

/// A checkout that was opened at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedCheckout {
    /// Our session id
    pub session_id: String,
    /// Where to send the buyer
    pub checkout_url: String,
    /// The stored intent
    pub intent: checkout_intent::Model,
}

/// Stores a checkout intent.
pub async fn record_intent(
    db: &DatabaseConnection,
    session_id: &str,
    user: &RegisteredUser,
    package_id: &str,
    provider_checkout_id: Option<String>,
) -> Result<checkout_intent::Model> {
    let intent = checkout_intent::ActiveModel {
        session_id: Set(session_id.to_string()),
        user_id: Set(user.id.clone()),
        email: Set(user.email.clone()),
        package_id: Set(package_id.to_string()),
        provider_checkout_id: Set(provider_checkout_id),
        created_at: Set(Utc::now()),
    };

    intent.insert(db).await.map_err(Into::into)
}

/// Looks up the intent for a session id.
pub async fn get_intent(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<checkout_intent::Model>> {
    CheckoutIntent::find_by_id(session_id.trim().to_string())
        .one(db)
        .await
        .map_err(Into::into)
}

/// Opens a provider checkout for a registered user and records the intent.
///
/// # Errors
/// - [`Error::Validation`] for an unknown package or one without a provider variant
/// - [`Error::UserNotFound`] if the user has no ledger account
/// - [`Error::UpstreamProvider`] if the provider call fails
pub async fn open_checkout(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    provider: &dyn PaymentProvider,
    user_id: &str,
    package_id: &str,
) -> Result<OpenedCheckout> {
    let package = catalog
        .get(package_id)
        .ok_or_else(|| Error::validation(format!("Unknown package '{package_id}'")))?;
    let variant_id = package.variant_id.clone().ok_or_else(|| {
        Error::validation(format!(
            "Package '{package_id}' has no provider variant configured"
        ))
    })?;

    let account = ledger::require_user_account(db, user_id).await?;
    let user = RegisteredUser {
        id: account.id,
        email: account.email,
    };

    let session_id = format!("sess_{}", Uuid::new_v4().simple());
    let session = provider
        .create_checkout(&CheckoutRequest {
            user_id: user.id.clone(),
            email: user.email.clone(),
            package_id: package.id.clone(),
            variant_id,
            session_id: session_id.clone(),
        })
        .await?;

    let intent = record_intent(db, &session_id, &user, &package.id, Some(session.id)).await?;

    info!(
        user_id = %user.id,
        package_id = %package.id,
        session_id = %session_id,
        provider = provider.name(),
        "Checkout opened"
    );

    Ok(OpenedCheckout {
        session_id,
        checkout_url: session.url,
        intent,
    })
}
