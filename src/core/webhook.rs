//! Webhook trigger: turns a verified provider event into a credit or a refund.
//!
//! Identity and package come from the event's custom data, which was set when the
//! checkout was opened. Top-level amounts in the payload are never trusted; the catalog
//! decides what a known package is worth.

use crate::{
    core::{
        catalog::CreditCatalog,
        credits::{self, CreditOutcome, PurchaseRequest, RefundRequest},
        guard::PurchaseSource,
        key::{self, PaymentEvidence},
    },
    errors::{Error, Result},
    provider::{ProviderOrder, lemon_squeezy::WebhookEvent},
};
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

/// What handling an event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// `order_created` for a paid order; credits applied or already applied.
    Credited(CreditOutcome),
    /// `order_refunded`; credits debited or already debited.
    Refunded(CreditOutcome),
    /// A known event that needs no ledger change.
    Acknowledged {
        /// Event name
        event: String,
    },
    /// An event this service does not handle.
    Ignored {
        /// Event name
        event: String,
    },
}

impl WebhookOutcome {
    /// Whether the ledger change had already been made by an earlier delivery or trigger.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        match self {
            Self::Credited(outcome) | Self::Refunded(outcome) => outcome.is_duplicate(),
            _ => false,
        }
    }
}

fn package_for(order: &ProviderOrder, catalog: &CreditCatalog) -> Result<String> {
    order
        .custom
        .package_id
        .clone()
        .or_else(|| {
            order
                .variant_id
                .as_deref()
                .and_then(|v| catalog.by_variant(v))
                .map(|p| p.id.clone())
        })
        .ok_or_else(|| {
            Error::validation(format!(
                "Order '{}' carries no package id and an unknown variant",
                order.id
            ))
        })
}

/// Applies a verified webhook event to the ledger.
///
/// # Errors
/// - [`Error::Validation`] if a paid order carries no user id or package
/// - [`Error::UserNotFound`] if the named user has no account
/// - [`Error::Persistence`] if the store fails; the provider will redeliver
pub async fn handle_event(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    event: &WebhookEvent,
) -> Result<WebhookOutcome> {
    let order = &event.order;

    match event.name.as_str() {
        "order_created" => {
            if !order.is_paid() {
                info!(order_id = %order.id, status = ?order.status, "Order created but not paid");
                return Ok(WebhookOutcome::Acknowledged {
                    event: event.name.clone(),
                });
            }

            let user_id = order.custom.user_id.clone().ok_or_else(|| {
                Error::validation(format!("Order '{}' carries no user id", order.id))
            })?;
            let package_id = package_for(order, catalog)?;

            let outcome = credits::apply_purchase(
                db,
                catalog,
                PurchaseRequest {
                    user_id,
                    evidence: PaymentEvidence {
                        order_id: Some(order.id.clone()),
                        transaction_id: None,
                        session_id: order.custom.session_id.clone(),
                        package_id: Some(package_id.clone()),
                    },
                    package_id,
                    paid_amount: Some(order.total()),
                    client_credits: order.custom.credits,
                    source: PurchaseSource::Webhook,
                },
            )
            .await?;
            Ok(WebhookOutcome::Credited(outcome))
        }
        "order_refunded" => {
            let original = key::canonical_key(&PaymentEvidence::order(order.id.as_str()))?;
            let outcome = credits::apply_refund(
                db,
                RefundRequest {
                    original,
                    user_id: order.custom.user_id.clone(),
                    credits: order.custom.credits,
                },
            )
            .await?;
            Ok(WebhookOutcome::Refunded(outcome))
        }
        "subscription_payment_success" | "subscription_payment_failed" => {
            info!(event = %event.name, id = %order.id, "Subscription payment event acknowledged");
            Ok(WebhookOutcome::Acknowledged {
                event: event.name.clone(),
            })
        }
        other => {
            warn!(event = other, "Ignoring unsupported webhook event");
            Ok(WebhookOutcome::Ignored {
                event: other.to_string(),
            })
        }
    }
}
