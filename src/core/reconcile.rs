//! Reconciliation against the provider's order list.
//!
//! Shared by `verify-payment`, `check-payment-status` and the background poller. Every
//! credit made here is keyed by the provider's order id, the strongest key any trigger
//! has.

use crate::{
    core::{
        catalog::CreditCatalog,
        checkout,
        credits::{self, CreditOutcome, PurchaseRequest},
        guard::{self, PurchaseSource},
        key::{self, PaymentEvidence},
        ledger,
    },
    errors::{Error, Result},
    provider::{OrderStatus, PaymentProvider, ProviderOrder},
};
use chrono::{DateTime, Duration, TimeDelta, Utc};
use sea_orm::DatabaseConnection;
use tracing::{debug, info, warn};

/// Orders placed this long before a checkout intent are still matched to it.
fn clock_skew() -> Duration {
    Duration::minutes(5)
}

/// Longest look-back window a caller may ask for, in hours.
pub const MAX_HOURS_BACK: i64 = 720;

/// Start of a look-back window of `hours_back` hours ending now.
///
/// # Errors
/// [`Error::Validation`] unless `1 <= hours_back <= MAX_HOURS_BACK`.
pub fn lookback_start(hours_back: i64) -> Result<DateTime<Utc>> {
    if !(1..=MAX_HOURS_BACK).contains(&hours_back) {
        return Err(Error::validation(format!(
            "hoursBack must be between 1 and {MAX_HOURS_BACK}, got {hours_back}"
        )));
    }
    TimeDelta::try_hours(hours_back)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .ok_or_else(|| Error::validation(format!("hoursBack {hours_back} is out of range")))
}

/// What a reconciliation pass over a user's orders did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Paid orders belonging to the user that the provider returned
    pub paid_orders: usize,
    /// Outcomes of orders credited by this pass
    pub applied: Vec<CreditOutcome>,
    /// Paid orders that had already been credited
    pub already_processed: usize,
    /// Balance after the pass
    pub balance: i64,
}

impl ReconcileSummary {
    /// Whether the provider reported any paid order for the user.
    #[must_use]
    pub const fn payment_found(&self) -> bool {
        self.paid_orders > 0
    }

    /// Total credits added by this pass.
    #[must_use]
    pub fn credits_added(&self) -> i64 {
        self.applied.iter().map(CreditOutcome::credits_delta).sum()
    }
}

/// Result of verifying one checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The order exists but has not been paid.
    Unpaid {
        /// Provider order id
        order_id: String,
        /// Current status
        status: OrderStatus,
    },
    /// The order is paid; credits were applied now or earlier.
    Paid(CreditOutcome),
}

/// Whether an order's custom data names someone other than `user_id`.
fn belongs_to_other_user(order: &ProviderOrder, user_id: &str) -> bool {
    order
        .custom
        .user_id
        .as_deref()
        .is_some_and(|owner| owner != user_id)
}

/// Package an order was for: custom data first, then the variant mapping.
fn package_for(order: &ProviderOrder, catalog: &CreditCatalog) -> String {
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
        .unwrap_or_else(|| "unknown".to_string())
}

fn evidence_for(order: &ProviderOrder, package_id: &str) -> PaymentEvidence {
    PaymentEvidence {
        order_id: Some(order.id.clone()),
        transaction_id: None,
        session_id: order.custom.session_id.clone(),
        package_id: Some(package_id.to_string()),
    }
}

async fn credit_order(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    user_id: &str,
    order: &ProviderOrder,
    source: PurchaseSource,
) -> Result<CreditOutcome> {
    let package_id = package_for(order, catalog);
    credits::apply_purchase(
        db,
        catalog,
        PurchaseRequest {
            user_id: user_id.to_string(),
            evidence: evidence_for(order, &package_id),
            package_id,
            paid_amount: Some(order.total()),
            client_credits: order.custom.credits,
            source,
        },
    )
    .await
}

/// Paid orders of a user from the last `hours_back` hours that have no purchase record.
///
/// Read-only; nothing is credited.
///
/// # Errors
/// - [`Error::Validation`] if `hours_back` is outside `1..=MAX_HOURS_BACK`
/// - [`Error::UserNotFound`] if the user has no account
/// - [`Error::UpstreamProvider`] if the provider call fails
/// - [`Error::Persistence`] if the claimed-check fails
pub async fn unprocessed_paid_orders(
    db: &DatabaseConnection,
    provider: &dyn PaymentProvider,
    user_id: &str,
    hours_back: i64,
) -> Result<Vec<ProviderOrder>> {
    let since = lookback_start(hours_back)?;
    let account = ledger::require_user_account(db, user_id).await?;
    let orders = provider.list_orders(&account.email, Some(since)).await?;

    let mut unprocessed = Vec::new();
    for order in orders {
        if !order.is_paid() || belongs_to_other_user(&order, user_id) {
            continue;
        }
        let key = key::canonical_key(&PaymentEvidence::order(order.id.as_str()))?;
        if !guard::is_claimed(db, &key).await? {
            unprocessed.push(order);
        }
    }
    Ok(unprocessed)
}

/// Credits every paid, unclaimed order the provider lists for a user.
///
/// Orders are looked up by the account's email. Orders whose custom data names a
/// different user are skipped. One failing order does not stop the pass; the first
/// error is returned after the remaining orders have been tried.
///
/// # Errors
/// - [`Error::UserNotFound`] if the user has no account
/// - [`Error::UpstreamProvider`] if the order list cannot be fetched
/// - the first error from crediting an individual order
pub async fn reconcile_user_orders(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    provider: &dyn PaymentProvider,
    user_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<ReconcileSummary> {
    let account = ledger::require_user_account(db, user_id).await?;
    let orders = provider.list_orders(&account.email, since).await?;

    let mut summary = ReconcileSummary::default();
    let mut first_error = None;

    for order in orders.iter().filter(|o| o.is_paid()) {
        if belongs_to_other_user(order, user_id) {
            debug!(order_id = %order.id, user_id, "Skipping order placed for another user");
            continue;
        }
        summary.paid_orders += 1;

        let key = key::canonical_key(&PaymentEvidence::order(order.id.as_str()))?;
        if guard::is_claimed(db, &key).await? {
            summary.already_processed += 1;
            continue;
        }

        match credit_order(db, catalog, user_id, order, PurchaseSource::Poller).await {
            Ok(outcome) if outcome.is_duplicate() => summary.already_processed += 1,
            Ok(outcome) => summary.applied.push(outcome),
            Err(e) => {
                warn!(order_id = %order.id, user_id, error = %e, "Failed to credit paid order");
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    summary.balance = ledger::get_balance(db, user_id).await?;
    if !summary.applied.is_empty() {
        info!(
            user_id,
            orders = summary.applied.len(),
            credits = summary.credits_added(),
            "Reconciled paid orders"
        );
    }
    Ok(summary)
}

/// Verifies the payment behind a checkout session and credits it if unclaimed.
///
/// The session's intent decides who is credited and for which package; `user_id`, when
/// given, must match it.
///
/// # Errors
/// - [`Error::NotFound`] for an unknown session or when no order matches it
/// - [`Error::Authentication`] if `user_id` differs from the session's purchaser
/// - [`Error::UpstreamProvider`] if the provider call fails
pub async fn verify_checkout(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    provider: &dyn PaymentProvider,
    session_id: &str,
    user_id: Option<&str>,
) -> Result<VerifyOutcome> {
    let intent = checkout::get_intent(db, session_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("checkout session '{session_id}'")))?;

    if user_id
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .is_some_and(|u| u != intent.user_id)
    {
        return Err(Error::Authentication {
            message: "Checkout session belongs to another user".to_string(),
        });
    }

    let orders = provider
        .list_orders(&intent.email, Some(intent.created_at - clock_skew()))
        .await?;

    let variant_matches = |order: &ProviderOrder| {
        order
            .variant_id
            .as_deref()
            .and_then(|v| catalog.by_variant(v))
            .is_some_and(|p| p.id == intent.package_id)
    };

    let candidates: Vec<&ProviderOrder> = orders
        .iter()
        .filter(|o| !belongs_to_other_user(o, &intent.user_id))
        .collect();
    let order = candidates
        .iter()
        .copied()
        .find(|o| o.custom.session_id.as_deref() == Some(session_id))
        .or_else(|| {
            candidates
                .iter()
                .copied()
                .find(|o| o.custom.session_id.is_none() && variant_matches(o))
        })
        .ok_or_else(|| Error::not_found(format!("order for checkout session '{session_id}'")))?;

    if !order.is_paid() {
        return Ok(VerifyOutcome::Unpaid {
            order_id: order.id.clone(),
            status: order.status,
        });
    }

    let package_id = intent.package_id.clone();
    let outcome = credits::apply_purchase(
        db,
        catalog,
        PurchaseRequest {
            user_id: intent.user_id.clone(),
            evidence: PaymentEvidence {
                order_id: Some(order.id.clone()),
                transaction_id: None,
                session_id: Some(intent.session_id.clone()),
                package_id: Some(package_id.clone()),
            },
            package_id,
            paid_amount: Some(order.total()),
            client_credits: order.custom.credits,
            source: PurchaseSource::VerifyPayment,
        },
    )
    .await?;

    Ok(VerifyOutcome::Paid(outcome))
}
