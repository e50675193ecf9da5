//! Credit application service - the single path that changes a user's balance.
//!
//! Every reconciliation trigger ends up in [`apply_purchase`] (or [`apply_refund`] for the
//! webhook refund path). Both run one database transaction that first claims the
//! transaction key through the idempotency guard and then applies the balance change, so
//! either the record and the balance change are both committed or neither is, and a
//! failed call is always safe to retry under the same key.

use crate::{
    core::{
        catalog::CreditCatalog,
        guard::{self, Claim, NewPurchase, PurchaseSource},
        key::{self, PaymentEvidence, TransactionKey},
        ledger,
    },
    errors::{Error, Result},
};
use sea_orm::{DatabaseConnection, TransactionTrait};
use tracing::info;

/// A request to credit a user for one payment.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    /// Account to credit
    pub user_id: String,
    /// Package the payment was for
    pub package_id: String,
    /// What the trigger knows about the payment, used to derive the transaction key
    pub evidence: PaymentEvidence,
    /// Amount paid in currency units (audit, and fallback for unknown packages)
    pub paid_amount: Option<f64>,
    /// Untrusted credit count reported by the client or webhook
    pub client_credits: Option<i64>,
    /// Trigger label
    pub source: PurchaseSource,
}

/// Outcome of applying a purchase or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// This call claimed the key and changed the balance.
    Applied {
        /// Key the record was stored under
        key: TransactionKey,
        /// Signed balance change
        credits_delta: i64,
        /// Balance after the change
        new_balance: i64,
    },
    /// The key was already claimed; nothing changed.
    Duplicate {
        /// Key that was already claimed
        key: TransactionKey,
        /// Current balance
        balance: i64,
    },
}

impl CreditOutcome {
    /// Balance after this outcome.
    #[must_use]
    pub const fn balance(&self) -> i64 {
        match self {
            Self::Applied { new_balance, .. } => *new_balance,
            Self::Duplicate { balance, .. } => *balance,
        }
    }

    /// Whether the key had already been claimed.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Signed balance change made by this call (zero for duplicates).
    #[must_use]
    pub const fn credits_delta(&self) -> i64 {
        match self {
            Self::Applied { credits_delta, .. } => *credits_delta,
            Self::Duplicate { .. } => 0,
        }
    }

    /// The transaction key involved.
    #[must_use]
    pub const fn key(&self) -> &TransactionKey {
        match self {
            Self::Applied { key, .. } | Self::Duplicate { key, .. } => key,
        }
    }
}

/// Credits a user for a payment exactly once per transaction key.
///
/// The credited amount comes from the catalog for known packages; the client-supplied
/// count and the paid amount only matter for unknown packages (see
/// [`CreditCatalog::resolve`]).
///
/// # Errors
/// - [`Error::Validation`] if no transaction key can be derived or no amount resolved
/// - [`Error::UserNotFound`] if the account does not exist
/// - [`Error::Persistence`] if the store fails; nothing is committed in that case
pub async fn apply_purchase(
    db: &DatabaseConnection,
    catalog: &CreditCatalog,
    request: PurchaseRequest,
) -> Result<CreditOutcome> {
    let key = key::canonical_key(&request.evidence)?;
    let session_key = key::session_key(&request.evidence);
    let resolved = catalog.resolve(
        &request.package_id,
        request.paid_amount,
        request.client_credits,
    )?;

    let txn = db.begin().await?;

    ledger::require_user_account(&txn, &request.user_id).await?;

    let claim = guard::claim(
        &txn,
        NewPurchase {
            key: key.clone(),
            session_key,
            user_id: request.user_id.clone(),
            package_id: request.package_id.clone(),
            credits: resolved.credits,
            amount_paid: request.paid_amount,
            source: request.source,
        },
    )
    .await?;

    if claim == Claim::AlreadyClaimed {
        txn.rollback().await?;
        let balance = ledger::get_balance(db, &request.user_id).await?;
        return Ok(CreditOutcome::Duplicate { key, balance });
    }

    let account = ledger::adjust_balance_atomic(&txn, &request.user_id, resolved.credits).await?;
    txn.commit().await?;

    info!(
        user_id = %request.user_id,
        package_id = %request.package_id,
        transaction_key = %key,
        source = %request.source,
        credits = resolved.credits,
        new_balance = account.credits,
        "Credits applied"
    );

    Ok(CreditOutcome::Applied {
        key,
        credits_delta: resolved.credits,
        new_balance: account.credits,
    })
}

/// A request to reverse the credit of a refunded payment.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    /// Key of the original purchase (the provider order id)
    pub original: TransactionKey,
    /// User named by the refund event, used when the original record is missing
    pub user_id: Option<String>,
    /// Credits reported by the refund event
    pub credits: Option<i64>,
}

/// Debits the credits of a refunded purchase, once per original transaction key.
///
/// The refund is claimed under [`key::refund_key`] and recorded with a negative amount.
/// The debit saturates at the current balance; the record stores what was actually
/// taken. A refund whose original purchase was never recorded still debits the amount
/// the event reports from the user it names.
///
/// # Errors
/// - [`Error::NotFound`] if neither the original purchase nor the event names a user
/// - [`Error::Validation`] if no positive amount can be determined
/// - [`Error::UserNotFound`] / [`Error::Persistence`] as for [`apply_purchase`]
pub async fn apply_refund(db: &DatabaseConnection, request: RefundRequest) -> Result<CreditOutcome> {
    let refund_key = key::refund_key(&request.original);

    let txn = db.begin().await?;

    let original = ledger::get_purchase(&txn, request.original.as_str()).await?;
    if original.is_none() {
        tracing::warn!(
            transaction_key = %request.original,
            user_id = ?request.user_id,
            credits = ?request.credits,
            "Refund for a payment with no purchase record, debiting the reported amount"
        );
    }

    let user_id = original
        .as_ref()
        .map(|p| p.user_id.clone())
        .or_else(|| request.user_id.clone())
        .ok_or_else(|| Error::not_found(format!("purchase '{}'", request.original)))?;

    let amount = request
        .credits
        .filter(|c| *c > 0)
        .or_else(|| original.as_ref().map(|p| p.credits).filter(|c| *c > 0))
        .ok_or_else(|| {
            Error::validation(format!(
                "Cannot determine refunded credits for '{}'",
                request.original
            ))
        })?;

    let account = ledger::require_user_account(&txn, &user_id).await?;
    let debit = amount.min(account.credits);

    let claim = guard::claim(
        &txn,
        NewPurchase {
            key: refund_key.clone(),
            session_key: None,
            user_id: user_id.clone(),
            package_id: original
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |p| p.package_id.clone()),
            credits: -debit,
            amount_paid: None,
            source: PurchaseSource::Refund,
        },
    )
    .await?;

    if claim == Claim::AlreadyClaimed {
        txn.rollback().await?;
        let balance = ledger::get_balance(db, &user_id).await?;
        return Ok(CreditOutcome::Duplicate {
            key: refund_key,
            balance,
        });
    }

    let new_balance = if debit > 0 {
        ledger::adjust_balance_atomic(&txn, &user_id, -debit)
            .await?
            .credits
    } else {
        account.credits
    };
    txn.commit().await?;

    if debit < amount {
        tracing::warn!(
            user_id = %user_id,
            transaction_key = %request.original,
            requested = amount,
            debited = debit,
            "Refund exceeded balance, debited what was left"
        );
    }
    info!(
        user_id = %user_id,
        transaction_key = %refund_key,
        debited = debit,
        new_balance,
        "Refund applied"
    );

    Ok(CreditOutcome::Applied {
        key: refund_key,
        credits_delta: -debit,
        new_balance,
    })
}

/// Deducts credits when a user spends them (one generated message costs one credit).
///
/// # Errors
/// - [`Error::Validation`] for a non-positive amount or an insufficient balance
/// - [`Error::UserNotFound`] if the account does not exist
pub async fn consume_credits(db: &DatabaseConnection, user_id: &str, amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(Error::validation(format!(
            "Amount to consume must be positive, got {amount}"
        )));
    }

    let account = ledger::adjust_balance_atomic(db, user_id, -amount).await?;
    tracing::debug!(user_id, amount, new_balance = account.credits, "Credits consumed");
    Ok(account.credits)
}
