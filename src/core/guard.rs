//! Idempotency guard - decides whether a transaction key has already been credited.
//!
//! The only authoritative signal is the insert of a purchase record whose primary key is
//! the transaction key: the store rejects a second insert with a unique-constraint
//! violation, and that rejection *is* [`Claim::AlreadyClaimed`]. Callers claim inside the
//! same database transaction that mutates the balance, so a record exists if and only if
//! the credit was applied.
//!
//! [`is_claimed`] is a read-only fast path for triggers that want to skip work (provider
//! calls, catalog resolution) for keys that are obviously done. It is never used to
//! authorise a credit, and a failing read is reported as an error rather than read as
//! "not claimed".

use crate::{
    core::key::TransactionKey,
    entities::{Purchase, purchase},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{DbErr, Set, SqlErr, prelude::*};
use std::fmt;

/// Which reconciliation trigger produced a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseSource {
    /// Provider webhook `order_created`
    Webhook,
    /// Provider webhook `order_refunded`
    Refund,
    /// Return page, before authentication is confirmed
    ReturnPageDirect,
    /// Return page, after authentication is confirmed
    ReturnPageAuthenticated,
    /// Manual retry from the return page
    Retry,
    /// `verify-payment` session lookup
    VerifyPayment,
    /// `check-payment-status` and the background poller
    Poller,
}

impl PurchaseSource {
    /// Label stored in the `source` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Refund => "refund",
            Self::ReturnPageDirect => "return_page_direct",
            Self::ReturnPageAuthenticated => "return_page_authenticated",
            Self::Retry => "retry",
            Self::VerifyPayment => "verify_payment",
            Self::Poller => "poller",
        }
    }
}

impl fmt::Display for PurchaseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ledger record a claimant wants to create.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    /// Transaction key, becomes the record id
    pub key: TransactionKey,
    /// Optional session composite, claimed alongside the key
    pub session_key: Option<String>,
    /// Account being credited or debited
    pub user_id: String,
    /// Package id, best effort
    pub package_id: String,
    /// Credits applied (negative for refunds)
    pub credits: i64,
    /// Informational paid amount
    pub amount_paid: Option<f64>,
    /// Trigger label
    pub source: PurchaseSource,
}

/// Result of trying to claim a transaction key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The record was created; the caller must now apply the balance change.
    Claimed(purchase::Model),
    /// Another caller got there first; do nothing.
    AlreadyClaimed,
}

/// Whether a store error is a unique-constraint violation, i.e. an id conflict.
#[must_use]
pub fn is_conflict(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Claims a transaction key by inserting its purchase record.
///
/// Run this on the same transaction that applies the balance change.
///
/// # Errors
/// Any store error other than an id conflict is returned as [`crate::errors::Error::Persistence`].
pub async fn claim<C>(db: &C, record: NewPurchase) -> Result<Claim>
where
    C: ConnectionTrait,
{
    let model = purchase::ActiveModel {
        id: Set(record.key.as_str().to_string()),
        session_key: Set(record.session_key.clone()),
        user_id: Set(record.user_id.clone()),
        package_id: Set(record.package_id.clone()),
        credits: Set(record.credits),
        amount_paid: Set(record.amount_paid),
        source: Set(record.source.as_str().to_string()),
        created_at: Set(Utc::now()),
    };

    match model.insert(db).await {
        Ok(created) => Ok(Claim::Claimed(created)),
        Err(e) if is_conflict(&e) => {
            tracing::info!(
                transaction_key = %record.key,
                session_key = ?record.session_key,
                source = %record.source,
                "Transaction already claimed"
            );
            Ok(Claim::AlreadyClaimed)
        }
        Err(e) => {
            tracing::error!(
                transaction_key = %record.key,
                error = %e,
                "Failed to claim transaction, not crediting"
            );
            Err(e.into())
        }
    }
}

/// Non-authoritative check whether a key already has a ledger record (exact id match).
///
/// # Errors
/// Store failures are propagated; callers must not treat them as "not claimed".
pub async fn is_claimed(db: &DatabaseConnection, key: &TransactionKey) -> Result<bool> {
    let count = Purchase::find_by_id(key.as_str().to_string())
        .count(db)
        .await?;
    Ok(count > 0)
}
