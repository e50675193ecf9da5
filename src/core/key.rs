//! Transaction-key derivation shared by every reconciliation trigger.
//!
//! All triggers build a [`PaymentEvidence`] from whatever they know about a payment and
//! call [`canonical_key`]. The provider order id wins whenever it is known. Without it, a
//! caller-supplied transaction id is used as-is, and as a last resort the checkout session
//! id is combined with the package id. Wall-clock time never takes part in a key, so two
//! triggers holding the same evidence always derive the same key.
//!
//! Refund claims live under [`REFUND_PREFIX`]. No purchase key may start with it, so a
//! caller-supplied id can never occupy the slot a refund will need.

use crate::errors::{Error, Result};
use std::fmt;

const MAX_KEY_LEN: usize = 255;

/// Prefix reserved for refund claims.
pub const REFUND_PREFIX: &str = "refund_";

/// The string a purchase record is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey(String);

impl TransactionKey {
    /// Borrow the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a trigger knows about a payment. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentEvidence {
    /// Provider order id (authoritative)
    pub order_id: Option<String>,
    /// Key handed back by an earlier attempt, e.g. on manual retry
    pub transaction_id: Option<String>,
    /// Checkout session id we generated when opening the checkout
    pub session_id: Option<String>,
    /// Package being paid for
    pub package_id: Option<String>,
}

impl PaymentEvidence {
    /// Evidence consisting of a provider order id only.
    #[must_use]
    pub fn order(order_id: impl Into<String>) -> Self {
        Self {
            order_id: Some(order_id.into()),
            ..Self::default()
        }
    }
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Derives the canonical transaction key for a payment.
///
/// # Errors
/// Returns [`Error::Validation`] when the evidence carries neither an order id, a
/// transaction id, nor a session id plus package id, when the key is too long, or when
/// it falls in the reserved refund namespace.
pub fn canonical_key(evidence: &PaymentEvidence) -> Result<TransactionKey> {
    let key = if let Some(order_id) = present(evidence.order_id.as_ref()) {
        order_id.to_string()
    } else if let Some(transaction_id) = present(evidence.transaction_id.as_ref()) {
        transaction_id.to_string()
    } else if let Some(composite) = session_key(evidence) {
        composite
    } else {
        return Err(Error::validation(
            "Payment evidence needs an order id, a transaction id, or a session id and package id",
        ));
    };

    if key.len() > MAX_KEY_LEN {
        return Err(Error::validation(format!(
            "Transaction key longer than {MAX_KEY_LEN} characters"
        )));
    }
    if key.starts_with(REFUND_PREFIX) {
        return Err(Error::validation(format!(
            "Transaction key '{key}' uses the reserved '{REFUND_PREFIX}' prefix"
        )));
    }

    Ok(TransactionKey(key))
}

/// The `<session id>_<package id>` composite, when both halves are known.
///
/// Stored alongside the purchase record as a second unique claim, so a payment first
/// claimed by order id still blocks a later claim made from session evidence alone.
#[must_use]
pub fn session_key(evidence: &PaymentEvidence) -> Option<String> {
    let session_id = present(evidence.session_id.as_ref())?;
    let package_id = present(evidence.package_id.as_ref())?;
    Some(format!("{session_id}_{package_id}"))
}

/// Key under which the refund of `original` is claimed.
#[must_use]
pub fn refund_key(original: &TransactionKey) -> TransactionKey {
    TransactionKey(format!("{REFUND_PREFIX}{}", original.0))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn evidence(
        order_id: Option<&str>,
        transaction_id: Option<&str>,
        session_id: Option<&str>,
        package_id: Option<&str>,
    ) -> PaymentEvidence {
        PaymentEvidence {
            order_id: order_id.map(str::to_string),
            transaction_id: transaction_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            package_id: package_id.map(str::to_string),
        }
    }

    #[test]
    fn test_order_id_wins() {
        let key = canonical_key(&evidence(
            Some("ord_42"),
            Some("tx_1"),
            Some("sess"),
            Some("premium"),
        ))
        .unwrap();
        assert_eq!(key.as_str(), "ord_42");
    }

    #[test]
    fn test_transaction_id_before_session() {
        let key =
            canonical_key(&evidence(None, Some("tx_1"), Some("sess"), Some("premium"))).unwrap();
        assert_eq!(key.as_str(), "tx_1");
    }

    #[test]
    fn test_session_composite_is_deterministic() {
        let ev = evidence(None, None, Some("sess_9"), Some("basic"));
        let first = canonical_key(&ev).unwrap();
        let second = canonical_key(&ev).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "sess_9_basic");
    }

    #[test]
    fn test_blank_fields_count_as_missing() {
        let key = canonical_key(&evidence(Some("  "), Some(""), Some("s"), Some("basic"))).unwrap();
        assert_eq!(key.as_str(), "s_basic");

        assert!(matches!(
            canonical_key(&evidence(None, None, Some("s"), None)),
            Err(Error::Validation { .. })
        ));
        assert!(canonical_key(&PaymentEvidence::default()).is_err());
    }

    #[test]
    fn test_overlong_key_rejected() {
        let long = "x".repeat(MAX_KEY_LEN + 1);
        assert!(canonical_key(&PaymentEvidence::order(long)).is_err());
    }

    #[test]
    fn test_refund_namespace_is_reserved() {
        for ev in [
            PaymentEvidence::order("refund_ord_42"),
            evidence(None, Some("refund_ord_42"), None, None),
            evidence(None, None, Some("refund_ord"), Some("42")),
        ] {
            assert!(matches!(canonical_key(&ev), Err(Error::Validation { .. })));
        }
        // Only the prefix is reserved
        let key = canonical_key(&PaymentEvidence::order("ord_refund_1")).unwrap();
        assert_eq!(key.as_str(), "ord_refund_1");
    }

    #[test]
    fn test_refund_key() {
        let key = canonical_key(&PaymentEvidence::order("ord_42")).unwrap();
        assert_eq!(refund_key(&key).as_str(), "refund_ord_42");
    }
}
