//! Payment provider boundary.
//!
//! The rest of the crate talks to the payment processor only through
//! [`PaymentProvider`], so reconciliation logic can be exercised against a scripted
//! provider in tests and the Lemon Squeezy client stays a replaceable detail.

pub mod lemon_squeezy;
pub mod signature;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::errors::Error;

/// Failure talking to the payment provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network failure before a response arrived
    #[error("network error: {0}")]
    Transport(String),
    /// Request timed out
    #[error("timeout")]
    Timeout,
    /// Non-success status not covered by a more specific variant
    #[error("http {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, for logging
        body: String,
    },
    /// Provider asked us to slow down
    #[error("rate limited")]
    RateLimited,
    /// API key was rejected
    #[error("invalid api key")]
    InvalidApiKey,
    /// Response body could not be decoded
    #[error("json error: {0}")]
    Serde(String),
    /// Client is missing credentials or ids
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Returns true if the error is transient and should be retried.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::RateLimited => true,
            Self::Http { status, .. } => *status >= 500 && *status <= 599,
            _ => false,
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(message) => Self::Configuration { message },
            other => Self::UpstreamProvider {
                message: other.to_string(),
            },
        }
    }
}

/// Order status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Paid; eligible for credit
    Paid,
    /// Fully refunded
    Refunded,
    /// Partially refunded
    PartialRefund,
    /// Payment failed
    Failed,
    /// Any status this service does not act on
    #[serde(other)]
    Unknown,
}

/// Custom metadata attached to a checkout and echoed back on orders and webhook events.
///
/// These values pass through the browser when the checkout is opened, so they identify
/// the purchaser but never decide how many credits a known package is worth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomData {
    /// User to credit
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    /// Package bought
    #[serde(default, deserialize_with = "lenient_string")]
    pub package_id: Option<String>,
    /// Credits the checkout was opened for
    #[serde(default, deserialize_with = "lenient_i64")]
    pub credits: Option<i64>,
    /// Checkout session id generated by this service
    #[serde(default, deserialize_with = "lenient_string")]
    pub session_id: Option<String>,
}

/// An order as seen through the provider's read API or a webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderOrder {
    /// Provider order id; the canonical transaction key
    pub id: String,
    /// Payment status
    pub status: OrderStatus,
    /// Email the customer paid with
    pub user_email: String,
    /// Total in the smallest currency unit
    pub total_cents: i64,
    /// ISO currency code
    pub currency: String,
    /// Provider variant bought
    pub variant_id: Option<String>,
    /// When the order was placed
    pub created_at: DateTime<Utc>,
    /// Custom metadata from the checkout
    pub custom: CustomData,
}

impl ProviderOrder {
    /// Total in currency units.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total(&self) -> f64 {
        self.total_cents as f64 / 100.0
    }

    /// Whether the order has been paid.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }
}

/// What to open a checkout for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Purchasing user
    pub user_id: String,
    /// Email to prefill and to find the order by later
    pub email: String,
    /// Package being bought
    pub package_id: String,
    /// Provider variant for the package
    pub variant_id: String,
    /// Session id to carry in custom data
    pub session_id: String,
}

/// A checkout opened at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    /// Provider-side checkout id
    pub id: String,
    /// URL to send the buyer to
    pub url: String,
}

/// Operations the reconciliation layer needs from a payment processor.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name for logs and health output.
    fn name(&self) -> &'static str;

    /// Opens a hosted checkout.
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Lists orders placed with `email`, optionally only those created at or after `since`.
    async fn list_orders(
        &self,
        email: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderOrder>, ProviderError>;
}

/// Stand-in used when no provider credentials are configured (development only).
///
/// Every call fails with [`ProviderError::NotConfigured`]; webhooks and the ledger keep
/// working.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl PaymentProvider for UnconfiguredProvider {
    fn name(&self) -> &'static str {
        "unconfigured"
    }

    async fn create_checkout(
        &self,
        _request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        Err(ProviderError::NotConfigured(
            "no payment provider credentials".to_string(),
        ))
    }

    async fn list_orders(
        &self,
        _email: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderOrder>, ProviderError> {
        Err(ProviderError::NotConfigured(
            "no payment provider credentials".to_string(),
        ))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(StringOrNumber::Int(n)) => Some(n.to_string()),
        Some(StringOrNumber::Float(f)) => Some(f.to_string()),
        _ => None,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<StringOrNumber>::deserialize(deserializer)? {
        Some(StringOrNumber::String(s)) => s.trim().parse().ok(),
        Some(StringOrNumber::Int(n)) => Some(n),
        Some(StringOrNumber::Float(f)) if f.is_finite() => Some(f.trunc() as i64),
        _ => None,
    })
}

/// Deserializes an id the provider may send as either a number or a string.
pub(crate) fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_string(deserializer)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_custom_data_accepts_strings_and_numbers() {
        let custom: CustomData = serde_json::from_str(
            r#"{"user_id":"u1","package_id":"premium","credits":"100","session_id":"sess_1"}"#,
        )
        .unwrap();
        assert_eq!(custom.credits, Some(100));
        assert_eq!(custom.user_id.as_deref(), Some("u1"));

        let custom: CustomData =
            serde_json::from_str(r#"{"user_id":42,"credits":10.0}"#).unwrap();
        assert_eq!(custom.user_id.as_deref(), Some("42"));
        assert_eq!(custom.credits, Some(10));
        assert_eq!(custom.package_id, None);
    }

    #[test]
    fn test_custom_data_ignores_garbage() {
        let custom: CustomData =
            serde_json::from_str(r#"{"user_id":"  ","credits":"lots","extra":true}"#).unwrap();
        assert_eq!(custom, CustomData::default());
    }

    #[test]
    fn test_unknown_status_does_not_fail() {
        let status: OrderStatus = serde_json::from_str(r#""fraudulent""#).unwrap();
        assert_eq!(status, OrderStatus::Unknown);
        let status: OrderStatus = serde_json::from_str(r#""partial_refund""#).unwrap();
        assert_eq!(status, OrderStatus::PartialRefund);
    }

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::Timeout.should_retry());
        assert!(ProviderError::RateLimited.should_retry());
        assert!(
            ProviderError::Http {
                status: 503,
                body: String::new()
            }
            .should_retry()
        );
        assert!(
            !ProviderError::Http {
                status: 404,
                body: String::new()
            }
            .should_retry()
        );
        assert!(!ProviderError::InvalidApiKey.should_retry());
    }

    #[test]
    fn test_provider_error_maps_to_crate_error() {
        assert!(matches!(
            Error::from(ProviderError::Timeout),
            Error::UpstreamProvider { .. }
        ));
        assert!(matches!(
            Error::from(ProviderError::NotConfigured("store id".into())),
            Error::Configuration { .. }
        ));
    }
}
