//! Webhook authenticity check: hex-encoded HMAC-SHA256 of the raw body, compared in
//! constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{
    config::settings::Environment,
    errors::{Error, Result},
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Outcome of a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// The signature matched the configured secret.
    Verified,
    /// No secret is configured and the environment allows skipping.
    Skipped,
}

/// Verifies webhook signatures with the configured signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<String>,
    environment: Environment,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("environment", &self.environment)
            .finish()
    }
}

impl WebhookVerifier {
    /// Creates a verifier. A blank secret counts as missing.
    ///
    /// # Errors
    /// [`Error::Configuration`] when no secret is configured in production.
    pub fn new(secret: Option<String>, environment: Environment) -> Result<Self> {
        let secret = secret.filter(|s| !s.trim().is_empty());
        if secret.is_none() && environment == Environment::Production {
            return Err(Error::Configuration {
                message: "LEMON_SQUEEZY_WEBHOOK_SECRET must be set in production".to_string(),
            });
        }
        Ok(Self {
            secret,
            environment,
        })
    }

    /// Whether signatures are actually checked.
    #[must_use]
    pub const fn is_enforced(&self) -> bool {
        self.secret.is_some()
    }

    /// Checks `signature` (hex) against the HMAC of `body`.
    ///
    /// # Errors
    /// [`Error::Authentication`] for a missing, malformed or mismatched signature.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<Verification> {
        let Some(secret) = &self.secret else {
            warn!(
                environment = ?self.environment,
                "Webhook signature verification skipped: no signing secret configured"
            );
            return Ok(Verification::Skipped);
        };

        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| authentication("Missing webhook signature"))?;
        let provided =
            hex::decode(signature).map_err(|_| authentication("Malformed webhook signature"))?;

        let expected = sign(secret, body)?;
        if expected.ct_eq(&provided).into() {
            Ok(Verification::Verified)
        } else {
            warn!("Webhook signature mismatch");
            Err(authentication("Invalid webhook signature"))
        }
    }
}

fn authentication(message: &str) -> Error {
    Error::Authentication {
        message: message.to_string(),
    }
}

fn sign(secret: &str, body: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| Error::Configuration {
        message: format!("Invalid webhook secret: {e}"),
    })?;
    mac.update(body);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex signature for `body`, as the provider would send it.
///
/// # Errors
/// [`Error::Configuration`] if the secret cannot key an HMAC.
pub fn signature_hex(secret: &str, body: &[u8]) -> Result<String> {
    sign(secret, body).map(hex::encode)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    const SECRET: &str = "whsec_test";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(Some(SECRET.to_string()), Environment::Production).unwrap()
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"meta":{"event_name":"order_created"}}"#;
        let signature = signature_hex(SECRET, body).unwrap();
        assert_eq!(
            verifier().verify(body, Some(&signature)).unwrap(),
            Verification::Verified
        );
    }

    #[test]
    fn test_modified_payload_rejected() {
        let signature = signature_hex(SECRET, b"original").unwrap();
        assert!(matches!(
            verifier().verify(b"tampered", Some(&signature)),
            Err(Error::Authentication { .. })
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = signature_hex("other", b"body").unwrap();
        assert!(verifier().verify(b"body", Some(&signature)).is_err());
    }

    #[test]
    fn test_missing_or_malformed_signature_rejected() {
        assert!(matches!(
            verifier().verify(b"body", None),
            Err(Error::Authentication { .. })
        ));
        assert!(verifier().verify(b"body", Some("")).is_err());
        assert!(verifier().verify(b"body", Some("not-a-valid-hex-signature")).is_err());
    }

    #[test]
    fn test_missing_secret_is_fatal_in_production() {
        assert!(matches!(
            WebhookVerifier::new(None, Environment::Production),
            Err(Error::Configuration { .. })
        ));
        assert!(WebhookVerifier::new(Some("  ".to_string()), Environment::Production).is_err());
    }

    #[test]
    fn test_missing_secret_skips_outside_production() {
        let verifier = WebhookVerifier::new(None, Environment::Development).unwrap();
        assert!(!verifier.is_enforced());
        assert_eq!(
            verifier.verify(b"anything", None).unwrap(),
            Verification::Skipped
        );
    }
}
