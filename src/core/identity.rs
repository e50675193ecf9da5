//! Who is buying.
//!
//! A purchaser is either a registered account known to the ledger or a guest whose
//! balance lives on the client. Only registered users can be credited; the type makes
//! that a compile-time distinction rather than an id-prefix convention.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};

/// A signed-in user as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    /// Opaque user id; also the ledger account id
    pub id: String,
    /// Email the payment provider knows the user by
    pub email: String,
}

/// The identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// A registered account.
    Registered(RegisteredUser),
    /// An anonymous visitor identified only by a client-side token.
    Guest {
        /// Client-generated token
        local_token: String,
    },
}

impl Identity {
    /// Returns the registered user, refusing guests.
    ///
    /// # Errors
    /// [`Error::Authentication`] for a guest.
    pub fn require_registered(self) -> Result<RegisteredUser> {
        match self {
            Self::Registered(user) => Ok(user),
            Self::Guest { .. } => Err(Error::Authentication {
                message: "Guests cannot purchase credits; sign in first".to_string(),
            }),
        }
    }
}

/// Where a purchaser identity was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// The currently authenticated session
    ActiveSession,
    /// The checkout intent recorded before redirecting to the provider
    CheckoutIntent,
    /// A session cached on the client from an earlier visit
    CachedSession,
}

/// Picks the purchaser for a return-page visit.
///
/// Falls back through the active session, the recorded checkout intent and the
/// client's cached session, in that order. Guest identities are skipped at every step.
/// Returns `None` when nobody can be identified.
#[must_use]
pub fn resolve_purchaser(
    active: Option<&Identity>,
    intent: Option<&RegisteredUser>,
    cached: Option<&Identity>,
) -> Option<(RegisteredUser, IdentitySource)> {
    let registered = |identity: Option<&Identity>| match identity {
        Some(Identity::Registered(user)) => Some(user.clone()),
        _ => None,
    };

    registered(active)
        .map(|u| (u, IdentitySource::ActiveSession))
        .or_else(|| intent.cloned().map(|u| (u, IdentitySource::CheckoutIntent)))
        .or_else(|| registered(cached).map(|u| (u, IdentitySource::CachedSession)))
}
