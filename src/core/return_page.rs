//! Return-page triggers: direct processing, authenticated processing and manual retry.
//!
//! All three recover a purchaser, build [`PaymentEvidence`] from whatever the page
//! knows, and hand off to [`credits::apply_purchase`]. They never invent keys: without an
//! order id, a transaction id or a checkout session the visit is rejected.

use crate::{
    core::{
        attempt::PurchaseAttempt,
        catalog::CreditCatalog,
        checkout,
        credits::{self, PurchaseRequest},
        guard::PurchaseSource,
        identity::{self, Identity, IdentitySource, RegisteredUser},
        key::PaymentEvidence,
    },
    errors::{Error, Result},
};
use sea_orm::DatabaseConnection;
use tracing::{info, warn};

/// What the browser knows when it lands back on the app after checkout.
#[derive(Debug, Clone, Default)]
pub struct ReturnVisit {
    /// Identity of the current session, if any
    pub active_session: Option<Identity>,
    /// Identity cached by the client from an earlier session
    pub cached_session: Option<Identity>,
    /// Checkout session id from the return URL
    pub checkout_session_id: Option<String>,
    /// Provider order id, when the provider appended it to the return URL
    pub order_id: Option<String>,
    /// Key reported by an earlier attempt
    pub transaction_id: Option<String>,
    /// Package the client believes was bought
    pub package_id: Option<String>,
    /// Amount the client believes was paid
    pub paid_amount: Option<f64>,
    /// Credits the client believes it is owed (untrusted)
    pub client_credits: Option<i64>,
}

/// A finished return-page attempt.
#[derive(Debug, Clone)]
pub struct VisitResult {
    /// Final attempt state, with the credit outcome attached
    pub attempt: PurchaseAttempt,
    /// Who was credited
    pub purchaser: RegisteredUser,
    /// Where the purchaser was recovered from
    pub identity_source: IdentitySource,
}

/// Runs the return-page triggers against the ledger.
#[derive(Debug, Clone, Copy)]
pub struct ReturnPageProcessor<'a> {
    db: &'a DatabaseConnection,
    catalog: &'a CreditCatalog,
}

impl<'a> ReturnPageProcessor<'a> {
    /// Creates a processor.
    #[must_use]
    pub const fn new(db: &'a DatabaseConnection, catalog: &'a CreditCatalog) -> Self {
        Self { db, catalog }
    }

    /// Processes a visit before authentication is confirmed.
    ///
    /// The purchaser is the active session's user, else the user who opened the
    /// checkout, else the client's cached user. With a known checkout session the package
    /// always comes from its intent; a conflicting client package is rejected.
    pub async fn process_direct(&self, visit: &ReturnVisit) -> Result<VisitResult> {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth()?;
        self.run(attempt, visit, PurchaseSource::ReturnPageDirect, false)
            .await
    }

    /// Processes a visit once the session is known to be authenticated.
    ///
    /// # Errors
    /// [`Error::Authentication`] if there is no active session or it is a guest.
    pub async fn process_authenticated(&self, visit: &ReturnVisit) -> Result<VisitResult> {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth()?;
        self.run(attempt, visit, PurchaseSource::ReturnPageAuthenticated, true)
            .await
    }

    /// Retries an attempt that previously ended in `error`.
    ///
    /// Uses the same evidence and identity fallback as the direct path; the transaction
    /// key is therefore the same as the failed attempt's.
    pub async fn retry(&self, attempt: PurchaseAttempt, visit: &ReturnVisit) -> Result<VisitResult> {
        self.run(attempt, visit, PurchaseSource::Retry, false).await
    }

    async fn run(
        &self,
        mut attempt: PurchaseAttempt,
        visit: &ReturnVisit,
        source: PurchaseSource,
        require_session: bool,
    ) -> Result<VisitResult> {
        let prepared = self.prepare(visit, require_session).await;
        let (purchaser, identity_source, request) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                attempt.fail(&e)?;
                warn!(source = %source, error = %e, "Return-page visit rejected");
                return Err(e);
            }
        };

        if !attempt.begin_processing()? {
            return Ok(VisitResult {
                attempt,
                purchaser,
                identity_source,
            });
        }

        let request = PurchaseRequest { source, ..request };
        match credits::apply_purchase(self.db, self.catalog, request).await {
            Ok(outcome) => {
                info!(
                    user_id = %purchaser.id,
                    source = %source,
                    identity = ?identity_source,
                    duplicate = outcome.is_duplicate(),
                    "Return-page purchase processed"
                );
                attempt.finish(outcome)?;
                Ok(VisitResult {
                    attempt,
                    purchaser,
                    identity_source,
                })
            }
            Err(e) => {
                attempt.fail(&e)?;
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        visit: &ReturnVisit,
        require_session: bool,
    ) -> Result<(RegisteredUser, IdentitySource, PurchaseRequest)> {
        let intent = match visit.checkout_session_id.as_deref() {
            Some(session_id) => checkout::get_intent(self.db, session_id).await?,
            None => None,
        };

        let (purchaser, identity_source) = if require_session {
            let user = visit
                .active_session
                .clone()
                .ok_or_else(|| Error::Authentication {
                    message: "No active session".to_string(),
                })?
                .require_registered()?;
            (user, IdentitySource::ActiveSession)
        } else {
            let intent_user = intent.as_ref().map(|i| RegisteredUser {
                id: i.user_id.clone(),
                email: i.email.clone(),
            });
            identity::resolve_purchaser(
                visit.active_session.as_ref(),
                intent_user.as_ref(),
                visit.cached_session.as_ref(),
            )
            .ok_or_else(|| Error::Authentication {
                message: "Cannot tell who made this purchase".to_string(),
            })?
        };

        let reported = visit
            .package_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let package_id = match (intent.as_ref(), reported) {
            (Some(intent), Some(reported)) if reported != intent.package_id => {
                return Err(Error::validation(format!(
                    "Package '{reported}' does not match checkout session '{}'",
                    intent.session_id
                )));
            }
            (Some(intent), _) => intent.package_id.clone(),
            (None, Some(reported)) => reported.to_string(),
            (None, None) => return Err(Error::validation("Missing package id")),
        };

        let request = PurchaseRequest {
            user_id: purchaser.id.clone(),
            evidence: PaymentEvidence {
                order_id: visit.order_id.clone(),
                transaction_id: visit.transaction_id.clone(),
                session_id: visit.checkout_session_id.clone(),
                package_id: Some(package_id.clone()),
            },
            package_id,
            paid_amount: visit.paid_amount,
            client_credits: visit.client_credits,
            source: PurchaseSource::ReturnPageDirect,
        };

        Ok((purchaser, identity_source, request))
    }
}
