//! Client-observable state of a single purchase attempt.
//!
//! `pending -> checking_auth -> processing -> {succeeded | duplicate | error}`, with
//! `error -> processing` allowed for a manual retry. `succeeded` and `duplicate` are
//! terminal; re-entering them is a no-op.

use crate::{
    core::credits::CreditOutcome,
    errors::{Error, Result},
};
use serde::Serialize;

/// States of a purchase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Landed on the return page, nothing done yet
    Pending,
    /// Working out who the purchaser is
    CheckingAuth,
    /// Applying credits
    Processing,
    /// Credits applied by this attempt
    Succeeded,
    /// Payment had already been credited
    Duplicate,
    /// Failed; may be retried
    Error,
}

impl AttemptStatus {
    /// Label used in responses and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::CheckingAuth => "checking_auth",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Duplicate => "duplicate",
            Self::Error => "error",
        }
    }

    /// Whether the attempt is finished for good.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Duplicate)
    }

    const fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::CheckingAuth)
                | (Self::CheckingAuth | Self::Error, Self::Processing)
                | (Self::CheckingAuth | Self::Processing, Self::Error)
                | (Self::Processing, Self::Succeeded | Self::Duplicate)
        )
    }
}

/// One purchase attempt and what came of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseAttempt {
    status: AttemptStatus,
    outcome: Option<CreditOutcome>,
    last_error: Option<String>,
    retries: u32,
}

impl Default for PurchaseAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl PurchaseAttempt {
    /// A fresh attempt in `pending`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: AttemptStatus::Pending,
            outcome: None,
            last_error: None,
            retries: 0,
        }
    }

    /// An attempt the client reports as having failed earlier, ready to be retried.
    #[must_use]
    pub fn resumed_after_error(message: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Error,
            last_error: Some(message.into()),
            ..Self::new()
        }
    }

    /// Current state.
    #[must_use]
    pub const fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Outcome recorded when the attempt finished.
    #[must_use]
    pub const fn outcome(&self) -> Option<&CreditOutcome> {
        self.outcome.as_ref()
    }

    /// Most recent error message.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of times the attempt went from `error` back to `processing`.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    fn transition(&mut self, next: AttemptStatus) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        if self.status == AttemptStatus::Error && next == AttemptStatus::Processing {
            self.retries += 1;
        }
        self.status = next;
        Ok(())
    }

    /// `pending -> checking_auth`.
    pub fn check_auth(&mut self) -> Result<()> {
        self.transition(AttemptStatus::CheckingAuth)
    }

    /// `checking_auth -> processing`, or `error -> processing` on retry.
    ///
    /// Returns `false` without changing anything if the attempt already finished.
    pub fn begin_processing(&mut self) -> Result<bool> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        self.transition(AttemptStatus::Processing)?;
        Ok(true)
    }

    /// Records the result of the credit application.
    ///
    /// Finishing an already finished attempt keeps the first outcome.
    pub fn finish(&mut self, outcome: CreditOutcome) -> Result<()> {
        if self.status.is_terminal() {
            return Ok(());
        }
        let next = if outcome.is_duplicate() {
            AttemptStatus::Duplicate
        } else {
            AttemptStatus::Succeeded
        };
        self.transition(next)?;
        self.outcome = Some(outcome);
        self.last_error = None;
        Ok(())
    }

    /// Marks the attempt failed. Failing again while in `error` only replaces the message.
    pub fn fail(&mut self, error: &Error) -> Result<()> {
        if self.status != AttemptStatus::Error {
            self.transition(AttemptStatus::Error)?;
        }
        self.last_error = Some(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::key::{PaymentEvidence, canonical_key};

    fn applied() -> CreditOutcome {
        CreditOutcome::Applied {
            key: canonical_key(&PaymentEvidence::order("ord_1")).unwrap(),
            credits_delta: 10,
            new_balance: 10,
        }
    }

    fn duplicate() -> CreditOutcome {
        CreditOutcome::Duplicate {
            key: canonical_key(&PaymentEvidence::order("ord_1")).unwrap(),
            balance: 10,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth().unwrap();
        assert!(attempt.begin_processing().unwrap());
        attempt.finish(applied()).unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Succeeded);
        assert_eq!(attempt.outcome(), Some(&applied()));
    }

    #[test]
    fn test_duplicate_outcome_is_terminal() {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth().unwrap();
        attempt.begin_processing().unwrap();
        attempt.finish(duplicate()).unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Duplicate);

        // Re-entry is a no-op
        assert!(!attempt.begin_processing().unwrap());
        attempt.finish(applied()).unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Duplicate);
        assert_eq!(attempt.outcome(), Some(&duplicate()));
    }

    #[test]
    fn test_retry_after_error() {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth().unwrap();
        attempt.begin_processing().unwrap();
        attempt
            .fail(&Error::UpstreamProvider {
                message: "timeout".to_string(),
            })
            .unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Error);
        assert!(attempt.last_error().unwrap().contains("timeout"));

        assert!(attempt.begin_processing().unwrap());
        assert_eq!(attempt.retries(), 1);
        attempt.finish(applied()).unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Succeeded);
        assert!(attempt.last_error().is_none());
    }

    #[test]
    fn test_auth_failure_goes_to_error() {
        let mut attempt = PurchaseAttempt::new();
        attempt.check_auth().unwrap();
        attempt.fail(&Error::validation("no user")).unwrap();
        assert_eq!(attempt.status(), AttemptStatus::Error);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut attempt = PurchaseAttempt::new();
        assert!(matches!(
            attempt.begin_processing(),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(attempt.finish(applied()).is_err());
        assert!(attempt.fail(&Error::validation("x")).is_err());
        assert_eq!(attempt.status(), AttemptStatus::Pending);
    }

    #[test]
    fn test_resumed_attempt_starts_in_error() {
        let attempt = PurchaseAttempt::resumed_after_error("network");
        assert_eq!(attempt.status(), AttemptStatus::Error);
        assert_eq!(attempt.last_error(), Some("network"));
    }
}
