//! Core business logic - framework-agnostic ledger, idempotency and reconciliation.
//!
//! Everything here works on a `DatabaseConnection` and, where the provider is involved,
//! a `&dyn PaymentProvider`. The HTTP layer in [`crate::api`] only translates requests
//! into calls to these modules.

pub mod attempt;
pub mod catalog;
pub mod checkout;
pub mod credits;
pub mod guard;
pub mod identity;
pub mod key;
pub mod ledger;
pub mod poller;
pub mod reconcile;
pub mod return_page;
pub mod webhook;
