//! `WishCredits` - credit purchases for a pay-per-message wish generator
//!
//! This crate keeps a ledger of user credit balances and reconciles payments from the
//! payment provider into it. Several independent triggers (provider webhooks, the
//! checkout return page, manual retries, and a background poller) may all observe the
//! same payment; the ledger credits each payment at most once.
#![deny(
    unsafe_code,
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,

    // Ledger code must not panic or print
    clippy::dbg_macro,
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unwrap_used,

    // Arc clones of the shared state stay explicit
    clippy::clone_on_ref_ptr,
    clippy::float_cmp,
    clippy::needless_pass_by_value,
    rust_2018_idioms,
)]
// `# Errors` sections are written where the variants matter to callers
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
)]

/// HTTP interface - axum routes and handlers
pub mod api;
/// Configuration management for database, package catalog and application settings
pub mod config;
/// Core business logic - ledger, idempotency guard and reconciliation triggers
pub mod core;
/// SeaORM entity definitions for database tables
pub mod entities;
/// Unified error types and result handling
pub mod errors;
/// Payment provider client, webhook model and signature verification
pub mod provider;

#[cfg(test)]
pub mod test_utils;
