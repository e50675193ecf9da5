//! Background poller that reconciles a user's orders for a while after checkout.
//!
//! Started when a checkout is opened. Every `interval` it runs a reconciliation pass
//! over orders placed since the checkout, and stops once the payment has been credited
//! (by itself or by any other trigger) or when `window` has elapsed. Errors are logged
//! and the next tick tries again.

use crate::{
    core::{catalog::CreditCatalog, credits::CreditOutcome, reconcile},
    provider::PaymentProvider,
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tracing::{debug, info, warn};

/// Poll cadence and lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between checks
    pub interval: Duration,
    /// Total time to keep checking
    pub window: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            window: Duration::from_secs(30 * 60),
        }
    }
}

/// Why a poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// This poller credited the payment.
    Credited,
    /// Another trigger had already credited it.
    AlreadyCredited,
    /// The window elapsed without a paid order.
    WindowElapsed,
}

/// What a finished poller did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSummary {
    /// Reconciliation passes run
    pub checks: u32,
    /// Credits applied by this poller
    pub credited: Vec<CreditOutcome>,
    /// Why it stopped
    pub stop_reason: StopReason,
}

/// Polls the provider for one user's new orders.
#[derive(Clone)]
pub struct CheckoutPoller {
    db: Arc<DatabaseConnection>,
    catalog: Arc<CreditCatalog>,
    provider: Arc<dyn PaymentProvider>,
    config: PollerConfig,
}

impl CheckoutPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<CreditCatalog>,
        provider: Arc<dyn PaymentProvider>,
        config: PollerConfig,
    ) -> Self {
        Self {
            db,
            catalog,
            provider,
            config,
        }
    }

    /// Spawns a poller for `user_id`, looking at orders created at or after `since`.
    pub fn spawn(self, user_id: String, since: DateTime<Utc>) -> JoinHandle<PollSummary> {
        tokio::spawn(async move { self.run(&user_id, since).await })
    }

    /// Runs the poll loop to completion.
    pub async fn run(&self, user_id: &str, since: DateTime<Utc>) -> PollSummary {
        info!(
            user_id,
            interval = ?self.config.interval,
            window = ?self.config.window,
            "Starting checkout poller"
        );

        let deadline = Instant::now() + self.config.window;
        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut checks = 0;
        let mut credited = Vec::new();

        let stop_reason = loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = sleep_until(deadline) => break StopReason::WindowElapsed,
            }
            if Instant::now() >= deadline {
                break StopReason::WindowElapsed;
            }

            checks += 1;
            match reconcile::reconcile_user_orders(
                &self.db,
                &self.catalog,
                self.provider.as_ref(),
                user_id,
                Some(since),
            )
            .await
            {
                Ok(summary) if !summary.applied.is_empty() => {
                    credited.extend(summary.applied);
                    break StopReason::Credited;
                }
                Ok(summary) if summary.payment_found() => break StopReason::AlreadyCredited,
                Ok(_) => debug!(user_id, checks, "No paid order yet"),
                Err(e) => warn!(user_id, checks, error = %e, "Checkout poll failed"),
            }
        };

        info!(user_id, checks, reason = ?stop_reason, "Checkout poller stopped");
        PollSummary {
            checks,
            credited,
            stop_reason,
        }
    }
}
