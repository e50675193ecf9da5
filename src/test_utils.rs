//! Shared test utilities.
//!
//! Builds an in-memory `SQLite` ledger with all tables, seeds accounts, and provides a
//! scripted [`PaymentProvider`] so reconciliation paths run without network access.

use crate::{
    api::{self, AppState},
    config::{
        database::{create_connection, create_tables},
        settings::Environment,
    },
    core::{
        catalog::{CreditCatalog, CreditPackage, FallbackPolicy},
        checkout,
        identity::RegisteredUser,
        ledger,
        poller::PollerConfig,
    },
    entities,
    errors::Result,
    provider::{
        CheckoutRequest, CheckoutSession, CustomData, OrderStatus, PaymentProvider,
        ProviderError, ProviderOrder, signature::WebhookVerifier,
    },
};
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt as _;

/// Webhook signing secret used by [`test_app`].
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

/// Free credits granted by accounts created through [`test_app`].
pub const TEST_FREE_CREDITS: i64 = 5;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = create_connection("sqlite::memory:").await?;
    create_tables(&db).await?;
    Ok(db)
}

/// Creates a test account with sensible defaults.
///
/// # Defaults
/// * `email`: `<id>@example.com`
/// * `credits`: 0
pub async fn create_test_user(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<entities::user_account::Model> {
    ledger::create_user_account(db, user_id, &format!("{user_id}@example.com"), 0).await
}

/// Creates a test account with a custom email and starting balance.
pub async fn create_custom_user(
    db: &DatabaseConnection,
    user_id: &str,
    email: &str,
    credits: i64,
) -> Result<entities::user_account::Model> {
    ledger::create_user_account(db, user_id, email, credits).await
}

/// A paid $5 order placed just now by `email`, with no custom data.
pub fn paid_order(id: &str, email: &str) -> ProviderOrder {
    ProviderOrder {
        id: id.to_string(),
        status: OrderStatus::Paid,
        user_email: email.to_string(),
        total_cents: 500,
        currency: "USD".to_string(),
        variant_id: None,
        created_at: Utc::now(),
        custom: CustomData::default(),
    }
}

/// Custom data naming a user and package.
pub fn custom(user_id: &str, package_id: &str) -> CustomData {
    CustomData {
        user_id: Some(user_id.to_string()),
        package_id: Some(package_id.to_string()),
        credits: None,
        session_id: None,
    }
}

/// In-memory provider returning whatever orders the test scripted.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    orders: Mutex<Vec<ProviderOrder>>,
    failure: Mutex<Option<ProviderError>>,
    checkouts: Mutex<Vec<CheckoutRequest>>,
    list_calls: AtomicUsize,
}

impl ScriptedProvider {
    /// A provider that already knows these orders.
    pub fn with_orders(orders: Vec<ProviderOrder>) -> Self {
        let provider = Self::default();
        *provider.orders.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = orders;
        provider
    }

    /// Adds an order.
    pub fn push_order(&self, order: ProviderOrder) {
        self.orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(order);
    }

    /// Makes every call fail with `error` until [`Self::recover`].
    pub fn fail_with(&self, error: ProviderError) {
        *self
            .failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(error);
    }

    /// Clears a scripted failure.
    pub fn recover(&self) {
        *self
            .failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }

    /// Checkout requests received so far.
    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.checkouts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Number of `list_orders` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self) -> Option<ProviderError> {
        self.failure
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> std::result::Result<CheckoutSession, ProviderError> {
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        self.checkouts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());
        Ok(CheckoutSession {
            id: format!("chk_{}", request.session_id),
            url: format!("https://pay.test/{}", request.session_id),
        })
    }

    async fn list_orders(
        &self,
        email: &str,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<ProviderOrder>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scripted_failure() {
            return Err(error);
        }
        Ok(self
            .orders
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|o| o.user_email.eq_ignore_ascii_case(email))
            .filter(|o| since.is_none_or(|since| o.created_at >= since))
            .cloned()
            .collect())
    }
}

/// The built-in packages, with provider variants attached.
pub fn test_catalog() -> CreditCatalog {
    let package = |id: &str, credits: i64, price: f64| CreditPackage {
        id: id.to_string(),
        credits,
        price,
        variant_id: Some(format!("v_{id}")),
    };
    CreditCatalog::new(
        vec![package("basic", 10, 1.0), package("premium", 100, 5.0)],
        FallbackPolicy::default(),
    )
    .unwrap_or_default()
}

/// Records a checkout intent for `<user_id>@example.com`.
pub async fn record_test_intent(
    db: &DatabaseConnection,
    session_id: &str,
    user_id: &str,
    package_id: &str,
) -> Result<entities::checkout_intent::Model> {
    let user = RegisteredUser {
        id: user_id.to_string(),
        email: format!("{user_id}@example.com"),
    };
    checkout::record_intent(db, session_id, &user, package_id, None).await
}

/// Full router over a fresh database and a scripted provider.
///
/// Webhooks must be signed with [`TEST_WEBHOOK_SECRET`]; pollers tick every 10ms for
/// 200ms.
pub async fn test_app() -> Result<(Router, Arc<DatabaseConnection>, Arc<ScriptedProvider>)> {
    let (state, provider) = test_state().await?;
    let db = Arc::clone(&state.db);
    Ok((api::router(state), db, provider))
}

/// Application state over a fresh database and a scripted provider.
pub async fn test_state() -> Result<(AppState, Arc<ScriptedProvider>)> {
    let db = Arc::new(setup_test_db().await?);
    let provider = Arc::new(ScriptedProvider::default());
    let state = AppState {
        db,
        catalog: Arc::new(test_catalog()),
        provider: Arc::clone(&provider) as Arc<dyn PaymentProvider>,
        verifier: Arc::new(WebhookVerifier::new(
            Some(TEST_WEBHOOK_SECRET.to_string()),
            Environment::Development,
        )?),
        poller: PollerConfig {
            interval: Duration::from_millis(10),
            window: Duration::from_millis(200),
        },
        free_credits: TEST_FREE_CREDITS,
    };
    Ok((state, provider))
}

/// Sends a request and returns the status with the body parsed as JSON
/// (`Value::Null` when the body is not JSON).
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

/// Sends a JSON body.
pub async fn send_json(app: Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default();
    send(app, request).await
}

/// Sends a request without a body.
pub async fn send_empty(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap_or_default();
    send(app, request).await
}
