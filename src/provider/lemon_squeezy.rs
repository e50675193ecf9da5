//! Lemon Squeezy client and webhook payload model.
//!
//! The API speaks JSON:API. Only the two calls the reconciliation layer needs are
//! implemented: opening a checkout and listing a customer's orders.

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use reqwest::{
    Client, StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::json;
use tracing::warn;

use super::{
    CheckoutRequest, CheckoutSession, CustomData, OrderStatus, PaymentProvider, ProviderError,
    ProviderOrder, lenient_id,
};

/// Production API root.
pub const DEFAULT_API_URL: &str = "https://api.lemonsqueezy.com/v1";
const JSON_API: &str = "application/vnd.api+json";
const PAGE_SIZE: u32 = 50;

/// Webhook events this service subscribes to.
pub const SUPPORTED_EVENTS: [&str; 4] = [
    "order_created",
    "order_refunded",
    "subscription_payment_failed",
    "subscription_payment_success",
];

/// Lemon Squeezy API client.
#[derive(Debug, Clone)]
pub struct LemonSqueezyClient {
    http: Client,
    api_url: String,
    api_key: String,
    store_id: String,
}

impl LemonSqueezyClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

    /// Creates a client for the given store.
    ///
    /// # Errors
    /// [`ProviderError::NotConfigured`] when the key or store id is blank,
    /// [`ProviderError::Transport`] when the HTTP client cannot be built.
    pub fn new(
        api_url: Option<String>,
        api_key: String,
        store_id: String,
    ) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "LEMON_SQUEEZY_API_KEY is empty".to_string(),
            ));
        }
        if store_id.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "LEMON_SQUEEZY_STORE_ID is empty".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("wish-credits/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_url: api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            store_id,
        })
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(3)
            .with_jitter()
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let res = request
            .bearer_auth(&self.api_key)
            .header(ACCEPT, JSON_API)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match res.status() {
            s if s.is_success() => res
                .json::<T>()
                .await
                .map_err(|e| ProviderError::Serde(e.to_string())),
            StatusCode::UNAUTHORIZED => Err(ProviderError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = res.text().await.unwrap_or_default();
                Err(ProviderError::Http { status, body })
            }
        }
    }

    async fn fetch_orders_page(
        &self,
        email: &str,
        page: u32,
    ) -> Result<OrderList, ProviderError> {
        let page_number = page.to_string();
        let page_size = PAGE_SIZE.to_string();
        let request = self.http.get(format!("{}/orders", self.api_url)).query(&[
            ("filter[store_id]", self.store_id.as_str()),
            ("filter[user_email]", email),
            ("page[number]", page_number.as_str()),
            ("page[size]", page_size.as_str()),
        ]);
        self.send(request).await
    }
}

#[async_trait]
impl PaymentProvider for LemonSqueezyClient {
    fn name(&self) -> &'static str {
        "lemon-squeezy"
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let body = checkout_body(&self.store_id, request);
        let url = format!("{}/checkouts", self.api_url);

        let response: CheckoutResponse = (|| async {
            let builder = self
                .http
                .post(&url)
                .header(CONTENT_TYPE, JSON_API)
                .json(&body);
            self.send(builder).await
        })
        .retry(Self::backoff())
        .when(ProviderError::should_retry)
        .notify(|e, dur| {
            warn!(
                "Lemon Squeezy checkout failed, retrying after {:.2}s: {}",
                dur.as_secs_f64(),
                e
            );
        })
        .await?;

        Ok(CheckoutSession {
            id: response.data.id,
            url: response.data.attributes.url,
        })
    }

    async fn list_orders(
        &self,
        email: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<ProviderOrder>, ProviderError> {
        let mut orders = Vec::new();
        let mut page = 1;

        loop {
            let list = (|| self.fetch_orders_page(email, page))
                .retry(Self::backoff())
                .when(ProviderError::should_retry)
                .notify(|e, dur| {
                    warn!(
                        "Lemon Squeezy order list failed, retrying after {:.2}s: {}",
                        dur.as_secs_f64(),
                        e
                    );
                })
                .await?;

            let has_next = list.links.and_then(|l| l.next).is_some();
            orders.extend(list.data.into_iter().map(OrderResource::into_order));

            if !has_next {
                break;
            }
            page += 1;
        }

        if let Some(since) = since {
            orders.retain(|o| o.created_at >= since);
        }
        Ok(orders)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Transport(e.to_string())
    }
}

/// Builds the JSON:API body for `POST /checkouts`.
fn checkout_body(store_id: &str, request: &CheckoutRequest) -> serde_json::Value {
    json!({
        "data": {
            "type": "checkouts",
            "attributes": {
                "checkout_data": {
                    "email": request.email,
                    "custom": {
                        "user_id": request.user_id,
                        "package_id": request.package_id,
                        "session_id": request.session_id,
                    }
                }
            },
            "relationships": {
                "store": { "data": { "type": "stores", "id": store_id } },
                "variant": { "data": { "type": "variants", "id": request.variant_id } }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    data: CheckoutResource,
}

#[derive(Debug, Deserialize)]
struct CheckoutResource {
    id: String,
    attributes: CheckoutAttributes,
}

#[derive(Debug, Deserialize)]
struct CheckoutAttributes {
    url: String,
}

#[derive(Debug, Deserialize)]
struct OrderList {
    data: Vec<OrderResource>,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrderResource {
    #[serde(default, deserialize_with = "lenient_id")]
    id: Option<String>,
    attributes: OrderAttributes,
}

impl OrderResource {
    fn into_order(self) -> ProviderOrder {
        self.attributes
            .into_order(self.id.unwrap_or_default(), CustomData::default())
    }
}

/// Order (or invoice) attributes; every field is optional because subscription events
/// reuse the envelope with a different resource type.
#[derive(Debug, Deserialize)]
struct OrderAttributes {
    #[serde(default = "unknown_status")]
    status: OrderStatus,
    #[serde(default)]
    user_email: String,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    first_order_item: Option<OrderItem>,
    #[serde(default)]
    custom_data: Option<CustomData>,
}

impl OrderAttributes {
    fn into_order(self, id: String, custom: CustomData) -> ProviderOrder {
        ProviderOrder {
            id,
            status: self.status,
            user_email: self.user_email,
            total_cents: self.total,
            currency: self.currency,
            variant_id: self.first_order_item.and_then(|i| i.variant_id),
            created_at: self.created_at.unwrap_or_else(Utc::now),
            custom: self.custom_data.unwrap_or(custom),
        }
    }
}

const fn unknown_status() -> OrderStatus {
    OrderStatus::Unknown
}

#[derive(Debug, Deserialize)]
struct OrderItem {
    #[serde(default, deserialize_with = "lenient_id")]
    variant_id: Option<String>,
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    /// `meta.event_name`
    pub name: String,
    /// The order (or invoice) the event is about, with `meta.custom_data` attached
    pub order: ProviderOrder,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    meta: WebhookMeta,
    data: OrderResource,
}

#[derive(Debug, Deserialize)]
struct WebhookMeta {
    event_name: String,
    #[serde(default)]
    custom_data: Option<CustomData>,
}

/// Parses a webhook body. Call only after the signature has been verified.
///
/// # Errors
/// [`ProviderError::Serde`] if the body is not a Lemon Squeezy event.
pub fn parse_webhook(body: &[u8]) -> Result<WebhookEvent, ProviderError> {
    let payload: WebhookPayload =
        serde_json::from_slice(body).map_err(|e| ProviderError::Serde(e.to_string()))?;

    let custom = payload.meta.custom_data.unwrap_or_default();
    let id = payload.data.id.unwrap_or_default();
    let mut order = payload.data.attributes.into_order(id, CustomData::default());
    order.custom = custom;

    Ok(WebhookEvent {
        name: payload.meta.event_name,
        order,
    })
}
