//! `/api/webhooks/lemon-squeezy` - signed provider events, and a capability probe.

use super::AppState;
use crate::{
    core::webhook::{self, WebhookOutcome},
    errors::{Error, Result},
    provider::{
        lemon_squeezy::{self, SUPPORTED_EVENTS},
        signature::SIGNATURE_HEADER,
    },
};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;
use tracing::info;

/// `POST` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    /// Always true; failures are error responses
    pub success: bool,
    /// The event had already been applied
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    /// Event name
    pub event: String,
    /// `credited`, `refunded`, `acknowledged` or `ignored`
    pub action: &'static str,
}

/// Receives a webhook delivery.
///
/// The signature is checked over the raw body before anything is parsed.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state.verifier.verify(&body, signature)?;

    let event = lemon_squeezy::parse_webhook(&body)
        .map_err(|e| Error::validation(format!("Invalid webhook payload: {e}")))?;
    info!(event = %event.name, order_id = %event.order.id, "Webhook received");

    let outcome = webhook::handle_event(&*state.db, &state.catalog, &event).await?;

    let action = match &outcome {
        WebhookOutcome::Credited(_) => "credited",
        WebhookOutcome::Refunded(_) => "refunded",
        WebhookOutcome::Acknowledged { .. } => "acknowledged",
        WebhookOutcome::Ignored { .. } => "ignored",
    };

    Ok(Json(WebhookResponse {
        success: true,
        duplicate: outcome.is_duplicate(),
        event: event.name,
        action,
    }))
}

/// `GET` response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookHealth {
    /// Always `ok`
    pub status: &'static str,
    /// Provider name
    pub provider: &'static str,
    /// Events the receiver understands
    pub events: [&'static str; 4],
    /// `enabled` when a signing secret is configured
    pub signature_verification: &'static str,
}

/// Reports what the receiver supports.
pub async fn health(State(state): State<AppState>) -> Json<WebhookHealth> {
    Json(WebhookHealth {
        status: "ok",
        provider: "lemon-squeezy",
        events: SUPPORTED_EVENTS,
        signature_verification: if state.verifier.is_enforced() {
            "enabled"
        } else {
            "disabled"
        },
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use crate::{
        core::ledger,
        errors::Result,
        provider::signature::signature_hex,
        test_utils::*,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};

    fn order_event(name: &str, order_id: &str, status: &str) -> Value {
        json!({
            "meta": {
                "event_name": name,
                "custom_data": {"user_id": "u1", "package_id": "premium", "credits": 100}
            },
            "data": {
                "type": "orders",
                "id": order_id,
                "attributes": {
                    "status": status,
                    "user_email": "u1@example.com",
                    "total": 500,
                    "currency": "USD",
                    "credits": 999_999
                }
            }
        })
    }

    fn signed(body: &Value, secret: &str) -> Request<Body> {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = signature_hex(secret, &raw).unwrap();
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/lemon-squeezy")
            .header("content-type", "application/json")
            .header("X-Signature", signature)
            .body(Body::from(raw))
            .unwrap()
    }

    #[tokio::test]
    async fn test_order_created_retried_by_provider() -> Result<()> {
        let (app, db, _) = test_app().await?;
        create_custom_user(&db, "u1", "u1@example.com", 5).await?;
        let event = order_event("order_created", "ord_42", "paid");

        let (status, body) = send(app.clone(), signed(&event, TEST_WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body.get("duplicate").is_none());
        assert_eq!(ledger::get_balance(&db, "u1").await?, 105);

        let (status, body) = send(app, signed(&event, TEST_WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["duplicate"], true);
        assert_eq!(ledger::get_balance(&db, "u1").await?, 105);

        let record = ledger::get_purchase(&*db, "ord_42").await?.unwrap();
        assert_eq!(record.credits, 100);
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_signatures_rejected() -> Result<()> {
        let (app, db, _) = test_app().await?;
        create_test_user(&db, "u1").await?;
        let event = order_event("order_created", "ord_1", "paid");

        let (status, _) = send(app.clone(), signed(&event, "wrong_secret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let unsigned = Request::builder()
            .method("POST")
            .uri("/api/webhooks/lemon-squeezy")
            .body(Body::from(serde_json::to_vec(&event).unwrap()))
            .unwrap();
        let (status, _) = send(app, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(ledger::get_balance(&db, "u1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_refund_event() -> Result<()> {
        let (app, db, _) = test_app().await?;
        create_test_user(&db, "u1").await?;

        send(app.clone(), signed(&order_event("order_created", "ord_7", "paid"), TEST_WEBHOOK_SECRET)).await;
        let refund = order_event("order_refunded", "ord_7", "refunded");
        let (status, body) = send(app.clone(), signed(&refund, TEST_WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "refunded");
        assert_eq!(ledger::get_balance(&db, "u1").await?, 0);

        let (_, body) = send(app, signed(&refund, TEST_WEBHOOK_SECRET)).await;
        assert_eq!(body["duplicate"], true);
        Ok(())
    }

    #[tokio::test]
    async fn test_return_page_and_webhook_share_checkout_package() -> Result<()> {
        let (app, db, _) = test_app().await?;
        create_test_user(&db, "u1").await?;
        record_test_intent(&db, "sess_1", "u1", "basic").await?;

        let (status, _) = send_json(
            app.clone(),
            "POST",
            "/api/process-purchase",
            json!({"sessionId": "sess_1", "packageId": "premium"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send_json(
            app.clone(),
            "POST",
            "/api/process-purchase",
            json!({"sessionId": "sess_1"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["creditsAdded"], 10);

        let mut event = order_event("order_created", "ord_9", "paid");
        event["meta"]["custom_data"] =
            json!({"user_id": "u1", "package_id": "basic", "session_id": "sess_1"});
        event["data"]["attributes"]["total"] = json!(100);
        let (status, body) = send(app, signed(&event, TEST_WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["duplicate"], true);
        assert_eq!(ledger::get_balance(&db, "u1").await?, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_payload() -> Result<()> {
        let (app, _db, _) = test_app().await?;
        let (status, body) = send(app, signed(&json!({"hello": "world"}), TEST_WEBHOOK_SECRET)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        Ok(())
    }

    #[tokio::test]
    async fn test_health() -> Result<()> {
        let (app, _db, _) = test_app().await?;
        let (status, body) = send_empty(app, "GET", "/api/webhooks/lemon-squeezy").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["signatureVerification"], "enabled");
        assert_eq!(body["events"][0], "order_created");
        Ok(())
    }
}
