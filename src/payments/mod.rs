use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, instrument};

pub mod signature;

/// One display line of the hosted payment page. Amounts are integer cents;
/// the gateway API does not accept decimals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    pub amount_cents: i64,
    pub quantity: i64,
}

/// Request to open a hosted checkout session for an order.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub order_number: String,
    pub customer_email: String,
    pub line_items: Vec<SessionLineItem>,
    /// Positive when a coupon applies; the charged amount is always
    /// `total_cents`, not the line-item sum.
    pub discount_cents: i64,
    pub total_cents: i64,
    pub success_url: String,
    pub cancel_url: String,
}

/// Handle to a created session: the id the confirmation webhook will
/// reference, and the URL the customer is redirected to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub url: String,
}

/// External payment gateway contract: create a hosted session and later
/// deliver a signed `checkout.session.completed` event for it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, req: SessionRequest) -> Result<SessionHandle, ServiceError>;
}

/// Stripe-backed gateway using the Checkout Sessions REST endpoint.
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: String,
}

impl StripeGateway {
    pub fn new(secret_key: String) -> Result<Self, ServiceError> {
        Self::with_api_base(secret_key, "https://api.stripe.com".to_string())
    }

    pub fn with_api_base(secret_key: String, api_base: String) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self {
            http,
            secret_key,
            api_base,
        })
    }

    fn form_params(req: &SessionRequest) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), req.success_url.clone()),
            ("cancel_url".into(), req.cancel_url.clone()),
            ("customer_email".into(), req.customer_email.clone()),
            ("payment_method_types[0]".into(), "card".into()),
            (
                "metadata[order_number]".into(),
                req.order_number.clone(),
            ),
        ];

        // With a discount the itemized lines would not sum to the charged
        // amount, so collapse to a single line carrying the final total.
        if req.discount_cents > 0 {
            params.extend(line_item_params(
                0,
                &format!("Order {}", req.order_number),
                req.total_cents,
                1,
            ));
        } else {
            for (idx, item) in req.line_items.iter().enumerate() {
                params.extend(line_item_params(
                    idx,
                    &item.name,
                    item.amount_cents,
                    item.quantity,
                ));
            }
        }
        params
    }
}

fn line_item_params(idx: usize, name: &str, amount_cents: i64, quantity: i64) -> Vec<(String, String)> {
    vec![
        (
            format!("line_items[{}][price_data][currency]", idx),
            "eur".into(),
        ),
        (
            format!("line_items[{}][price_data][product_data][name]", idx),
            name.to_string(),
        ),
        (
            format!("line_items[{}][price_data][unit_amount]", idx),
            amount_cents.to_string(),
        ),
        (format!("line_items[{}][quantity]", idx), quantity.to_string()),
    ]
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, req), fields(order_number = %req.order_number))]
    async fn create_session(&self, req: SessionRequest) -> Result<SessionHandle, ServiceError> {
        let params = Self::form_params(&req);
        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Payment session request failed");
                ServiceError::PaymentGatewayError(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Payment session rejected");
            return Err(ServiceError::PaymentGatewayError(format!(
                "gateway returned {}",
                status
            )));
        }

        let session: StripeSessionResponse = response.json().await.map_err(|e| {
            ServiceError::PaymentGatewayError(format!("invalid session response: {}", e))
        })?;

        info!(session_id = %session.id, "Payment session created");
        Ok(SessionHandle {
            session_id: session.id,
            url: session.url,
        })
    }
}
