use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{config::GatewayConfig, errors::ServiceError};

/// The gateway UI shows at most this many characters of the order description.
pub const MAX_DESCRIPTION_LEN: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("gateway returned an unreadable response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// Wire request for the gateway's hosted-checkout endpoint. Amounts are
/// integer minor units; the redirect URLs embed the tracking code so the
/// return adapters can recover it without a payload.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckoutRequest {
    pub tracking_code: i64,
    pub amount_minor_units: i64,
    pub description: String,
    pub success_redirect_url: String,
    pub cancel_redirect_url: String,
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedCheckout {
    pub checkout_url: String,
}

/// Outbound boundary to the payment provider. A trait seam so tests and
/// alternative providers can swap the transport.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout(
        &self,
        request: &CreateCheckoutRequest,
    ) -> Result<HostedCheckout, GatewayError>;

    async fn cancel_checkout(&self, tracking_code: i64) -> Result<(), GatewayError>;
}

/// REST client for the hosted-checkout gateway. Every call carries the
/// configured timeout; none of them ever runs inside a database transaction.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentGateway {
    pub fn new(cfg: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build gateway client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(tracking_code = request.tracking_code))]
    async fn create_checkout(
        &self,
        request: &CreateCheckoutRequest,
    ) -> Result<HostedCheckout, GatewayError> {
        let url = format!("{}/checkouts", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let checkout: HostedCheckout = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        debug!(checkout_url = %checkout.checkout_url, "gateway checkout created");
        Ok(checkout)
    }

    #[instrument(skip(self))]
    async fn cancel_checkout(&self, tracking_code: i64) -> Result<(), GatewayError> {
        let url = format!("{}/checkouts/{}/cancel", self.base_url, tracking_code);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Convert a decimal amount to integer minor units (cents). `None` when the
/// amount does not fit, which for course prices means corrupt data.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Char-safe truncation for the gateway's description field.
pub fn truncate_description(description: &str) -> String {
    description.chars().take(MAX_DESCRIPTION_LEN).collect()
}
