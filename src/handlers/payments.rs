use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::payment, errors::ServiceError, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Gateways disagree on whether the tracking code is sent as a JSON number
/// or a string; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookTrackingCode {
    Number(i64),
    Text(String),
}

impl WebhookTrackingCode {
    fn as_i64(&self) -> Result<i64, ServiceError> {
        match self {
            Self::Number(code) => Ok(*code),
            Self::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                ServiceError::InvalidInput(format!("tracking code '{}' is not numeric", raw))
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    tracking_code: WebhookTrackingCode,
    status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementResponse {
    pub order_id: Uuid,
    pub tracking_code: i64,
    #[schema(value_type = String, example = "completed")]
    pub status: payment::PaymentStatus,
    pub amount: rust_decimal::Decimal,
}

impl From<payment::Model> for SettlementResponse {
    fn from(p: payment::Model) -> Self {
        Self {
            order_id: p.order_id,
            tracking_code: p.tracking_code,
            status: p.status,
            amount: p.amount,
        }
    }
}

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Outcome recorded (or already recorded)", body = SettlementResponse),
        (status = 400, description = "Unrecognized status value", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown tracking code", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.gateway.webhook_secret.as_deref() {
        let tolerance = state.config.gateway.webhook_tolerance_secs;
        if !verify_signature(&headers, &body, secret, tolerance) {
            warn!("payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook body: {}", e)))?;
    let tracking_code = payload.tracking_code.as_i64()?;

    info!(tracking_code, status = %payload.status, "payment webhook received");
    let settled = state
        .services
        .settlement
        .handle_webhook(tracking_code, &payload.status)
        .await?;

    Ok((StatusCode::OK, Json(SettlementResponse::from(settled))))
}

// GET /api/v1/payments/return/{tracking_code}
#[utoipa::path(
    get,
    path = "/api/v1/payments/return/{tracking_code}",
    params(("tracking_code" = i64, Path, description = "Gateway tracking code")),
    responses(
        (status = 200, description = "Payment settled", body = SettlementResponse),
        (status = 404, description = "Unknown tracking code", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_return(
    State(state): State<AppState>,
    Path(tracking_code): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(tracking_code, "buyer returned from hosted checkout");
    let settled = state.services.settlement.handle_return(tracking_code).await?;
    Ok((StatusCode::OK, Json(SettlementResponse::from(settled))))
}

// GET /api/v1/payments/cancel/{tracking_code}
#[utoipa::path(
    get,
    path = "/api/v1/payments/cancel/{tracking_code}",
    params(("tracking_code" = i64, Path, description = "Gateway tracking code")),
    responses(
        (status = 200, description = "Payment cancelled", body = SettlementResponse),
        (status = 404, description = "Unknown tracking code", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_cancel(
    State(state): State<AppState>,
    Path(tracking_code): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    info!(tracking_code, "buyer cancelled at hosted checkout");
    let settled = state.services.settlement.handle_cancel(tracking_code).await?;
    Ok((StatusCode::OK, Json(SettlementResponse::from(settled))))
}

/// HMAC-SHA256 over `"{timestamp}.{body}"` with `x-timestamp`/`x-signature`
/// headers, bounded by the configured tolerance window.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
