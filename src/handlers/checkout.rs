use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{errors::ServiceError, AppState};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    pub buyer_id: Uuid,
    #[validate(length(min = 1, message = "at least one cart line is required"))]
    pub cart_line_ids: Vec<Uuid>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub payment_id: Uuid,
    pub tracking_code: i64,
    /// Hosted gateway page the buyer must be redirected to
    pub checkout_url: Option<String>,
}

// POST /api/v1/checkout
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Checkout created; redirect the buyer to checkout_url", body = CheckoutResponse),
        (status = 403, description = "A cart line belongs to another buyer", body = crate::errors::ErrorResponse),
        (status = 422, description = "No payable cart lines", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(req): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    req.validate()?;

    let selection = state
        .services
        .carts
        .select_payable(req.buyer_id, &req.cart_line_ids)
        .await?;
    let payment = state
        .services
        .checkout
        .initiate(req.buyer_id, selection, &req.description)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            payment_id: payment.id,
            tracking_code: payment.tracking_code,
            checkout_url: payment.checkout_url,
        }),
    ))
}
