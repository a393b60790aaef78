use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "LearnHub API",
        description = "Course marketplace checkout and payment settlement"
    ),
    paths(
        crate::handlers::checkout::create_checkout,
        crate::handlers::payments::payment_webhook,
        crate::handlers::payments::payment_return,
        crate::handlers::payments::payment_cancel,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::handlers::checkout::CheckoutRequest,
        crate::handlers::checkout::CheckoutResponse,
        crate::handlers::payments::SettlementResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "Checkout", description = "Cart checkout"),
        (name = "Payments", description = "Settlement entry points: gateway webhook and browser return"),
        (name = "Health", description = "Liveness probes")
    )
)]
pub struct ApiDoc;
