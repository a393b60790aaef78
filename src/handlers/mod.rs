use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        carts::CartSelectionService, checkout::CheckoutService, settlement::SettlementService,
    },
};

pub mod checkout;
pub mod health;
pub mod payments;

/// Shared service container carried in `AppState`.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartSelectionService>,
    pub checkout: Arc<CheckoutService>,
    pub settlement: Arc<SettlementService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        callback_base_url: String,
    ) -> Self {
        Self {
            carts: Arc::new(CartSelectionService::new(db.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                gateway,
                event_sender.clone(),
                callback_base_url,
            )),
            settlement: Arc::new(SettlementService::new(db, event_sender)),
        }
    }
}
