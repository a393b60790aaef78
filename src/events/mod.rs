use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::notifications::NotificationService;

/// Domain events emitted by checkout and settlement. Consumers run after the
/// emitting transaction commits; nothing downstream can roll settlement back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CheckoutStarted {
        order_id: Uuid,
        payment_id: Uuid,
        tracking_code: i64,
        buyer_id: Uuid,
        amount: Decimal,
    },
    PaymentCompleted {
        order_id: Uuid,
        payment_id: Uuid,
        tracking_code: i64,
        buyer_id: Uuid,
        amount: Decimal,
    },
    PaymentCancelled {
        order_id: Uuid,
        tracking_code: i64,
        buyer_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
        tracking_code: i64,
        buyer_id: Uuid,
    },
    LearnerEnrolled {
        enrollment_id: Uuid,
        learner_id: Uuid,
        course_id: Uuid,
        course_owner_id: Uuid,
        buyer_id: Uuid,
        price: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queue an event for the processor. Delivery is best-effort: a closed or
    /// saturated channel is logged, never surfaced to the emitting request.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to queue event: {}", e);
        }
    }
}

/// Event loop driving the notification fan-out. Spawned once at startup;
/// exits when every `EventSender` is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, notifications: Arc<NotificationService>) {
    while let Some(event) = rx.recv().await {
        match event {
            Event::CheckoutStarted {
                order_id,
                tracking_code,
                ..
            } => {
                info!(%order_id, tracking_code, "checkout started");
            }
            Event::PaymentCompleted {
                order_id,
                buyer_id,
                amount,
                ..
            } => {
                notifications
                    .payment_succeeded(buyer_id, order_id, amount)
                    .await;
            }
            Event::PaymentCancelled {
                order_id, buyer_id, ..
            } => {
                notifications
                    .payment_not_completed(buyer_id, order_id, "cancelled")
                    .await;
            }
            Event::PaymentFailed {
                order_id, buyer_id, ..
            } => {
                notifications
                    .payment_not_completed(buyer_id, order_id, "failed")
                    .await;
            }
            Event::LearnerEnrolled {
                learner_id,
                course_id,
                course_owner_id,
                buyer_id,
                ..
            } => {
                notifications
                    .enrollment_created(learner_id, course_id, course_owner_id, buyer_id)
                    .await;
            }
        }
    }
    info!("Event channel closed; processor shutting down");
}
