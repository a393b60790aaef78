use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

/// Fan-out trigger points for the settlement pipeline. The actual delivery
/// transport (email, push, in-app) lives in a separate system; this service
/// only hands outcomes over and must never fail settlement. Every method is
/// infallible by contract: problems are logged and dropped.
#[derive(Debug, Default, Clone)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub async fn payment_succeeded(&self, buyer_id: Uuid, order_id: Uuid, amount: Decimal) {
        info!(%buyer_id, %order_id, %amount, "notify: payment succeeded");
        if let Err(e) = self.deliver("payment_succeeded", buyer_id).await {
            warn!(%buyer_id, %order_id, "payment notification dropped: {}", e);
        }
    }

    pub async fn payment_not_completed(&self, buyer_id: Uuid, order_id: Uuid, reason: &str) {
        info!(%buyer_id, %order_id, reason, "notify: payment not completed");
        if let Err(e) = self.deliver("payment_not_completed", buyer_id).await {
            warn!(%buyer_id, %order_id, "payment notification dropped: {}", e);
        }
    }

    /// Notifies the learner and the course owner about a new enrollment.
    pub async fn enrollment_created(
        &self,
        learner_id: Uuid,
        course_id: Uuid,
        course_owner_id: Uuid,
        buyer_id: Uuid,
    ) {
        info!(%learner_id, %course_id, %course_owner_id, %buyer_id, "notify: enrollment created");
        for recipient in [learner_id, course_owner_id] {
            if let Err(e) = self.deliver("enrollment_created", recipient).await {
                warn!(%recipient, %course_id, "enrollment notification dropped: {}", e);
            }
        }
    }

    async fn deliver(&self, _kind: &str, _recipient: Uuid) -> Result<(), String> {
        // Hook for the external notification system; delivery is out of scope
        // here and failure must never propagate to the caller.
        Ok(())
    }
}
