use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{order, order_item, payment, Order, OrderItem, Payment},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{
        to_minor_units, truncate_description, CreateCheckoutRequest, LineItem, PaymentGateway,
    },
    services::carts::CartSelection,
};

const TRACKING_CODE_ATTEMPTS: usize = 5;

/// Turns a validated cart selection into a pending order plus a gateway
/// checkout. The gateway call cannot join the local transaction, so a failed
/// checkout is undone with an explicit compensating delete instead of a
/// rollback.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    callback_base_url: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        callback_base_url: String,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create the pending order, obtain a hosted checkout from the gateway
    /// and persist the payment. Returns the payment whose `checkout_url` the
    /// caller redirects the buyer to.
    ///
    /// If the gateway call or the payment insert fails, the order and its
    /// items are deleted unconditionally before the error is surfaced; no
    /// orphan pending order survives a failed checkout.
    #[instrument(skip(self, selection, description), fields(lines = selection.lines.len(), total = %selection.total))]
    pub async fn initiate(
        &self,
        buyer_id: Uuid,
        selection: CartSelection,
        description: &str,
    ) -> Result<payment::Model, ServiceError> {
        let order = self.create_pending_order(buyer_id, &selection).await?;

        match self
            .create_payment(buyer_id, &order, &selection, description)
            .await
        {
            Ok(pmt) => {
                info!(order_id = %order.id, payment_id = %pmt.id, tracking_code = pmt.tracking_code,
                    "checkout initiated");
                self.event_sender
                    .send(Event::CheckoutStarted {
                        order_id: order.id,
                        payment_id: pmt.id,
                        tracking_code: pmt.tracking_code,
                        buyer_id,
                        amount: pmt.amount,
                    })
                    .await;
                Ok(pmt)
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "checkout failed; compensating");
                self.discard_order(order.id).await;
                Err(err)
            }
        }
    }

    async fn create_pending_order(
        &self,
        buyer_id: Uuid,
        selection: &CartSelection,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            buyer_id: Set(buyer_id),
            total_amount: Set(selection.total),
            status: Set(order::OrderStatus::Pending),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for line in &selection.lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                course_id: Set(line.course.id),
                learner_id: Set(line.cart_line.learner_id),
                price: Set(line.course.price),
                quantity: Set(1),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok(order)
    }

    async fn create_payment(
        &self,
        buyer_id: Uuid,
        order: &order::Model,
        selection: &CartSelection,
        description: &str,
    ) -> Result<payment::Model, ServiceError> {
        let tracking_code = self.generate_tracking_code().await?;
        let amount_minor_units = to_minor_units(order.total_amount).ok_or_else(|| {
            ServiceError::InvalidInput(format!(
                "order total {} is not representable in minor units",
                order.total_amount
            ))
        })?;

        let mut line_items = Vec::with_capacity(selection.lines.len());
        for line in &selection.lines {
            line_items.push(LineItem {
                name: line.course.title.clone(),
                quantity: 1,
                unit_price: to_minor_units(line.course.price).ok_or_else(|| {
                    ServiceError::InvalidInput(format!(
                        "course {} price is not representable in minor units",
                        line.course.id
                    ))
                })?,
            });
        }

        let request = CreateCheckoutRequest {
            tracking_code,
            amount_minor_units,
            description: truncate_description(description),
            success_redirect_url: format!(
                "{}/api/v1/payments/return/{}",
                self.callback_base_url, tracking_code
            ),
            cancel_redirect_url: format!(
                "{}/api/v1/payments/cancel/{}",
                self.callback_base_url, tracking_code
            ),
            line_items,
        };

        let hosted = self.gateway.create_checkout(&request).await?;

        let pmt = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            tracking_code: Set(tracking_code),
            buyer_id: Set(buyer_id),
            order_id: Set(order.id),
            amount: Set(order.total_amount),
            status: Set(payment::PaymentStatus::Pending),
            checkout_url: Set(Some(hosted.checkout_url)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        Ok(pmt)
    }

    /// Time-derived tracking code, collision-checked against existing
    /// payments. Millisecond epoch plus random low digits keeps codes
    /// roughly monotonic while surviving same-millisecond checkouts.
    async fn generate_tracking_code(&self) -> Result<i64, ServiceError> {
        for _ in 0..TRACKING_CODE_ATTEMPTS {
            let candidate =
                Utc::now().timestamp_millis() * 1000 + rand::thread_rng().gen_range(0..1000);
            let taken = Payment::find()
                .filter(payment::Column::TrackingCode.eq(candidate))
                .one(&*self.db)
                .await?
                .is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "could not allocate a unique tracking code".to_string(),
        ))
    }

    /// Compensating delete for a failed checkout. Best effort by necessity:
    /// the original error is what the caller sees either way.
    async fn discard_order(&self, order_id: Uuid) {
        let result: Result<(), ServiceError> = async {
            let txn = self.db.begin().await?;
            OrderItem::delete_many()
                .filter(order_item::Column::OrderId.eq(order_id))
                .exec(&txn)
                .await?;
            Order::delete_by_id(order_id).exec(&txn).await?;
            txn.commit().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            // Leaves an orphan pending order behind; needs operator cleanup.
            error!(%order_id, error = %e, "compensating delete failed");
        }
    }
}
