use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        cart_line, course, course_enrollment, order, order_item, payment, transaction, CartLine,
        Course, CourseEnrollment, Order, OrderItem,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Outcome reported for a payment, by either the gateway webhook or the
/// buyer's browser coming back from the hosted checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    Cancelled,
    Failed,
}

impl PaymentOutcome {
    /// Case-insensitive parse of the gateway's status string. Unknown values
    /// are rejected before any state is touched.
    pub fn parse(status: &str) -> Result<Self, ServiceError> {
        match status.to_ascii_uppercase().as_str() {
            "PAID" => Ok(Self::Paid),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            _ => Err(ServiceError::InvalidWebhookStatus(status.to_string())),
        }
    }
}

struct Settled {
    payment: payment::Model,
    events: Vec<Event>,
}

/// The settlement state machine. Both entry points (webhook and browser
/// return) funnel into [`SettlementService::settle`], which drives a pending
/// payment/order pair to a single terminal outcome no matter how many times
/// or in what order it is invoked.
#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl SettlementService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Asynchronous gateway callback. May arrive zero, one or many times, in
    /// any order relative to the browser return; duplicates are no-ops.
    #[instrument(skip(self))]
    pub async fn handle_webhook(
        &self,
        tracking_code: i64,
        gateway_status: &str,
    ) -> Result<payment::Model, ServiceError> {
        let outcome = PaymentOutcome::parse(gateway_status)?;
        self.settle(tracking_code, outcome).await
    }

    /// Synchronous browser redirect after the hosted checkout. Arrival is
    /// trusted as a completion signal; a hardened deployment would re-query
    /// the gateway for authoritative status before settling.
    #[instrument(skip(self))]
    pub async fn handle_return(&self, tracking_code: i64) -> Result<payment::Model, ServiceError> {
        self.settle(tracking_code, PaymentOutcome::Paid).await
    }

    /// Redirect target for the gateway's cancel URL.
    #[instrument(skip(self))]
    pub async fn handle_cancel(&self, tracking_code: i64) -> Result<payment::Model, ServiceError> {
        self.settle(tracking_code, PaymentOutcome::Cancelled).await
    }

    /// Idempotently drive the payment identified by `tracking_code` to the
    /// given terminal outcome.
    ///
    /// All writes happen in one database transaction; callers never observe a
    /// partial settlement. Two concurrent calls can both pass the terminal
    /// check, so the unique index on `transactions.order_id` arbitrates: the
    /// loser maps the violation to "already settled" and re-executes the rest
    /// of the branch idempotently.
    #[instrument(skip(self))]
    pub async fn settle(
        &self,
        tracking_code: i64,
        outcome: PaymentOutcome,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let pmt = payment::Entity::find()
            .filter(payment::Column::TrackingCode.eq(tracking_code))
            .one(&txn)
            .await?
            .ok_or(ServiceError::UnknownPayment(tracking_code))?;

        // Idempotency guard: terminal payments are immutable. This makes the
        // engine safe to call any number of times from either adapter.
        if pmt.status.is_terminal() {
            txn.commit().await?;
            debug!(tracking_code, status = ?pmt.status, "payment already terminal; no-op");
            return Ok(pmt);
        }

        let ord = Order::find_by_id(pmt.order_id).one(&txn).await?.ok_or_else(|| {
            ServiceError::InternalError(format!(
                "payment {} references missing order {}",
                pmt.id, pmt.order_id
            ))
        })?;

        let settled = match outcome {
            PaymentOutcome::Paid => self.complete(&txn, pmt, ord).await?,
            PaymentOutcome::Cancelled => {
                self.close(&txn, pmt, ord, payment::PaymentStatus::Cancelled)
                    .await?
            }
            PaymentOutcome::Failed => {
                self.close(&txn, pmt, ord, payment::PaymentStatus::Failed)
                    .await?
            }
        };

        txn.commit().await?;

        // Fan-out strictly after the durable commit; consumers can't undo it.
        for event in settled.events {
            self.event_sender.send(event).await;
        }
        Ok(settled.payment)
    }

    /// PAID branch: statuses, exactly one ledger row, missing enrollments,
    /// cart purge.
    async fn complete(
        &self,
        txn: &DatabaseTransaction,
        pmt: payment::Model,
        ord: order::Model,
    ) -> Result<Settled, ServiceError> {
        let now = Utc::now();
        let buyer_id = pmt.buyer_id;

        let ord = Self::transition_order(txn, ord, order::OrderStatus::Completed).await?;
        let pmt = Self::transition_payment(txn, pmt, payment::PaymentStatus::Completed).await?;

        let ledger = transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(ord.id),
            tracking_code: Set(pmt.tracking_code),
            amount: Set(ord.total_amount),
            status: Set(transaction::TransactionStatus::Completed),
            settled_at: Set(now),
        };
        // DO NOTHING instead of catching the violation: a failed statement
        // would poison the enclosing transaction on Postgres.
        let insert = transaction::Entity::insert(ledger)
            .on_conflict(
                OnConflict::column(transaction::Column::OrderId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(txn)
            .await;
        match insert {
            Ok(_) => {
                info!(order_id = %ord.id, amount = %ord.total_amount, "ledger transaction recorded");
            }
            Err(e) if is_already_recorded(&e) => {
                // Lost the settlement race, or recovering a run that died
                // after the ledger write. Either way the row exists once;
                // finish the rest of the branch against current state.
                debug!(order_id = %ord.id, "ledger transaction already present");
            }
            Err(e) => return Err(e.into()),
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(ord.id))
            .all(txn)
            .await?;
        let course_ids: Vec<Uuid> = items.iter().map(|i| i.course_id).collect();
        let courses: HashMap<Uuid, course::Model> = Course::find()
            .filter(course::Column::Id.is_in(course_ids.clone()))
            .all(txn)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut events = vec![Event::PaymentCompleted {
            order_id: ord.id,
            payment_id: pmt.id,
            tracking_code: pmt.tracking_code,
            buyer_id,
            amount: pmt.amount,
        }];

        for item in &items {
            let exists = CourseEnrollment::find()
                .filter(course_enrollment::Column::LearnerId.eq(item.learner_id))
                .filter(course_enrollment::Column::CourseId.eq(item.course_id))
                .one(txn)
                .await?
                .is_some();
            if exists {
                debug!(learner_id = %item.learner_id, course_id = %item.course_id,
                    "enrollment already exists; skipping");
                continue;
            }

            let enrollment_id = Uuid::new_v4();
            let enrollment = course_enrollment::ActiveModel {
                id: Set(enrollment_id),
                learner_id: Set(item.learner_id),
                course_id: Set(item.course_id),
                buyer_id: Set(buyer_id),
                created_at: Set(now),
            };
            let insert = course_enrollment::Entity::insert(enrollment)
                .on_conflict(
                    OnConflict::columns([
                        course_enrollment::Column::LearnerId,
                        course_enrollment::Column::CourseId,
                    ])
                    .do_nothing()
                    .to_owned(),
                )
                .exec(txn)
                .await;
            match insert {
                Ok(_) => {
                    if let Some(course) = courses.get(&item.course_id) {
                        events.push(Event::LearnerEnrolled {
                            enrollment_id,
                            learner_id: item.learner_id,
                            course_id: item.course_id,
                            course_owner_id: course.owner_id,
                            buyer_id,
                            price: item.price,
                        });
                    } else {
                        warn!(course_id = %item.course_id,
                            "enrolled into a course with no catalog row; owner not notified");
                    }
                }
                // A concurrent settlement created it between our check and
                // the insert; exactly what the unique index is for.
                Err(e) if is_already_recorded(&e) => {
                    debug!(learner_id = %item.learner_id, course_id = %item.course_id,
                        "enrollment inserted concurrently; skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Purge the settled courses from the buyer's cart. Absence is fine:
        // a previous run or the cart subsystem may already have removed them.
        let purged = CartLine::delete_many()
            .filter(cart_line::Column::BuyerId.eq(buyer_id))
            .filter(cart_line::Column::CourseId.is_in(course_ids))
            .exec(txn)
            .await?;
        debug!(order_id = %ord.id, rows = purged.rows_affected, "cart lines purged");

        Ok(Settled {
            payment: pmt,
            events,
        })
    }

    /// CANCELLED/FAILED branch: terminal statuses only; no ledger row, no
    /// enrollments, cart untouched.
    async fn close(
        &self,
        txn: &DatabaseTransaction,
        pmt: payment::Model,
        ord: order::Model,
        status: payment::PaymentStatus,
    ) -> Result<Settled, ServiceError> {
        let ord = Self::transition_order(txn, ord, status.into()).await?;
        let pmt = Self::transition_payment(txn, pmt, status).await?;
        info!(order_id = %ord.id, tracking_code = pmt.tracking_code, ?status,
            "payment closed without settlement");

        let event = match status {
            payment::PaymentStatus::Cancelled => Event::PaymentCancelled {
                order_id: ord.id,
                tracking_code: pmt.tracking_code,
                buyer_id: pmt.buyer_id,
            },
            _ => Event::PaymentFailed {
                order_id: ord.id,
                tracking_code: pmt.tracking_code,
                buyer_id: pmt.buyer_id,
            },
        };

        Ok(Settled {
            payment: pmt,
            events: vec![event],
        })
    }

    async fn transition_order(
        txn: &DatabaseTransaction,
        ord: order::Model,
        status: order::OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let mut active: order::ActiveModel = ord.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(txn).await?)
    }

    async fn transition_payment(
        txn: &DatabaseTransaction,
        pmt: payment::Model,
        status: payment::PaymentStatus,
    ) -> Result<payment::Model, ServiceError> {
        let mut active: payment::ActiveModel = pmt.into();
        active.status = Set(status);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(txn).await?)
    }
}

/// "This row already exists" in either shape sea-orm reports it: a conflict
/// swallowed by DO NOTHING, or a raw unique-constraint violation.
fn is_already_recorded(err: &DbErr) -> bool {
    matches!(err, DbErr::RecordNotInserted)
        || matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
