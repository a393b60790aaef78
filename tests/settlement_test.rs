mod common;

use chrono::Utc;
use common::{seed_cart_line, seed_course, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use learnhub_api::{
    entities::{
        cart_line::ApprovalStatus, course, course_enrollment, order, payment, transaction,
        CartLine, CourseEnrollment, Order, Transaction,
    },
    errors::ServiceError,
    services::settlement::PaymentOutcome,
};

struct Checkout {
    buyer: Uuid,
    learner: Uuid,
    payment: payment::Model,
    courses: Vec<course::Model>,
}

/// Checkout with cart lines for courses A ($10) and B ($15), both payable.
async fn checkout_two_courses(app: &TestApp) -> Checkout {
    let buyer = Uuid::new_v4();
    let learner = Uuid::new_v4();

    let course_a = seed_course(app, Uuid::new_v4(), "Algebra", dec!(10)).await;
    let course_b = seed_course(app, Uuid::new_v4(), "Geometry", dec!(15)).await;
    let line_a =
        seed_cart_line(app, buyer, learner, course_a.id, ApprovalStatus::ParentApproved).await;
    let line_b =
        seed_cart_line(app, buyer, learner, course_b.id, ApprovalStatus::AddedByPayer).await;

    let selection = app
        .state
        .services
        .carts
        .select_payable(buyer, &[line_a.id, line_b.id])
        .await
        .unwrap();
    let payment = app
        .state
        .services
        .checkout
        .initiate(buyer, selection, "Math bundle")
        .await
        .unwrap();

    Checkout {
        buyer,
        learner,
        payment,
        courses: vec![course_a, course_b],
    }
}

async fn transactions_for(app: &TestApp, order_id: Uuid) -> Vec<transaction::Model> {
    Transaction::find()
        .filter(transaction::Column::OrderId.eq(order_id))
        .all(&*app.state.db)
        .await
        .unwrap()
}

async fn enrollments_for(app: &TestApp, learner: Uuid) -> Vec<course_enrollment::Model> {
    CourseEnrollment::find()
        .filter(course_enrollment::Column::LearnerId.eq(learner))
        .all(&*app.state.db)
        .await
        .unwrap()
}

async fn cart_lines_for(app: &TestApp, buyer: Uuid) -> u64 {
    CartLine::find()
        .filter(learnhub_api::entities::cart_line::Column::BuyerId.eq(buyer))
        .all(&*app.state.db)
        .await
        .unwrap()
        .len() as u64
}

/// Webhook(PAID): statuses flip to completed, one ledger row for the full
/// total, one enrollment per item, cart emptied.
#[tokio::test]
async fn paid_webhook_settles_once() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;

    let settled = app
        .state
        .services
        .settlement
        .handle_webhook(c.payment.tracking_code, "PAID")
        .await
        .unwrap();
    assert_eq!(settled.status, payment::PaymentStatus::Completed);

    let ord = Order::find_by_id(c.payment.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, order::OrderStatus::Completed);

    let ledger = transactions_for(&app, c.payment.order_id).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, dec!(25));
    assert_eq!(ledger[0].tracking_code, c.payment.tracking_code);

    let enrollments = enrollments_for(&app, c.learner).await;
    assert_eq!(enrollments.len(), 2);
    assert!(enrollments.iter().all(|e| e.buyer_id == c.buyer));

    assert_eq!(cart_lines_for(&app, c.buyer).await, 0);
}

/// Settling the same payment N times, through any mix of adapters, produces
/// exactly one ledger row and one enrollment per (learner, course).
#[tokio::test]
async fn repeated_settlement_is_idempotent() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;
    let code = c.payment.tracking_code;
    let settlement = &app.state.services.settlement;

    settlement.handle_webhook(code, "PAID").await.unwrap();
    settlement.handle_return(code).await.unwrap();
    settlement.handle_webhook(code, "paid").await.unwrap();
    settlement.settle(code, PaymentOutcome::Paid).await.unwrap();

    assert_eq!(transactions_for(&app, c.payment.order_id).await.len(), 1);
    assert_eq!(enrollments_for(&app, c.learner).await.len(), 2);
}

/// return() before webhook(PAID) converges to the same outcome as a lone
/// PAID call.
#[tokio::test]
async fn return_then_webhook_converges() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;
    let code = c.payment.tracking_code;

    let from_return = app.state.services.settlement.handle_return(code).await.unwrap();
    assert_eq!(from_return.status, payment::PaymentStatus::Completed);

    let from_webhook = app
        .state
        .services
        .settlement
        .handle_webhook(code, "PAID")
        .await
        .unwrap();
    assert_eq!(from_webhook.status, payment::PaymentStatus::Completed);

    assert_eq!(transactions_for(&app, c.payment.order_id).await.len(), 1);
    assert_eq!(enrollments_for(&app, c.learner).await.len(), 2);
}

/// Scenario: webhook(FAILED), then a stray duplicate webhook(FAILED). Both
/// calls succeed, nothing is settled.
#[tokio::test]
async fn failed_webhook_and_duplicate_leave_no_settlement() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;
    let code = c.payment.tracking_code;

    let first = app
        .state
        .services
        .settlement
        .handle_webhook(code, "FAILED")
        .await
        .unwrap();
    assert_eq!(first.status, payment::PaymentStatus::Failed);

    let second = app
        .state
        .services
        .settlement
        .handle_webhook(code, "FAILED")
        .await
        .unwrap();
    assert_eq!(second.status, payment::PaymentStatus::Failed);

    let ord = Order::find_by_id(c.payment.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, order::OrderStatus::Failed);
    assert!(transactions_for(&app, c.payment.order_id).await.is_empty());
    assert!(enrollments_for(&app, c.learner).await.is_empty());
    // Failed settlement leaves the cart alone.
    assert_eq!(cart_lines_for(&app, c.buyer).await, 2);
}

/// Terminal states are immutable: a late PAID webhook cannot resurrect a
/// cancelled payment.
#[tokio::test]
async fn paid_after_cancelled_is_a_noop() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;
    let code = c.payment.tracking_code;

    app.state
        .services
        .settlement
        .handle_cancel(code)
        .await
        .unwrap();

    let late = app
        .state
        .services
        .settlement
        .handle_webhook(code, "PAID")
        .await
        .unwrap();
    assert_eq!(late.status, payment::PaymentStatus::Cancelled);

    let ord = Order::find_by_id(c.payment.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, order::OrderStatus::Cancelled);
    assert!(transactions_for(&app, c.payment.order_id).await.is_empty());
    assert!(enrollments_for(&app, c.learner).await.is_empty());
}

/// Simulated crash after the ledger write but before enrollments: a ledger
/// row already exists while the payment is still pending. A later settle
/// completes the enrollments without duplicating the transaction.
#[tokio::test]
async fn partial_settlement_is_recovered() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;

    transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(c.payment.order_id),
        tracking_code: Set(c.payment.tracking_code),
        amount: Set(dec!(25)),
        status: Set(transaction::TransactionStatus::Completed),
        settled_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    let settled = app
        .state
        .services
        .settlement
        .settle(c.payment.tracking_code, PaymentOutcome::Paid)
        .await
        .unwrap();
    assert_eq!(settled.status, payment::PaymentStatus::Completed);

    assert_eq!(transactions_for(&app, c.payment.order_id).await.len(), 1);
    assert_eq!(enrollments_for(&app, c.learner).await.len(), 2);
}

/// An enrollment that already exists (e.g. bought earlier by someone else)
/// is skipped, not duplicated.
#[tokio::test]
async fn existing_enrollment_is_not_duplicated() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;
    let earlier_buyer = Uuid::new_v4();

    course_enrollment::ActiveModel {
        id: Set(Uuid::new_v4()),
        learner_id: Set(c.learner),
        course_id: Set(c.courses[0].id),
        buyer_id: Set(earlier_buyer),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    app.state
        .services
        .settlement
        .settle(c.payment.tracking_code, PaymentOutcome::Paid)
        .await
        .unwrap();

    let enrollments = enrollments_for(&app, c.learner).await;
    assert_eq!(enrollments.len(), 2);
    let first_course = enrollments
        .iter()
        .find(|e| e.course_id == c.courses[0].id)
        .unwrap();
    // Original row untouched.
    assert_eq!(first_course.buyer_id, earlier_buyer);
}

#[tokio::test]
async fn unknown_tracking_code_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .settlement
        .settle(987654321, PaymentOutcome::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownPayment(987654321)));
}

/// Unknown webhook status values mutate nothing.
#[tokio::test]
async fn invalid_webhook_status_mutates_nothing() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;

    let err = app
        .state
        .services
        .settlement
        .handle_webhook(c.payment.tracking_code, "REFUNDED")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidWebhookStatus(_)));

    let ord = Order::find_by_id(c.payment.order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ord.status, order::OrderStatus::Pending);
    assert!(transactions_for(&app, c.payment.order_id).await.is_empty());
}

/// Cart cleanup only touches the settled courses of the paying buyer.
#[tokio::test]
async fn cart_purge_is_scoped_to_settled_courses() {
    let app = TestApp::new().await;
    let c = checkout_two_courses(&app).await;

    // Unrelated line of the same buyer, and a different buyer's line for a
    // settled course.
    let other_course = seed_course(&app, Uuid::new_v4(), "Music", dec!(7)).await;
    seed_cart_line(
        &app,
        c.buyer,
        c.learner,
        other_course.id,
        ApprovalStatus::ParentApproved,
    )
    .await;
    let bystander = Uuid::new_v4();
    seed_cart_line(
        &app,
        bystander,
        Uuid::new_v4(),
        c.courses[0].id,
        ApprovalStatus::ParentApproved,
    )
    .await;

    app.state
        .services
        .settlement
        .settle(c.payment.tracking_code, PaymentOutcome::Paid)
        .await
        .unwrap();

    assert_eq!(cart_lines_for(&app, c.buyer).await, 1);
    assert_eq!(cart_lines_for(&app, bystander).await, 1);
}
