use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use learnhub_api::{
    config::{AppConfig, GatewayConfig},
    db,
    entities::{cart_line, course},
    events::{self, EventSender},
    gateway::{CreateCheckoutRequest, GatewayError, HostedCheckout, PaymentGateway},
    handlers::AppServices,
    services::notifications::NotificationService,
    AppState,
};

/// In-process gateway double: records every create-checkout request and can
/// be flipped into a failing mode to exercise the compensation path.
#[derive(Default)]
pub struct RecordingGateway {
    requests: Mutex<Vec<CreateCheckoutRequest>>,
    fail: Mutex<bool>,
}

impl RecordingGateway {
    pub fn fail_next(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn recorded(&self) -> Vec<CreateCheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_checkout(
        &self,
        request: &CreateCheckoutRequest,
    ) -> Result<HostedCheckout, GatewayError> {
        if std::mem::take(&mut *self.fail.lock().unwrap()) {
            return Err(GatewayError::Rejected {
                status: 503,
                body: "gateway unavailable".to_string(),
            });
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(HostedCheckout {
            checkout_url: format!("https://gateway.test/pay/{}", request.tracking_code),
        })
    }

    async fn cancel_checkout(&self, _tracking_code: i64) -> Result<(), GatewayError> {
        Ok(())
    }
}

/// Application harness backed by a per-test SQLite file with real migrations.
pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
    _tmp: tempfile::TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    #[allow(dead_code)]
    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::build(Some(secret.to_string())).await
    }

    async fn build(webhook_secret: Option<String>) -> Self {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = tmp.path().join("learnhub_test.db");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = db::establish_connection(&database_url)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            Arc::new(NotificationService::new()),
        ));

        let mut gateway_cfg = GatewayConfig::for_tests("https://gateway.test".to_string());
        gateway_cfg.webhook_secret = webhook_secret;
        let cfg = AppConfig::new(
            database_url,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
            gateway_cfg,
        );

        let gateway = Arc::new(RecordingGateway::default());
        let services = AppServices::new(
            db.clone(),
            gateway.clone(),
            event_sender.clone(),
            cfg.gateway.callback_base_url.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            state,
            gateway,
            _tmp: tmp,
            _event_task: event_task,
        }
    }

    #[allow(dead_code)]
    pub fn router(&self) -> Router {
        learnhub_api::app(self.state.clone())
    }
}

/// Insert a course owned by `owner_id` at the given price.
pub async fn seed_course(app: &TestApp, owner_id: Uuid, title: &str, price: Decimal) -> course::Model {
    course::ActiveModel {
        id: Set(Uuid::new_v4()),
        owner_id: Set(owner_id),
        title: Set(title.to_string()),
        price: Set(price),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed course")
}

/// Insert a cart line for `buyer_id` holding `course_id` for `learner_id`.
pub async fn seed_cart_line(
    app: &TestApp,
    buyer_id: Uuid,
    learner_id: Uuid,
    course_id: Uuid,
    approval_status: cart_line::ApprovalStatus,
) -> cart_line::Model {
    cart_line::ActiveModel {
        id: Set(Uuid::new_v4()),
        buyer_id: Set(buyer_id),
        learner_id: Set(learner_id),
        course_id: Set(course_id),
        approval_status: Set(approval_status),
        created_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .expect("failed to seed cart line")
}
