#![allow(dead_code)]

use bakeshop_api::{
    config::AppConfig,
    db,
    entities::{bakery, customer, product},
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    notifications::LogNotifier,
    services::payments::{
        CreateSessionRequest, GatewaySession, PaymentGateway, SessionPaymentStatus,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Full service stack over an in-memory database and a fake gateway.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    pub gateway: Arc<FakeGateway>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    // Keeps the event channel open for the lifetime of the test
    _event_rx: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        // A single pooled connection, otherwise every checkout sees its own
        // empty in-memory database.
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        options.max_connections(1).sqlx_logging(false);
        let conn = Database::connect(options).await.expect("connect sqlite");
        db::ensure_schema(&conn).await.expect("create schema");

        let db = Arc::new(conn);
        let config = Arc::new(test_config());

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));

        let gateway = Arc::new(FakeGateway::new());
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            gateway.clone(),
            Arc::new(LogNotifier),
            config.clone(),
        );

        Self {
            db,
            services,
            gateway,
            config,
            event_sender,
            _event_rx: event_rx,
        }
    }

    /// The full HTTP router over this app's state.
    pub fn router(&self) -> axum::Router {
        let state = Arc::new(bakeshop_api::AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.event_sender.clone(),
            services: self.services.clone(),
        });
        axum::Router::new()
            .merge(bakeshop_api::base_routes())
            .nest("/api/v1", bakeshop_api::api_v1_routes())
            .with_state(state)
    }

    pub async fn seed_bakery(&self, name: &str) -> bakery::Model {
        bakery::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            slug: Set(name.to_lowercase().replace(' ', "-")),
            active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert bakery")
    }

    pub async fn seed_product(
        &self,
        bakery_id: Uuid,
        name: &str,
        price: Decimal,
        tax_rate: Decimal,
    ) -> product::Model {
        self.seed_product_full(bakery_id, name, price, tax_rate, None)
            .await
    }

    pub async fn seed_product_full(
        &self,
        bakery_id: Uuid,
        name: &str,
        price: Decimal,
        tax_rate: Decimal,
        points_price: Option<i64>,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            bakery_id: Set(bakery_id),
            name: Set(name.to_string()),
            price: Set(price),
            tax_rate: Set(tax_rate),
            points_price: Set(points_price),
            available: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert product")
    }

    pub async fn seed_customer(&self, email: &str, loyalty_points: i64) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            full_name: Set("Test Shopper".to_string()),
            loyalty_points: Set(loyalty_points),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("insert customer")
    }
}

/// Shipping address used across tests.
pub fn test_address() -> bakeshop_api::services::orders::Address {
    bakeshop_api::services::orders::Address {
        full_name: "Marie Dubois".to_string(),
        line1: "12 Rue des Moulins".to_string(),
        line2: None,
        city: "Lyon".to_string(),
        postal_code: "69001".to_string(),
        country_code: "FR".to_string(),
        phone: None,
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        currency: "EUR".to_string(),
        gateway_base_url: "http://gateway.invalid".to_string(),
        gateway_secret_key: "sk_test_dummy".to_string(),
        gateway_timeout_secs: 5,
        payment_webhook_secret: Some("whsec_test".to_string()),
        payment_webhook_tolerance_secs: 300,
        checkout_success_url: "http://localhost/success?order_id={ORDER_ID}".to_string(),
        checkout_cancel_url: "http://localhost/cancel?order_id={ORDER_ID}".to_string(),
    }
}

/// In-memory stand-in for the payment provider. Sessions start unpaid;
/// tests flip them with [`FakeGateway::mark_paid`].
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, GatewaySession>>,
    counter: AtomicU64,
    fail_next: Mutex<bool>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            fail_next: Mutex::new(false),
        }
    }

    /// Makes the next gateway call fail, as an unreachable provider would.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn mark_paid(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.payment_status = SessionPaymentStatus::Paid;
        }
    }

    pub fn last_session_id(&self) -> Option<String> {
        let n = self.counter.load(Ordering::SeqCst);
        if n == 0 {
            None
        } else {
            Some(format!("cs_test_{}", n))
        }
    }

    fn take_failure(&self) -> bool {
        std::mem::take(&mut *self.fail_next.lock().unwrap())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        if self.take_failure() {
            return Err(ServiceError::GatewayError("provider unreachable".into()));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("http://gateway.invalid/pay/{}", id)),
            payment_intent: Some(format!("pi_test_{}", request.order_id.simple())),
            payment_status: SessionPaymentStatus::Unpaid,
        };

        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn fetch_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        if self.take_failure() {
            return Err(ServiceError::GatewayError("provider unreachable".into()));
        }

        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::GatewayError(format!("no such session {}", session_id)))
    }
}
