use crate::{
    config::AppConfig,
    entities::{order, OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// One line of a hosted payment session, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    pub description: String,
    pub unit_amount_minor: i64,
    pub quantity: i64,
}

/// Request for a hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub order_id: Uuid,
    pub reference: String,
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
}

/// Session state as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "paid" => Self::Paid,
            "no_payment_required" => Self::NoPaymentRequired,
            _ => Self::Unpaid,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Self::Paid | Self::NoPaymentRequired)
    }
}

/// Provider-side view of a checkout session.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub id: String,
    pub url: Option<String>,
    pub payment_intent: Option<String>,
    pub payment_status: SessionPaymentStatus,
}

/// Payment provider abstraction. The production implementation talks to the
/// hosted-checkout HTTP API; tests substitute a fake.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    async fn fetch_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError>;
}

/// Stripe-shaped gateway over the hosted checkout sessions API.
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

impl StripeGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.gateway_timeout_secs))
            .build()
            .map_err(|e| ServiceError::GatewayError(format!("client init: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            secret_key: config.gateway_secret_key.clone(),
        })
    }

    fn session_form(request: &CreateSessionRequest) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), request.success_url.clone()),
            ("cancel_url".into(), request.cancel_url.clone()),
            ("metadata[order_id]".into(), request.order_id.to_string()),
            ("client_reference_id".into(), request.reference.clone()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                request.currency.to_lowercase(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((
                format!("{}[price_data][product_data][description]", prefix),
                item.description.clone(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                item.unit_amount_minor.to_string(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        form
    }

    fn into_session(api: ApiSession) -> GatewaySession {
        GatewaySession {
            payment_status: SessionPaymentStatus::parse(
                api.payment_status.as_deref().unwrap_or("unpaid"),
            ),
            id: api.id,
            url: api.url,
            payment_intent: api.payment_intent,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&Self::session_form(&request))
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("create session: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GatewayError(format!(
                "create session returned {}: {}",
                status, body
            )));
        }

        let api: ApiSession = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("create session decode: {}", e)))?;
        Ok(Self::into_session(api))
    }

    async fn fetch_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        let url = format!("{}/v1/checkout/sessions/{}", self.base_url, session_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("fetch session: {}", e)))?;

        // "Not found" is a gateway error, not an unpaid session: a session id
        // we recorded must exist on the provider side.
        if !response.status().is_success() {
            let status = response.status();
            return Err(ServiceError::GatewayError(format!(
                "fetch session {} returned {}",
                session_id, status
            )));
        }

        let api: ApiSession = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("fetch session decode: {}", e)))?;
        Ok(Self::into_session(api))
    }
}

/// Builds the hosted-session line items for an order: one per cash order
/// line plus a tax line, so the session amounts always sum to the order
/// total. Point-redeemed lines carry no cash and are skipped.
pub fn session_line_items(
    order: &OrderModel,
    items: &[crate::entities::order_item::Model],
) -> Result<Vec<SessionLineItem>, ServiceError> {
    let mut lines = Vec::with_capacity(items.len() + 1);

    for item in items {
        if item.redeemed_with_points {
            continue;
        }
        lines.push(SessionLineItem {
            name: item.product_name.clone(),
            description: format!("{} - {}", item.bakery_name, order.reference),
            unit_amount_minor: to_minor_units(item.unit_price)?,
            quantity: i64::from(item.quantity),
        });
    }

    if !order.tax_amount.is_zero() {
        lines.push(SessionLineItem {
            name: "Tax".to_string(),
            description: format!("Tax - {}", order.reference),
            unit_amount_minor: to_minor_units(order.tax_amount)?,
            quantity: 1,
        });
    }

    Ok(lines)
}

/// Converts a decimal amount to integer minor currency units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {}", amount)))
}

/// Orchestrates hosted-session creation for an order.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
            config,
        }
    }

    /// Creates a hosted session for a pending order, records the session id
    /// and provisional payment-intent id, and advances the order to
    /// `payment_processing`.
    ///
    /// On gateway failure the order stays `pending` so checkout can simply
    /// be retried; an abandoned provider session expires on its own.
    #[instrument(skip(self))]
    pub async fn start_payment(&self, order_id: Uuid) -> Result<StartedPayment, ServiceError> {
        let order = crate::entities::Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if !OrderStatus::payable().contains(&order.status) {
            return Err(ServiceError::InvalidOperation(format!(
                "order {} is not awaiting payment",
                order.reference
            )));
        }

        let items = crate::entities::OrderItem::find()
            .filter(crate::entities::order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let request = CreateSessionRequest {
            order_id,
            reference: order.reference.clone(),
            currency: order.currency.clone(),
            line_items: session_line_items(&order, &items)?,
            success_url: self
                .config
                .checkout_success_url
                .replace("{ORDER_ID}", &order_id.to_string()),
            cancel_url: self
                .config
                .checkout_cancel_url
                .replace("{ORDER_ID}", &order_id.to_string()),
        };

        let session = self.gateway.create_session(request).await?;

        let old_status = order.status;
        let mut active: order::ActiveModel = order.into();
        active.checkout_session_id = Set(Some(session.id.clone()));
        active.payment_intent_id = Set(session.payment_intent.clone());
        active.status = Set(OrderStatus::PaymentProcessing);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: format!("{:?}", old_status),
                new_status: format!("{:?}", OrderStatus::PaymentProcessing),
            })
            .await;

        if session.url.is_none() {
            warn!("Gateway session {} carries no redirect URL", session.id);
        }

        info!("Started payment for order {}: session {}", order_id, session.id);
        Ok(StartedPayment {
            redirect_url: session.url.clone().unwrap_or_default(),
            session,
        })
    }
}

/// Result of `start_payment`: the provider session plus the URL to send the
/// shopper to.
#[derive(Debug, Clone)]
pub struct StartedPayment {
    pub session: GatewaySession,
    pub redirect_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order_item;
    use rust_decimal_macros::dec;

    fn test_order(total: Decimal, tax: Decimal) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            reference: "ORD-AB12CD34".to_string(),
            customer_id: Uuid::new_v4(),
            cart_id: None,
            status: OrderStatus::Pending,
            subtotal: total - tax,
            tax_amount: tax,
            tax_rate: dec!(0.10),
            total_amount: total,
            currency: "EUR".to_string(),
            shipping_address: serde_json::json!({}),
            billing_address: serde_json::json!({}),
            checkout_session_id: None,
            payment_intent_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_item(order_id: Uuid, price: Decimal, quantity: i32, redeemed: bool) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            product_id: Uuid::new_v4(),
            product_name: "Rye loaf".to_string(),
            bakery_name: "Ovenbird".to_string(),
            quantity,
            unit_price: price,
            tax_rate: dec!(0.10),
            line_total: price * Decimal::from(quantity),
            redeemed_with_points: redeemed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(4.50)).unwrap(), 450);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(10)).unwrap(), 1000);
    }

    #[test]
    fn line_items_sum_to_order_total() {
        let order = test_order(dec!(11.55), dec!(1.05));
        let items = vec![
            test_item(order.id, dec!(4.00), 2, false),
            test_item(order.id, dec!(2.50), 1, false),
        ];

        let lines = session_line_items(&order, &items).unwrap();
        let sum: i64 = lines
            .iter()
            .map(|l| l.unit_amount_minor * l.quantity)
            .sum();
        assert_eq!(sum, to_minor_units(order.total_amount).unwrap());
    }

    #[test]
    fn line_items_skip_point_redeemed_lines() {
        let order = test_order(dec!(4.40), dec!(0.40));
        let items = vec![
            test_item(order.id, dec!(4.00), 1, false),
            test_item(order.id, Decimal::ZERO, 1, true),
        ];

        let lines = session_line_items(&order, &items).unwrap();
        // one cash line plus the tax line
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.unit_amount_minor > 0));
    }

    #[test]
    fn line_item_description_embeds_bakery_name() {
        let order = test_order(dec!(4.00), Decimal::ZERO);
        let items = vec![test_item(order.id, dec!(4.00), 1, false)];

        let lines = session_line_items(&order, &items).unwrap();
        assert!(lines[0].description.contains("Ovenbird"));
    }

    #[test]
    fn session_form_encodes_line_items_and_metadata() {
        let request = CreateSessionRequest {
            order_id: Uuid::new_v4(),
            reference: "ORD-AB12CD34".to_string(),
            currency: "EUR".to_string(),
            line_items: vec![SessionLineItem {
                name: "Rye loaf".to_string(),
                description: "Ovenbird".to_string(),
                unit_amount_minor: 450,
                quantity: 2,
            }],
            success_url: "https://shop.test/success".to_string(),
            cancel_url: "https://shop.test/cancel?order_id=x".to_string(),
        };

        let form = StripeGateway::session_form(&request);
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| panic!("missing key {}", key))
        };

        assert_eq!(get("mode"), "payment");
        assert_eq!(get("metadata[order_id]"), request.order_id.to_string());
        assert_eq!(get("line_items[0][price_data][unit_amount]"), "450");
        assert_eq!(get("line_items[0][quantity]"), "2");
        assert_eq!(get("line_items[0][price_data][currency]"), "eur");
    }

    #[test]
    fn payment_status_parsing() {
        assert!(SessionPaymentStatus::parse("paid").is_paid());
        assert!(SessionPaymentStatus::parse("no_payment_required").is_paid());
        assert!(!SessionPaymentStatus::parse("unpaid").is_paid());
        assert!(!SessionPaymentStatus::parse("garbage").is_paid());
    }
}
