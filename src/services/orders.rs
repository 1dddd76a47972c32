use crate::{
    config::AppConfig,
    entities::{order, order_item, Cart, Order, OrderItem, OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::{load_lines, CartLine},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Order builder: snapshots a cart into an immutable priced order.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

/// Plain structured address, denormalized onto the order at creation time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub full_name: String,
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    pub country_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Input for building an order from a cart
#[derive(Debug, Deserialize)]
pub struct CreateOrderInput {
    pub shipping_address: Address,
    /// Defaults to a copy of the shipping address when absent.
    pub billing_address: Option<Address>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Builds an order from a cart: freezes per-line prices and tax at this
    /// instant, denormalizes the addresses, and persists order plus lines in
    /// one transaction.
    ///
    /// Fails with `EmptyCart` on an empty cart and with
    /// `MultipleBakeriesInCart` when the cart spans more than one bakery;
    /// callers are expected to have run the select-bakery step first, but
    /// the builder does not rely on that.
    #[instrument(skip(self, input))]
    pub async fn create_from_cart(
        &self,
        cart_id: Uuid,
        customer_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let lines = load_lines(&txn, cart_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let bakeries: BTreeSet<Uuid> = lines.iter().map(|l| l.product.bakery_id).collect();
        if bakeries.len() > 1 {
            return Err(ServiceError::MultipleBakeriesInCart);
        }

        let pricing = Pricing::from_lines(&lines);

        let order_id = Uuid::new_v4();
        let shipping = serde_json::to_value(&input.shipping_address)
            .map_err(|e| ServiceError::InternalError(format!("address serialization: {}", e)))?;
        let billing = match &input.billing_address {
            Some(addr) => serde_json::to_value(addr)
                .map_err(|e| ServiceError::InternalError(format!("address serialization: {}", e)))?,
            None => shipping.clone(),
        };

        let order = order::ActiveModel {
            id: Set(order_id),
            reference: Set(generate_reference(order_id)),
            customer_id: Set(customer_id),
            cart_id: Set(Some(cart_id)),
            status: Set(OrderStatus::Pending),
            subtotal: Set(pricing.subtotal),
            tax_amount: Set(pricing.tax_amount),
            tax_rate: Set(pricing.effective_tax_rate),
            total_amount: Set(pricing.total),
            currency: Set(self.config.currency.clone()),
            shipping_address: Set(shipping),
            billing_address: Set(billing),
            checkout_session_id: Set(None),
            payment_intent_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        let order = order.insert(&txn).await?;

        for line in &lines {
            let unit_price = if line.item.redeemed_with_points {
                Decimal::ZERO
            } else {
                line.product.price
            };
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                product_name: Set(line.product.name.clone()),
                bakery_name: Set(self.bakery_name(&txn, line.product.bakery_id).await?),
                quantity: Set(line.item.quantity),
                unit_price: Set(unit_price),
                tax_rate: Set(line.product.tax_rate),
                line_total: Set(unit_price * Decimal::from(line.item.quantity)),
                redeemed_with_points: Set(line.item.redeemed_with_points),
                created_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CheckoutStarted { cart_id, order_id })
            .await;
        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;

        info!(
            "Created order {} ({}) from cart {}: total {}",
            order_id, order.reference, cart_id, order.total_amount
        );
        Ok(order)
    }

    async fn bakery_name(
        &self,
        conn: &impl sea_orm::ConnectionTrait,
        bakery_id: Uuid,
    ) -> Result<String, ServiceError> {
        let bakery = crate::entities::Bakery::find_by_id(bakery_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Bakery {} not found", bakery_id)))?;
        Ok(bakery.name)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))
    }

    /// Loads an order while checking it belongs to the caller.
    pub async fn get_order_for_customer(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| o.customer_id == customer_id)
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))
    }

    pub async fn get_order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    pub async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// Order-level pricing derived from the cart lines at freeze time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    /// Effective order-granularity rate; lines keep their own rates.
    pub effective_tax_rate: Decimal,
    pub total: Decimal,
}

impl Pricing {
    pub fn from_lines(lines: &[CartLine]) -> Self {
        let mut subtotal = Decimal::ZERO;
        let mut tax_amount = Decimal::ZERO;

        for line in lines {
            let cash = line.cash_total();
            subtotal += cash;
            tax_amount += cash * line.product.tax_rate;
        }

        let effective_tax_rate = if subtotal.is_zero() {
            Decimal::ZERO
        } else {
            (tax_amount / subtotal).round_dp(4)
        };

        Self {
            subtotal,
            tax_amount: tax_amount.round_dp(4),
            effective_tax_rate,
            total: (subtotal + tax_amount).round_dp(4),
        }
    }
}

/// Human-readable reference derived from the order id. Display-only; no
/// collision check.
pub fn generate_reference(order_id: Uuid) -> String {
    format!(
        "ORD-{}",
        order_id.simple().to_string()[..8].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{cart_item, product};
    use rust_decimal_macros::dec;

    fn cart_line(price: Decimal, tax_rate: Decimal, quantity: i32, redeemed: bool) -> CartLine {
        let product_id = Uuid::new_v4();
        CartLine {
            item: cart_item::Model {
                id: Uuid::new_v4(),
                cart_id: Uuid::new_v4(),
                product_id,
                quantity,
                redeemed_with_points: redeemed,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            product: product::Model {
                id: product_id,
                bakery_id: Uuid::new_v4(),
                name: "Baguette".to_string(),
                price,
                tax_rate,
                points_price: None,
                available: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn pricing_sums_line_totals() {
        let lines = vec![
            cart_line(dec!(4.00), dec!(0.10), 2, false),
            cart_line(dec!(2.50), dec!(0.10), 1, false),
        ];

        let pricing = Pricing::from_lines(&lines);
        assert_eq!(pricing.subtotal, dec!(10.50));
        assert_eq!(pricing.tax_amount, dec!(1.05));
        assert_eq!(pricing.effective_tax_rate, dec!(0.10));
        assert_eq!(pricing.total, dec!(11.55));
    }

    #[test]
    fn pricing_mixed_tax_rates_records_effective_rate() {
        let lines = vec![
            cart_line(dec!(10.00), dec!(0.20), 1, false),
            cart_line(dec!(10.00), dec!(0.10), 1, false),
        ];

        let pricing = Pricing::from_lines(&lines);
        assert_eq!(pricing.subtotal, dec!(20.00));
        assert_eq!(pricing.tax_amount, dec!(3.00));
        assert_eq!(pricing.effective_tax_rate, dec!(0.15));
    }

    #[test]
    fn pricing_ignores_point_redeemed_lines() {
        let lines = vec![
            cart_line(dec!(4.00), dec!(0.10), 1, false),
            cart_line(dec!(99.00), dec!(0.10), 1, true),
        ];

        let pricing = Pricing::from_lines(&lines);
        assert_eq!(pricing.subtotal, dec!(4.00));
        assert_eq!(pricing.total, dec!(4.40));
    }

    #[test]
    fn pricing_all_redeemed_is_zero() {
        let lines = vec![cart_line(dec!(4.00), dec!(0.10), 2, true)];
        let pricing = Pricing::from_lines(&lines);
        assert_eq!(pricing.total, Decimal::ZERO);
        assert_eq!(pricing.effective_tax_rate, Decimal::ZERO);
    }

    #[test]
    fn reference_format() {
        let reference = generate_reference(Uuid::new_v4());
        assert!(reference.starts_with("ORD-"));
        let suffix = &reference[4..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
