use crate::{
    entities::{cart_item, customer, CartItem, Customer, OrderModel, Product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Loyalty ledger: integer point balance per customer.
///
/// Balances are only ever changed through guarded SQL updates (increment,
/// or decrement-with-floor-check), never read-then-write, so concurrent
/// redemptions can never drive a balance negative.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl LoyaltyService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn balance(&self, customer_id: Uuid) -> Result<i64, ServiceError> {
        let customer = Customer::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {} not found", customer_id)))?;
        Ok(customer.loyalty_points)
    }

    /// Awards floor(order total) points on the caller's connection, so the
    /// increment commits (or rolls back) together with whatever transition
    /// triggered it. Called exactly once per completed order; the
    /// exactly-once guarantee is the settlement layer's compare-and-set,
    /// not this method's concern.
    #[instrument(skip(self, conn, order))]
    pub async fn award<C: ConnectionTrait>(
        &self,
        conn: &C,
        customer_id: Uuid,
        order: &OrderModel,
    ) -> Result<i64, ServiceError> {
        let points = points_for_total(order)?;
        if points == 0 {
            return Ok(0);
        }

        Customer::update_many()
            .col_expr(
                customer::Column::LoyaltyPoints,
                Expr::col(customer::Column::LoyaltyPoints).add(points),
            )
            .col_expr(customer::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(customer::Column::Id.eq(customer_id))
            .exec(conn)
            .await?;

        self.event_sender
            .send_or_log(Event::PointsAwarded {
                customer_id,
                order_id: order.id,
                points,
            })
            .await;

        info!("Awarded {} points to customer {}", points, customer_id);
        Ok(points)
    }

    /// Spends points on a points-eligible product, adding it to the
    /// customer's cart as a zero-cash line.
    ///
    /// Returns `false` (not an error) when the product is not eligible or
    /// the balance is short. The decrement carries its own floor check in
    /// the WHERE clause, so two concurrent redemptions can never both
    /// succeed on a balance that only covers one.
    #[instrument(skip(self))]
    pub async fn redeem(&self, customer_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let product = Product::find_by_id(product_id)
            .one(&txn)
            .await?
            .filter(|p| p.available)
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let Some(required) = product.points_price else {
            return Ok(false);
        };

        // Conditional decrement: no row is touched unless the balance covers
        // the cost.
        let updated = Customer::update_many()
            .col_expr(
                customer::Column::LoyaltyPoints,
                Expr::col(customer::Column::LoyaltyPoints).sub(required),
            )
            .col_expr(customer::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(customer::Column::Id.eq(customer_id))
            .filter(customer::Column::LoyaltyPoints.gte(required))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Ok(false);
        }

        let cart = self.get_or_create_customer_cart(&txn, customer_id).await?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::RedeemedWithPoints.eq(true))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                let quantity = item.quantity + 1;
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(quantity);
                item.updated_at = Set(Utc::now());
                item.update(&txn).await?;
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product_id),
                    quantity: Set(1),
                    redeemed_with_points: Set(true),
                    created_at: Set(Utc::now()),
                    updated_at: Set(Utc::now()),
                };
                item.insert(&txn).await?;
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PointsRedeemed {
                customer_id,
                product_id,
                points: required,
            })
            .await;

        info!(
            "Customer {} redeemed {} points for product {}",
            customer_id, required, product_id
        );
        Ok(true)
    }

    async fn get_or_create_customer_cart(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        customer_id: Uuid,
    ) -> Result<crate::entities::CartModel, ServiceError> {
        use crate::entities::cart;

        let existing = crate::entities::Cart::find()
            .filter(cart::Column::CustomerId.eq(Some(customer_id)))
            .one(txn)
            .await?;

        if let Some(cart) = existing {
            return Ok(cart);
        }

        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            session_token: Set(None),
            customer_id: Set(Some(customer_id)),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };
        Ok(cart.insert(txn).await?)
    }
}

/// floor(order total), as integer points.
pub fn points_for_total(order: &OrderModel) -> Result<i64, ServiceError> {
    order
        .total_amount
        .floor()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("order total out of range: {}", order.total_amount)))
}
