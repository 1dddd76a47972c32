use crate::{
    entities::{cart_item, order, Cart, CartItem, Customer, Order, OrderModel, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::OrderNotifier,
    services::{
        loyalty::LoyaltyService,
        payments::{PaymentGateway, SessionPaymentStatus},
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Drives orders through paid/cancelled transitions.
///
/// Completion can be triggered concurrently from several directions (the
/// customer landing on the success page, the provider's webhook, a retried
/// webhook delivery). Every path funnels into [`complete_order`], whose
/// guarded status update makes exactly one caller the winner; only the
/// winner runs the side effects.
///
/// [`complete_order`]: SettlementService::complete_order
#[derive(Clone)]
pub struct SettlementService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    loyalty: LoyaltyService,
    notifier: Arc<dyn OrderNotifier>,
    event_sender: Arc<EventSender>,
}

impl SettlementService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        loyalty: LoyaltyService,
        notifier: Arc<dyn OrderNotifier>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            loyalty,
            notifier,
            event_sender,
        }
    }

    /// Marks an order paid and runs the completion side effects: award
    /// loyalty points, send the confirmation, clear the source cart.
    ///
    /// Returns `Ok(true)` only for the caller that actually performed the
    /// transition. A repeat call, or a concurrent racer that lost, gets
    /// `Ok(false)` and must not re-run any side effect. Completion of an
    /// already-cancelled order is logged and ignored rather than failed,
    /// since the money has moved and the webhook must still be acked.
    ///
    /// The status flip, the point award, and the cart clear commit in one
    /// transaction. If any of them fails the flip rolls back too, the
    /// webhook delivery errors, and the provider's redelivery retries the
    /// whole completion.
    #[instrument(skip(self))]
    pub async fn complete_order(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::payable()))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            let order = Order::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
            txn.commit().await?;
            match order.status {
                OrderStatus::Paid => {
                    info!("Order {} already paid, nothing to do", order.reference);
                }
                status => {
                    warn!(
                        "Payment confirmed for order {} in status {:?}; leaving it untouched",
                        order.reference, status
                    );
                }
            }
            return Ok(false);
        }

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        self.loyalty.award(&txn, order.customer_id, &order).await?;
        self.clear_source_cart(&txn, &order).await?;
        txn.commit().await?;

        info!("Order {} marked paid", order.reference);
        self.notify_confirmed(&order).await;

        self.event_sender.send_or_log(Event::OrderPaid(order.id)).await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: format!("{:?}", OrderStatus::PaymentProcessing),
                new_status: format!("{:?}", OrderStatus::Paid),
            })
            .await;

        Ok(true)
    }

    /// Cancels an order. Idempotent: cancelling an already-cancelled order
    /// is `Ok(false)`. Orders in a terminal state other than cancelled
    /// cannot be cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let updated = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.is_in(OrderStatus::cancellable()))
            .exec(&*self.db)
            .await?;

        if updated.rows_affected == 0 {
            let order = Order::find_by_id(order_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;
            return match order.status {
                OrderStatus::Cancelled => Ok(false),
                status => Err(ServiceError::InvalidOperation(format!(
                    "Order {} cannot be cancelled from status {:?}",
                    order.reference, status
                ))),
            };
        }

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        info!("Order {} cancelled", order.reference);
        self.notify_cancelled(&order).await;

        self.event_sender
            .send_or_log(Event::OrderCancelled(order.id))
            .await;

        Ok(true)
    }

    /// Synchronous settlement path: the customer came back on the success
    /// redirect. Asks the gateway whether the session is actually paid and
    /// completes the order if so. Returns whether the order is paid now,
    /// regardless of which caller got there first.
    #[instrument(skip(self))]
    pub async fn verify_and_complete(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(order_id.to_string()))?;

        if order.status == OrderStatus::Paid {
            return Ok(true);
        }

        let session_id = order.checkout_session_id.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Order {} has no checkout session to verify",
                order.reference
            ))
        })?;

        let session = self.gateway.fetch_session(session_id).await?;
        if !session.payment_status.is_paid() {
            info!(
                "Session {} for order {} not paid yet ({:?})",
                session_id, order.reference, session.payment_status
            );
            return Ok(false);
        }

        self.complete_order(order.id).await?;
        Ok(true)
    }

    /// Asynchronous settlement path: a (signature-verified) provider event.
    ///
    /// Deliveries are at-least-once and unordered, so every branch here has
    /// to tolerate replays; they all bottom out in the guarded transitions
    /// above. Events that cannot be matched to an order are logged and
    /// dropped so the provider stops retrying them.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<(), ServiceError> {
        match event.event_type.as_str() {
            "checkout.session.completed" => {
                let object = &event.data.object;
                // Delayed payment methods complete the session before the
                // money moves; those orders settle on the later
                // payment_intent.succeeded event.
                let status =
                    SessionPaymentStatus::parse(object.payment_status.as_deref().unwrap_or(""));
                if !status.is_paid() {
                    info!(
                        "Session {:?} completed but not paid ({:?}); awaiting intent confirmation",
                        object.id, object.payment_status
                    );
                    return Ok(());
                }
                match self
                    .resolve_order(
                        object.metadata.order_id.as_deref(),
                        object.payment_intent.as_deref(),
                    )
                    .await?
                {
                    Some(order) => {
                        self.complete_order(order.id).await?;
                    }
                    None => warn!(
                        "Dropping checkout.session.completed for unknown order (session {:?})",
                        object.id
                    ),
                }
            }
            "payment_intent.succeeded" => {
                match self
                    .resolve_order(
                        event.data.object.metadata.order_id.as_deref(),
                        event.data.object.id.as_deref(),
                    )
                    .await?
                {
                    Some(order) => {
                        self.complete_order(order.id).await?;
                    }
                    None => warn!(
                        "Dropping payment_intent.succeeded for unknown intent {:?}",
                        event.data.object.id
                    ),
                }
            }
            "payment_intent.payment_failed" => {
                match self
                    .resolve_order(
                        event.data.object.metadata.order_id.as_deref(),
                        event.data.object.id.as_deref(),
                    )
                    .await?
                {
                    // Only orders still awaiting payment are cancelled; a
                    // stray failure for an order paid through another
                    // attempt must not revoke it.
                    Some(order) if OrderStatus::payable().contains(&order.status) => {
                        self.cancel_order(order.id).await?;
                    }
                    Some(order) => {
                        info!(
                            "Ignoring payment failure for order {} in status {:?}",
                            order.reference, order.status
                        );
                    }
                    None => warn!(
                        "Dropping payment_intent.payment_failed for unknown intent {:?}",
                        event.data.object.id
                    ),
                }
            }
            other => {
                info!("Ignoring unhandled event type {}", other);
            }
        }
        Ok(())
    }

    /// Matches an incoming event to an order.
    ///
    /// Preference order: the order id we planted in the session metadata,
    /// then the stored payment intent id. Intent ids are matched leniently
    /// (exact, then with the provider's `pi_` prefix stripped, then as a
    /// substring) because the id recorded at session creation is
    /// provisional and the webhook carries the canonical form. On a lenient
    /// match the stored id is rewritten to the canonical one.
    async fn resolve_order(
        &self,
        metadata_order_id: Option<&str>,
        payment_intent: Option<&str>,
    ) -> Result<Option<OrderModel>, ServiceError> {
        if let Some(raw) = metadata_order_id {
            if let Ok(id) = Uuid::parse_str(raw) {
                if let Some(order) = Order::find_by_id(id).one(&*self.db).await? {
                    return Ok(Some(order));
                }
            }
            warn!("Event metadata names unknown order id {:?}", raw);
        }

        let Some(intent) = payment_intent else {
            return Ok(None);
        };

        let mut found = Order::find()
            .filter(order::Column::PaymentIntentId.eq(intent))
            .one(&*self.db)
            .await?;

        if found.is_none() {
            let core = intent.strip_prefix("pi_").unwrap_or(intent);
            found = Order::find()
                .filter(order::Column::PaymentIntentId.eq(core))
                .one(&*self.db)
                .await?;
            if found.is_none() && !core.is_empty() {
                found = Order::find()
                    .filter(order::Column::PaymentIntentId.contains(core))
                    .one(&*self.db)
                    .await?;
            }
        }

        if let Some(order) = &found {
            if order.payment_intent_id.as_deref() != Some(intent) {
                // Self-heal: store the canonical intent id so the next
                // delivery matches exactly.
                let mut active: order::ActiveModel = order.clone().into();
                active.payment_intent_id = Set(Some(intent.to_string()));
                active.updated_at = Set(Utc::now());
                let healed = active.update(&*self.db).await?;
                info!(
                    "Updated stored payment intent for order {} to {}",
                    healed.reference, intent
                );
                return Ok(Some(healed));
            }
        }

        Ok(found)
    }

    /// Clears the cart the order was built from, but only if it is still
    /// the customer's cart (a later login merge may have re-owned it).
    /// Runs on the completion transaction.
    async fn clear_source_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &OrderModel,
    ) -> Result<(), ServiceError> {
        let Some(cart_id) = order.cart_id else {
            return Ok(());
        };
        let Some(cart) = Cart::find_by_id(cart_id).one(conn).await? else {
            return Ok(());
        };
        if cart.customer_id != Some(order.customer_id) {
            return Ok(());
        }

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(conn)
            .await?;

        self.event_sender
            .send_or_log(Event::CartCleared(cart.id))
            .await;
        Ok(())
    }

    async fn notify_confirmed(&self, order: &OrderModel) {
        match Customer::find_by_id(order.customer_id).one(&*self.db).await {
            Ok(Some(customer)) => {
                if let Err(e) = self.notifier.order_confirmed(&customer.email, order).await {
                    warn!("Confirmation for order {} failed: {}", order.reference, e);
                }
            }
            Ok(None) => warn!("Order {} has no customer row", order.reference),
            Err(e) => warn!("Customer lookup for order {} failed: {}", order.reference, e),
        }
    }

    async fn notify_cancelled(&self, order: &OrderModel) {
        match Customer::find_by_id(order.customer_id).one(&*self.db).await {
            Ok(Some(customer)) => {
                if let Err(e) = self.notifier.order_cancelled(&customer.email, order).await {
                    warn!("Cancellation notice for {} failed: {}", order.reference, e);
                }
            }
            Ok(None) => warn!("Order {} has no customer row", order.reference),
            Err(e) => warn!("Customer lookup for order {} failed: {}", order.reference, e),
        }
    }
}

/// Provider event envelope, as delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

/// The union of the (few) object fields we read across event types.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub metadata: WebhookMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookMetadata {
    #[serde(default)]
    pub order_id: Option<String>,
}
