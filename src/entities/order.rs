use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity: an immutable priced snapshot of a cart.
///
/// Addresses are denormalized JSON copies taken at creation time, so later
/// edits to a customer's stored address never affect historical orders.
/// `payment_intent_id` is recorded optimistically at session creation and
/// may be corrected later from webhook payloads (the provider can reassign
/// it).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Human-readable reference, e.g. `ORD-7K2F9QXB`. Display-only;
    /// uniqueness is best effort, the primary key is `id`.
    pub reference: String,
    pub customer_id: Uuid,
    /// Cart this order was built from, kept so settlement can clear it.
    #[sea_orm(nullable)]
    pub cart_id: Option<Uuid>,
    pub status: OrderStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax_amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((8, 4)))")]
    pub tax_rate: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: Json,
    #[sea_orm(column_type = "Json")]
    pub billing_address: Json,
    #[sea_orm(nullable)]
    pub checkout_session_id: Option<String>,
    #[sea_orm(nullable)]
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status state machine.
///
/// Forward-only through pending → payment_processing → paid → preparing →
/// shipped → delivered; cancelled/refunded are terminal side branches
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "payment_processing")]
    PaymentProcessing,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Refunded)
    }

    /// States from which the paid transition is still allowed.
    pub fn payable() -> [Self; 2] {
        [Self::Pending, Self::PaymentProcessing]
    }

    /// States from which cancellation is still allowed.
    pub fn cancellable() -> [Self; 5] {
        [
            Self::Pending,
            Self::PaymentProcessing,
            Self::Paid,
            Self::Preparing,
            Self::Shipped,
        ]
    }
}
