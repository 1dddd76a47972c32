use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::ShopperIdentity,
    errors::ServiceError,
    services::orders::{Address, CreateOrderInput},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/:order_id/success", get(checkout_success))
        .route("/:order_id/cancel", get(checkout_cancelled))
}

pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/:order_id", get(get_my_order))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    pub shipping_address: Address,
    /// Defaults to the shipping address when absent
    pub billing_address: Option<Address>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    #[schema(value_type = Object)]
    pub order: crate::entities::OrderModel,
    /// Hosted payment page to redirect the shopper to
    pub redirect_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementStatus {
    pub order_id: Uuid,
    pub paid: bool,
    pub status: String,
}

/// Turn my cart into an order and open a hosted payment session.
///
/// The order is created `pending` and advanced to `payment_processing` once
/// the session exists; the response carries the redirect URL for the hosted
/// page.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created, payment session open", body = CheckoutResponse),
        (status = 400, description = "Empty or multi-bakery cart", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn start_checkout(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let customer_id = identity.customer_id().ok_or_else(|| {
        ServiceError::Unauthorized("checkout requires an authenticated customer".into())
    })?;

    let cart = state
        .services
        .carts
        .find_cart(&identity)
        .await?
        .ok_or(ServiceError::EmptyCart)?;

    let order = state
        .services
        .orders
        .create_from_cart(
            cart.id,
            customer_id,
            CreateOrderInput {
                shipping_address: payload.shipping_address,
                billing_address: payload.billing_address,
            },
        )
        .await?;

    let started = state.services.payments.start_payment(order.id).await?;
    let order = state.services.orders.get_order(order.id).await?;

    Ok(created_response(CheckoutResponse {
        order,
        redirect_url: started.redirect_url,
    }))
}

/// Success redirect target: the shopper came back from the hosted page.
///
/// Confirms payment with the provider before trusting the redirect; a
/// crafted visit to this URL cannot mark an order paid.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/{order_id}/success",
    responses(
        (status = 200, description = "Settlement status", body = SettlementStatus),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_success(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    require_order_access(&state, &identity, order_id).await?;

    let paid = state.services.settlement.verify_and_complete(order_id).await?;
    let order = state.services.orders.get_order(order_id).await?;

    Ok(success_response(SettlementStatus {
        order_id,
        paid,
        status: format!("{:?}", order.status),
    }))
}

/// Cancel redirect target: the shopper abandoned the hosted page. The order
/// is left payable so checkout can be retried; this endpoint only reports
/// where the order stands.
#[utoipa::path(
    get,
    path = "/api/v1/checkout/{order_id}/cancel",
    responses(
        (status = 200, description = "Settlement status", body = SettlementStatus),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout_cancelled(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = require_order_access(&state, &identity, order_id).await?;

    Ok(success_response(SettlementStatus {
        order_id,
        paid: order.status == crate::entities::OrderStatus::Paid,
        status: format!("{:?}", order.status),
    }))
}

/// List my orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    responses((status = 200, description = "My orders")),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = identity
        .customer_id()
        .ok_or_else(|| ServiceError::Unauthorized("orders require an authenticated customer".into()))?;

    let orders = state
        .services
        .orders
        .list_orders_for_customer(customer_id)
        .await?;
    Ok(success_response(orders))
}

/// Get one of my orders with its lines
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_id}",
    responses(
        (status = 200, description = "Order with lines"),
        (status = 404, description = "Not my order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_my_order(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = require_order_access(&state, &identity, order_id).await?;
    let items = state.services.orders.get_order_items(order_id).await?;

    Ok(success_response(serde_json::json!({
        "order": order,
        "items": items,
    })))
}

/// Loads an order, enforcing that it belongs to the requesting customer.
async fn require_order_access(
    state: &AppState,
    identity: &ShopperIdentity,
    order_id: Uuid,
) -> Result<crate::entities::OrderModel, ServiceError> {
    let customer_id = identity
        .customer_id()
        .ok_or_else(|| ServiceError::Unauthorized("orders require an authenticated customer".into()))?;
    state
        .services
        .orders
        .get_order_for_customer(order_id, customer_id)
        .await
}
