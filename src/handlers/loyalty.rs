use crate::handlers::common::success_response;
use crate::{auth::ShopperIdentity, errors::ServiceError, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

pub fn loyalty_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/balance", get(get_balance))
        .route("/redeem", post(redeem_product))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub customer_id: Uuid,
    pub points: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RedeemRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RedeemResponse {
    /// Whether the redemption went through; `false` means the product is
    /// not redeemable or the balance is short
    pub redeemed: bool,
    pub points: i64,
}

/// My loyalty point balance
#[utoipa::path(
    get,
    path = "/api/v1/loyalty/balance",
    responses(
        (status = 200, description = "Point balance", body = BalanceResponse),
        (status = 401, description = "Not an authenticated customer", body = crate::errors::ErrorResponse)
    ),
    tag = "Loyalty"
)]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = require_customer(&identity)?;
    let points = state.services.loyalty.balance(customer_id).await?;
    Ok(success_response(BalanceResponse { customer_id, points }))
}

/// Spend points on a product; on success it lands in my cart as a zero-cash
/// line
#[utoipa::path(
    post,
    path = "/api/v1/loyalty/redeem",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Redemption outcome", body = RedeemResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Loyalty"
)]
pub async fn redeem_product(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Json(payload): Json<RedeemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let customer_id = require_customer(&identity)?;

    let redeemed = state
        .services
        .loyalty
        .redeem(customer_id, payload.product_id)
        .await?;
    let points = state.services.loyalty.balance(customer_id).await?;

    Ok(success_response(RedeemResponse { redeemed, points }))
}

fn require_customer(identity: &ShopperIdentity) -> Result<Uuid, ServiceError> {
    identity
        .customer_id()
        .ok_or_else(|| ServiceError::Unauthorized("loyalty requires an authenticated customer".into()))
}
