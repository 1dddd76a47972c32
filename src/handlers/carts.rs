use crate::handlers::common::{no_content_response, success_response, validate_input};
use crate::{
    auth::ShopperIdentity,
    errors::ServiceError,
    services::carts::AddToCartInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints. All routes operate on "my cart",
/// resolved from the shopper identity headers.
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(get_my_cart))
        .route("/me/items", post(add_to_cart))
        .route("/me/items/:item_id", put(update_cart_item))
        .route("/me/items/:item_id", delete(remove_cart_item))
        .route("/me/clear", post(clear_cart))
        .route("/me/select-bakery", post(select_bakery))
        .route("/me/merge", post(merge_carts))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    /// Zero removes the line
    #[validate(range(min = 0, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SelectBakeryRequest {
    pub bakery_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MergeCartsRequest {
    /// The anonymous session whose cart should fold into mine
    #[validate(length(min = 1))]
    pub session_token: String,
}

/// Get my cart, creating an empty one on first access
#[utoipa::path(
    get,
    path = "/api/v1/carts/me",
    responses(
        (status = 200, description = "Cart with lines and summary"),
        (status = 401, description = "Missing identity", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_my_cart(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_or_create_cart(&identity).await?;
    let detail = state.services.carts.get_cart_detail(cart.id).await?;
    Ok(success_response(detail))
}

/// Add a product to my cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/me/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart"),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state.services.carts.get_or_create_cart(&identity).await?;
    let detail = state
        .services
        .carts
        .add_item(
            cart.id,
            AddToCartInput {
                product_id: payload.product_id,
                quantity: payload.quantity,
            },
        )
        .await?;

    Ok(success_response(detail))
}

/// Set the quantity of a cart line (zero removes it)
#[utoipa::path(
    put,
    path = "/api/v1/carts/me/items/{item_id}",
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart"),
        (status = 404, description = "Line not in this cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = require_cart(&state, &identity).await?;
    let detail = state
        .services
        .carts
        .update_item_quantity(cart.id, item_id, payload.quantity)
        .await?;

    Ok(success_response(detail))
}

/// Remove a line from my cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/me/items/{item_id}",
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Line not in this cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = require_cart(&state, &identity).await?;
    state.services.carts.remove_item(cart.id, item_id).await?;
    Ok(no_content_response())
}

/// Remove every line from my cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/me/clear",
    responses((status = 204, description = "Cart cleared")),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = require_cart(&state, &identity).await?;
    state.services.carts.clear_cart(cart.id).await?;
    Ok(no_content_response())
}

/// Keep only the lines from the chosen bakery, so checkout can proceed
/// single-vendor
#[utoipa::path(
    post,
    path = "/api/v1/carts/me/select-bakery",
    request_body = SelectBakeryRequest,
    responses((status = 200, description = "Updated cart")),
    tag = "Carts"
)]
pub async fn select_bakery(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Json(payload): Json<SelectBakeryRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = require_cart(&state, &identity).await?;
    let detail = state
        .services
        .carts
        .keep_only_bakery(cart.id, payload.bakery_id)
        .await?;
    Ok(success_response(detail))
}

/// Fold an anonymous session cart into the authenticated customer's cart.
/// Called by the front end right after login.
#[utoipa::path(
    post,
    path = "/api/v1/carts/me/merge",
    request_body = MergeCartsRequest,
    responses(
        (status = 200, description = "Merged cart"),
        (status = 204, description = "Nothing to merge"),
        (status = 401, description = "Not an authenticated customer", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn merge_carts(
    State(state): State<Arc<AppState>>,
    identity: ShopperIdentity,
    Json(payload): Json<MergeCartsRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let customer_id = identity.customer_id().ok_or_else(|| {
        ServiceError::Unauthorized("cart merge requires an authenticated customer".into())
    })?;

    match state
        .services
        .carts
        .merge_session_cart(&payload.session_token, customer_id)
        .await?
    {
        Some(cart) => {
            let detail = state.services.carts.get_cart_detail(cart.id).await?;
            Ok(success_response(detail))
        }
        None => Ok(no_content_response()),
    }
}

/// Resolves the identity's cart without creating one; mutations against a
/// cart that was never created are a 404.
async fn require_cart(
    state: &AppState,
    identity: &ShopperIdentity,
) -> Result<crate::entities::CartModel, ServiceError> {
    state
        .services
        .carts
        .find_cart(identity)
        .await?
        .ok_or_else(|| ServiceError::NotFound("No cart for this shopper".into()))
}
