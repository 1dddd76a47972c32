use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bakeshop API",
        version = "0.1.0",
        description = r#"
# Bakeshop Marketplace API

Cart-to-order workflow for a multi-bakery marketplace: carts, single-bakery
checkout, hosted payment sessions, webhook-driven settlement, and a loyalty
point ledger.

## Identity

Requests carry either an authenticated customer id (`x-customer-id`) or an
anonymous session token (`x-session-token`). Checkout, orders, and loyalty
require a customer; carts work with either.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    paths(
        crate::handlers::carts::get_my_cart,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::select_bakery,
        crate::handlers::carts::merge_carts,
        crate::handlers::checkout::start_checkout,
        crate::handlers::checkout::checkout_success,
        crate::handlers::checkout::checkout_cancelled,
        crate::handlers::checkout::list_my_orders,
        crate::handlers::checkout::get_my_order,
        crate::handlers::loyalty::get_balance,
        crate::handlers::loyalty::redeem_product,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::orders::Address,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::carts::SelectBakeryRequest,
        crate::handlers::carts::MergeCartsRequest,
        crate::handlers::checkout::CheckoutRequest,
        crate::handlers::checkout::CheckoutResponse,
        crate::handlers::checkout::SettlementStatus,
        crate::handlers::loyalty::BalanceResponse,
        crate::handlers::loyalty::RedeemRequest,
        crate::handlers::loyalty::RedeemResponse,
    )),
    tags(
        (name = "Carts", description = "Basket management"),
        (name = "Checkout", description = "Cart-to-order conversion and settlement redirects"),
        (name = "Orders", description = "Order history"),
        (name = "Payments", description = "Payment provider integration"),
        (name = "Loyalty", description = "Point balance and redemption")
    )
)]
pub struct ApiDoc;
