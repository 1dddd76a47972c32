mod common;

use assert_matches::assert_matches;
use bakeshop_api::auth::ShopperIdentity;
use bakeshop_api::errors::ServiceError;
use bakeshop_api::services::carts::AddToCartInput;
use common::TestApp;
use rust_decimal_macros::dec;
use uuid::Uuid;

#[tokio::test]
async fn cart_is_created_once_per_identity() {
    let app = TestApp::new().await;
    let identity = ShopperIdentity::Session("sess-1".to_string());

    let first = app.services.carts.get_or_create_cart(&identity).await.unwrap();
    let second = app.services.carts.get_or_create_cart(&identity).await.unwrap();
    assert_eq!(first.id, second.id);

    let other = ShopperIdentity::Session("sess-2".to_string());
    let third = app.services.carts.get_or_create_cart(&other).await.unwrap();
    assert_ne!(first.id, third.id);
}

#[tokio::test]
async fn adding_same_product_accumulates_quantity() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let baguette = app
        .seed_product(bakery.id, "Baguette", dec!(1.50), dec!(0.25))
        .await;

    let identity = ShopperIdentity::Session("sess-acc".to_string());
    let cart = app.services.carts.get_or_create_cart(&identity).await.unwrap();

    app.services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: baguette.id, quantity: 2 })
        .await
        .unwrap();
    let detail = app
        .services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: baguette.id, quantity: 3 })
        .await
        .unwrap();

    assert_eq!(detail.lines.len(), 1);
    assert_eq!(detail.lines[0].item.quantity, 5);
    assert_eq!(detail.summary.item_count, 5);
    assert_eq!(detail.summary.cash_total, dec!(7.50));
}

#[tokio::test]
async fn adding_unknown_product_fails() {
    let app = TestApp::new().await;
    let identity = ShopperIdentity::Session("sess-unknown".to_string());
    let cart = app.services.carts.get_or_create_cart(&identity).await.unwrap();

    let missing = Uuid::new_v4();
    let err = app
        .services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: missing, quantity: 1 })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound(id) if id == missing);
}

#[tokio::test]
async fn cash_additions_never_merge_into_redeemed_lines() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let madeleine = app
        .seed_product_full(bakery.id, "Madeleine", dec!(2.00), dec!(0.25), Some(20))
        .await;
    let customer = app.seed_customer("mixed@example.com", 20).await;

    assert!(app.services.loyalty.redeem(customer.id, madeleine.id).await.unwrap());

    let identity = ShopperIdentity::Customer(customer.id);
    let cart = app.services.carts.get_or_create_cart(&identity).await.unwrap();
    let detail = app
        .services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: madeleine.id, quantity: 2 })
        .await
        .unwrap();

    // The zero-cash redeemed line stays as it was; the purchase is charged.
    assert_eq!(detail.lines.len(), 2);
    assert_eq!(detail.summary.cash_total, dec!(4.00));
    let redeemed = detail
        .lines
        .iter()
        .find(|l| l.item.redeemed_with_points)
        .expect("redeemed line kept");
    assert_eq!(redeemed.item.quantity, 1);
    let cash = detail
        .lines
        .iter()
        .find(|l| !l.item.redeemed_with_points)
        .expect("cash line created");
    assert_eq!(cash.item.quantity, 2);
}

#[tokio::test]
async fn quantity_zero_removes_the_line() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let rye = app.seed_product(bakery.id, "Rye Loaf", dec!(4.00), dec!(0.25)).await;

    let identity = ShopperIdentity::Session("sess-zero".to_string());
    let cart = app.services.carts.get_or_create_cart(&identity).await.unwrap();
    let detail = app
        .services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: rye.id, quantity: 2 })
        .await
        .unwrap();
    let line_id = detail.lines[0].item.id;

    let detail = app
        .services
        .carts
        .update_item_quantity(cart.id, line_id, 0)
        .await
        .unwrap();
    assert!(detail.lines.is_empty());
    assert_eq!(detail.summary.item_count, 0);
}

#[tokio::test]
async fn lines_cannot_be_touched_across_carts() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let bun = app.seed_product(bakery.id, "Cinnamon Bun", dec!(2.25), dec!(0.25)).await;

    let alice = ShopperIdentity::Session("sess-alice".to_string());
    let mallory = ShopperIdentity::Session("sess-mallory".to_string());

    let alice_cart = app.services.carts.get_or_create_cart(&alice).await.unwrap();
    let mallory_cart = app.services.carts.get_or_create_cart(&mallory).await.unwrap();

    let detail = app
        .services
        .carts
        .add_item(alice_cart.id, AddToCartInput { product_id: bun.id, quantity: 1 })
        .await
        .unwrap();
    let alice_line = detail.lines[0].item.id;

    // Guessing a foreign line id must look like a missing line
    let err = app
        .services
        .carts
        .update_item_quantity(mallory_cart.id, alice_line, 5)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::LineNotFound(_));

    let untouched = app.services.carts.get_cart_detail(alice_cart.id).await.unwrap();
    assert_eq!(untouched.lines[0].item.quantity, 1);
}

#[tokio::test]
async fn login_merge_sums_overlapping_lines() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let a = app.seed_product(bakery.id, "Croissant", dec!(1.25), dec!(0.25)).await;
    let b = app.seed_product(bakery.id, "Brioche", dec!(3.50), dec!(0.25)).await;
    let c = app.seed_product(bakery.id, "Eclair", dec!(2.75), dec!(0.25)).await;

    let customer = app.seed_customer("merge@example.com", 0).await;
    let session = ShopperIdentity::Session("sess-merge".to_string());
    let account = ShopperIdentity::Customer(customer.id);

    // Anonymous basket: {A:2, B:1}
    let session_cart = app.services.carts.get_or_create_cart(&session).await.unwrap();
    app.services
        .carts
        .add_item(session_cart.id, AddToCartInput { product_id: a.id, quantity: 2 })
        .await
        .unwrap();
    app.services
        .carts
        .add_item(session_cart.id, AddToCartInput { product_id: b.id, quantity: 1 })
        .await
        .unwrap();

    // Account basket: {B:3, C:1}
    let account_cart = app.services.carts.get_or_create_cart(&account).await.unwrap();
    app.services
        .carts
        .add_item(account_cart.id, AddToCartInput { product_id: b.id, quantity: 3 })
        .await
        .unwrap();
    app.services
        .carts
        .add_item(account_cart.id, AddToCartInput { product_id: c.id, quantity: 1 })
        .await
        .unwrap();

    let merged = app
        .services
        .carts
        .merge_session_cart("sess-merge", customer.id)
        .await
        .unwrap()
        .expect("merge should produce a cart");
    assert_eq!(merged.id, account_cart.id);

    let detail = app.services.carts.get_cart_detail(merged.id).await.unwrap();
    let mut quantities: Vec<(Uuid, i32)> = detail
        .lines
        .iter()
        .map(|l| (l.product.id, l.item.quantity))
        .collect();
    quantities.sort();
    let mut expected = vec![(a.id, 2), (b.id, 4), (c.id, 1)];
    expected.sort();
    assert_eq!(quantities, expected);

    // The session cart is gone, and its identity no longer resolves
    assert!(app.services.carts.find_cart(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn login_merge_reowns_cart_when_customer_has_none() {
    let app = TestApp::new().await;
    let bakery = app.seed_bakery("Crumb & Crust").await;
    let tart = app.seed_product(bakery.id, "Fruit Tart", dec!(5.00), dec!(0.25)).await;

    let customer = app.seed_customer("reown@example.com", 0).await;
    let session = ShopperIdentity::Session("sess-reown".to_string());

    let session_cart = app.services.carts.get_or_create_cart(&session).await.unwrap();
    app.services
        .carts
        .add_item(session_cart.id, AddToCartInput { product_id: tart.id, quantity: 1 })
        .await
        .unwrap();

    let merged = app
        .services
        .carts
        .merge_session_cart("sess-reown", customer.id)
        .await
        .unwrap()
        .expect("merge should produce a cart");

    // Same cart row, new owner
    assert_eq!(merged.id, session_cart.id);
    assert_eq!(merged.customer_id, Some(customer.id));
    assert_eq!(merged.session_token, None);

    let account = ShopperIdentity::Customer(customer.id);
    let found = app.services.carts.find_cart(&account).await.unwrap().unwrap();
    assert_eq!(found.id, session_cart.id);
}

#[tokio::test]
async fn merge_without_session_cart_is_a_noop() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("noop@example.com", 0).await;

    let merged = app
        .services
        .carts
        .merge_session_cart("never-existed", customer.id)
        .await
        .unwrap();
    assert!(merged.is_none());
}

#[tokio::test]
async fn select_bakery_drops_foreign_lines() {
    let app = TestApp::new().await;
    let crumb = app.seed_bakery("Crumb & Crust").await;
    let flour = app.seed_bakery("Flour Power").await;
    let sourdough = app.seed_product(crumb.id, "Sourdough", dec!(6.50), dec!(0.25)).await;
    let focaccia = app.seed_product(flour.id, "Focaccia", dec!(4.25), dec!(0.25)).await;

    let identity = ShopperIdentity::Session("sess-select".to_string());
    let cart = app.services.carts.get_or_create_cart(&identity).await.unwrap();
    app.services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: sourdough.id, quantity: 1 })
        .await
        .unwrap();
    let detail = app
        .services
        .carts
        .add_item(cart.id, AddToCartInput { product_id: focaccia.id, quantity: 2 })
        .await
        .unwrap();
    assert!(detail.summary.spans_multiple_bakeries);

    let detail = app.services.carts.keep_only_bakery(cart.id, crumb.id).await.unwrap();
    assert_eq!(detail.lines.len(), 1);
    assert_eq!(detail.lines[0].product.id, sourdough.id);
    assert!(!detail.summary.spans_multiple_bakeries);
}
