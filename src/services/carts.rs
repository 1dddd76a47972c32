use crate::{
    auth::ShopperIdentity,
    entities::{cart, cart_item, product, Cart, CartItem, CartModel, Product, ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Upper bound applied to line quantities. The handler layer validates this
/// too; the service re-clamps defensively.
pub const MAX_LINE_QUANTITY: i32 = 99;

/// Cart engine: owns the mutable pre-purchase basket.
///
/// One cart per anonymous session or per authenticated customer; the
/// anonymous cart is merged into the customer cart on login. All totals are
/// derived from the lines, never stored.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Resolves the cart for the given identity, creating and persisting an
    /// empty one on first access.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(
        &self,
        identity: &ShopperIdentity,
    ) -> Result<CartModel, ServiceError> {
        if let Some(existing) = self.find_cart(identity).await? {
            return Ok(existing);
        }

        let cart_id = Uuid::new_v4();
        let (session_token, customer_id) = match identity {
            ShopperIdentity::Customer(id) => (None, Some(*id)),
            ShopperIdentity::Session(token) => (Some(token.clone()), None),
        };

        let cart = cart::ActiveModel {
            id: Set(cart_id),
            session_token: Set(session_token),
            customer_id: Set(customer_id),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        let cart = cart.insert(&*self.db).await?;
        self.event_sender.send_or_log(Event::CartCreated(cart_id)).await;

        info!("Created cart {} for {:?}", cart_id, identity);
        Ok(cart)
    }

    /// Looks up the cart bound to an identity without creating one.
    pub async fn find_cart(
        &self,
        identity: &ShopperIdentity,
    ) -> Result<Option<CartModel>, ServiceError> {
        let query = match identity {
            ShopperIdentity::Customer(id) => {
                Cart::find().filter(cart::Column::CustomerId.eq(Some(*id)))
            }
            ShopperIdentity::Session(token) => {
                Cart::find().filter(cart::Column::SessionToken.eq(Some(token.clone())))
            }
        };
        Ok(query.one(&*self.db).await?)
    }

    /// Adds a product to the cart, merging into an existing line when the
    /// product is already present.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartDetail, ServiceError> {
        let quantity = input.quantity.clamp(1, MAX_LINE_QUANTITY);

        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let product = Product::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .filter(|p| p.available)
            .ok_or(ServiceError::ProductNotFound(input.product_id))?;

        // Redeemed lines are priced at zero; a cash purchase of the same
        // product gets its own line.
        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(cart_item::Column::RedeemedWithPoints.eq(false))
            .one(&txn)
            .await?;

        if let Some(item) = existing {
            let current = item.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set((current + quantity).min(MAX_LINE_QUANTITY));
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart_id),
                product_id: Set(product.id),
                quantity: Set(quantity),
                redeemed_with_points: Set(false),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            item.insert(&txn).await?;
        }

        touch_cart(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id,
                product_id: input.product_id,
            })
            .await;

        info!(
            "Added product {} x{} to cart {}",
            input.product_id, quantity, cart_id
        );
        self.get_cart_detail(cart_id).await
    }

    /// Sets the quantity of a cart line. A quantity of zero or less removes
    /// the line entirely.
    ///
    /// The line must belong to the given cart; a missing or foreign line is
    /// a `LineNotFound` error, which keeps one shopper from touching another
    /// shopper's lines by guessing ids.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartDetail, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let item = CartItem::find_by_id(item_id)
            .one(&txn)
            .await?
            .filter(|item| item.cart_id == cart_id)
            .ok_or(ServiceError::LineNotFound(item_id))?;

        if quantity <= 0 {
            item.delete(&txn).await?;
            touch_cart(&txn, cart).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::CartItemRemoved { cart_id, item_id })
                .await;
        } else {
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(quantity.min(MAX_LINE_QUANTITY));
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
            touch_cart(&txn, cart).await?;
            txn.commit().await?;

            self.event_sender
                .send_or_log(Event::CartItemUpdated { cart_id, item_id })
                .await;
        }

        self.get_cart_detail(cart_id).await
    }

    /// Removes a line from the cart. Same ownership rule as
    /// `update_item_quantity`; removing an absent line is an error, not a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<CartDetail, ServiceError> {
        self.update_item_quantity(cart_id, item_id, 0).await
    }

    /// Removes every line. The cart row itself is kept.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(&txn)
            .await?;

        touch_cart(&txn, cart).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart_id)).await;
        info!("Cleared cart {}", cart_id);
        Ok(())
    }

    /// Merges the anonymous session cart into the customer's cart. Called
    /// once per login event.
    ///
    /// - No session cart, or an empty one: no-op.
    /// - Customer has no cart: the session cart is re-owned in place (the
    ///   token identity is dropped).
    /// - Both exist: quantities are summed per product, remaining lines are
    ///   re-parented, and the session cart is deleted only after every line
    ///   has moved.
    #[instrument(skip(self))]
    pub async fn merge_session_cart(
        &self,
        session_token: &str,
        customer_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let session_cart = Cart::find()
            .filter(cart::Column::SessionToken.eq(Some(session_token.to_string())))
            .one(&txn)
            .await?;

        let Some(session_cart) = session_cart else {
            txn.commit().await?;
            return Ok(None);
        };

        let session_items = session_cart.find_related(CartItem).all(&txn).await?;
        if session_items.is_empty() {
            txn.commit().await?;
            return Ok(None);
        }

        let customer_cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(Some(customer_id)))
            .one(&txn)
            .await?;

        let merged = match customer_cart {
            None => {
                // Re-own the session cart wholesale
                let source_id = session_cart.id;
                let mut cart: cart::ActiveModel = session_cart.into();
                cart.customer_id = Set(Some(customer_id));
                cart.session_token = Set(None);
                cart.updated_at = Set(Utc::now());
                let cart = cart.update(&txn).await?;

                self.event_sender
                    .send_or_log(Event::CartsMerged {
                        source_cart_id: source_id,
                        target_cart_id: cart.id,
                        customer_id,
                    })
                    .await;
                cart
            }
            Some(target) => {
                let target_items = target.find_related(CartItem).all(&txn).await?;

                for item in session_items {
                    let existing = target_items
                        .iter()
                        .find(|t| t.product_id == item.product_id && t.redeemed_with_points == item.redeemed_with_points);

                    match existing {
                        Some(t) => {
                            let summed = (t.quantity + item.quantity).min(MAX_LINE_QUANTITY);
                            let mut line: cart_item::ActiveModel = t.clone().into();
                            line.quantity = Set(summed);
                            line.updated_at = Set(Utc::now());
                            line.update(&txn).await?;
                            item.delete(&txn).await?;
                        }
                        None => {
                            let mut line: cart_item::ActiveModel = item.into();
                            line.cart_id = Set(target.id);
                            line.updated_at = Set(Utc::now());
                            line.update(&txn).await?;
                        }
                    }
                }

                // All lines are gone; the empty session cart can be deleted.
                let source_id = session_cart.id;
                session_cart.delete(&txn).await?;

                let target = touch_cart(&txn, target).await?;
                self.event_sender
                    .send_or_log(Event::CartsMerged {
                        source_cart_id: source_id,
                        target_cart_id: target.id,
                        customer_id,
                    })
                    .await;
                target
            }
        };

        txn.commit().await?;
        info!("Merged session cart into customer {} cart", customer_id);
        Ok(Some(merged))
    }

    /// The select-shop step: keeps only the lines belonging to the chosen
    /// bakery, discarding the rest, so checkout can proceed single-vendor.
    #[instrument(skip(self))]
    pub async fn keep_only_bakery(
        &self,
        cart_id: Uuid,
        bakery_id: Uuid,
    ) -> Result<CartDetail, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find_by_id(cart_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let lines = load_lines(&txn, cart_id).await?;
        for line in lines {
            if line.product.bakery_id != bakery_id {
                line.item.delete(&txn).await?;
            }
        }

        touch_cart(&txn, cart).await?;
        txn.commit().await?;

        self.get_cart_detail(cart_id).await
    }

    /// Loads the cart with its lines, resolved products, and derived
    /// summary.
    pub async fn get_cart_detail(&self, cart_id: Uuid) -> Result<CartDetail, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let lines = load_lines(&*self.db, cart_id).await?;
        let summary = CartSummary::from_lines(&lines);

        Ok(CartDetail { cart, lines, summary })
    }
}

/// Sets `updated_at` on the cart. Every mutating operation ends with this;
/// there is no ORM-hook magic.
async fn touch_cart<C: ConnectionTrait>(conn: &C, cart: CartModel) -> Result<CartModel, ServiceError> {
    let mut cart: cart::ActiveModel = cart.into();
    cart.updated_at = Set(Utc::now());
    Ok(cart.update(conn).await?)
}

pub(crate) async fn load_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<CartLine>, ServiceError> {
    let rows = CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .find_also_related(Product)
        .all(conn)
        .await?;

    let mut lines = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        let product = product.ok_or(ServiceError::ProductNotFound(item.product_id))?;
        lines.push(CartLine { item, product });
    }
    Ok(lines)
}

/// Input for adding an item to a cart
#[derive(Debug, Deserialize)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A cart line with its resolved product
#[derive(Debug, Clone, Serialize)]
pub struct CartLine {
    pub item: cart_item::Model,
    pub product: ProductModel,
}

impl CartLine {
    /// Cash value of the line; point-redeemed lines cost nothing.
    pub fn cash_total(&self) -> Decimal {
        if self.item.redeemed_with_points {
            Decimal::ZERO
        } else {
            self.product.price * Decimal::from(self.item.quantity)
        }
    }
}

/// Derived cart figures. Computed on read, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub item_count: i32,
    pub cash_total: Decimal,
    pub bakery_ids: Vec<Uuid>,
    pub spans_multiple_bakeries: bool,
    /// Per-bakery breakdown, used by the storefront to render the
    /// select-shop step.
    pub by_bakery: Vec<BakeryGroup>,
}

/// Lines of one bakery within a cart.
#[derive(Debug, Clone, Serialize)]
pub struct BakeryGroup {
    pub bakery_id: Uuid,
    pub item_count: i32,
    pub cash_total: Decimal,
}

impl CartSummary {
    pub fn from_lines(lines: &[CartLine]) -> Self {
        let item_count = lines.iter().map(|l| l.item.quantity).sum();
        let cash_total = lines.iter().map(CartLine::cash_total).sum();
        let bakery_ids: BTreeSet<Uuid> = lines.iter().map(|l| l.product.bakery_id).collect();
        let spans_multiple_bakeries = bakery_ids.len() > 1;

        let by_bakery = bakery_ids
            .iter()
            .map(|&bakery_id| {
                let group: Vec<&CartLine> = lines
                    .iter()
                    .filter(|l| l.product.bakery_id == bakery_id)
                    .collect();
                BakeryGroup {
                    bakery_id,
                    item_count: group.iter().map(|l| l.item.quantity).sum(),
                    cash_total: group.iter().map(|l| l.cash_total()).sum(),
                }
            })
            .collect();

        Self {
            item_count,
            cash_total,
            bakery_ids: bakery_ids.into_iter().collect(),
            spans_multiple_bakeries,
            by_bakery,
        }
    }
}

/// Cart with lines and derived summary
#[derive(Debug, Serialize)]
pub struct CartDetail {
    pub cart: CartModel,
    pub lines: Vec<CartLine>,
    pub summary: CartSummary,
}
