pub mod bakery;
pub mod cart;
pub mod cart_item;
pub mod customer;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities under their conventional aliases
pub use bakery::{Entity as Bakery, Model as BakeryModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
