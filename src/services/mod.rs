pub mod carts;
pub mod loyalty;
pub mod orders;
pub mod payments;
pub mod settlement;

pub use carts::CartService;
pub use loyalty::LoyaltyService;
pub use orders::OrderService;
pub use payments::{PaymentGateway, PaymentService, StripeGateway};
pub use settlement::SettlementService;
