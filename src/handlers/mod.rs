pub mod carts;
pub mod checkout;
pub mod common;
pub mod loyalty;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::OrderNotifier,
    services::{
        CartService, LoyaltyService, OrderService, PaymentGateway, PaymentService,
        SettlementService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub settlement: SettlementService,
    pub loyalty: LoyaltyService,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn OrderNotifier>,
        config: Arc<AppConfig>,
    ) -> Self {
        let carts = CartService::new(db.clone(), event_sender.clone());
        let orders = OrderService::new(db.clone(), event_sender.clone(), config.clone());
        let payments = PaymentService::new(
            db.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.clone(),
        );
        let loyalty = LoyaltyService::new(db.clone(), event_sender.clone());
        let settlement = SettlementService::new(
            db,
            gateway,
            loyalty.clone(),
            notifier,
            event_sender,
        );

        Self {
            carts,
            orders,
            payments,
            settlement,
            loyalty,
        }
    }
}
