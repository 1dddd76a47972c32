use crate::{entities::OrderModel, errors::ServiceError};
use async_trait::async_trait;
use tracing::info;

/// Outbound order notifications. Settlement calls this fire-and-forget: a
/// failed notification is logged and never rolls back a completed order.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn order_confirmed(&self, email: &str, order: &OrderModel) -> Result<(), ServiceError>;
    async fn order_cancelled(&self, email: &str, order: &OrderModel) -> Result<(), ServiceError>;
}

/// Default notifier: writes the notification to the log. Stands in for a
/// mail provider integration.
pub struct LogNotifier;

#[async_trait]
impl OrderNotifier for LogNotifier {
    async fn order_confirmed(&self, email: &str, order: &OrderModel) -> Result<(), ServiceError> {
        info!(
            "Order confirmation for {} -> {}: {} {}",
            order.reference, email, order.total_amount, order.currency
        );
        Ok(())
    }

    async fn order_cancelled(&self, email: &str, order: &OrderModel) -> Result<(), ServiceError> {
        info!("Order cancellation for {} -> {}", order.reference, email);
        Ok(())
    }
}
