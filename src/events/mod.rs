use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of propagating a channel failure.
    /// Event delivery is never allowed to fail a business operation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Events emitted by the cart-to-order workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, item_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CartsMerged { source_cart_id: Uuid, target_cart_id: Uuid, customer_id: Uuid },

    // Checkout and order events
    CheckoutStarted { cart_id: Uuid, order_id: Uuid },
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Loyalty events
    PointsAwarded {
        customer_id: Uuid,
        order_id: Uuid,
        points: i64,
    },
    PointsRedeemed {
        customer_id: Uuid,
        product_id: Uuid,
        points: i64,
    },
}

/// Consumes events from the channel and logs them. Side effects that must
/// not be lost (loyalty award, cart clearing) happen synchronously inside
/// settlement; this loop is observability only.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPaid(order_id) => {
                info!("Order paid: {}", order_id);
            }
            Event::OrderCancelled(order_id) => {
                warn!("Order cancelled: {}", order_id);
            }
            Event::PointsAwarded {
                customer_id,
                order_id,
                points,
            } => {
                info!(
                    "Awarded {} points to customer {} for order {}",
                    points, customer_id, order_id
                );
            }
            Event::CartsMerged {
                source_cart_id,
                target_cart_id,
                customer_id,
            } => {
                info!(
                    "Merged cart {} into {} for customer {}",
                    source_cart_id, target_cart_id, customer_id
                );
            }
            other => {
                info!("Event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_does_not_error_on_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or propagate
        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let cart_id = Uuid::new_v4();
        sender.send(Event::CartCreated(cart_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::CartCreated(id)) => assert_eq!(id, cart_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
