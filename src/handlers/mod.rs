pub mod discounts;
pub mod health;
pub mod inventory;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod reports;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::{
    discounts::DiscountService, inventory::InventoryService, orders::OrderService,
    payments::PaymentService, pickup_tokens::PickupTokenService, reports::ReportService,
    shipping::ShippingPolicy,
};
use crate::db::DbPool;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub discounts: Arc<DiscountService>,
    pub inventory: Arc<InventoryService>,
    pub pickup_tokens: Arc<PickupTokenService>,
    pub payments: Arc<PaymentService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let shipping = ShippingPolicy::new(config.shipping.clone());

        Self {
            orders: Arc::new(OrderService::new(
                db_pool.clone(),
                Some(event_sender.clone()),
                shipping,
            )),
            discounts: Arc::new(DiscountService::new(db_pool.clone())),
            inventory: Arc::new(InventoryService::new(
                db_pool.clone(),
                Some(event_sender.clone()),
            )),
            pickup_tokens: Arc::new(PickupTokenService::new(
                db_pool.clone(),
                Some(event_sender.clone()),
            )),
            payments: Arc::new(PaymentService::new(
                db_pool.clone(),
                gateway,
                config.payments.clone(),
                Some(event_sender),
            )),
            reports: Arc::new(ReportService::new(db_pool)),
        }
    }
}
