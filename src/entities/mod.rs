pub mod discount_code;
pub mod discount_redemption;
pub mod inventory_batch;
pub mod inventory_entry;
pub mod inventory_stock;
pub mod order;
pub mod order_item;
pub mod payment_attempt;
