// Pricing
pub mod discounts;
pub mod shipping;

// Stock and profitability
pub mod inventory;

// Checkout and delivery
pub mod orders;
pub mod pickup_tokens;

// Payment attempts and reconciliation
pub mod payments;

pub mod reports;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Ceiling for any single price taken from a request, in pesos.
pub const MAX_PRICE: Decimal = dec!(1000000000000);
