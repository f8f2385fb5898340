//! Billing.
//!
//! - [`BillingAggregator`] discovers completed clinical services that no bill item
//!   references yet and groups them per patient.
//! - [`BillManager`] owns bills and their items. Every item mutation recomputes the
//!   bill total inside the same transaction.

mod bills;
mod pending;

pub use bills::BillManager;
pub use pending::BillingAggregator;

use rust_decimal::{Decimal, RoundingStrategy};

/// Round a computed charge to `scale` decimal places, midpoint away from zero.
pub fn round_money(amount: Decimal, scale: u32) -> Decimal {
    amount.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
