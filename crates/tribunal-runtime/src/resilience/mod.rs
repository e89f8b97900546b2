//! Cost accounting and retry.

mod budget;
mod retry;

pub use budget::{estimate_cost, pricing_for, BudgetSettings, CostLedger, ModelPricing, Usage};
pub use retry::{retry_transient, RetrySettings};
