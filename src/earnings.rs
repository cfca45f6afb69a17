//! Display-side earnings estimate: a pure weighted sum over aggregate
//! counters, rounded to cents. Policy constants, not protocol.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarningRates {
    pub view: f64,
    pub copy: f64,
    pub share: f64,
}

impl Default for EarningRates {
    fn default() -> Self {
        Self {
            view: 0.15,
            copy: 0.15,
            share: 0.15,
        }
    }
}

impl EarningRates {
    pub fn estimate(&self, views: u64, copies: u64, shares: u64) -> f64 {
        let total =
            views as f64 * self.view + copies as f64 * self.copy + shares as f64 * self.share;
        round_cents(total)
    }
}

/// Estimate with the default rates.
pub fn estimate_earnings(views: u64, copies: u64, shares: u64) -> f64 {
    EarningRates::default().estimate(views, copies, shares)
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
