//! Usage baselines and the derived annual-cost metric.
//!
//! Electricity uses 700 kWh/month, the usage the electricity site's own
//! results query is built with. Gas uses 70 ccf/month (84 Mcf/year), a
//! typical Pennsylvania residential heating load.

use rust_decimal::Decimal;

use crate::types::RateUnit;

/// Annual electricity baseline in kWh.
pub const ELECTRICITY_KWH_PER_YEAR: u32 = 700 * 12;

/// Annual gas baseline in ccf.
pub const GAS_CCF_PER_YEAR: u32 = 70 * 12;

/// Estimated annual cost in dollars, rounded to cents.
pub fn estimated_annual_cost(rate_value: Decimal, unit: RateUnit) -> Decimal {
    let cost = match unit {
        RateUnit::CentsPerKwh => {
            rate_value * Decimal::from(ELECTRICITY_KWH_PER_YEAR) / Decimal::ONE_HUNDRED
        }
        RateUnit::DollarsPerCcf => rate_value * Decimal::from(GAS_CCF_PER_YEAR),
        RateUnit::DollarsPerMcf => rate_value * Decimal::from(GAS_CCF_PER_YEAR) / Decimal::TEN,
    };
    cost.round_dp(2)
}
