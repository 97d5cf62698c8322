//! Filter & sort: reduce raw offers to comparable fixed-rate plans,
//! cheapest first.
//!
//! Everything here is pure; `process` is idempotent.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::types::{EnergyType, RateRecord, RateType, ServiceClass};
use crate::usage::estimated_annual_cost;

/// Which exclusions `process` applies beyond the fixed-rate and
/// cancellation-fee rules, which always apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterPolicy {
    pub exclude_monthly_fee: bool,
    pub exclude_incentive_offers: bool,
    pub residential_only: bool,
}

impl FilterPolicy {
    pub fn for_energy(energy_type: EnergyType) -> Self {
        Self {
            exclude_monthly_fee: true,
            exclude_incentive_offers: energy_type == EnergyType::Gas,
            residential_only: true,
        }
    }

    fn keeps(&self, record: &RateRecord) -> bool {
        if record.rate_type != RateType::Fixed {
            return false;
        }
        if record.cancellation_fee != Decimal::ZERO {
            return false;
        }
        if self.exclude_monthly_fee && record.monthly_fee {
            return false;
        }
        if self.exclude_incentive_offers && record.has_incentives {
            return false;
        }
        if self.residential_only && record.service_class == ServiceClass::Commercial {
            return false;
        }
        true
    }
}

/// Apply the default policy for `energy_type`.
pub fn process(records: Vec<RateRecord>, energy_type: EnergyType) -> Vec<RateRecord> {
    process_with(records, energy_type, FilterPolicy::for_energy(energy_type))
}

pub fn process_with(
    records: Vec<RateRecord>,
    energy_type: EnergyType,
    policy: FilterPolicy,
) -> Vec<RateRecord> {
    let total = records.len();
    let mut kept: Vec<RateRecord> = records
        .into_iter()
        .filter(|r| r.energy_type == energy_type && policy.keeps(r))
        .map(|mut r| {
            r.estimated_annual_cost = estimated_annual_cost(r.rate_value, r.rate_unit);
            r
        })
        .collect();

    kept.sort_by(compare);
    tracing::debug!(total, kept = kept.len(), %energy_type, "filtered offers");
    kept
}

/// Cost ascending, then provider name.
fn compare(a: &RateRecord, b: &RateRecord) -> Ordering {
    a.estimated_annual_cost
        .cmp(&b.estimated_annual_cost)
        .then_with(|| a.provider.cmp(&b.provider))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RateUnit, ZipCode};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn record(provider: &str, rate: Decimal) -> RateRecord {
        RateRecord {
            provider: provider.to_string(),
            plan_name: format!("{provider} 12"),
            rate_value: rate,
            rate_type: RateType::Fixed,
            term_months: 12,
            cancellation_fee: Decimal::ZERO,
            estimated_annual_cost: Decimal::ZERO,
            energy_type: EnergyType::Electricity,
            zip_code: ZipCode::parse("19103").unwrap(),
            retrieved_at: Utc::now(),
            rate_unit: RateUnit::CentsPerKwh,
            service_class: ServiceClass::Unspecified,
            monthly_fee: false,
            has_incentives: false,
            new_customers_only: false,
        }
    }

    #[test]
    fn test_drops_variable_and_fee_records() {
        let mut variable = record("Var", dec!(5));
        variable.rate_type = RateType::Variable;
        let mut fee = record("Fee", dec!(6));
        fee.cancellation_fee = dec!(99);
        let mut monthly = record("Monthly", dec!(6.5));
        monthly.monthly_fee = true;
        let mut commercial = record("Biz", dec!(4));
        commercial.service_class = ServiceClass::Commercial;

        let out = process(
            vec![variable, fee, monthly, commercial, record("Good", dec!(9))],
            EnergyType::Electricity,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].provider, "Good");
        assert!(out
            .iter()
            .all(|r| r.rate_type == RateType::Fixed && r.cancellation_fee == Decimal::ZERO));
    }

    #[test]
    fn test_incentive_offers_dropped_for_gas_only() {
        let mut elec = record("Incentive", dec!(9));
        elec.has_incentives = true;
        assert_eq!(process(vec![elec.clone()], EnergyType::Electricity).len(), 1);

        let mut gas = elec;
        gas.energy_type = EnergyType::Gas;
        gas.rate_unit = RateUnit::DollarsPerCcf;
        assert!(process(vec![gas], EnergyType::Gas).is_empty());
    }

    #[test]
    fn test_other_energy_type_dropped() {
        let mut gas = record("Gasco", dec!(0.5));
        gas.energy_type = EnergyType::Gas;
        assert!(process(vec![gas], EnergyType::Electricity).is_empty());
    }

    #[test]
    fn test_sorted_by_cost_then_provider() {
        let out = process(
            vec![
                record("Zeta", dec!(8.5)),
                record("Alpha", dec!(9.1)),
                record("Beta", dec!(8.5)),
                record("Acme", dec!(7.25)),
            ],
            EnergyType::Electricity,
        );
        let names: Vec<&str> = out.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(names, vec!["Acme", "Beta", "Zeta", "Alpha"]);
        assert_eq!(out[0].estimated_annual_cost, dec!(609.00));
        assert!(out
            .windows(2)
            .all(|w| compare(&w[0], &w[1]) != Ordering::Greater));
    }

    #[test]
    fn test_process_is_idempotent() {
        let mut variable = record("Var", dec!(5));
        variable.rate_type = RateType::Variable;
        let input = vec![
            record("Zeta", dec!(8.5)),
            variable,
            record("Beta", dec!(8.5)),
            record("Acme", dec!(10)),
        ];
        let once = process(input, EnergyType::Electricity);
        let twice = process(once.clone(), EnergyType::Electricity);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_input() {
        assert!(process(Vec::new(), EnergyType::Gas).is_empty());
    }
}
