//! Batch processing cost model
//!
//! The cost of a batch is the sum of its per-claim costs scaled by a batch
//! size adjustment. Each claim cost combines:
//! - a time-of-month factor (end-of-month processing is more expensive)
//! - the insurer's efficiency factor for the claim specialty
//! - a priority factor (urgent claims cost more)
//! - a monetary factor (logarithmic in the claim amount)
//!
//! Undersized batches carry up to a 20% penalty, oversized batches up to 15%,
//! and batches within bounds earn up to a 10% discount the closer they are to
//! the midpoint of the insurer's size range.

use crate::models::{Claim, Insurer};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

const MAX_MONETARY_AMOUNT: f64 = 1_000_000.0;

/// Pure processing cost calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel;

impl CostModel {
    /// Processing cost of `claims` in a batch scheduled for `processing_date`
    pub fn batch_cost(&self, processing_date: NaiveDate, insurer: &Insurer, claims: &[Claim]) -> Decimal {
        let time_factor = time_of_month_factor(processing_date);

        let raw_total: f64 = claims
            .iter()
            .map(|claim| claim_cost(claim, insurer, time_factor))
            .sum();

        let adjusted = raw_total * batch_size_factor(claims.len() as i64, insurer);

        Decimal::from_f64(adjusted)
            .unwrap_or(Decimal::ZERO)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            .max(Decimal::ZERO)
    }
}

fn claim_cost(claim: &Claim, insurer: &Insurer, time_factor: f64) -> f64 {
    let amount = claim.total_amount.to_f64().unwrap_or(0.0);

    amount
        * time_factor
        * insurer.efficiency_factor(claim.specialty_id)
        * priority_factor(claim.priority_level)
        * monetary_factor(amount)
}

pub(crate) fn time_of_month_factor(date: NaiveDate) -> f64 {
    let day = f64::from(date.day());
    let days_in_month = f64::from(days_in_month(date));
    let progress = 0.3 * (day - 1.0) / (days_in_month - 1.0).max(1.0);
    0.2 + progress.clamp(0.0, 0.3)
}

pub(crate) fn priority_factor(priority_level: i16) -> f64 {
    let level = f64::from(priority_level.clamp(1, 5));
    1.0 + (level - 1.0) * 0.2
}

pub(crate) fn monetary_factor(amount: f64) -> f64 {
    1.0 + amount.clamp(1.0, MAX_MONETARY_AMOUNT).log10() * 0.1
}

pub(crate) fn batch_size_factor(claim_count: i64, insurer: &Insurer) -> f64 {
    let optimal = insurer.optimal_batch_size();
    let size_difference = (claim_count as f64 - optimal).abs() / optimal.max(1.0);

    if claim_count < insurer.min_batch_size {
        1.0 + (0.2 * size_difference).min(0.2)
    } else if claim_count > insurer.max_batch_size {
        1.0 + (0.15 * size_difference).min(0.15)
    } else {
        1.0 - (0.1 * (1.0 - size_difference)).min(0.1)
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };

    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map_or(31, |last| last.day())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn insurer(min: i64, max: i64) -> Insurer {
        Insurer {
            id: 1,
            name: "HealthFirst Insurance".to_string(),
            code: "HFI".to_string(),
            email: None,
            daily_capacity: 150,
            min_batch_size: min,
            max_batch_size: max,
            prefers_encounter_date: true,
            specialty_efficiency: HashMap::from([(3, 1.2), (4, 0.8)]),
        }
    }

    fn claim(specialty_id: i64, priority_level: i16, amount: Decimal) -> Claim {
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        Claim {
            id: 1,
            provider_id: 1,
            insurer_id: 1,
            specialty_id,
            batch_id: None,
            encounter_date: date,
            submission_date: date,
            priority_level,
            total_amount: amount,
            processed: false,
            created_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_mid_month_golden_value() {
        // June has 30 days; day 15 gives 0.2 + 0.3 * 14 / 29
        let cost = CostModel.batch_cost(date(2024, 6, 15), &insurer(10, 50), &[claim(3, 3, dec!(1000))]);
        assert_eq!(cost, dec!(898.70));
    }

    #[test]
    fn test_near_optimal_batch_gets_full_discount() {
        let cost = CostModel.batch_cost(date(2024, 6, 15), &insurer(1, 1), &[claim(3, 3, dec!(1000))]);
        assert_eq!(cost, dec!(677.79));
    }

    #[test]
    fn test_time_of_month_bounds() {
        assert!((time_of_month_factor(date(2024, 3, 1)) - 0.2).abs() < 1e-12);
        assert!((time_of_month_factor(date(2024, 3, 31)) - 0.5).abs() < 1e-12);
        assert!((time_of_month_factor(date(2024, 2, 29)) - 0.5).abs() < 1e-12);
        assert!((time_of_month_factor(date(2023, 2, 28)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_priority_factor_is_clamped() {
        assert!((priority_factor(-3) - 1.0).abs() < 1e-12);
        assert!((priority_factor(1) - 1.0).abs() < 1e-12);
        assert!((priority_factor(5) - 1.8).abs() < 1e-12);
        assert!((priority_factor(9) - 1.8).abs() < 1e-12);
    }

    #[test]
    fn test_monetary_factor_is_clamped() {
        assert!((monetary_factor(0.0) - 1.0).abs() < 1e-12);
        assert!((monetary_factor(0.5) - 1.0).abs() < 1e-12);
        assert!((monetary_factor(1_000_000.0) - 1.6).abs() < 1e-12);
        assert!((monetary_factor(50_000_000.0) - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_size_factor_penalties() {
        let insurer = insurer(10, 50);
        // optimal = 30
        assert!((batch_size_factor(0, &insurer) - 1.2).abs() < 1e-12);
        assert!((batch_size_factor(30, &insurer) - 0.9).abs() < 1e-12);
        assert!((batch_size_factor(60, &insurer) - 1.15).abs() < 1e-12);
        assert!((batch_size_factor(51, &insurer) - 1.105).abs() < 1e-12);
    }

    #[test]
    fn test_empty_batch_costs_nothing() {
        assert_eq!(CostModel.batch_cost(date(2024, 6, 15), &insurer(10, 50), &[]), Decimal::ZERO);
    }

    #[test]
    fn test_unknown_specialty_uses_neutral_factor() {
        let known = CostModel.batch_cost(date(2024, 6, 1), &insurer(1, 1), &[claim(4, 1, dec!(100))]);
        let unknown = CostModel.batch_cost(date(2024, 6, 1), &insurer(1, 1), &[claim(99, 1, dec!(100))]);
        assert!(known < unknown);
    }
}
