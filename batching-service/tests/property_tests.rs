mod common;

use batching_service::*;
use chrono::{Days, Utc};
use common::{assert_totals_consistent, date, Fixture};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn claim(id: ClaimId, priority: i16, cents: i64) -> Claim {
    Claim {
        id,
        provider_id: 1,
        insurer_id: 1,
        specialty_id: 1,
        batch_id: None,
        encounter_date: date(2025, 3, 10),
        submission_date: date(2025, 3, 10),
        priority_level: priority,
        total_amount: Decimal::new(cents, 2),
        processed: false,
        created_at: Utc::now(),
    }
}

fn insurer(min: i64, max: i64, efficiency: f64) -> Insurer {
    NewInsurer {
        name: "Property Insurance".into(),
        code: "PROP".into(),
        min_batch_size: Some(min),
        max_batch_size: Some(max),
        specialty_efficiency: HashMap::from([(1, efficiency)]),
        ..Default::default()
    }
    .into_insurer(1)
}

fn claims_strategy() -> impl Strategy<Value = Vec<Claim>> {
    prop::collection::vec((1i16..=5, 0i64..1_000_000), 0..40).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (priority, cents))| claim(i as ClaimId + 1, priority, cents))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: cost is a pure, non-negative function of its inputs
    #[test]
    fn cost_is_deterministic_and_non_negative(
        claims in claims_strategy(),
        offset in 0u64..14,
        min in 1i64..10,
        spread in 0i64..40,
        efficiency in 0.5f64..1.5,
    ) {
        let insurer = insurer(min, min + spread, efficiency);
        let day = date(2025, 3, 1).checked_add_days(Days::new(offset)).unwrap();

        let first = CostModel.batch_cost(day, &insurer, &claims);
        let second = CostModel.batch_cost(day, &insurer, &claims);

        prop_assert_eq!(first, second);
        prop_assert!(first >= Decimal::ZERO);
        prop_assert!(first.scale() <= 2);
        if claims.is_empty() {
            prop_assert_eq!(first, Decimal::ZERO);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: assignment never loses a claim or overfills a batch
    #[test]
    fn assignment_keeps_totals_and_bounds(
        submissions in prop::collection::vec((0usize..3, 0u64..3), 1..30),
        max in 1i64..6,
        capacity in 1i64..20,
    ) {
        block_on(async {
            let f = Fixture::new().await;
            let insurer = f.insurer("PROP", 1, max, capacity).await;
            let providers = [
                f.provider("Lakeside Clinic").await,
                f.provider("Harbor Pediatrics").await,
                f.provider("Summit Orthopedics").await,
            ];

            for (provider, offset) in &submissions {
                let encounter = date(2025, 3, 10).checked_add_days(Days::new(*offset)).unwrap();
                let outcome = f
                    .service
                    .submit_claim(f.submission(&providers[*provider], &insurer, encounter))
                    .await
                    .unwrap();
                assert!(outcome.batch.is_some());
            }

            let batches = f.store.list_batches(&BatchFilter::default()).await.unwrap();
            assert!(batches.iter().all(|b| b.total_claims <= max));
            assert_eq!(
                batches.iter().map(|b| b.total_claims).sum::<i64>(),
                submissions.len() as i64
            );
            assert_totals_consistent(&f.store).await;
        });
    }

    /// Property: rebalancing conserves claims and leaves no batch far above max
    #[test]
    fn rebalance_conserves_claims(
        layout in prop::collection::vec((0usize..2, prop::collection::vec(1i16..=5, 0..16)), 1..6),
        min in 1i64..6,
        spread in 0i64..8,
    ) {
        block_on(async {
            let f = Fixture::new().await;
            let max = min + spread;
            let insurer = f.insurer("PROP", min, max, 1000).await;
            let providers = [
                f.provider("Lakeside Clinic").await,
                f.provider("Harbor Pediatrics").await,
            ];
            let target = date(2025, 3, 11);
            for (provider, priorities) in &layout {
                f.seed_batch(&insurer, &providers[*provider], date(2025, 3, 10), target, priorities)
                    .await;
            }
            let seeded: usize = layout.iter().map(|(_, p)| p.len()).sum();

            let stats = f.service.run_rebalance_pass(target).await.unwrap();

            assert!(stats.failed_insurers.is_empty());
            assert_eq!(stats.savings, stats.cost_before - stats.cost_after);
            let pending = f.pending(&insurer, target).await;
            assert_eq!(pending.iter().map(|b| b.total_claims).sum::<i64>(), seeded as i64);
            assert!(pending.iter().all(|b| b.total_claims <= max + 2));
            assert_totals_consistent(&f.store).await;
        });
    }

    /// Property: recomputing a batch twice yields the same cached totals and cost
    #[test]
    fn recompute_is_idempotent(
        members in prop::collection::vec((1i16..=5, 0i64..1_000_000), 0..25),
        offset in 0u64..28,
    ) {
        block_on(async {
            let f = Fixture::new().await;
            let insurer = f.insurer("PROP", 1, 50, 1000).await;
            let provider = f.provider("Lakeside Clinic").await;
            let processing_date = date(2025, 3, 1).checked_add_days(Days::new(offset)).unwrap();
            let batch = f.seed_batch(&insurer, &provider, date(2025, 2, 28), processing_date, &[]).await;

            let mut member_ids = Vec::with_capacity(members.len());
            let mut expected_amount = Decimal::ZERO;
            for (priority, cents) in &members {
                let claim = f
                    .store
                    .create_claim(NewClaim {
                        provider_id: provider.id,
                        insurer_id: insurer.id,
                        specialty_id: f.specialty.id,
                        encounter_date: date(2025, 2, 28),
                        submission_date: date(2025, 2, 28),
                        priority_level: *priority,
                        total_amount: Decimal::new(*cents, 2),
                        items: vec![],
                    })
                    .await
                    .unwrap();
                expected_amount += claim.total_amount;
                member_ids.push(claim.id);
            }

            let mut uow = f.store.begin().await.unwrap();
            for id in member_ids {
                uow.reassign_claim(id, batch.id).await.unwrap();
            }

            let mut first = batch.clone();
            assignment::recompute_batch(uow.as_mut(), &CostModel, &insurer, &mut first).await.unwrap();
            let mut second = first.clone();
            assignment::recompute_batch(uow.as_mut(), &CostModel, &insurer, &mut second).await.unwrap();
            uow.commit().await.unwrap();

            assert_eq!(first, second);
            assert_eq!(first.total_claims, members.len() as i64);
            assert_eq!(first.total_amount, expected_amount);

            let stored = f.batch(batch.id).await.unwrap();
            assert_eq!(stored, second);

            let mut uow = f.store.begin().await.unwrap();
            let mut third = stored.clone();
            assignment::recompute_batch(uow.as_mut(), &CostModel, &insurer, &mut third).await.unwrap();
            uow.commit().await.unwrap();
            assert_eq!(third, stored);
            assert_totals_consistent(&f.store).await;
        });
    }

    /// Property: with equal-sized batches, more capacity never processes fewer
    #[test]
    fn capacity_pass_is_monotone_in_capacity(
        batches in 1usize..6,
        size in 1usize..5,
        capacity in 1i64..20,
        extra in 0i64..10,
    ) {
        let processed = |capacity: i64| {
            block_on(async move {
                let f = Fixture::new().await;
                let insurer = f.insurer("PROP", 1, 10, capacity).await;
                let provider = f.provider("Lakeside Clinic").await;
                for _ in 0..batches {
                    f.seed_batch(&insurer, &provider, date(2025, 3, 10), date(2025, 3, 11), &vec![3; size])
                        .await;
                }
                let processed = f.service.run_daily_capacity_pass(date(2025, 3, 11)).await.unwrap();
                let claims: i64 = processed.iter().map(|p| p.claims).sum();
                assert!(claims <= capacity);
                processed.len()
            })
        };

        prop_assert!(processed(capacity + extra) >= processed(capacity));
    }
}
