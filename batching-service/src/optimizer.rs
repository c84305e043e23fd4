//! Batch rebalancing
//!
//! Runs per insurer over the unprocessed batches scheduled for one processing
//! date. Undersized batches are merged into a same-provider sibling, oversized
//! batches shed their lowest-priority claims into siblings with room (or into
//! new batches). Each insurer group is loaded into a working set, reshaped in
//! memory and written back inside its own transaction.

use crate::{
    assignment::{create_batch, recompute_batch},
    cost::CostModel,
    error::{BatchingError, BatchingResult},
    models::*,
    repository::{BatchStore, UnitOfWork},
    retry::RetryPolicy,
};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, error, info, instrument};

/// How far past the maximum a batch may grow before it is split
const SPLIT_TOLERANCE: usize = 2;

#[derive(Debug, Clone)]
pub struct RebalanceOptimizer {
    cost_model: CostModel,
    retry: RetryPolicy,
}

impl Default for RebalanceOptimizer {
    fn default() -> Self {
        Self::new(CostModel, RetryPolicy::default())
    }
}

#[derive(Debug)]
struct WorkingBatch {
    batch: Batch,
    claims: Vec<Claim>,
    touched: bool,
    deleted: bool,
}

impl WorkingBatch {
    fn is_open_for(&self, provider_id: ProviderId, max: usize) -> bool {
        !self.deleted && self.batch.provider_id == provider_id && self.claims.len() < max
    }
}

#[derive(Debug, Default)]
struct GroupOutcome {
    analyzed: usize,
    modified: usize,
    cost_before: Decimal,
    cost_after: Decimal,
}

impl RebalanceOptimizer {
    pub fn new(cost_model: CostModel, retry: RetryPolicy) -> Self {
        Self { cost_model, retry }
    }

    /// Rebalance every insurer with pending batches scheduled for `target`.
    ///
    /// A failing insurer group is rolled back and reported in
    /// `failed_insurers`; the remaining groups still run.
    #[instrument(skip(self, store))]
    pub async fn reoptimize(
        &self,
        store: &dyn BatchStore,
        target: NaiveDate,
    ) -> BatchingResult<OptimizationStats> {
        let insurers = store.insurers_with_pending_batches(target).await?;
        let mut stats = OptimizationStats::default();

        for insurer_id in insurers {
            let result = self
                .retry
                .retry("rebalance_insurer", || self.rebalance_insurer(store, insurer_id, target))
                .await;

            match result {
                Ok(group) => {
                    stats.batches_analyzed += group.analyzed;
                    stats.batches_modified += group.modified;
                    stats.cost_before += group.cost_before;
                    stats.cost_after += group.cost_after;
                }
                Err(err) => {
                    error!(insurer_id, error = %err, "Rebalance rolled back for insurer");
                    stats.failed_insurers.push(insurer_id);
                }
            }
        }

        stats.savings = stats.cost_before - stats.cost_after;
        stats.savings_percentage = savings_percentage(stats.savings, stats.cost_before);

        info!(
            %target,
            batches_analyzed = stats.batches_analyzed,
            batches_modified = stats.batches_modified,
            cost_before = %stats.cost_before,
            cost_after = %stats.cost_after,
            savings_percentage = %stats.savings_percentage,
            failed = stats.failed_insurers.len(),
            "Rebalance complete"
        );
        Ok(stats)
    }

    async fn rebalance_insurer(
        &self,
        store: &dyn BatchStore,
        insurer_id: InsurerId,
        target: NaiveDate,
    ) -> BatchingResult<GroupOutcome> {
        let mut uow = store.begin().await?;
        let insurer = uow.get_insurer(insurer_id).await?;
        let batches = uow.find_pending_batches(insurer_id, target).await?;

        let cost_before: Decimal = batches.iter().map(|b| b.processing_cost).sum();
        if batches.len() < 2 {
            return Ok(GroupOutcome {
                analyzed: batches.len(),
                modified: 0,
                cost_before,
                cost_after: cost_before,
            });
        }

        let mut working = load_working_set(uow.as_mut(), batches).await?;
        let analyzed = working.len();

        merge_small_batches(&mut working, &insurer);
        self.split_large_batches(uow.as_mut(), &insurer, &mut working).await?;
        self.persist(uow.as_mut(), &insurer, &mut working).await?;

        let cost_after: Decimal = working
            .iter()
            .filter(|w| !w.deleted)
            .map(|w| w.batch.processing_cost)
            .sum();
        let modified = working.iter().filter(|w| w.touched).count();

        uow.commit().await?;

        debug!(
            insurer_id,
            analyzed,
            modified,
            cost_before = %cost_before,
            cost_after = %cost_after,
            "Insurer group rebalanced"
        );

        Ok(GroupOutcome {
            analyzed,
            modified,
            cost_before,
            cost_after,
        })
    }

    /// Move `excess = size - max` claims, lowest priority level first, out of
    /// every batch more than [`SPLIT_TOLERANCE`] over the maximum. Siblings
    /// with room are filled smallest first and any remainder opens new batches.
    async fn split_large_batches(
        &self,
        uow: &mut dyn UnitOfWork,
        insurer: &Insurer,
        working: &mut Vec<WorkingBatch>,
    ) -> BatchingResult<()> {
        let max = as_size(insurer.max_batch_size).max(1);

        for source in 0..working.len() {
            let Some(src) = working.get_mut(source) else { continue };
            if src.deleted || src.claims.len() <= max + SPLIT_TOLERANCE {
                continue;
            }

            let excess = src.claims.len() - max;
            src.claims.sort_by_key(|claim| (claim.priority_level, claim.id));
            let mut moving: Vec<Claim> = src.claims.drain(..excess).collect();
            src.touched = true;
            let provider_id = src.batch.provider_id;
            let template = src.batch.clone();

            let mut candidates: Vec<(usize, usize)> = working
                .iter()
                .enumerate()
                .filter(|(idx, w)| *idx != source && w.is_open_for(provider_id, max))
                .map(|(idx, w)| (idx, w.claims.len()))
                .collect();
            candidates.sort_by_key(|&(_, size)| size);

            for (idx, _) in candidates {
                if moving.is_empty() {
                    break;
                }
                let Some(candidate) = working.get_mut(idx) else { continue };
                let take = max.saturating_sub(candidate.claims.len()).min(moving.len());
                if take > 0 {
                    candidate.claims.extend(moving.drain(..take));
                    candidate.touched = true;
                }
            }

            if moving.is_empty() {
                continue;
            }

            let provider = uow.get_provider(provider_id).await?;
            while !moving.is_empty() {
                let batch = create_batch(uow, &provider, template.key(), template.processing_date).await?;
                let take = max.min(moving.len());
                debug!(
                    batch_id = batch.id,
                    source_batch_id = template.id,
                    claims = take,
                    "Opened batch for split remainder"
                );
                working.push(WorkingBatch {
                    batch,
                    claims: moving.drain(..take).collect(),
                    touched: true,
                    deleted: false,
                });
            }
        }

        Ok(())
    }

    /// Write the reshaped working set back and re-derive every touched batch
    async fn persist(
        &self,
        uow: &mut dyn UnitOfWork,
        insurer: &Insurer,
        working: &mut [WorkingBatch],
    ) -> BatchingResult<()> {
        for entry in working.iter_mut().filter(|w| w.touched && !w.deleted) {
            let batch_id = entry.batch.id;
            for claim in entry.claims.iter_mut().filter(|c| c.batch_id != Some(batch_id)) {
                uow.reassign_claim(claim.id, batch_id).await?;
                claim.batch_id = Some(batch_id);
            }
        }

        for entry in working.iter().filter(|w| w.deleted) {
            uow.delete_batch(entry.batch.id).await?;
            debug!(batch_id = entry.batch.id, "Deleted emptied batch");
        }

        for entry in working.iter_mut().filter(|w| w.touched && !w.deleted) {
            recompute_batch(uow, &self.cost_model, insurer, &mut entry.batch).await?;
            let expected = i64::try_from(entry.claims.len()).unwrap_or(i64::MAX);
            if entry.batch.total_claims != expected {
                return Err(BatchingError::DataIntegrity(format!(
                    "Batch {} holds {} claims, expected {}",
                    entry.batch.id, entry.batch.total_claims, expected
                )));
            }
        }

        Ok(())
    }
}

async fn load_working_set(
    uow: &mut dyn UnitOfWork,
    batches: Vec<Batch>,
) -> BatchingResult<Vec<WorkingBatch>> {
    let mut working = Vec::with_capacity(batches.len());
    for batch in batches {
        let claims = uow.find_claims_by_batch(batch.id, ClaimOrder::Id, None).await?;
        let totals = BatchTotals::from_claims(&claims);
        if totals.count != batch.total_claims || totals.total_amount != batch.total_amount {
            return Err(BatchingError::DataIntegrity(format!(
                "Batch {} caches {} claims / {} but holds {} / {}",
                batch.id, batch.total_claims, batch.total_amount, totals.count, totals.total_amount
            )));
        }
        working.push(WorkingBatch {
            batch,
            claims,
            touched: false,
            deleted: false,
        });
    }
    Ok(working)
}

/// Fold every batch under the minimum size into the same-provider sibling
/// whose size is closest to the optimum. Empty batches are dropped outright;
/// a source that does not fit gives up as many claims as the target can take.
fn merge_small_batches(working: &mut [WorkingBatch], insurer: &Insurer) {
    let min = as_size(insurer.min_batch_size);
    let max = as_size(insurer.max_batch_size);
    let optimal = insurer.optimal_batch_size();
    let distance = |w: &WorkingBatch| (w.claims.len() as f64 - optimal).abs();

    for source in 0..working.len() {
        let Some(src) = working.get_mut(source) else { continue };
        if src.deleted || src.claims.len() >= min {
            continue;
        }
        if src.claims.is_empty() {
            src.deleted = true;
            src.touched = true;
            continue;
        }
        let provider_id = src.batch.provider_id;

        let target = working
            .iter()
            .enumerate()
            .filter(|(idx, w)| *idx != source && w.is_open_for(provider_id, max))
            .min_by(|(_, a), (_, b)| distance(a).total_cmp(&distance(b)))
            .map(|(idx, w)| (idx, max.saturating_sub(w.claims.len())));
        let Some((target, room)) = target else { continue };

        let Some(src) = working.get_mut(source) else { continue };
        let take = room.min(src.claims.len());
        let moving: Vec<Claim> = src.claims.drain(..take).collect();
        src.touched = true;
        if src.claims.is_empty() {
            src.deleted = true;
        }

        if let Some(dst) = working.get_mut(target) {
            dst.claims.extend(moving);
            dst.touched = true;
        }
    }
}

fn as_size(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn savings_percentage(savings: Decimal, cost_before: Decimal) -> Decimal {
    if cost_before.is_zero() {
        return Decimal::ZERO;
    }
    (savings / cost_before * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
