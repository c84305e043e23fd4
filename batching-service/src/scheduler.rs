use crate::{
    assignment::recompute_batch,
    cost::CostModel,
    error::BatchingResult,
    models::*,
    repository::{BatchStore, UnitOfWork},
    retry::RetryPolicy,
};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Default number of batches handled per transaction
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Daily capacity pass
///
/// Walks unprocessed batches due on or before `as_of` in (processing_date,
/// created_at, id) order. A batch below its insurer's minimum size is skipped,
/// a batch that would push the insurer past its daily capacity is deferred to
/// the next day, and everything else is marked processed.
#[derive(Debug, Clone)]
pub struct CapacityScheduler {
    cost_model: CostModel,
    page_size: i64,
    retry: RetryPolicy,
}

impl Default for CapacityScheduler {
    fn default() -> Self {
        Self::new(CostModel, DEFAULT_PAGE_SIZE, RetryPolicy::default())
    }
}

struct PageOutcome {
    processed: Vec<ProcessedBatchSummary>,
    volume: HashMap<InsurerId, i64>,
    last: Option<BatchCursor>,
    fetched: usize,
}

impl CapacityScheduler {
    pub fn new(cost_model: CostModel, page_size: i64, retry: RetryPolicy) -> Self {
        Self {
            cost_model,
            page_size: page_size.max(1),
            retry,
        }
    }

    #[instrument(skip(self, store))]
    pub async fn process_ready_batches(
        &self,
        store: &dyn BatchStore,
        as_of: NaiveDate,
    ) -> BatchingResult<Vec<ProcessedBatchSummary>> {
        let mut volume = {
            let mut uow = store.begin().await?;
            uow.processed_claim_volume(as_of).await?
        };

        let mut processed = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .retry
                .retry("capacity_page", || self.process_page(store, as_of, cursor, &volume))
                .await?;

            // Counters only move once the page is committed.
            for (insurer_id, claims) in page.volume {
                *volume.entry(insurer_id).or_insert(0) += claims;
            }
            processed.extend(page.processed);

            if i64::try_from(page.fetched).unwrap_or(i64::MAX) < self.page_size {
                break;
            }
            cursor = page.last;
        }

        info!(%as_of, processed = processed.len(), "Capacity pass complete");
        Ok(processed)
    }

    async fn process_page(
        &self,
        store: &dyn BatchStore,
        as_of: NaiveDate,
        after: Option<BatchCursor>,
        committed: &HashMap<InsurerId, i64>,
    ) -> BatchingResult<PageOutcome> {
        let mut uow = store.begin().await?;
        let batches = uow.find_ready_batches(as_of, after, self.page_size).await?;

        let mut outcome = PageOutcome {
            processed: Vec::new(),
            volume: HashMap::new(),
            last: batches.last().map(BatchCursor::from),
            fetched: batches.len(),
        };
        let mut insurers: HashMap<InsurerId, Insurer> = HashMap::new();

        for mut batch in batches {
            let insurer = match insurers.get(&batch.insurer_id) {
                Some(insurer) => insurer.clone(),
                None => {
                    let insurer = uow.get_insurer(batch.insurer_id).await?;
                    insurers.insert(insurer.id, insurer.clone());
                    insurer
                }
            };

            batch.apply_totals(uow.sum_claims_for_batch(batch.id).await?);

            if batch.total_claims < insurer.min_batch_size {
                debug!(
                    batch_id = batch.id,
                    insurer_id = insurer.id,
                    total_claims = batch.total_claims,
                    min_batch_size = insurer.min_batch_size,
                    "Batch below minimum size, left pending"
                );
                continue;
            }

            let running = committed.get(&insurer.id).copied().unwrap_or(0)
                + outcome.volume.get(&insurer.id).copied().unwrap_or(0);

            if running + batch.total_claims > insurer.daily_capacity {
                batch.processing_date = next_day(as_of);
                recompute_batch(uow.as_mut(), &self.cost_model, &insurer, &mut batch).await?;
                info!(
                    batch_id = batch.id,
                    insurer_id = insurer.id,
                    running,
                    daily_capacity = insurer.daily_capacity,
                    deferred_to = %batch.processing_date,
                    "Batch deferred, insurer capacity reached"
                );
                continue;
            }

            self.mark_processed(uow.as_mut(), &insurer, &mut batch, as_of).await?;
            *outcome.volume.entry(insurer.id).or_insert(0) += batch.total_claims;
            outcome.processed.push(ProcessedBatchSummary::from(&batch));
        }

        uow.commit().await?;
        Ok(outcome)
    }

    async fn mark_processed(
        &self,
        uow: &mut dyn UnitOfWork,
        insurer: &Insurer,
        batch: &mut Batch,
        as_of: NaiveDate,
    ) -> BatchingResult<()> {
        batch.processing_date = as_of;
        recompute_batch(uow, &self.cost_model, insurer, batch).await?;
        batch.processed = true;
        let claims = uow.mark_claims_processed(batch).await?;

        info!(
            batch_id = batch.id,
            insurer_id = insurer.id,
            identifier = %batch.batch_identifier,
            claims,
            cost = %batch.processing_cost,
            "Batch processed"
        );
        Ok(())
    }
}
