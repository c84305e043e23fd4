//! Batch assignment
//!
//! A claim joins the earliest open batch for its (provider, insurer, batch
//! date) key. All steps run inside one unit of work holding the key lock, so
//! concurrent submissions for the same key serialize and never create
//! duplicate open batches.

use crate::{
    cost::CostModel,
    error::{BatchingError, BatchingResult},
    models::*,
    repository::UnitOfWork,
};
use chrono::NaiveDate;
use tracing::{debug, info};

/// Places claims into batches
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchAssigner {
    cost_model: CostModel,
}

impl BatchAssigner {
    pub fn new(cost_model: CostModel) -> Self {
        Self { cost_model }
    }

    /// Assign an unbatched claim inside `uow`, returning the batch it joined.
    ///
    /// The caller owns commit and retry.
    pub async fn assign(&self, uow: &mut dyn UnitOfWork, claim_id: ClaimId) -> BatchingResult<Batch> {
        let claim = uow.get_claim(claim_id).await?;
        if let Some(batch_id) = claim.batch_id {
            return Err(BatchingError::DataIntegrity(format!(
                "Claim {claim_id} already belongs to batch {batch_id}"
            )));
        }
        if claim.processed {
            return Err(BatchingError::DataIntegrity(format!(
                "Claim {claim_id} is already processed"
            )));
        }

        let insurer = uow.get_insurer(claim.insurer_id).await?;
        let provider = uow.get_provider(claim.provider_id).await?;
        let key = BatchKey {
            provider_id: provider.id,
            insurer_id: insurer.id,
            batch_date: insurer.batch_date_for(&claim),
        };

        uow.lock_key(&key).await?;

        let mut batch = match uow.find_open_batch(&key, insurer.max_batch_size).await? {
            Some(batch) => batch,
            None => {
                let processing_date = capacity_aware_processing_date(uow, &insurer, key.batch_date).await?;
                create_batch(uow, &provider, key, processing_date).await?
            }
        };

        uow.reassign_claim(claim.id, batch.id).await?;
        recompute_batch(uow, &self.cost_model, &insurer, &mut batch).await?;

        info!(
            claim_id = claim.id,
            batch_id = batch.id,
            provider_id = provider.id,
            insurer_id = insurer.id,
            total_claims = batch.total_claims,
            "Claim assigned to batch"
        );

        if batch.total_claims >= insurer.max_batch_size
            && uow.find_open_batch(&key, insurer.max_batch_size).await?.is_none()
        {
            let overflow = create_batch(uow, &provider, key, key.default_processing_date()).await?;
            debug!(
                batch_id = overflow.id,
                full_batch_id = batch.id,
                identifier = %overflow.batch_identifier,
                "Opened overflow batch"
            );
        }

        Ok(batch)
    }
}

/// Processing date for a batch created now: the day after `batch_date`, or
/// the day after that when the insurer's volume already scheduled for the next
/// day leaves no room for one more claim.
pub(crate) async fn capacity_aware_processing_date(
    uow: &mut dyn UnitOfWork,
    insurer: &Insurer,
    batch_date: NaiveDate,
) -> BatchingResult<NaiveDate> {
    let next = next_day(batch_date);
    let scheduled = uow.scheduled_claim_volume(insurer.id, next).await?;

    if scheduled + 1 >= insurer.daily_capacity {
        debug!(
            insurer_id = insurer.id,
            scheduled,
            daily_capacity = insurer.daily_capacity,
            "Capacity reached for next day, scheduling one day later"
        );
        Ok(next_day(next))
    } else {
        Ok(next)
    }
}

/// Create an empty batch for `key` under a fresh identifier. Identifiers are
/// shared by every insurer of the provider, so the provider/date scope is
/// locked first.
pub(crate) async fn create_batch(
    uow: &mut dyn UnitOfWork,
    provider: &Provider,
    key: BatchKey,
    processing_date: NaiveDate,
) -> BatchingResult<Batch> {
    uow.lock_identifiers(provider.id, key.batch_date).await?;
    let batch_identifier = next_identifier(uow, provider, key.batch_date).await?;
    uow.create_batch(NewBatch {
        key,
        batch_identifier,
        processing_date,
    })
    .await
}

/// `"<Provider> <Mon D YYYY>"`, suffixed with `#N` when the provider already
/// has batches for the date. N starts at the existing count plus one and moves
/// up past identifiers still in use.
pub(crate) async fn next_identifier(
    uow: &mut dyn UnitOfWork,
    provider: &Provider,
    batch_date: NaiveDate,
) -> BatchingResult<String> {
    let base = base_identifier(&provider.name, batch_date);
    let existing = uow.count_batches_for_provider_date(provider.id, batch_date).await?;

    if existing == 0 && !uow.identifier_exists(&base).await? {
        return Ok(base);
    }

    let mut n = existing + 1;
    loop {
        let candidate = format!("{base} #{n}");
        if !uow.identifier_exists(&candidate).await? {
            return Ok(candidate);
        }
        n += 1;
    }
}

pub(crate) fn base_identifier(provider_name: &str, batch_date: NaiveDate) -> String {
    format!("{} {}", provider_name, batch_date.format("%b %-d %Y"))
}

/// Re-derive totals and cost from the member claims and persist them
pub async fn recompute_batch(
    uow: &mut dyn UnitOfWork,
    cost_model: &CostModel,
    insurer: &Insurer,
    batch: &mut Batch,
) -> BatchingResult<()> {
    let totals = uow.sum_claims_for_batch(batch.id).await?;
    let claims = uow.find_claims_by_batch(batch.id, ClaimOrder::Id, None).await?;

    batch.apply_totals(totals);
    batch.processing_cost = cost_model.batch_cost(batch.processing_date, insurer, &claims);
    uow.save_batch(batch).await
}
