use crate::{
    assignment::BatchAssigner,
    config::BatchingConfig,
    cost::CostModel,
    error::{BatchingError, BatchingResult},
    models::*,
    notification::{ClaimNotifier, ClaimSubmittedNotice},
    optimizer::RebalanceOptimizer,
    repository::BatchStore,
    retry::RetryPolicy,
    scheduler::{CapacityScheduler, DEFAULT_PAGE_SIZE},
};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use validator::{Validate, ValidationError, ValidationErrors};

/// Entry point for claim submission and the periodic batch jobs
pub struct ClaimBatchingService {
    store: Arc<dyn BatchStore>,
    notifier: Arc<dyn ClaimNotifier>,
    assigner: BatchAssigner,
    scheduler: CapacityScheduler,
    optimizer: RebalanceOptimizer,
    retry: RetryPolicy,
}

impl ClaimBatchingService {
    pub fn new(store: Arc<dyn BatchStore>, notifier: Arc<dyn ClaimNotifier>) -> Self {
        Self::with_settings(store, notifier, DEFAULT_PAGE_SIZE, RetryPolicy::default())
    }

    pub fn from_config(
        store: Arc<dyn BatchStore>,
        notifier: Arc<dyn ClaimNotifier>,
        config: &BatchingConfig,
    ) -> Self {
        Self::with_settings(store, notifier, config.scheduler.page_size, config.retry)
    }

    pub fn with_settings(
        store: Arc<dyn BatchStore>,
        notifier: Arc<dyn ClaimNotifier>,
        page_size: i64,
        retry: RetryPolicy,
    ) -> Self {
        let cost_model = CostModel;
        Self {
            store,
            notifier,
            assigner: BatchAssigner::new(cost_model),
            scheduler: CapacityScheduler::new(cost_model, page_size, retry),
            optimizer: RebalanceOptimizer::new(cost_model, retry),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn BatchStore> {
        &self.store
    }

    /// Validate and persist a claim, then place it in a batch.
    ///
    /// The claim is kept even when batching fails; the outcome then carries no
    /// batch and the claim can be picked up by [`Self::assign_pending_claims`].
    #[instrument(skip(self, submission), fields(provider_id = submission.provider_id, insurer_code = %submission.insurer_code))]
    pub async fn submit_claim(&self, submission: ClaimSubmission) -> BatchingResult<SubmissionOutcome> {
        submission.validate()?;

        let submission_date = submission
            .submission_date
            .unwrap_or_else(|| Utc::now().date_naive());
        if submission.encounter_date > submission_date {
            let mut errors = ValidationErrors::new();
            errors.add("encounter_date", ValidationError::new("encounter_after_submission"));
            return Err(errors.into());
        }

        let insurer = self
            .store
            .find_insurer_by_code(&submission.insurer_code)
            .await?
            .ok_or_else(|| BatchingError::not_found("Insurer", &submission.insurer_code))?;
        let provider = self
            .store
            .get_provider(submission.provider_id)
            .await?
            .ok_or_else(|| BatchingError::not_found("Provider", submission.provider_id))?;
        let specialty = self
            .store
            .get_specialty(submission.specialty_id)
            .await?
            .ok_or_else(|| BatchingError::not_found("Specialty", submission.specialty_id))?;

        let claim = self
            .store
            .create_claim(NewClaim {
                provider_id: provider.id,
                insurer_id: insurer.id,
                specialty_id: specialty.id,
                encounter_date: submission.encounter_date,
                submission_date,
                priority_level: submission.priority_level,
                total_amount: submission.total_amount,
                items: submission.items,
            })
            .await?;

        let batch = match self.assign_with_retry(claim.id).await {
            Ok(batch) => Some(batch),
            Err(err) => {
                error!(
                    claim_id = claim.id,
                    provider_id = provider.id,
                    insurer_id = insurer.id,
                    error = %err,
                    "Batch assignment failed, claim left unbatched"
                );
                None
            }
        };

        if let Some(batch) = &batch {
            let notice = ClaimSubmittedNotice::new(&insurer, batch, &claim, &provider, &specialty);
            if let Err(err) = self.notifier.claim_submitted(&notice).await {
                warn!(claim_id = claim.id, batch_id = batch.id, error = %err, "Claim notice not delivered");
            }
        }

        // The claim and its batch are committed; a failed re-read falls back to what we hold.
        let stored = match self.store.get_claim(claim.id).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(claim_id = claim.id, error = %err, "Claim re-read failed after commit");
                None
            }
        };
        let claim = stored.unwrap_or(Claim {
            batch_id: batch.as_ref().map(|b| b.id),
            ..claim
        });
        info!(
            claim_id = claim.id,
            batch_id = ?claim.batch_id,
            "Claim submitted"
        );

        Ok(SubmissionOutcome { claim, batch })
    }

    /// Mark ready batches processed for `date` within insurer capacity
    pub async fn run_daily_capacity_pass(&self, date: NaiveDate) -> BatchingResult<Vec<ProcessedBatchSummary>> {
        self.scheduler.process_ready_batches(self.store.as_ref(), date).await
    }

    /// Rebalance the pending batches scheduled for `target_date`
    pub async fn run_rebalance_pass(&self, target_date: NaiveDate) -> BatchingResult<OptimizationStats> {
        self.optimizer.reoptimize(self.store.as_ref(), target_date).await
    }

    /// Retry assignment for up to `limit` claims that are still unbatched
    #[instrument(skip(self))]
    pub async fn assign_pending_claims(&self, limit: i64) -> BatchingResult<PendingAssignmentReport> {
        let claims = self.store.unbatched_claims(limit).await?;
        let mut report = PendingAssignmentReport {
            examined: claims.len(),
            ..Default::default()
        };

        for claim in claims {
            match self.assign_with_retry(claim.id).await {
                Ok(batch) => {
                    report.assigned += 1;
                    info!(claim_id = claim.id, batch_id = batch.id, "Pending claim assigned");
                }
                Err(err) => {
                    warn!(
                        claim_id = claim.id,
                        provider_id = claim.provider_id,
                        insurer_id = claim.insurer_id,
                        error = %err,
                        "Pending claim still unbatched"
                    );
                    report.still_unbatched.push(claim.id);
                }
            }
        }

        Ok(report)
    }

    /// Capacity pass for `today`, then rebalance of tomorrow's batches
    #[instrument(skip(self))]
    pub async fn run_daily_cycle(&self, today: NaiveDate) -> BatchingResult<DailyCycleReport> {
        let processed = self.run_daily_capacity_pass(today).await?;
        let rebalanced_for = next_day(today);
        let optimization = self.run_rebalance_pass(rebalanced_for).await?;

        Ok(DailyCycleReport {
            as_of: today,
            processed,
            rebalanced_for,
            optimization,
        })
    }

    async fn assign_with_retry(&self, claim_id: ClaimId) -> BatchingResult<Batch> {
        self.retry
            .retry("assign_claim", || self.assign_once(claim_id))
            .await
    }

    async fn assign_once(&self, claim_id: ClaimId) -> BatchingResult<Batch> {
        let mut uow = self.store.begin().await?;
        let batch = self.assigner.assign(uow.as_mut(), claim_id).await?;
        uow.commit().await?;
        Ok(batch)
    }
}
