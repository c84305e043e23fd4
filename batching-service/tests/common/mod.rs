#![allow(dead_code)]

use async_trait::async_trait;
use batching_service::*;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_ms: 1,
        max_backoff_ms: 5,
    }
}

pub struct Fixture {
    pub store: InMemoryBatchStore,
    pub notifier: Arc<RecordingNotifier>,
    pub service: ClaimBatchingService,
    pub specialty: Specialty,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE).await
    }

    pub async fn with_page_size(page_size: i64) -> Self {
        let store = InMemoryBatchStore::new();
        Self::over(store.clone(), Arc::new(store), page_size).await
    }

    /// Fixture whose service talks to `backend`, seeded through `store`
    pub async fn over(store: InMemoryBatchStore, backend: Arc<dyn BatchStore>, page_size: i64) -> Self {
        let specialty = store
            .create_specialty(NewSpecialty {
                name: "Cardiology".into(),
                code: "CARD".into(),
            })
            .await
            .unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let service = ClaimBatchingService::with_settings(backend, notifier.clone(), page_size, fast_retry());

        Self {
            store,
            notifier,
            service,
            specialty,
        }
    }

    pub async fn insurer(&self, code: &str, min: i64, max: i64, capacity: i64) -> Insurer {
        self.store
            .create_insurer(NewInsurer {
                name: format!("{code} Insurance"),
                code: code.into(),
                email: Some(format!("claims@{}.example.com", code.to_lowercase())),
                daily_capacity: Some(capacity),
                min_batch_size: Some(min),
                max_batch_size: Some(max),
                prefers_encounter_date: Some(true),
                specialty_efficiency: HashMap::from([(self.specialty.id, 1.2)]),
            })
            .await
            .unwrap()
    }

    pub async fn provider(&self, name: &str) -> Provider {
        self.store
            .create_provider(NewProvider {
                name: name.into(),
                code: name.to_uppercase().replace(' ', "_"),
                email: None,
            })
            .await
            .unwrap()
    }

    pub fn submission(&self, provider: &Provider, insurer: &Insurer, encounter: NaiveDate) -> ClaimSubmission {
        ClaimSubmission {
            provider_id: provider.id,
            insurer_code: insurer.code.clone(),
            specialty_id: self.specialty.id,
            encounter_date: encounter,
            submission_date: Some(encounter),
            priority_level: 3,
            total_amount: dec!(100.00),
            items: vec![ClaimItemInput {
                name: "Office visit".into(),
                unit_price: dec!(100.00),
                quantity: 1,
                subtotal: dec!(100.00),
            }],
        }
    }

    /// Submit `count` claims for one key and return the outcomes
    pub async fn submit_many(
        &self,
        provider: &Provider,
        insurer: &Insurer,
        encounter: NaiveDate,
        count: usize,
    ) -> Vec<SubmissionOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        for _ in 0..count {
            outcomes.push(
                self.service
                    .submit_claim(self.submission(provider, insurer, encounter))
                    .await
                    .unwrap(),
            );
        }
        outcomes
    }

    /// Insert a pending batch directly, one claim per priority, with totals
    /// and cost consistent with its members
    pub async fn seed_batch(
        &self,
        insurer: &Insurer,
        provider: &Provider,
        batch_date: NaiveDate,
        processing_date: NaiveDate,
        priorities: &[i16],
    ) -> Batch {
        static SEQ: AtomicUsize = AtomicUsize::new(0);

        let mut claim_ids = Vec::new();
        for &priority in priorities {
            let claim = self
                .store
                .create_claim(NewClaim {
                    provider_id: provider.id,
                    insurer_id: insurer.id,
                    specialty_id: self.specialty.id,
                    encounter_date: batch_date,
                    submission_date: batch_date,
                    priority_level: priority,
                    total_amount: dec!(100.00),
                    items: vec![],
                })
                .await
                .unwrap();
            claim_ids.push(claim.id);
        }

        let mut uow = self.store.begin().await.unwrap();
        let mut batch = uow
            .create_batch(NewBatch {
                key: BatchKey {
                    provider_id: provider.id,
                    insurer_id: insurer.id,
                    batch_date,
                },
                batch_identifier: format!("{} seeded {}", provider.name, SEQ.fetch_add(1, Ordering::SeqCst)),
                processing_date,
            })
            .await
            .unwrap();
        for id in claim_ids {
            uow.reassign_claim(id, batch.id).await.unwrap();
        }
        let totals = uow.sum_claims_for_batch(batch.id).await.unwrap();
        let claims = uow.find_claims_by_batch(batch.id, ClaimOrder::Id, None).await.unwrap();
        batch.apply_totals(totals);
        batch.processing_cost = CostModel.batch_cost(processing_date, insurer, &claims);
        uow.save_batch(&batch).await.unwrap();
        uow.commit().await.unwrap();
        batch
    }

    pub async fn pending(&self, insurer: &Insurer, processing_date: NaiveDate) -> Vec<Batch> {
        self.store
            .list_batches(&BatchFilter {
                insurer_id: Some(insurer.id),
                processed: Some(false),
                processing_date: Some(processing_date),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn batch(&self, id: BatchId) -> Option<Batch> {
        self.store.get_batch(id).await.unwrap()
    }
}

/// Cached totals must equal the aggregate of the member claims
pub async fn assert_totals_consistent(store: &InMemoryBatchStore) {
    for batch in store.list_batches(&BatchFilter::default()).await.unwrap() {
        let claims = store.claims_in_batch(batch.id).await.unwrap();
        let amount: Decimal = claims.iter().map(|c| c.total_amount).sum();
        assert_eq!(batch.total_claims, claims.len() as i64, "count of batch {}", batch.id);
        assert_eq!(batch.total_amount, amount, "amount of batch {}", batch.id);
    }
}

/// Store whose units of work can be made to fail with a retryable conflict
pub struct FlakyStore {
    inner: InMemoryBatchStore,
    failing: AtomicBool,
    failing_claim_reads: AtomicBool,
    begins: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryBatchStore) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            failing_claim_reads: AtomicBool::new(false),
            begins: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make `get_claim` outside a unit of work fail with a storage error
    pub fn set_failing_claim_reads(&self, failing: bool) {
        self.failing_claim_reads.store(failing, Ordering::SeqCst);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchStore for FlakyStore {
    async fn begin(&self) -> BatchingResult<Box<dyn UnitOfWork>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BatchingError::Conflict("could not serialize access".into()));
        }
        self.inner.begin().await
    }

    async fn create_provider(&self, provider: NewProvider) -> BatchingResult<Provider> {
        self.inner.create_provider(provider).await
    }

    async fn get_provider(&self, id: ProviderId) -> BatchingResult<Option<Provider>> {
        self.inner.get_provider(id).await
    }

    async fn find_provider_by_code(&self, code: &str) -> BatchingResult<Option<Provider>> {
        self.inner.find_provider_by_code(code).await
    }

    async fn create_specialty(&self, specialty: NewSpecialty) -> BatchingResult<Specialty> {
        self.inner.create_specialty(specialty).await
    }

    async fn get_specialty(&self, id: SpecialtyId) -> BatchingResult<Option<Specialty>> {
        self.inner.get_specialty(id).await
    }

    async fn find_specialty_by_code(&self, code: &str) -> BatchingResult<Option<Specialty>> {
        self.inner.find_specialty_by_code(code).await
    }

    async fn create_insurer(&self, insurer: NewInsurer) -> BatchingResult<Insurer> {
        self.inner.create_insurer(insurer).await
    }

    async fn find_insurer_by_code(&self, code: &str) -> BatchingResult<Option<Insurer>> {
        self.inner.find_insurer_by_code(code).await
    }

    async fn create_claim(&self, claim: NewClaim) -> BatchingResult<Claim> {
        self.inner.create_claim(claim).await
    }

    async fn get_claim(&self, id: ClaimId) -> BatchingResult<Option<Claim>> {
        if self.failing_claim_reads.load(Ordering::SeqCst) {
            return Err(BatchingError::Storage("connection reset by peer".into()));
        }
        self.inner.get_claim(id).await
    }

    async fn claim_items(&self, claim_id: ClaimId) -> BatchingResult<Vec<ClaimItem>> {
        self.inner.claim_items(claim_id).await
    }

    async fn unbatched_claims(&self, limit: i64) -> BatchingResult<Vec<Claim>> {
        self.inner.unbatched_claims(limit).await
    }

    async fn get_batch(&self, id: BatchId) -> BatchingResult<Option<Batch>> {
        self.inner.get_batch(id).await
    }

    async fn list_batches(&self, filter: &BatchFilter) -> BatchingResult<Vec<Batch>> {
        self.inner.list_batches(filter).await
    }

    async fn claims_in_batch(&self, batch_id: BatchId) -> BatchingResult<Vec<Claim>> {
        self.inner.claims_in_batch(batch_id).await
    }

    async fn insurers_with_pending_batches(&self, processing_date: NaiveDate) -> BatchingResult<Vec<InsurerId>> {
        self.inner.insurers_with_pending_batches(processing_date).await
    }
}
