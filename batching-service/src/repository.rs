use crate::{
    error::{BatchingError, BatchingResult},
    models::*,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub mod postgres;

pub use postgres::PostgresBatchStore;

/// Persistence gateway for claims, batches and the reference entities
///
/// Reads on this trait run outside any unit of work. Every mutation of batch
/// membership goes through [`UnitOfWork`] so totals are re-derived in the same
/// transaction that changed them.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Open a unit of work. Dropping it without [`UnitOfWork::commit`] rolls back.
    async fn begin(&self) -> BatchingResult<Box<dyn UnitOfWork>>;

    async fn create_provider(&self, provider: NewProvider) -> BatchingResult<Provider>;

    async fn get_provider(&self, id: ProviderId) -> BatchingResult<Option<Provider>>;

    async fn find_provider_by_code(&self, code: &str) -> BatchingResult<Option<Provider>>;

    async fn create_specialty(&self, specialty: NewSpecialty) -> BatchingResult<Specialty>;

    async fn get_specialty(&self, id: SpecialtyId) -> BatchingResult<Option<Specialty>>;

    async fn find_specialty_by_code(&self, code: &str) -> BatchingResult<Option<Specialty>>;

    async fn create_insurer(&self, insurer: NewInsurer) -> BatchingResult<Insurer>;

    async fn find_insurer_by_code(&self, code: &str) -> BatchingResult<Option<Insurer>>;

    /// Persist a claim with its items, unbatched
    async fn create_claim(&self, claim: NewClaim) -> BatchingResult<Claim>;

    async fn get_claim(&self, id: ClaimId) -> BatchingResult<Option<Claim>>;

    async fn claim_items(&self, claim_id: ClaimId) -> BatchingResult<Vec<ClaimItem>>;

    /// Unprocessed claims with no batch, oldest first
    async fn unbatched_claims(&self, limit: i64) -> BatchingResult<Vec<Claim>>;

    async fn get_batch(&self, id: BatchId) -> BatchingResult<Option<Batch>>;

    /// Batches matching `filter` in creation order
    async fn list_batches(&self, filter: &BatchFilter) -> BatchingResult<Vec<Batch>>;

    async fn claims_in_batch(&self, batch_id: BatchId) -> BatchingResult<Vec<Claim>>;

    /// Insurers with unprocessed batches scheduled on `processing_date`, ascending
    async fn insurers_with_pending_batches(
        &self,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<InsurerId>>;
}

/// Transactional view of the store
#[async_trait]
pub trait UnitOfWork: Send {
    /// Exclusive lock scoped to a (provider, insurer, batch date) key, held until
    /// the unit of work ends
    async fn lock_key(&mut self, key: &BatchKey) -> BatchingResult<()>;

    /// Exclusive lock on the identifier space of one provider and batch date,
    /// held until the unit of work ends. Taken before picking a new identifier.
    async fn lock_identifiers(&mut self, provider_id: ProviderId, batch_date: NaiveDate) -> BatchingResult<()>;

    async fn get_claim(&mut self, id: ClaimId) -> BatchingResult<Claim>;

    async fn get_insurer(&mut self, id: InsurerId) -> BatchingResult<Insurer>;

    async fn get_provider(&mut self, id: ProviderId) -> BatchingResult<Provider>;

    /// Earliest unprocessed batch for `key` holding fewer than `max_claims` claims
    async fn find_open_batch(&mut self, key: &BatchKey, max_claims: i64) -> BatchingResult<Option<Batch>>;

    /// Batches of any state sharing provider and batch date
    async fn count_batches_for_provider_date(
        &mut self,
        provider_id: ProviderId,
        batch_date: NaiveDate,
    ) -> BatchingResult<i64>;

    async fn identifier_exists(&mut self, identifier: &str) -> BatchingResult<bool>;

    async fn create_batch(&mut self, batch: NewBatch) -> BatchingResult<Batch>;

    async fn save_batch(&mut self, batch: &Batch) -> BatchingResult<()>;

    async fn delete_batch(&mut self, id: BatchId) -> BatchingResult<()>;

    async fn sum_claims_for_batch(&mut self, id: BatchId) -> BatchingResult<BatchTotals>;

    async fn find_claims_by_batch(
        &mut self,
        id: BatchId,
        order: ClaimOrder,
        limit: Option<i64>,
    ) -> BatchingResult<Vec<Claim>>;

    async fn reassign_claim(&mut self, claim_id: ClaimId, batch_id: BatchId) -> BatchingResult<()>;

    /// Mark the batch and all member claims processed, returning the claim count
    async fn mark_claims_processed(&mut self, batch: &Batch) -> BatchingResult<u64>;

    /// Claims in unprocessed batches already scheduled for `processing_date`
    async fn scheduled_claim_volume(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<i64>;

    /// Claims in processed batches per insurer for `processing_date`
    async fn processed_claim_volume(
        &mut self,
        processing_date: NaiveDate,
    ) -> BatchingResult<HashMap<InsurerId, i64>>;

    /// Next page of unprocessed batches due on or before `as_of`, ordered by
    /// (processing_date, created_at, id) and starting after `after`
    async fn find_ready_batches(
        &mut self,
        as_of: NaiveDate,
        after: Option<BatchCursor>,
        limit: i64,
    ) -> BatchingResult<Vec<Batch>>;

    /// Unprocessed batches of one insurer scheduled exactly on `processing_date`
    async fn find_pending_batches(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<Batch>>;

    async fn commit(&mut self) -> BatchingResult<()>;
}

#[derive(Debug, Clone, Default)]
struct Sequences {
    provider: i64,
    specialty: i64,
    insurer: i64,
    claim: i64,
    claim_item: i64,
    batch: i64,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    seq: Sequences,
    providers: BTreeMap<ProviderId, Provider>,
    specialties: BTreeMap<SpecialtyId, Specialty>,
    insurers: BTreeMap<InsurerId, Insurer>,
    claims: BTreeMap<ClaimId, Claim>,
    claim_items: Vec<ClaimItem>,
    batches: BTreeMap<BatchId, Batch>,
}

impl StoreState {
    fn next(counter: &mut i64) -> i64 {
        *counter += 1;
        *counter
    }

    fn batch_totals(&self, batch_id: BatchId) -> BatchTotals {
        BatchTotals::from_claims(
            self.claims
                .values()
                .filter(|claim| claim.batch_id == Some(batch_id)),
        )
    }
}

/// In-memory store for testing and development
///
/// A unit of work owns the whole state for its lifetime, which gives every
/// transaction exclusive access. The state is snapshotted when the unit of work
/// starts and restored if it is dropped uncommitted.
#[derive(Clone, Default)]
pub struct InMemoryBatchStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a batch row directly, bypassing recomputation
    pub async fn put_batch(&self, batch: Batch) {
        let mut state = self.state.lock().await;
        state.seq.batch = state.seq.batch.max(batch.id);
        state.batches.insert(batch.id, batch);
    }

    /// Point a claim at a batch directly, bypassing recomputation
    pub async fn put_claim_batch(&self, claim_id: ClaimId, batch_id: Option<BatchId>) {
        let mut state = self.state.lock().await;
        if let Some(claim) = state.claims.get_mut(&claim_id) {
            claim.batch_id = batch_id;
        }
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn begin(&self) -> BatchingResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            state: guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn create_provider(&self, provider: NewProvider) -> BatchingResult<Provider> {
        let mut state = self.state.lock().await;
        let id = StoreState::next(&mut state.seq.provider);
        let provider = Provider {
            id,
            name: provider.name,
            code: provider.code,
            email: provider.email,
        };
        state.providers.insert(id, provider.clone());
        Ok(provider)
    }

    async fn get_provider(&self, id: ProviderId) -> BatchingResult<Option<Provider>> {
        Ok(self.state.lock().await.providers.get(&id).cloned())
    }

    async fn find_provider_by_code(&self, code: &str) -> BatchingResult<Option<Provider>> {
        let state = self.state.lock().await;
        Ok(state.providers.values().find(|p| p.code == code).cloned())
    }

    async fn create_specialty(&self, specialty: NewSpecialty) -> BatchingResult<Specialty> {
        let mut state = self.state.lock().await;
        if state.specialties.values().any(|s| s.code == specialty.code) {
            return Err(BatchingError::Storage(format!(
                "Specialty code already exists: {}",
                specialty.code
            )));
        }
        let id = StoreState::next(&mut state.seq.specialty);
        let specialty = Specialty {
            id,
            name: specialty.name,
            code: specialty.code,
        };
        state.specialties.insert(id, specialty.clone());
        Ok(specialty)
    }

    async fn get_specialty(&self, id: SpecialtyId) -> BatchingResult<Option<Specialty>> {
        Ok(self.state.lock().await.specialties.get(&id).cloned())
    }

    async fn find_specialty_by_code(&self, code: &str) -> BatchingResult<Option<Specialty>> {
        let state = self.state.lock().await;
        Ok(state.specialties.values().find(|s| s.code == code).cloned())
    }

    async fn create_insurer(&self, insurer: NewInsurer) -> BatchingResult<Insurer> {
        let mut state = self.state.lock().await;
        if state.insurers.values().any(|i| i.code == insurer.code) {
            return Err(BatchingError::Storage(format!(
                "Insurer code already exists: {}",
                insurer.code
            )));
        }
        let id = StoreState::next(&mut state.seq.insurer);
        let insurer = insurer.into_insurer(id);
        state.insurers.insert(id, insurer.clone());
        Ok(insurer)
    }

    async fn find_insurer_by_code(&self, code: &str) -> BatchingResult<Option<Insurer>> {
        let state = self.state.lock().await;
        Ok(state.insurers.values().find(|i| i.code == code).cloned())
    }

    async fn create_claim(&self, claim: NewClaim) -> BatchingResult<Claim> {
        let mut state = self.state.lock().await;
        let id = StoreState::next(&mut state.seq.claim);
        for item in claim.items {
            let item_id = StoreState::next(&mut state.seq.claim_item);
            state.claim_items.push(ClaimItem {
                id: item_id,
                claim_id: id,
                name: item.name,
                unit_price: item.unit_price,
                quantity: item.quantity,
                subtotal: item.subtotal,
            });
        }
        let claim = Claim {
            id,
            provider_id: claim.provider_id,
            insurer_id: claim.insurer_id,
            specialty_id: claim.specialty_id,
            batch_id: None,
            encounter_date: claim.encounter_date,
            submission_date: claim.submission_date,
            priority_level: claim.priority_level,
            total_amount: claim.total_amount,
            processed: false,
            created_at: Utc::now(),
        };
        state.claims.insert(id, claim.clone());
        Ok(claim)
    }

    async fn get_claim(&self, id: ClaimId) -> BatchingResult<Option<Claim>> {
        Ok(self.state.lock().await.claims.get(&id).cloned())
    }

    async fn claim_items(&self, claim_id: ClaimId) -> BatchingResult<Vec<ClaimItem>> {
        let state = self.state.lock().await;
        Ok(state
            .claim_items
            .iter()
            .filter(|item| item.claim_id == claim_id)
            .cloned()
            .collect())
    }

    async fn unbatched_claims(&self, limit: i64) -> BatchingResult<Vec<Claim>> {
        let state = self.state.lock().await;
        Ok(state
            .claims
            .values()
            .filter(|claim| claim.batch_id.is_none() && !claim.processed)
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn get_batch(&self, id: BatchId) -> BatchingResult<Option<Batch>> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn list_batches(&self, filter: &BatchFilter) -> BatchingResult<Vec<Batch>> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .values()
            .filter(|batch| filter.matches(batch))
            .cloned()
            .collect())
    }

    async fn claims_in_batch(&self, batch_id: BatchId) -> BatchingResult<Vec<Claim>> {
        let state = self.state.lock().await;
        Ok(state
            .claims
            .values()
            .filter(|claim| claim.batch_id == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn insurers_with_pending_batches(
        &self,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<InsurerId>> {
        let state = self.state.lock().await;
        let mut ids: Vec<InsurerId> = state
            .batches
            .values()
            .filter(|b| !b.processed && b.processing_date == processing_date)
            .map(|b| b.insurer_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

/// Unit of work over [`InMemoryBatchStore`]
pub struct InMemoryUnitOfWork {
    state: OwnedMutexGuard<StoreState>,
    snapshot: Option<StoreState>,
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.state = snapshot;
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_key(&mut self, _key: &BatchKey) -> BatchingResult<()> {
        // The owned state guard already excludes every other unit of work.
        Ok(())
    }

    async fn lock_identifiers(&mut self, _provider_id: ProviderId, _batch_date: NaiveDate) -> BatchingResult<()> {
        Ok(())
    }

    async fn get_claim(&mut self, id: ClaimId) -> BatchingResult<Claim> {
        self.state
            .claims
            .get(&id)
            .cloned()
            .ok_or_else(|| BatchingError::not_found("Claim", id))
    }

    async fn get_insurer(&mut self, id: InsurerId) -> BatchingResult<Insurer> {
        self.state
            .insurers
            .get(&id)
            .cloned()
            .ok_or_else(|| BatchingError::not_found("Insurer", id))
    }

    async fn get_provider(&mut self, id: ProviderId) -> BatchingResult<Provider> {
        self.state
            .providers
            .get(&id)
            .cloned()
            .ok_or_else(|| BatchingError::not_found("Provider", id))
    }

    async fn find_open_batch(&mut self, key: &BatchKey, max_claims: i64) -> BatchingResult<Option<Batch>> {
        Ok(self
            .state
            .batches
            .values()
            .filter(|b| !b.processed && b.key() == *key && b.total_claims < max_claims)
            .min_by_key(|b| (b.created_at, b.id))
            .cloned())
    }

    async fn count_batches_for_provider_date(
        &mut self,
        provider_id: ProviderId,
        batch_date: NaiveDate,
    ) -> BatchingResult<i64> {
        let count = self
            .state
            .batches
            .values()
            .filter(|b| b.provider_id == provider_id && b.batch_date == batch_date)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn identifier_exists(&mut self, identifier: &str) -> BatchingResult<bool> {
        Ok(self
            .state
            .batches
            .values()
            .any(|b| b.batch_identifier == identifier))
    }

    async fn create_batch(&mut self, batch: NewBatch) -> BatchingResult<Batch> {
        if self
            .state
            .batches
            .values()
            .any(|b| b.batch_identifier == batch.batch_identifier)
        {
            return Err(BatchingError::Storage(format!(
                "Batch identifier already exists: {}",
                batch.batch_identifier
            )));
        }
        let id = StoreState::next(&mut self.state.seq.batch);
        let batch = Batch {
            id,
            provider_id: batch.key.provider_id,
            insurer_id: batch.key.insurer_id,
            batch_date: batch.key.batch_date,
            batch_identifier: batch.batch_identifier,
            total_claims: 0,
            total_amount: Default::default(),
            processing_cost: Default::default(),
            processed: false,
            processing_date: batch.processing_date,
            created_at: Utc::now(),
        };
        self.state.batches.insert(id, batch.clone());
        Ok(batch)
    }

    async fn save_batch(&mut self, batch: &Batch) -> BatchingResult<()> {
        match self.state.batches.get_mut(&batch.id) {
            Some(existing) => {
                *existing = batch.clone();
                Ok(())
            }
            None => Err(BatchingError::not_found("Batch", batch.id)),
        }
    }

    async fn delete_batch(&mut self, id: BatchId) -> BatchingResult<()> {
        self.state
            .batches
            .remove(&id)
            .ok_or_else(|| BatchingError::not_found("Batch", id))?;
        for claim in self.state.claims.values_mut() {
            if claim.batch_id == Some(id) {
                claim.batch_id = None;
            }
        }
        Ok(())
    }

    async fn sum_claims_for_batch(&mut self, id: BatchId) -> BatchingResult<BatchTotals> {
        Ok(self.state.batch_totals(id))
    }

    async fn find_claims_by_batch(
        &mut self,
        id: BatchId,
        order: ClaimOrder,
        limit: Option<i64>,
    ) -> BatchingResult<Vec<Claim>> {
        let mut claims: Vec<Claim> = self
            .state
            .claims
            .values()
            .filter(|claim| claim.batch_id == Some(id))
            .cloned()
            .collect();
        if order == ClaimOrder::PriorityAscending {
            claims.sort_by_key(|claim| (claim.priority_level, claim.id));
        }
        if let Some(limit) = limit {
            claims.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(claims)
    }

    async fn reassign_claim(&mut self, claim_id: ClaimId, batch_id: BatchId) -> BatchingResult<()> {
        if !self.state.batches.contains_key(&batch_id) {
            return Err(BatchingError::not_found("Batch", batch_id));
        }
        let claim = self
            .state
            .claims
            .get_mut(&claim_id)
            .ok_or_else(|| BatchingError::not_found("Claim", claim_id))?;
        claim.batch_id = Some(batch_id);
        Ok(())
    }

    async fn mark_claims_processed(&mut self, batch: &Batch) -> BatchingResult<u64> {
        self.save_batch(batch).await?;
        let mut updated = 0;
        for claim in self.state.claims.values_mut() {
            if claim.batch_id == Some(batch.id) {
                claim.processed = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn scheduled_claim_volume(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<i64> {
        Ok(self
            .state
            .batches
            .values()
            .filter(|b| {
                b.insurer_id == insurer_id && !b.processed && b.processing_date == processing_date
            })
            .map(|b| b.total_claims)
            .sum())
    }

    async fn processed_claim_volume(
        &mut self,
        processing_date: NaiveDate,
    ) -> BatchingResult<HashMap<InsurerId, i64>> {
        let mut volume = HashMap::new();
        for batch in self
            .state
            .batches
            .values()
            .filter(|b| b.processed && b.processing_date == processing_date)
        {
            *volume.entry(batch.insurer_id).or_insert(0) += batch.total_claims;
        }
        Ok(volume)
    }

    async fn find_ready_batches(
        &mut self,
        as_of: NaiveDate,
        after: Option<BatchCursor>,
        limit: i64,
    ) -> BatchingResult<Vec<Batch>> {
        let position = |b: &Batch| (b.processing_date, b.created_at, b.id);
        let mut ready: Vec<Batch> = self
            .state
            .batches
            .values()
            .filter(|b| !b.processed && b.processing_date <= as_of)
            .filter(|b| {
                after.map_or(true, |cursor| {
                    position(b) > (cursor.processing_date, cursor.created_at, cursor.id)
                })
            })
            .cloned()
            .collect();
        ready.sort_by_key(|b| position(b));
        ready.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(ready)
    }

    async fn find_pending_batches(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<Batch>> {
        let mut pending: Vec<Batch> = self
            .state
            .batches
            .values()
            .filter(|b| {
                b.insurer_id == insurer_id && !b.processed && b.processing_date == processing_date
            })
            .cloned()
            .collect();
        pending.sort_by_key(|b| (b.created_at, b.id));
        Ok(pending)
    }

    async fn commit(&mut self) -> BatchingResult<()> {
        self.snapshot = None;
        Ok(())
    }
}
