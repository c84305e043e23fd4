use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

pub type ClaimId = i64;
pub type BatchId = i64;
pub type InsurerId = i64;
pub type ProviderId = i64;
pub type SpecialtyId = i64;

/// Daily claim capacity applied when an insurer is created without one
pub const DEFAULT_DAILY_CAPACITY: i64 = 100;
/// Minimum batch size applied when an insurer is created without one
pub const DEFAULT_MIN_BATCH_SIZE: i64 = 5;
/// Maximum batch size applied when an insurer is created without one
pub const DEFAULT_MAX_BATCH_SIZE: i64 = 50;

/// Healthcare provider submitting claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub code: String,
    pub email: Option<String>,
}

/// Medical specialty a claim is billed under
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Specialty {
    pub id: SpecialtyId,
    pub name: String,
    pub code: String,
}

/// Insurer with its processing constraints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Insurer {
    pub id: InsurerId,
    pub name: String,
    pub code: String,
    pub email: Option<String>,
    /// Max total claims marked processed per processing date
    pub daily_capacity: i64,
    pub min_batch_size: i64,
    pub max_batch_size: i64,
    /// Group by encounter date instead of submission date
    pub prefers_encounter_date: bool,
    /// Per-specialty cost multiplier, 1.0 when absent
    pub specialty_efficiency: HashMap<SpecialtyId, f64>,
}

impl Insurer {
    pub fn efficiency_factor(&self, specialty_id: SpecialtyId) -> f64 {
        self.specialty_efficiency
            .get(&specialty_id)
            .copied()
            .unwrap_or(1.0)
    }

    /// Midpoint between the minimum and maximum batch size
    pub fn optimal_batch_size(&self) -> f64 {
        (self.min_batch_size + self.max_batch_size) as f64 / 2.0
    }

    /// Date a claim is grouped under for this insurer
    pub fn batch_date_for(&self, claim: &Claim) -> NaiveDate {
        if self.prefers_encounter_date {
            claim.encounter_date
        } else {
            claim.submission_date
        }
    }
}

/// Insurance claim as persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub id: ClaimId,
    pub provider_id: ProviderId,
    pub insurer_id: InsurerId,
    pub specialty_id: SpecialtyId,
    pub batch_id: Option<BatchId>,
    pub encounter_date: NaiveDate,
    pub submission_date: NaiveDate,
    /// 1 (routine) to 5 (most urgent)
    pub priority_level: i16,
    pub total_amount: Decimal,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Line item billed on a claim
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimItem {
    pub id: i64,
    pub claim_id: ClaimId,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
}

/// Group of claims from one provider for one insurer sharing a batch date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub id: BatchId,
    pub provider_id: ProviderId,
    pub insurer_id: InsurerId,
    pub batch_date: NaiveDate,
    pub batch_identifier: String,
    pub total_claims: i64,
    pub total_amount: Decimal,
    pub processing_cost: Decimal,
    pub processed: bool,
    pub processing_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn key(&self) -> BatchKey {
        BatchKey {
            provider_id: self.provider_id,
            insurer_id: self.insurer_id,
            batch_date: self.batch_date,
        }
    }

    pub fn apply_totals(&mut self, totals: BatchTotals) {
        self.total_claims = totals.count;
        self.total_amount = totals.total_amount;
    }
}

/// Grouping key for open batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchKey {
    pub provider_id: ProviderId,
    pub insurer_id: InsurerId,
    pub batch_date: NaiveDate,
}

impl BatchKey {
    /// Processing date a batch for this key gets when created normally
    pub fn default_processing_date(&self) -> NaiveDate {
        next_day(self.batch_date)
    }
}

/// Aggregates derived from the claims referencing a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchTotals {
    pub count: i64,
    pub total_amount: Decimal,
}

impl BatchTotals {
    pub fn from_claims<'a>(claims: impl IntoIterator<Item = &'a Claim>) -> Self {
        claims.into_iter().fold(Self::default(), |acc, claim| Self {
            count: acc.count + 1,
            total_amount: acc.total_amount + claim.total_amount,
        })
    }
}

/// Fields for a batch about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub key: BatchKey,
    pub batch_identifier: String,
    pub processing_date: NaiveDate,
}

/// Fields for a claim about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewClaim {
    pub provider_id: ProviderId,
    pub insurer_id: InsurerId,
    pub specialty_id: SpecialtyId,
    pub encounter_date: NaiveDate,
    pub submission_date: NaiveDate,
    pub priority_level: i16,
    pub total_amount: Decimal,
    pub items: Vec<ClaimItemInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub code: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpecialty {
    pub name: String,
    pub code: String,
}

/// Insurer registration; unset limits fall back to the crate defaults
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NewInsurer {
    pub name: String,
    pub code: String,
    pub email: Option<String>,
    pub daily_capacity: Option<i64>,
    pub min_batch_size: Option<i64>,
    pub max_batch_size: Option<i64>,
    pub prefers_encounter_date: Option<bool>,
    #[serde(default)]
    pub specialty_efficiency: HashMap<SpecialtyId, f64>,
}

impl NewInsurer {
    pub fn daily_capacity(&self) -> i64 {
        self.daily_capacity.unwrap_or(DEFAULT_DAILY_CAPACITY)
    }

    pub fn min_batch_size(&self) -> i64 {
        self.min_batch_size.unwrap_or(DEFAULT_MIN_BATCH_SIZE)
    }

    pub fn max_batch_size(&self) -> i64 {
        self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE)
    }

    pub fn prefers_encounter_date(&self) -> bool {
        self.prefers_encounter_date.unwrap_or(true)
    }

    pub fn into_insurer(self, id: InsurerId) -> Insurer {
        Insurer {
            id,
            daily_capacity: self.daily_capacity(),
            min_batch_size: self.min_batch_size(),
            max_batch_size: self.max_batch_size(),
            prefers_encounter_date: self.prefers_encounter_date(),
            name: self.name,
            code: self.code,
            email: self.email,
            specialty_efficiency: self.specialty_efficiency,
        }
    }
}

/// Claim line as submitted by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClaimItemInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(custom(function = "non_negative"))]
    pub unit_price: Decimal,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(custom(function = "non_negative"))]
    pub subtotal: Decimal,
}

/// Claim submission as received from the request layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "encounter_not_after_submission"))]
pub struct ClaimSubmission {
    pub provider_id: ProviderId,
    #[validate(length(min = 1))]
    pub insurer_code: String,
    pub specialty_id: SpecialtyId,
    pub encounter_date: NaiveDate,
    /// Defaults to today when absent
    #[serde(default)]
    pub submission_date: Option<NaiveDate>,
    #[validate(range(min = 1, max = 5))]
    pub priority_level: i16,
    #[validate(custom(function = "non_negative"))]
    pub total_amount: Decimal,
    #[validate(length(min = 1), nested)]
    pub items: Vec<ClaimItemInput>,
}

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("non_negative"));
    }
    Ok(())
}

fn encounter_not_after_submission(submission: &ClaimSubmission) -> Result<(), ValidationError> {
    match submission.submission_date {
        Some(submitted) if submission.encounter_date > submitted => {
            Err(ValidationError::new("encounter_after_submission"))
        }
        _ => Ok(()),
    }
}

/// Result of a claim submission; the claim persists even when batching fails
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub claim: Claim,
    pub batch: Option<Batch>,
}

/// Row returned by a capacity pass for every batch marked processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedBatchSummary {
    pub id: BatchId,
    pub identifier: String,
    pub claims: i64,
    pub amount: Decimal,
    pub cost: Decimal,
}

impl From<&Batch> for ProcessedBatchSummary {
    fn from(batch: &Batch) -> Self {
        Self {
            id: batch.id,
            identifier: batch.batch_identifier.clone(),
            claims: batch.total_claims,
            amount: batch.total_amount,
            cost: batch.processing_cost,
        }
    }
}

/// Rebalance report
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizationStats {
    pub batches_analyzed: usize,
    pub batches_modified: usize,
    pub cost_before: Decimal,
    pub cost_after: Decimal,
    pub savings: Decimal,
    pub savings_percentage: Decimal,
    /// Insurer groups whose transaction was rolled back
    pub failed_insurers: Vec<InsurerId>,
}

/// Outcome of one scheduled cycle
#[derive(Debug, Clone, Serialize)]
pub struct DailyCycleReport {
    pub as_of: NaiveDate,
    pub processed: Vec<ProcessedBatchSummary>,
    pub rebalanced_for: NaiveDate,
    pub optimization: OptimizationStats,
}

/// Outcome of re-running assignment for claims left unbatched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PendingAssignmentReport {
    pub examined: usize,
    pub assigned: usize,
    pub still_unbatched: Vec<ClaimId>,
}

/// Filter for listing batches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchFilter {
    pub insurer_id: Option<InsurerId>,
    pub provider_id: Option<ProviderId>,
    pub processed: Option<bool>,
    pub processing_date: Option<NaiveDate>,
}

impl BatchFilter {
    pub fn matches(&self, batch: &Batch) -> bool {
        self.insurer_id.map_or(true, |id| batch.insurer_id == id)
            && self.provider_id.map_or(true, |id| batch.provider_id == id)
            && self.processed.map_or(true, |p| batch.processed == p)
            && self
                .processing_date
                .map_or(true, |d| batch.processing_date == d)
    }
}

/// Keyset position in the (processing_date, created_at, id) ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCursor {
    pub processing_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub id: BatchId,
}

impl From<&Batch> for BatchCursor {
    fn from(batch: &Batch) -> Self {
        Self {
            processing_date: batch.processing_date,
            created_at: batch.created_at,
            id: batch.id,
        }
    }
}

/// Ordering for claim listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimOrder {
    /// Insertion order
    #[default]
    Id,
    /// Lowest priority level first, then insertion order
    PriorityAscending,
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    add_days(date, 1)
}

pub fn add_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_add_days(Days::new(days)).unwrap_or(NaiveDate::MAX)
}
