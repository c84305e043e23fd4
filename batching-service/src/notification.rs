use crate::{error::BatchingResult, models::*};
use async_trait::async_trait;
use chrono::NaiveDate;
use logger_redacted::PiiRedactor;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

/// Notice sent to an insurer when a claim joins one of its batches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimSubmittedNotice {
    pub recipient: Option<String>,
    pub insurer_id: InsurerId,
    pub batch_id: BatchId,
    pub batch_identifier: String,
    pub batch_date: NaiveDate,
    pub total_claims: i64,
    pub total_amount: Decimal,
    pub claim_id: ClaimId,
    pub provider_name: String,
    pub specialty_name: String,
    pub encounter_date: NaiveDate,
}

impl ClaimSubmittedNotice {
    pub fn new(insurer: &Insurer, batch: &Batch, claim: &Claim, provider: &Provider, specialty: &Specialty) -> Self {
        Self {
            recipient: insurer.email.clone(),
            insurer_id: insurer.id,
            batch_id: batch.id,
            batch_identifier: batch.batch_identifier.clone(),
            batch_date: batch.batch_date,
            total_claims: batch.total_claims,
            total_amount: batch.total_amount,
            claim_id: claim.id,
            provider_name: provider.name.clone(),
            specialty_name: specialty.name.clone(),
            encounter_date: claim.encounter_date,
        }
    }

    pub fn subject(&self) -> &'static str {
        "New Claim Batch Submitted"
    }

    /// Body lines of the mail rendering
    pub fn mail_lines(&self) -> Vec<String> {
        vec![
            "A new batch has been submitted:".to_string(),
            format!("Batch ID: {}", self.batch_identifier),
            format!("Date: {}", self.batch_date),
            format!("Total Claims: {}", self.total_claims),
            format!("Total Amount: ${:.2}", self.total_amount),
            String::new(),
            "Most recent claim details:".to_string(),
            format!("Claim ID: {}", self.claim_id),
            format!("Provider: {}", self.provider_name),
            format!("Specialty: {}", self.specialty_name),
            format!("Encounter Date: {}", self.encounter_date),
        ]
    }
}

/// Delivery seam for insurer notifications
#[async_trait]
pub trait ClaimNotifier: Send + Sync {
    async fn claim_submitted(&self, notice: &ClaimSubmittedNotice) -> BatchingResult<()>;
}

/// Renders notices into the log with the recipient redacted
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    redactor: PiiRedactor,
}

impl LogNotifier {
    pub fn new(redactor: PiiRedactor) -> Self {
        Self { redactor }
    }
}

#[async_trait]
impl ClaimNotifier for LogNotifier {
    async fn claim_submitted(&self, notice: &ClaimSubmittedNotice) -> BatchingResult<()> {
        let recipient = notice
            .recipient
            .as_deref()
            .map(|email| self.redactor.redact(email))
            .unwrap_or_else(|| "<no recipient>".to_string());

        info!(
            insurer_id = notice.insurer_id,
            batch_id = notice.batch_id,
            claim_id = notice.claim_id,
            recipient = %recipient,
            subject = notice.subject(),
            body = %notice.mail_lines().join("\n"),
            "Claim submission notice"
        );
        Ok(())
    }
}

/// Keeps every notice in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<ClaimSubmittedNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<ClaimSubmittedNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl ClaimNotifier for RecordingNotifier {
    async fn claim_submitted(&self, notice: &ClaimSubmittedNotice) -> BatchingResult<()> {
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}
