//! PostgreSQL-backed batch store
//!
//! Units of work map onto database transactions:
//! - open-batch lookups are serialized per batch key with a transaction-scoped
//!   advisory lock
//! - every batch row read for modification is taken `FOR UPDATE`
//! - serialization failures and deadlocks surface as retryable conflicts

use crate::{
    error::{BatchingError, BatchingResult},
    models::*,
    repository::{BatchStore, UnitOfWork},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{postgres::PgRow, PgConnection, PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;
use tracing::debug;

const BATCH_COLUMNS: &str = "id, provider_id, insurer_id, batch_date, batch_identifier, \
     total_claims, total_amount, processing_cost, processed, processing_date, created_at";

const CLAIM_COLUMNS: &str = "id, provider_id, insurer_id, specialty_id, batch_id, encounter_date, \
     submission_date, priority_level, total_amount, processed, created_at";

const INSURER_COLUMNS: &str = "id, name, code, email, daily_capacity, min_batch_size, \
     max_batch_size, prefers_encounter_date";

/// PostgreSQL-backed batch store
#[derive(Clone)]
pub struct PostgresBatchStore {
    pool: PgPool,
}

impl PostgresBatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and wrap the resulting pool
    pub async fn from_connection_string(connection_string: &str) -> BatchingResult<Self> {
        let pool = PgPool::connect(connection_string).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> BatchingResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn batch_from_row(row: &PgRow) -> Result<Batch, sqlx::Error> {
    Ok(Batch {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        insurer_id: row.try_get("insurer_id")?,
        batch_date: row.try_get("batch_date")?,
        batch_identifier: row.try_get("batch_identifier")?,
        total_claims: row.try_get("total_claims")?,
        total_amount: row.try_get("total_amount")?,
        processing_cost: row.try_get("processing_cost")?,
        processed: row.try_get("processed")?,
        processing_date: row.try_get("processing_date")?,
        created_at: row.try_get("created_at")?,
    })
}

fn claim_from_row(row: &PgRow) -> Result<Claim, sqlx::Error> {
    Ok(Claim {
        id: row.try_get("id")?,
        provider_id: row.try_get("provider_id")?,
        insurer_id: row.try_get("insurer_id")?,
        specialty_id: row.try_get("specialty_id")?,
        batch_id: row.try_get("batch_id")?,
        encounter_date: row.try_get("encounter_date")?,
        submission_date: row.try_get("submission_date")?,
        priority_level: row.try_get("priority_level")?,
        total_amount: row.try_get("total_amount")?,
        processed: row.try_get("processed")?,
        created_at: row.try_get("created_at")?,
    })
}

fn provider_from_row(row: &PgRow) -> Result<Provider, sqlx::Error> {
    Ok(Provider {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        email: row.try_get("email")?,
    })
}

fn specialty_from_row(row: &PgRow) -> Result<Specialty, sqlx::Error> {
    Ok(Specialty {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
    })
}

/// Load an insurer row together with its specialty efficiency factors
async fn load_insurer(
    conn: &mut PgConnection,
    predicate: &str,
    value: InsurerLookup<'_>,
) -> BatchingResult<Option<Insurer>> {
    let sql = format!("SELECT {INSURER_COLUMNS} FROM insurers WHERE {predicate} = $1");
    let query = sqlx::query(&sql);
    let query = match value {
        InsurerLookup::Id(id) => query.bind(id),
        InsurerLookup::Code(code) => query.bind(code),
    };
    let Some(row) = query.fetch_optional(&mut *conn).await? else {
        return Ok(None);
    };

    let id: InsurerId = row.try_get("id")?;
    let factors = sqlx::query(
        "SELECT specialty_id, efficiency_factor FROM insurer_specialty_efficiencies WHERE insurer_id = $1",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let mut specialty_efficiency = HashMap::new();
    for factor in &factors {
        specialty_efficiency.insert(
            factor.try_get::<SpecialtyId, _>("specialty_id")?,
            factor.try_get::<f64, _>("efficiency_factor")?,
        );
    }

    Ok(Some(Insurer {
        id,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        email: row.try_get("email")?,
        daily_capacity: row.try_get("daily_capacity")?,
        min_batch_size: row.try_get("min_batch_size")?,
        max_batch_size: row.try_get("max_batch_size")?,
        prefers_encounter_date: row.try_get("prefers_encounter_date")?,
        specialty_efficiency,
    }))
}

enum InsurerLookup<'a> {
    Id(InsurerId),
    Code(&'a str),
}

#[async_trait]
impl BatchStore for PostgresBatchStore {
    async fn begin(&self) -> BatchingResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresUnitOfWork { tx: Some(tx) }))
    }

    async fn create_provider(&self, provider: NewProvider) -> BatchingResult<Provider> {
        let row = sqlx::query(
            "INSERT INTO providers (name, code, email) VALUES ($1, $2, $3) RETURNING id, name, code, email",
        )
        .bind(&provider.name)
        .bind(&provider.code)
        .bind(&provider.email)
        .fetch_one(&self.pool)
        .await?;
        Ok(provider_from_row(&row)?)
    }

    async fn get_provider(&self, id: ProviderId) -> BatchingResult<Option<Provider>> {
        let row = sqlx::query("SELECT id, name, code, email FROM providers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(provider_from_row).transpose()?)
    }

    async fn find_provider_by_code(&self, code: &str) -> BatchingResult<Option<Provider>> {
        let row = sqlx::query("SELECT id, name, code, email FROM providers WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(provider_from_row).transpose()?)
    }

    async fn create_specialty(&self, specialty: NewSpecialty) -> BatchingResult<Specialty> {
        let row = sqlx::query(
            "INSERT INTO specialties (name, code) VALUES ($1, $2) RETURNING id, name, code",
        )
        .bind(&specialty.name)
        .bind(&specialty.code)
        .fetch_one(&self.pool)
        .await?;
        Ok(specialty_from_row(&row)?)
    }

    async fn get_specialty(&self, id: SpecialtyId) -> BatchingResult<Option<Specialty>> {
        let row = sqlx::query("SELECT id, name, code FROM specialties WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(specialty_from_row).transpose()?)
    }

    async fn find_specialty_by_code(&self, code: &str) -> BatchingResult<Option<Specialty>> {
        let row = sqlx::query("SELECT id, name, code FROM specialties WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(specialty_from_row).transpose()?)
    }

    async fn create_insurer(&self, insurer: NewInsurer) -> BatchingResult<Insurer> {
        let mut tx = self.pool.begin().await?;

        let id: InsurerId = sqlx::query_scalar(
            r#"
            INSERT INTO insurers (
                name, code, email, daily_capacity, min_batch_size, max_batch_size,
                prefers_encounter_date
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&insurer.name)
        .bind(&insurer.code)
        .bind(&insurer.email)
        .bind(insurer.daily_capacity())
        .bind(insurer.min_batch_size())
        .bind(insurer.max_batch_size())
        .bind(insurer.prefers_encounter_date())
        .fetch_one(&mut *tx)
        .await?;

        for (specialty_id, factor) in &insurer.specialty_efficiency {
            sqlx::query(
                r#"
                INSERT INTO insurer_specialty_efficiencies (insurer_id, specialty_id, efficiency_factor)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(id)
            .bind(specialty_id)
            .bind(factor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(insurer_id = id, code = %insurer.code, "Insurer created");
        Ok(insurer.into_insurer(id))
    }

    async fn find_insurer_by_code(&self, code: &str) -> BatchingResult<Option<Insurer>> {
        let mut conn = self.pool.acquire().await?;
        load_insurer(&mut conn, "code", InsurerLookup::Code(code)).await
    }

    async fn create_claim(&self, claim: NewClaim) -> BatchingResult<Claim> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO claims (
                provider_id, insurer_id, specialty_id, encounter_date, submission_date,
                priority_level, total_amount
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CLAIM_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(claim.provider_id)
            .bind(claim.insurer_id)
            .bind(claim.specialty_id)
            .bind(claim.encounter_date)
            .bind(claim.submission_date)
            .bind(claim.priority_level)
            .bind(claim.total_amount)
            .fetch_one(&mut *tx)
            .await?;
        let created = claim_from_row(&row)?;

        for item in &claim.items {
            sqlx::query(
                r#"
                INSERT INTO claim_items (claim_id, name, unit_price, quantity, subtotal)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(created.id)
            .bind(&item.name)
            .bind(item.unit_price)
            .bind(item.quantity)
            .bind(item.subtotal)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_claim(&self, id: ClaimId) -> BatchingResult<Option<Claim>> {
        let sql = format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(claim_from_row).transpose()?)
    }

    async fn claim_items(&self, claim_id: ClaimId) -> BatchingResult<Vec<ClaimItem>> {
        let rows = sqlx::query(
            "SELECT id, claim_id, name, unit_price, quantity, subtotal FROM claim_items WHERE claim_id = $1 ORDER BY id",
        )
        .bind(claim_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ClaimItem {
                    id: row.try_get("id")?,
                    claim_id: row.try_get("claim_id")?,
                    name: row.try_get("name")?,
                    unit_price: row.try_get("unit_price")?,
                    quantity: row.try_get("quantity")?,
                    subtotal: row.try_get("subtotal")?,
                })
            })
            .collect()
    }

    async fn unbatched_claims(&self, limit: i64) -> BatchingResult<Vec<Claim>> {
        let sql = format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE batch_id IS NULL AND processed = FALSE ORDER BY id LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(claim_from_row).collect::<Result<_, _>>()?)
    }

    async fn get_batch(&self, id: BatchId) -> BatchingResult<Option<Batch>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(batch_from_row).transpose()?)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> BatchingResult<Vec<Batch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE ($1::BIGINT IS NULL OR insurer_id = $1)
              AND ($2::BIGINT IS NULL OR provider_id = $2)
              AND ($3::BOOLEAN IS NULL OR processed = $3)
              AND ($4::DATE IS NULL OR processing_date = $4)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(filter.insurer_id)
            .bind(filter.provider_id)
            .bind(filter.processed)
            .bind(filter.processing_date)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(batch_from_row).collect::<Result<_, _>>()?)
    }

    async fn claims_in_batch(&self, batch_id: BatchId) -> BatchingResult<Vec<Claim>> {
        let sql = format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE batch_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql).bind(batch_id).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(claim_from_row).collect::<Result<_, _>>()?)
    }

    async fn insurers_with_pending_batches(
        &self,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<InsurerId>> {
        let ids: Vec<InsurerId> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT insurer_id FROM batches
            WHERE processed = FALSE AND processing_date = $1
            ORDER BY insurer_id
            "#,
        )
        .bind(processing_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

/// Unit of work over a PostgreSQL transaction
///
/// Dropping it uncommitted rolls the transaction back.
pub struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresUnitOfWork {
    fn conn(&mut self) -> BatchingResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| BatchingError::Storage("Unit of work already committed".to_string()))
    }
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn lock_key(&mut self, key: &BatchKey) -> BatchingResult<()> {
        let lock_key = format!(
            "claim-batch:{}:{}:{}",
            key.provider_id, key.insurer_id, key.batch_date
        );
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(lock_key)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn lock_identifiers(&mut self, provider_id: ProviderId, batch_date: NaiveDate) -> BatchingResult<()> {
        let lock_key = format!("batch-identifier:{provider_id}:{batch_date}");
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(lock_key)
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn get_claim(&mut self, id: ClaimId) -> BatchingResult<Claim> {
        let sql = format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or_else(|| BatchingError::not_found("Claim", id))?;
        Ok(claim_from_row(&row)?)
    }

    async fn get_insurer(&mut self, id: InsurerId) -> BatchingResult<Insurer> {
        load_insurer(self.conn()?, "id", InsurerLookup::Id(id))
            .await?
            .ok_or_else(|| BatchingError::not_found("Insurer", id))
    }

    async fn get_provider(&mut self, id: ProviderId) -> BatchingResult<Provider> {
        let row = sqlx::query("SELECT id, name, code, email FROM providers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn()?)
            .await?
            .ok_or_else(|| BatchingError::not_found("Provider", id))?;
        Ok(provider_from_row(&row)?)
    }

    async fn find_open_batch(&mut self, key: &BatchKey, max_claims: i64) -> BatchingResult<Option<Batch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE provider_id = $1 AND insurer_id = $2 AND batch_date = $3
              AND processed = FALSE AND total_claims < $4
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE
            "#
        );
        let row = sqlx::query(&sql)
            .bind(key.provider_id)
            .bind(key.insurer_id)
            .bind(key.batch_date)
            .bind(max_claims)
            .fetch_optional(self.conn()?)
            .await?;
        Ok(row.as_ref().map(batch_from_row).transpose()?)
    }

    async fn count_batches_for_provider_date(
        &mut self,
        provider_id: ProviderId,
        batch_date: NaiveDate,
    ) -> BatchingResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM batches WHERE provider_id = $1 AND batch_date = $2",
        )
        .bind(provider_id)
        .bind(batch_date)
        .fetch_one(self.conn()?)
        .await?;
        Ok(count)
    }

    async fn identifier_exists(&mut self, identifier: &str) -> BatchingResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM batches WHERE batch_identifier = $1)",
        )
        .bind(identifier)
        .fetch_one(self.conn()?)
        .await?;
        Ok(exists)
    }

    async fn create_batch(&mut self, batch: NewBatch) -> BatchingResult<Batch> {
        let sql = format!(
            r#"
            INSERT INTO batches (provider_id, insurer_id, batch_date, batch_identifier, processing_date)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {BATCH_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(batch.key.provider_id)
            .bind(batch.key.insurer_id)
            .bind(batch.key.batch_date)
            .bind(&batch.batch_identifier)
            .bind(batch.processing_date)
            .fetch_one(self.conn()?)
            .await?;
        Ok(batch_from_row(&row)?)
    }

    async fn save_batch(&mut self, batch: &Batch) -> BatchingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET total_claims = $2, total_amount = $3, processing_cost = $4,
                processed = $5, processing_date = $6
            WHERE id = $1
            "#,
        )
        .bind(batch.id)
        .bind(batch.total_claims)
        .bind(batch.total_amount)
        .bind(batch.processing_cost)
        .bind(batch.processed)
        .bind(batch.processing_date)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BatchingError::not_found("Batch", batch.id));
        }
        Ok(())
    }

    async fn delete_batch(&mut self, id: BatchId) -> BatchingResult<()> {
        let result = sqlx::query("DELETE FROM batches WHERE id = $1")
            .bind(id)
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BatchingError::not_found("Batch", id));
        }
        Ok(())
    }

    async fn sum_claims_for_batch(&mut self, id: BatchId) -> BatchingResult<BatchTotals> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count, COALESCE(SUM(total_amount), 0) AS total_amount
            FROM claims WHERE batch_id = $1
            "#,
        )
        .bind(id)
        .fetch_one(self.conn()?)
        .await?;

        Ok(BatchTotals {
            count: row.try_get("count")?,
            total_amount: row.try_get::<Decimal, _>("total_amount")?,
        })
    }

    async fn find_claims_by_batch(
        &mut self,
        id: BatchId,
        order: ClaimOrder,
        limit: Option<i64>,
    ) -> BatchingResult<Vec<Claim>> {
        let order_by = match order {
            ClaimOrder::Id => "id",
            ClaimOrder::PriorityAscending => "priority_level, id",
        };
        let sql = format!(
            "SELECT {CLAIM_COLUMNS} FROM claims WHERE batch_id = $1 ORDER BY {order_by} LIMIT $2 FOR UPDATE"
        );
        let rows = sqlx::query(&sql)
            .bind(id)
            .bind(limit)
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows.iter().map(claim_from_row).collect::<Result<_, _>>()?)
    }

    async fn reassign_claim(&mut self, claim_id: ClaimId, batch_id: BatchId) -> BatchingResult<()> {
        let result = sqlx::query("UPDATE claims SET batch_id = $2 WHERE id = $1")
            .bind(claim_id)
            .bind(batch_id)
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BatchingError::not_found("Claim", claim_id));
        }
        Ok(())
    }

    async fn mark_claims_processed(&mut self, batch: &Batch) -> BatchingResult<u64> {
        self.save_batch(batch).await?;
        let result = sqlx::query("UPDATE claims SET processed = TRUE WHERE batch_id = $1")
            .bind(batch.id)
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn scheduled_claim_volume(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<i64> {
        let volume: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(total_claims), 0)::BIGINT FROM batches
            WHERE insurer_id = $1 AND processed = FALSE AND processing_date = $2
            "#,
        )
        .bind(insurer_id)
        .bind(processing_date)
        .fetch_one(self.conn()?)
        .await?;
        Ok(volume)
    }

    async fn processed_claim_volume(
        &mut self,
        processing_date: NaiveDate,
    ) -> BatchingResult<HashMap<InsurerId, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT insurer_id, COALESCE(SUM(total_claims), 0)::BIGINT AS volume FROM batches
            WHERE processed = TRUE AND processing_date = $1
            GROUP BY insurer_id
            "#,
        )
        .bind(processing_date)
        .fetch_all(self.conn()?)
        .await?;

        let mut volume = HashMap::with_capacity(rows.len());
        for row in &rows {
            volume.insert(row.try_get("insurer_id")?, row.try_get("volume")?);
        }
        Ok(volume)
    }

    async fn find_ready_batches(
        &mut self,
        as_of: NaiveDate,
        after: Option<BatchCursor>,
        limit: i64,
    ) -> BatchingResult<Vec<Batch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE processed = FALSE AND processing_date <= $1
              AND ($2::DATE IS NULL OR (processing_date, created_at, id) > ($2, $3::TIMESTAMPTZ, $4::BIGINT))
            ORDER BY processing_date, created_at, id
            LIMIT $5
            FOR UPDATE
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(as_of)
            .bind(after.map(|c| c.processing_date))
            .bind(after.map(|c| c.created_at))
            .bind(after.map(|c| c.id))
            .bind(limit)
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows.iter().map(batch_from_row).collect::<Result<_, _>>()?)
    }

    async fn find_pending_batches(
        &mut self,
        insurer_id: InsurerId,
        processing_date: NaiveDate,
    ) -> BatchingResult<Vec<Batch>> {
        let sql = format!(
            r#"
            SELECT {BATCH_COLUMNS} FROM batches
            WHERE insurer_id = $1 AND processed = FALSE AND processing_date = $2
            ORDER BY created_at, id
            FOR UPDATE
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(insurer_id)
            .bind(processing_date)
            .fetch_all(self.conn()?)
            .await?;
        Ok(rows.iter().map(batch_from_row).collect::<Result<_, _>>()?)
    }

    async fn commit(&mut self) -> BatchingResult<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(BatchingError::Storage("Unit of work already committed".to_string())),
        }
    }
}
