//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of every persistence port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Conditional writes (order compare-and-swap, issue append, job start) are
//! single statements so the database enforces them atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homecare_core::domain::{
    AnalysisSummary, DeliveryOrder, JobKind, JobResult, JobState, JobStatus, ProductAssociation,
    ProductInfo, PurchaseEvent, RecipeDraft, RecipeGenerationSummary, RecipeIngredient,
    ReportedIssue, VerificationAttempt,
};
use homecare_core::pin::Pin;
use homecare_core::ports::{
    AssociationStore, IssueStore, JobStatusStore, OrderStore, PhotoStorage, PortError,
    PortResult, ProductCatalog, PurchaseHistoryStore, RecipeDraftStore, VerificationAuditLog,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Parses a stored enum name, treating unknown names as corrupt data.
fn parse_column<T>(raw: &str) -> PortResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| PortError::Unexpected(format!("Corrupt row: {}", e)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct OrderRecord {
    id: String,
    pin: String,
    status: String,
    pin_state: String,
    remaining_attempts: i16,
    verified_by: Option<String>,
    delivered_at: Option<DateTime<Utc>>,
    inspection_completed: bool,
    inspection_completed_at: Option<DateTime<Utc>>,
    version: i64,
    created_at: DateTime<Utc>,
}
impl OrderRecord {
    fn to_domain(self, items: Vec<String>) -> PortResult<DeliveryOrder> {
        Ok(DeliveryOrder {
            pin: Pin::parse(&self.pin).map_err(|e| {
                PortError::Unexpected(format!("Corrupt PIN on order {}: {}", self.id, e))
            })?,
            status: parse_column(&self.status)?,
            pin_state: parse_column(&self.pin_state)?,
            remaining_attempts: u8::try_from(self.remaining_attempts)
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            verified_by: self.verified_by,
            delivered_at: self.delivered_at,
            inspection_completed: self.inspection_completed,
            inspection_completed_at: self.inspection_completed_at,
            items,
            version: self.version,
            created_at: self.created_at,
            id: self.id,
        })
    }
}

#[derive(FromRow)]
struct IssueRecord {
    id: Uuid,
    order_id: String,
    item_id: String,
    issue_type: String,
    description: String,
    photo_ref: String,
    resolution_status: String,
    resolution_notes: Option<String>,
    reported_at: DateTime<Utc>,
}
impl IssueRecord {
    fn to_domain(self) -> PortResult<ReportedIssue> {
        Ok(ReportedIssue {
            id: self.id,
            order_id: self.order_id,
            item_id: self.item_id,
            issue_type: parse_column(&self.issue_type)?,
            description: self.description,
            photo_ref: self.photo_ref,
            resolution_status: parse_column(&self.resolution_status)?,
            resolution_notes: self.resolution_notes,
            reported_at: self.reported_at,
        })
    }
}

#[derive(FromRow)]
struct AttemptRecord {
    order_id: String,
    agent_id: String,
    attempted_at: DateTime<Utc>,
    outcome: String,
    remaining_attempts: i16,
}
impl AttemptRecord {
    fn to_domain(self) -> PortResult<VerificationAttempt> {
        Ok(VerificationAttempt {
            order_id: self.order_id,
            agent_id: self.agent_id,
            attempted_at: self.attempted_at,
            outcome: parse_column(&self.outcome)?,
            remaining_attempts: u8::try_from(self.remaining_attempts)
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        })
    }
}

#[derive(FromRow)]
struct PurchaseEventRecord {
    user_id: String,
    product_id: String,
    occurred_at: DateTime<Utc>,
}
impl PurchaseEventRecord {
    fn to_domain(self) -> PurchaseEvent {
        PurchaseEvent {
            user_id: self.user_id,
            product_id: self.product_id,
            occurred_at: self.occurred_at,
        }
    }
}

#[derive(FromRow)]
struct ProductRecord {
    product_id: String,
    name: Option<String>,
    category: Option<String>,
}
impl ProductRecord {
    fn to_domain(self) -> ProductInfo {
        ProductInfo {
            product_id: self.product_id,
            name: self.name,
            category: self.category,
        }
    }
}

#[derive(FromRow)]
struct AssociationRecord {
    antecedent: String,
    consequent: String,
    support: f64,
    confidence: f64,
    lift: f64,
}
impl AssociationRecord {
    fn to_domain(self) -> ProductAssociation {
        ProductAssociation {
            antecedent: self.antecedent,
            consequent: self.consequent,
            support: self.support,
            confidence: self.confidence,
            lift: self.lift,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct IngredientJson {
    product_id: String,
    name: String,
}

#[derive(FromRow)]
struct RecipeDraftRecord {
    id: Uuid,
    name: String,
    description: String,
    ingredients: Json<Vec<IngredientJson>>,
    status: String,
    generated_by_ai: bool,
    source_antecedent: String,
    source_consequent: String,
    created_at: DateTime<Utc>,
}
impl RecipeDraftRecord {
    fn to_domain(self) -> PortResult<RecipeDraft> {
        Ok(RecipeDraft {
            id: self.id,
            name: self.name,
            description: self.description,
            ingredients: self
                .ingredients
                .0
                .into_iter()
                .map(|i| RecipeIngredient {
                    product_id: i.product_id,
                    name: i.name,
                })
                .collect(),
            status: parse_column(&self.status)?,
            generated_by_ai: self.generated_by_ai,
            source_antecedent: self.source_antecedent,
            source_consequent: self.source_consequent,
            created_at: self.created_at,
        })
    }
}

/// The stored shape of a job's last result.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JobResultJson {
    Analysis {
        completed_at: DateTime<Utc>,
        operator_id: String,
        session_count: u64,
        total_associations: u64,
    },
    RecipeGeneration {
        completed_at: DateTime<Utc>,
        operator_id: String,
        candidates: u32,
        generated: u32,
        skipped: u32,
    },
}

impl From<&JobResult> for JobResultJson {
    fn from(result: &JobResult) -> Self {
        match result.clone() {
            JobResult::Analysis(s) => JobResultJson::Analysis {
                completed_at: s.completed_at,
                operator_id: s.operator_id,
                session_count: s.session_count,
                total_associations: s.total_associations,
            },
            JobResult::RecipeGeneration(s) => JobResultJson::RecipeGeneration {
                completed_at: s.completed_at,
                operator_id: s.operator_id,
                candidates: s.candidates,
                generated: s.generated,
                skipped: s.skipped,
            },
        }
    }
}

impl From<JobResultJson> for JobResult {
    fn from(json: JobResultJson) -> Self {
        match json {
            JobResultJson::Analysis {
                completed_at,
                operator_id,
                session_count,
                total_associations,
            } => JobResult::Analysis(AnalysisSummary {
                completed_at,
                operator_id,
                session_count,
                total_associations,
            }),
            JobResultJson::RecipeGeneration {
                completed_at,
                operator_id,
                candidates,
                generated,
                skipped,
            } => JobResult::RecipeGeneration(RecipeGenerationSummary {
                completed_at,
                operator_id,
                candidates,
                generated,
                skipped,
            }),
        }
    }
}

#[derive(FromRow)]
struct JobStatusRecord {
    kind: String,
    state: String,
    progress: Option<String>,
    run_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    heartbeat_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    operator_id: Option<String>,
    last_result: Option<Json<JobResultJson>>,
    last_error: Option<String>,
}
impl JobStatusRecord {
    fn to_domain(self) -> PortResult<JobStatus> {
        Ok(JobStatus {
            kind: parse_column(&self.kind)?,
            state: parse_column(&self.state)?,
            progress: self.progress,
            run_id: self.run_id,
            started_at: self.started_at,
            heartbeat_at: self.heartbeat_at,
            finished_at: self.finished_at,
            operator_id: self.operator_id,
            last_result: self.last_result.map(|json| json.0.into()),
            last_error: self.last_error,
        })
    }
}

//=========================================================================================
// Delivery Port Implementations
//=========================================================================================

const ORDER_COLUMNS: &str = "id, pin, status, pin_state, remaining_attempts, verified_by, \
     delivered_at, inspection_completed, inspection_completed_at, version, created_at";

#[async_trait]
impl OrderStore for DbAdapter {
    async fn insert_order(&self, order: &DeliveryOrder) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO delivery_orders (id, pin, status, pin_state, remaining_attempts, verified_by, \
             delivered_at, inspection_completed, inspection_completed_at, version, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&order.id)
        .bind(order.pin.as_str())
        .bind(order.status.as_str())
        .bind(order.pin_state.as_str())
        .bind(i16::from(order.remaining_attempts))
        .bind(&order.verified_by)
        .bind(order.delivered_at)
        .bind(order.inspection_completed)
        .bind(order.inspection_completed_at)
        .bind(order.version)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                PortError::AlreadyExists(format!("Order {} already exists", order.id))
            }
            other => unexpected(other),
        })?;

        let positions: Vec<i32> = (0..order.items.len() as i32).collect();
        sqlx::query(
            "INSERT INTO order_items (order_id, item_id, position) \
             SELECT $1, item_id, position FROM UNNEST($2::text[], $3::int4[]) AS t(item_id, position)",
        )
        .bind(&order.id)
        .bind(&order.items)
        .bind(&positions)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)
    }

    async fn get_order(&self, order_id: &str) -> PortResult<Option<DeliveryOrder>> {
        let record = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {ORDER_COLUMNS} FROM delivery_orders WHERE id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let Some(record) = record else {
            return Ok(None);
        };
        let items: Vec<String> = sqlx::query_scalar(
            "SELECT item_id FROM order_items WHERE order_id = $1 ORDER BY position ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        record.to_domain(items).map(Some)
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        order: &DeliveryOrder,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE delivery_orders SET pin = $3, status = $4, pin_state = $5, \
             remaining_attempts = $6, verified_by = $7, delivered_at = $8, \
             inspection_completed = $9, inspection_completed_at = $10, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(&order.id)
        .bind(expected_version)
        .bind(order.pin.as_str())
        .bind(order.status.as_str())
        .bind(order.pin_state.as_str())
        .bind(i16::from(order.remaining_attempts))
        .bind(&order.verified_by)
        .bind(order.delivered_at)
        .bind(order.inspection_completed)
        .bind(order.inspection_completed_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IssueStore for DbAdapter {
    async fn append_issue(
        &self,
        issue: &ReportedIssue,
        delivered_after: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO reported_issues (id, order_id, item_id, issue_type, description, photo_ref, \
             resolution_status, resolution_notes, reported_at) \
             SELECT $1, o.id, $3, $4, $5, $6, $7, $8, $9 FROM delivery_orders o \
             WHERE o.id = $2 AND o.status = 'delivered' AND NOT o.inspection_completed \
             AND o.delivered_at > $10",
        )
        .bind(issue.id)
        .bind(&issue.order_id)
        .bind(&issue.item_id)
        .bind(issue.issue_type.as_str())
        .bind(&issue.description)
        .bind(&issue.photo_ref)
        .bind(issue.resolution_status.as_str())
        .bind(&issue.resolution_notes)
        .bind(issue.reported_at)
        .bind(delivered_after)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_issues(&self, order_id: &str) -> PortResult<Vec<ReportedIssue>> {
        let records = sqlx::query_as::<_, IssueRecord>(
            "SELECT id, order_id, item_id, issue_type, description, photo_ref, resolution_status, \
             resolution_notes, reported_at FROM reported_issues WHERE order_id = $1 \
             ORDER BY reported_at ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(IssueRecord::to_domain).collect()
    }
}

const PHOTO_REF_PREFIX: &str = "issue-photo:";

#[async_trait]
impl PhotoStorage for DbAdapter {
    async fn store_photo(
        &self,
        order_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> PortResult<String> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO issue_photos (id, order_id, content_type, data) VALUES ($1, $2, $3, $4)",
        )
        .bind(id)
        .bind(order_id)
        .bind(content_type)
        .bind(bytes)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(format!("{PHOTO_REF_PREFIX}{id}"))
    }

    async fn delete_photo(&self, photo_ref: &str) -> PortResult<()> {
        let id = photo_ref
            .strip_prefix(PHOTO_REF_PREFIX)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| PortError::NotFound(format!("photo {photo_ref}")))?;
        sqlx::query("DELETE FROM issue_photos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}

#[async_trait]
impl VerificationAuditLog for DbAdapter {
    async fn record_attempt(&self, attempt: &VerificationAttempt) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO pin_verification_attempts (order_id, agent_id, attempted_at, outcome, \
             remaining_attempts) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&attempt.order_id)
        .bind(&attempt.agent_id)
        .bind(attempt.attempted_at)
        .bind(attempt.outcome.as_str())
        .bind(i16::from(attempt.remaining_attempts))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn attempts_for_order(&self, order_id: &str) -> PortResult<Vec<VerificationAttempt>> {
        let records = sqlx::query_as::<_, AttemptRecord>(
            "SELECT order_id, agent_id, attempted_at, outcome, remaining_attempts \
             FROM pin_verification_attempts WHERE order_id = $1 ORDER BY attempted_at ASC, id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(AttemptRecord::to_domain).collect()
    }
}

//=========================================================================================
// Analytics Port Implementations
//=========================================================================================

#[async_trait]
impl PurchaseHistoryStore for DbAdapter {
    async fn load_events(&self) -> PortResult<Vec<PurchaseEvent>> {
        let records = sqlx::query_as::<_, PurchaseEventRecord>(
            "SELECT user_id, product_id, occurred_at FROM purchase_events \
             ORDER BY user_id ASC, occurred_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

#[async_trait]
impl ProductCatalog for DbAdapter {
    async fn get_products(&self, product_ids: &[String]) -> PortResult<Vec<ProductInfo>> {
        let records = sqlx::query_as::<_, ProductRecord>(
            "SELECT product_id, name, category FROM products WHERE product_id = ANY($1)",
        )
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

#[async_trait]
impl AssociationStore for DbAdapter {
    async fn replace_all(&self, associations: &[ProductAssociation]) -> PortResult<()> {
        let antecedents: Vec<&str> = associations.iter().map(|a| a.antecedent.as_str()).collect();
        let consequents: Vec<&str> = associations.iter().map(|a| a.consequent.as_str()).collect();
        let supports: Vec<f64> = associations.iter().map(|a| a.support).collect();
        let confidences: Vec<f64> = associations.iter().map(|a| a.confidence).collect();
        let lifts: Vec<f64> = associations.iter().map(|a| a.lift).collect();

        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query("DELETE FROM product_associations")
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO product_associations (antecedent, consequent, support, confidence, lift) \
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::float8[], $4::float8[], $5::float8[])",
        )
        .bind(&antecedents)
        .bind(&consequents)
        .bind(&supports)
        .bind(&confidences)
        .bind(&lifts)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)
    }

    async fn count(&self) -> PortResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM product_associations")
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(count.max(0) as u64)
    }

    async fn load_all(&self) -> PortResult<Vec<ProductAssociation>> {
        let records = sqlx::query_as::<_, AssociationRecord>(
            "SELECT antecedent, consequent, support, confidence, lift FROM product_associations \
             ORDER BY antecedent ASC, consequent ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn top_by_lift(&self, limit: u32) -> PortResult<Vec<ProductAssociation>> {
        let records = sqlx::query_as::<_, AssociationRecord>(
            "SELECT antecedent, consequent, support, confidence, lift FROM product_associations \
             ORDER BY lift DESC, confidence DESC, antecedent ASC, consequent ASC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

#[async_trait]
impl RecipeDraftStore for DbAdapter {
    async fn create_drafts(&self, drafts: &[RecipeDraft]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for draft in drafts {
            let ingredients: Vec<IngredientJson> = draft
                .ingredients
                .iter()
                .map(|i| IngredientJson {
                    product_id: i.product_id.clone(),
                    name: i.name.clone(),
                })
                .collect();
            sqlx::query(
                "INSERT INTO recipe_drafts (id, name, description, ingredients, status, \
                 generated_by_ai, source_antecedent, source_consequent, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(draft.id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(Json(ingredients))
            .bind(draft.status.as_str())
            .bind(draft.generated_by_ai)
            .bind(&draft.source_antecedent)
            .bind(&draft.source_consequent)
            .bind(draft.created_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)
    }

    async fn list_drafts(&self, limit: u32) -> PortResult<Vec<RecipeDraft>> {
        let records = sqlx::query_as::<_, RecipeDraftRecord>(
            "SELECT id, name, description, ingredients, status, generated_by_ai, \
             source_antecedent, source_consequent, created_at FROM recipe_drafts \
             ORDER BY created_at DESC, id ASC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(RecipeDraftRecord::to_domain).collect()
    }
}

#[async_trait]
impl JobStatusStore for DbAdapter {
    async fn get_status(&self, kind: JobKind) -> PortResult<JobStatus> {
        let record = sqlx::query_as::<_, JobStatusRecord>(
            "SELECT kind, state, progress, run_id, started_at, heartbeat_at, finished_at, \
             operator_id, last_result, last_error FROM job_status WHERE kind = $1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(record) => record.to_domain(),
            None => Ok(JobStatus::idle(kind)),
        }
    }

    async fn try_start(
        &self,
        kind: JobKind,
        run_id: Uuid,
        operator_id: &str,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> PortResult<bool> {
        // An upsert whose update half only fires when the slot is free or
        // its holder has gone quiet; otherwise no row is touched.
        let result = sqlx::query(
            "INSERT INTO job_status (kind, state, progress, run_id, started_at, heartbeat_at, \
             operator_id) VALUES ($1, $2, 'Starting', $3, $4, $4, $5) \
             ON CONFLICT (kind) DO UPDATE SET state = EXCLUDED.state, \
             progress = EXCLUDED.progress, run_id = EXCLUDED.run_id, \
             started_at = EXCLUDED.started_at, heartbeat_at = EXCLUDED.heartbeat_at, \
             finished_at = NULL, operator_id = EXCLUDED.operator_id, last_error = NULL \
             WHERE job_status.state <> $2 \
             OR COALESCE(job_status.heartbeat_at, job_status.started_at) < $6",
        )
        .bind(kind.as_str())
        .bind(JobState::Running.as_str())
        .bind(run_id)
        .bind(started_at)
        .bind(operator_id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(
        &self,
        kind: JobKind,
        run_id: Uuid,
        progress: &str,
        at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE job_status SET progress = $3, heartbeat_at = $4 \
             WHERE kind = $1 AND run_id = $2 AND state = $5",
        )
        .bind(kind.as_str())
        .bind(run_id)
        .bind(progress)
        .bind(at)
        .bind(JobState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        kind: JobKind,
        run_id: Uuid,
        result: &JobResult,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let updated = sqlx::query(
            "UPDATE job_status SET state = $3, progress = NULL, finished_at = $4, \
             last_result = $5 WHERE kind = $1 AND run_id = $2 AND state = $6",
        )
        .bind(kind.as_str())
        .bind(run_id)
        .bind(JobState::Completed.as_str())
        .bind(finished_at)
        .bind(Json(JobResultJson::from(result)))
        .bind(JobState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(updated.rows_affected() == 1)
    }

    async fn fail(
        &self,
        kind: JobKind,
        run_id: Uuid,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let updated = sqlx::query(
            "UPDATE job_status SET state = $3, progress = NULL, finished_at = $4, \
             last_error = $5 WHERE kind = $1 AND run_id = $2 AND state = $6",
        )
        .bind(kind.as_str())
        .bind(run_id)
        .bind(JobState::Failed.as_str())
        .bind(finished_at)
        .bind(error)
        .bind(JobState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(updated.rows_affected() == 1)
    }
}
