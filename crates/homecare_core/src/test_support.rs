//! Shared test doubles for the core services.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use uuid::Uuid;

use crate::domain::{
    DeliveryOrder, DeliveryStatus, JobKind, JobResult, JobState, JobStatus, ProductAssociation,
    ProductInfo, PurchaseEvent, RecipeDraft, RecipeIngredient, ReportedIssue, SynthesizedRecipe,
    VerificationAttempt,
};
use crate::ports::{
    AssociationStore, IssueStore, JobStatusStore, OrderStore, PhotoStorage, PortError,
    PortResult, ProductCatalog, PurchaseHistoryStore, RecipeDraftStore, RecipeSynthesisService,
    VerificationAuditLog,
};

pub fn fixture_timestamp() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(_) => panic!("test store mutex poisoned"),
    }
}

pub struct MutableClock(Mutex<DateTime<Utc>>);

impl MutableClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, delta: TimeDelta) {
        *lock(&self.0) += delta;
    }
}

impl Clock for MutableClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}

#[derive(Default)]
struct Tables {
    orders: BTreeMap<String, DeliveryOrder>,
    issues: Vec<ReportedIssue>,
    photos: BTreeMap<String, (String, String, Vec<u8>)>,
    photos_stored: usize,
    attempts: Vec<VerificationAttempt>,
    events: Vec<PurchaseEvent>,
    products: BTreeMap<String, ProductInfo>,
    associations: Vec<ProductAssociation>,
    drafts: Vec<RecipeDraft>,
    jobs: BTreeMap<JobKind, JobStatus>,
}

/// A single in-memory store implementing every persistence port.
///
/// One mutex guards all tables, so each port call is atomic the same way a
/// database statement would be.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(self, events: Vec<PurchaseEvent>) -> Self {
        lock(&self.tables).events = events;
        self
    }

    pub fn with_products(self, products: Vec<ProductInfo>) -> Self {
        lock(&self.tables).products = products
            .into_iter()
            .map(|p| (p.product_id.clone(), p))
            .collect();
        self
    }

    pub fn with_associations(self, associations: Vec<ProductAssociation>) -> Self {
        lock(&self.tables).associations = associations;
        self
    }

    pub fn put_order(&self, order: DeliveryOrder) {
        lock(&self.tables).orders.insert(order.id.clone(), order);
    }

    pub fn order(&self, order_id: &str) -> Option<DeliveryOrder> {
        lock(&self.tables).orders.get(order_id).cloned()
    }

    pub fn issues(&self) -> Vec<ReportedIssue> {
        lock(&self.tables).issues.clone()
    }

    pub fn photo_count(&self) -> usize {
        lock(&self.tables).photos.len()
    }

    pub fn attempts(&self) -> Vec<VerificationAttempt> {
        lock(&self.tables).attempts.clone()
    }

    pub fn associations(&self) -> Vec<ProductAssociation> {
        lock(&self.tables).associations.clone()
    }

    pub fn drafts(&self) -> Vec<RecipeDraft> {
        lock(&self.tables).drafts.clone()
    }

    pub fn put_job(&self, status: JobStatus) {
        lock(&self.tables).jobs.insert(status.kind, status);
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &DeliveryOrder) -> PortResult<()> {
        let mut tables = lock(&self.tables);
        if tables.orders.contains_key(&order.id) {
            return Err(PortError::AlreadyExists(order.id.clone()));
        }
        tables.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> PortResult<Option<DeliveryOrder>> {
        Ok(lock(&self.tables).orders.get(order_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        order: &DeliveryOrder,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        match tables.orders.get_mut(&order.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = order.clone();
                stored.version = expected_version + 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PortError::NotFound(order.id.clone())),
        }
    }
}

#[async_trait]
impl IssueStore for InMemoryStore {
    async fn append_issue(
        &self,
        issue: &ReportedIssue,
        delivered_after: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        let open = tables.orders.get(&issue.order_id).is_some_and(|order| {
            order.status == DeliveryStatus::Delivered
                && !order.inspection_completed
                && order.delivered_at.is_some_and(|at| at > delivered_after)
        });
        if open {
            tables.issues.push(issue.clone());
        }
        Ok(open)
    }

    async fn list_issues(&self, order_id: &str) -> PortResult<Vec<ReportedIssue>> {
        Ok(lock(&self.tables)
            .issues
            .iter()
            .filter(|issue| issue.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PhotoStorage for InMemoryStore {
    async fn store_photo(
        &self,
        order_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> PortResult<String> {
        let mut tables = lock(&self.tables);
        tables.photos_stored += 1;
        let photo_ref = format!("photo:{}", tables.photos_stored);
        tables.photos.insert(
            photo_ref.clone(),
            (order_id.to_string(), content_type.to_string(), bytes.to_vec()),
        );
        Ok(photo_ref)
    }

    async fn delete_photo(&self, photo_ref: &str) -> PortResult<()> {
        lock(&self.tables).photos.remove(photo_ref);
        Ok(())
    }
}

#[async_trait]
impl VerificationAuditLog for InMemoryStore {
    async fn record_attempt(&self, attempt: &VerificationAttempt) -> PortResult<()> {
        lock(&self.tables).attempts.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_order(&self, order_id: &str) -> PortResult<Vec<VerificationAttempt>> {
        Ok(lock(&self.tables)
            .attempts
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PurchaseHistoryStore for InMemoryStore {
    async fn load_events(&self) -> PortResult<Vec<PurchaseEvent>> {
        Ok(lock(&self.tables).events.clone())
    }
}

#[async_trait]
impl ProductCatalog for InMemoryStore {
    async fn get_products(&self, product_ids: &[String]) -> PortResult<Vec<ProductInfo>> {
        let tables = lock(&self.tables);
        Ok(product_ids
            .iter()
            .filter_map(|id| tables.products.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl AssociationStore for InMemoryStore {
    async fn replace_all(&self, associations: &[ProductAssociation]) -> PortResult<()> {
        lock(&self.tables).associations = associations.to_vec();
        Ok(())
    }

    async fn count(&self) -> PortResult<u64> {
        Ok(lock(&self.tables).associations.len() as u64)
    }

    async fn load_all(&self) -> PortResult<Vec<ProductAssociation>> {
        Ok(lock(&self.tables).associations.clone())
    }

    async fn top_by_lift(&self, limit: u32) -> PortResult<Vec<ProductAssociation>> {
        let mut all = lock(&self.tables).associations.clone();
        all.sort_by(|a, b| {
            b.lift
                .total_cmp(&a.lift)
                .then(b.confidence.total_cmp(&a.confidence))
        });
        all.truncate(limit as usize);
        Ok(all)
    }
}

#[async_trait]
impl RecipeDraftStore for InMemoryStore {
    async fn create_drafts(&self, drafts: &[RecipeDraft]) -> PortResult<()> {
        lock(&self.tables).drafts.extend_from_slice(drafts);
        Ok(())
    }

    async fn list_drafts(&self, limit: u32) -> PortResult<Vec<RecipeDraft>> {
        let tables = lock(&self.tables);
        Ok(tables.drafts.iter().rev().take(limit as usize).cloned().collect())
    }
}

#[async_trait]
impl JobStatusStore for InMemoryStore {
    async fn get_status(&self, kind: JobKind) -> PortResult<JobStatus> {
        Ok(lock(&self.tables)
            .jobs
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| JobStatus::idle(kind)))
    }

    async fn try_start(
        &self,
        kind: JobKind,
        run_id: Uuid,
        operator_id: &str,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        let status = tables
            .jobs
            .entry(kind)
            .or_insert_with(|| JobStatus::idle(kind));
        let last_seen = status.heartbeat_at.or(status.started_at);
        let held = status.is_running() && last_seen.is_some_and(|at| at >= stale_before);
        if held {
            return Ok(false);
        }
        status.state = JobState::Running;
        status.run_id = Some(run_id);
        status.progress = Some("Starting".to_string());
        status.started_at = Some(started_at);
        status.heartbeat_at = Some(started_at);
        status.finished_at = None;
        status.operator_id = Some(operator_id.to_string());
        status.last_error = None;
        Ok(true)
    }

    async fn update_progress(
        &self,
        kind: JobKind,
        run_id: Uuid,
        progress: &str,
        at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        let Some(status) = held_slot(&mut tables, kind, run_id) else {
            return Ok(false);
        };
        status.progress = Some(progress.to_string());
        status.heartbeat_at = Some(at);
        Ok(true)
    }

    async fn complete(
        &self,
        kind: JobKind,
        run_id: Uuid,
        result: &JobResult,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        let Some(status) = held_slot(&mut tables, kind, run_id) else {
            return Ok(false);
        };
        status.state = JobState::Completed;
        status.progress = None;
        status.finished_at = Some(finished_at);
        status.last_result = Some(result.clone());
        Ok(true)
    }

    async fn fail(
        &self,
        kind: JobKind,
        run_id: Uuid,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let mut tables = lock(&self.tables);
        let Some(status) = held_slot(&mut tables, kind, run_id) else {
            return Ok(false);
        };
        status.state = JobState::Failed;
        status.progress = None;
        status.finished_at = Some(finished_at);
        status.last_error = Some(error.to_string());
        Ok(true)
    }
}

/// The slot of `kind`, provided `run_id` is the run currently holding it.
fn held_slot(tables: &mut Tables, kind: JobKind, run_id: Uuid) -> Option<&mut JobStatus> {
    tables
        .jobs
        .get_mut(&kind)
        .filter(|status| status.is_running() && status.run_id == Some(run_id))
}

/// Names a recipe after its ingredients; declines any combination containing
/// a product id listed in `declined`.
#[derive(Default)]
pub struct FixtureSynthesizer {
    pub declined: HashSet<String>,
}

#[async_trait]
impl RecipeSynthesisService for FixtureSynthesizer {
    async fn synthesize_recipe(
        &self,
        ingredients: &[RecipeIngredient],
    ) -> PortResult<Option<SynthesizedRecipe>> {
        if ingredients
            .iter()
            .any(|i| self.declined.contains(&i.product_id))
        {
            return Ok(None);
        }
        let names: Vec<&str> = ingredients.iter().map(|i| i.name.as_str()).collect();
        Ok(Some(SynthesizedRecipe {
            name: format!("{} bake", names.join(" & ")),
            description: format!("A simple dish using {}.", names.join(", ")),
        }))
    }
}
