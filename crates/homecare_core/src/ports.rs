//! crates/homecare_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    DeliveryOrder, JobKind, JobResult, JobStatus, ProductAssociation, ProductInfo,
    PurchaseEvent, RecipeDraft, RecipeIngredient, ReportedIssue, SynthesizedRecipe,
    VerificationAttempt,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Delivery Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a newly dispatched order. Fails with `AlreadyExists` on a duplicate id.
    async fn insert_order(&self, order: &DeliveryOrder) -> PortResult<()>;

    async fn get_order(&self, order_id: &str) -> PortResult<Option<DeliveryOrder>>;

    /// Overwrites the stored order only if its version still equals
    /// `expected_version`, bumping the version on success.
    ///
    /// Returns `false` when another writer got there first.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        order: &DeliveryOrder,
    ) -> PortResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueStore: Send + Sync {
    /// Appends `issue` to its order in one atomic step, provided the order is
    /// delivered, its inspection is still open and it was delivered after
    /// `delivered_after`.
    ///
    /// Returns `false` when the order no longer accepts issues.
    async fn append_issue(
        &self,
        issue: &ReportedIssue,
        delivered_after: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn list_issues(&self, order_id: &str) -> PortResult<Vec<ReportedIssue>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PhotoStorage: Send + Sync {
    /// Stores an evidence photo and returns a durable, opaque reference to it.
    async fn store_photo(
        &self,
        order_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> PortResult<String>;

    /// Removes a photo that ended up attached to nothing.
    async fn delete_photo(&self, photo_ref: &str) -> PortResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationAuditLog: Send + Sync {
    async fn record_attempt(&self, attempt: &VerificationAttempt) -> PortResult<()>;

    async fn attempts_for_order(&self, order_id: &str) -> PortResult<Vec<VerificationAttempt>>;
}

//=========================================================================================
// Analytics Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PurchaseHistoryStore: Send + Sync {
    /// Loads every purchase event across all users.
    async fn load_events(&self) -> PortResult<Vec<PurchaseEvent>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Looks up metadata for the given products. Unknown ids are omitted.
    async fn get_products(&self, product_ids: &[String]) -> PortResult<Vec<ProductInfo>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Replaces every stored association with `associations`.
    async fn replace_all(&self, associations: &[ProductAssociation]) -> PortResult<()>;

    async fn count(&self) -> PortResult<u64>;

    async fn load_all(&self) -> PortResult<Vec<ProductAssociation>>;

    /// The strongest associations by lift, then confidence.
    async fn top_by_lift(&self, limit: u32) -> PortResult<Vec<ProductAssociation>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipeDraftStore: Send + Sync {
    async fn create_drafts(&self, drafts: &[RecipeDraft]) -> PortResult<()>;

    /// Most recent drafts first.
    async fn list_drafts(&self, limit: u32) -> PortResult<Vec<RecipeDraft>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// Returns the stored status, or an idle status if the job never ran.
    async fn get_status(&self, kind: JobKind) -> PortResult<JobStatus>;

    /// Atomically hands the slot to `run_id` unless another run is holding it
    /// and has reported progress at or after `stale_before`.
    ///
    /// Returns `false` when another run holds the slot.
    async fn try_start(
        &self,
        kind: JobKind,
        run_id: Uuid,
        operator_id: &str,
        started_at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> PortResult<bool>;

    /// Records progress and refreshes the heartbeat of `run_id`.
    ///
    /// This and the two outcome writes below return `false`, without writing,
    /// once `run_id` no longer holds the slot.
    async fn update_progress(
        &self,
        kind: JobKind,
        run_id: Uuid,
        progress: &str,
        at: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn complete(
        &self,
        kind: JobKind,
        run_id: Uuid,
        result: &JobResult,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn fail(
        &self,
        kind: JobKind,
        run_id: Uuid,
        error: &str,
        finished_at: DateTime<Utc>,
    ) -> PortResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipeSynthesisService: Send + Sync {
    /// Proposes a recipe built from `ingredients`, or `None` when no sensible
    /// recipe exists for the combination.
    async fn synthesize_recipe(
        &self,
        ingredients: &[RecipeIngredient],
    ) -> PortResult<Option<SynthesizedRecipe>>;
}
