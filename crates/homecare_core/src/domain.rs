//! crates/homecare_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pin::Pin;

/// Number of failed PIN entries an order tolerates before it locks.
pub const DEFAULT_RETRY_LIMIT: u8 = 3;

/// Length of the post-delivery inspection window.
pub fn inspection_window() -> Duration {
    Duration::hours(24)
}

/// Maximum inactivity gap between two purchases of the same shopping session.
pub fn session_gap() -> Duration {
    Duration::hours(24)
}

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// variants are persisted and exchanged as snake_case strings.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($kind:literal) {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

//=========================================================================================
// Delivery Orders
//=========================================================================================

string_enum! {
    /// Where an order is in its fulfilment lifecycle.
    pub enum DeliveryStatus ("delivery status") {
        Pending => "pending",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
}

impl DeliveryStatus {
    /// Delivered and cancelled orders no longer accept PIN operations.
    pub fn is_closed(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }
}

string_enum! {
    /// Progress of the PIN handshake for one order.
    pub enum PinState ("PIN state") {
        /// A PIN is outstanding and no attempt has failed yet.
        Issued => "issued",
        /// At least one attempt failed but attempts remain.
        Verifying => "verifying",
        Verified => "verified",
        /// Attempts are exhausted; only a voice confirmation or a reset helps.
        Locked => "locked",
    }
}

/// A dispatched order together with its delivery handshake state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOrder {
    pub id: String,
    pub pin: Pin,
    pub status: DeliveryStatus,
    pub pin_state: PinState,
    pub remaining_attempts: u8,
    pub verified_by: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub inspection_completed: bool,
    pub inspection_completed_at: Option<DateTime<Utc>>,
    /// Line-item ids that were part of this delivery.
    pub items: Vec<String>,
    /// Bumped by every conditional write; used for compare-and-swap.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl DeliveryOrder {
    /// Builds a freshly dispatched order holding `pin`.
    pub fn dispatched(
        id: String,
        pin: Pin,
        items: Vec<String>,
        retry_limit: u8,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            pin,
            status: DeliveryStatus::OutForDelivery,
            pin_state: PinState::Issued,
            remaining_attempts: retry_limit,
            verified_by: None,
            delivered_at: None,
            inspection_completed: false,
            inspection_completed_at: None,
            items,
            version: 0,
            created_at: now,
        }
    }

    pub fn has_item(&self, item_id: &str) -> bool {
        self.items.iter().any(|item| item == item_id)
    }
}

string_enum! {
    /// Result of a single PIN entry, as recorded in the audit trail.
    pub enum AttemptOutcome ("attempt outcome") {
        Verified => "verified",
        Rejected => "rejected",
        LockedOut => "locked_out",
    }
}

/// One audited PIN entry: who tried, when, and what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationAttempt {
    pub order_id: String,
    pub agent_id: String,
    pub attempted_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub remaining_attempts: u8,
}

//=========================================================================================
// Inspection & Issues
//=========================================================================================

string_enum! {
    /// The kind of problem a recipient reports for one delivered item.
    pub enum IssueType ("issue type") {
        Missing => "missing",
        Damaged => "damaged",
        WrongItem => "wrong_item",
        Expired => "expired",
        QualityIssue => "quality_issue",
    }
}

string_enum! {
    /// Review outcome of a reported issue. Written by an external reviewer.
    pub enum ResolutionStatus ("resolution status") {
        Pending => "pending",
        Approved => "approved",
        Denied => "denied",
    }
}

/// An evidenced dispute about one delivered item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedIssue {
    pub id: Uuid,
    pub order_id: String,
    pub item_id: String,
    pub issue_type: IssueType,
    pub description: String,
    /// Opaque reference returned by photo storage.
    pub photo_ref: String,
    pub resolution_status: ResolutionStatus,
    pub resolution_notes: Option<String>,
    pub reported_at: DateTime<Utc>,
}

//=========================================================================================
// Purchase History & Analytics
//=========================================================================================

/// A single historical purchase. Read-only input to association mining.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEvent {
    pub user_id: String,
    pub product_id: String,
    pub occurred_at: DateTime<Utc>,
}

/// Directed co-occurrence statistics for `antecedent -> consequent`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAssociation {
    pub antecedent: String,
    pub consequent: String,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
}

/// Catalog metadata for a product, used to name recipe ingredients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductInfo {
    pub product_id: String,
    pub name: Option<String>,
    pub category: Option<String>,
}

string_enum! {
    pub enum RecipeStatus ("recipe status") {
        Draft => "draft",
        Published => "published",
        Archived => "archived",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeIngredient {
    pub product_id: String,
    pub name: String,
}

/// Name and description proposed by the recipe synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedRecipe {
    pub name: String,
    pub description: String,
}

/// A machine-generated recipe awaiting human review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeDraft {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub ingredients: Vec<RecipeIngredient>,
    pub status: RecipeStatus,
    pub generated_by_ai: bool,
    /// The association pair that seeded this draft.
    pub source_antecedent: String,
    pub source_consequent: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// Background Jobs
//=========================================================================================

string_enum! {
    pub enum JobKind ("job kind") {
        Analysis => "analysis",
        RecipeGeneration => "recipe_generation",
    }
}

string_enum! {
    pub enum JobState ("job state") {
        Idle => "idle",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

/// Metadata recorded when an association analysis run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub completed_at: DateTime<Utc>,
    pub operator_id: String,
    pub session_count: u64,
    pub total_associations: u64,
}

/// Counts recorded when a recipe generation run completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeGenerationSummary {
    pub completed_at: DateTime<Utc>,
    pub operator_id: String,
    pub candidates: u32,
    pub generated: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Analysis(AnalysisSummary),
    RecipeGeneration(RecipeGenerationSummary),
}

/// The single-slot, polled status record of one job kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub kind: JobKind,
    pub state: JobState,
    pub progress: Option<String>,
    /// Identifies the run currently holding the slot.
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    /// Last time the holding run reported progress. Staleness is judged on it.
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub operator_id: Option<String>,
    pub last_result: Option<JobResult>,
    pub last_error: Option<String>,
}

impl JobStatus {
    /// The status of a job kind that has never run.
    pub fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            state: JobState::Idle,
            progress: None,
            run_id: None,
            started_at: None,
            heartbeat_at: None,
            finished_at: None,
            operator_id: None,
            last_result: None,
            last_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == JobState::Running
    }
}

/// A claimed job slot.
///
/// Progress and outcome writes carry `run_id`, so once another run takes the
/// slot over, this run can no longer touch it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub run_id: Uuid,
    pub operator_id: String,
    pub status: JobStatus,
}

impl JobRun {
    pub fn kind(&self) -> JobKind {
        self.status.kind
    }
}
