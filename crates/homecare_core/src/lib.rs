pub mod delivery;
pub mod domain;
pub mod error;
pub mod inspection;
pub mod jobs;
pub mod mining;
pub mod pin;
pub mod ports;
pub mod recipes;

#[cfg(test)]
mod test_support;

pub use delivery::{DeliveryService, PinVerification};
pub use domain::{
    AnalysisSummary, AttemptOutcome, DeliveryOrder, DeliveryStatus, IssueType, JobKind, JobResult,
    JobRun, JobState, JobStatus, PinState, ProductAssociation, ProductInfo, PurchaseEvent,
    RecipeDraft, RecipeGenerationSummary, RecipeIngredient, RecipeStatus, ReportedIssue,
    ResolutionStatus, SynthesizedRecipe, VerificationAttempt,
};
pub use error::{ServiceError, ServiceResult};
pub use inspection::{InspectionService, InspectionState, IssueReport};
pub use jobs::{AnalyticsConfig, AnalyticsPorts, AnalyticsService};
pub use pin::{Escalation, Pin, VerificationOutcome};
pub use ports::{
    AssociationStore, IssueStore, JobStatusStore, OrderStore, PhotoStorage, PortError, PortResult,
    ProductCatalog, PurchaseHistoryStore, RecipeDraftStore, RecipeSynthesisService,
    VerificationAuditLog,
};
