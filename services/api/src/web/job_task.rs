//! services/api/src/web/job_task.rs
//!
//! Background workers for the analytics jobs. Each run has already claimed its
//! status slot before it is spawned; the worker only drives it to completion.

use homecare_core::{AnalyticsService, JobRun, ServiceError};
use tracing::{error, info, warn};

/// Runs a claimed analysis on a detached task.
pub fn spawn_analysis(service: AnalyticsService, run: JobRun) {
    tokio::spawn(async move {
        info!(operator_id = %run.operator_id, run_id = %run.run_id, "Analysis task started.");
        match service.run_analysis(&run).await {
            Ok(summary) => info!(
                sessions = summary.session_count,
                associations = summary.total_associations,
                "Analysis task finished."
            ),
            Err(ServiceError::Superseded(_)) => warn!("Analysis task stopped: slot taken over."),
            // Already recorded on the job status by the service.
            Err(e) => error!("Analysis task failed: {}", e),
        }
    });
}

/// Runs a claimed recipe generation on a detached task.
pub fn spawn_recipe_generation(service: AnalyticsService, run: JobRun) {
    tokio::spawn(async move {
        info!(
            operator_id = %run.operator_id,
            run_id = %run.run_id,
            "Recipe generation task started."
        );
        match service.run_recipe_generation(&run).await {
            Ok(summary) => info!(
                candidates = summary.candidates,
                generated = summary.generated,
                skipped = summary.skipped,
                "Recipe generation task finished."
            ),
            Err(ServiceError::Superseded(_)) => {
                warn!("Recipe generation task stopped: slot taken over.")
            }
            Err(e) => error!("Recipe generation task failed: {}", e),
        }
    });
}
