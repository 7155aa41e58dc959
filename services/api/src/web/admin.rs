//! services/api/src/web/admin.rs
//!
//! Operator endpoints for the analytics jobs. Triggers answer 202 straight
//! away and the run continues on a background task; callers poll the status
//! endpoint for progress.

use crate::error::{http_error, HttpError};
use crate::web::job_task;
use crate::web::middleware::CallerId;
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use homecare_core::domain::{
    JobKind, JobResult, JobStatus, ProductAssociation, RecipeDraft, RecipeIngredient,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 500;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusView {
    pub kind: String,
    /// `idle`, `running`, `completed` or `failed`.
    pub state: String,
    pub progress: Option<String>,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    /// Last progress report of the running job.
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub operator_id: Option<String>,
    /// Summary of the last successful run.
    #[schema(value_type = Option<Object>)]
    pub last_result: Option<serde_json::Value>,
    pub last_error: Option<String>,
}

impl From<JobStatus> for JobStatusView {
    fn from(status: JobStatus) -> Self {
        let last_result = status.last_result.map(|result| match result {
            JobResult::Analysis(s) => serde_json::json!({
                "completed_at": s.completed_at,
                "operator_id": s.operator_id,
                "session_count": s.session_count,
                "total_associations": s.total_associations,
            }),
            JobResult::RecipeGeneration(s) => serde_json::json!({
                "completed_at": s.completed_at,
                "operator_id": s.operator_id,
                "candidates": s.candidates,
                "generated": s.generated,
                "skipped": s.skipped,
            }),
        });
        Self {
            kind: status.kind.to_string(),
            state: status.state.to_string(),
            progress: status.progress,
            run_id: status.run_id,
            started_at: status.started_at,
            heartbeat_at: status.heartbeat_at,
            finished_at: status.finished_at,
            operator_id: status.operator_id,
            last_result,
            last_error: status.last_error,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AssociationView {
    pub antecedent: String,
    pub consequent: String,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
}

impl From<ProductAssociation> for AssociationView {
    fn from(a: ProductAssociation) -> Self {
        Self {
            antecedent: a.antecedent,
            consequent: a.consequent,
            support: a.support,
            confidence: a.confidence,
            lift: a.lift,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct IngredientView {
    pub product_id: String,
    pub name: String,
}

impl From<RecipeIngredient> for IngredientView {
    fn from(i: RecipeIngredient) -> Self {
        Self {
            product_id: i.product_id,
            name: i.name,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RecipeDraftView {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub ingredients: Vec<IngredientView>,
    pub status: String,
    pub generated_by_ai: bool,
    pub source_antecedent: String,
    pub source_consequent: String,
    pub created_at: DateTime<Utc>,
}

impl From<RecipeDraft> for RecipeDraftView {
    fn from(d: RecipeDraft) -> Self {
        Self {
            id: d.id,
            name: d.name,
            description: d.description,
            ingredients: d.ingredients.into_iter().map(IngredientView::from).collect(),
            status: d.status.to_string(),
            generated_by_ai: d.generated_by_ai,
            source_antecedent: d.source_antecedent,
            source_consequent: d.source_consequent,
            created_at: d.created_at,
        }
    }
}

#[derive(Deserialize, IntoParams)]
pub struct ListParams {
    /// Defaults to 50, capped at 500.
    pub limit: Option<u32>,
}

impl ListParams {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

//=========================================================================================
// Admin Handlers
//=========================================================================================

/// Start an association analysis run.
#[utoipa::path(
    post,
    path = "/admin/analytics/analyze",
    tag = "Analytics",
    responses(
        (status = 202, description = "Run started", body = JobStatusView),
        (status = 409, description = "An analysis run is already in progress")
    ),
    params(("x-user-id" = String, Header, description = "The triggering operator."))
)]
pub async fn trigger_analysis_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
) -> Result<impl IntoResponse, HttpError> {
    let run = app_state
        .analytics
        .start_analysis(&caller.0)
        .await
        .map_err(http_error)?;
    let view = JobStatusView::from(run.status.clone());
    job_task::spawn_analysis(app_state.analytics.clone(), run);
    Ok((StatusCode::ACCEPTED, Json(view)))
}

/// Start drafting recipes from the stored associations.
#[utoipa::path(
    post,
    path = "/admin/analytics/recipes",
    tag = "Analytics",
    responses(
        (status = 202, description = "Run started", body = JobStatusView),
        (status = 409, description = "No associations yet, or a run is already in progress")
    ),
    params(("x-user-id" = String, Header, description = "The triggering operator."))
)]
pub async fn trigger_recipe_generation_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
) -> Result<impl IntoResponse, HttpError> {
    let run = app_state
        .analytics
        .start_recipe_generation(&caller.0)
        .await
        .map_err(http_error)?;
    let view = JobStatusView::from(run.status.clone());
    job_task::spawn_recipe_generation(app_state.analytics.clone(), run);
    Ok((StatusCode::ACCEPTED, Json(view)))
}

/// Poll the status of a job kind.
#[utoipa::path(
    get,
    path = "/admin/analytics/status/{kind}",
    tag = "Analytics",
    responses(
        (status = 200, description = "Current status", body = JobStatusView),
        (status = 400, description = "Unknown job kind")
    ),
    params(
        ("kind" = String, Path, description = "`analysis` or `recipe_generation`."),
        ("x-user-id" = String, Header, description = "The operator.")
    )
)]
pub async fn job_status_handler(
    State(app_state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<JobStatusView>, HttpError> {
    let kind = kind
        .parse::<JobKind>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let status = app_state.analytics.status(kind).await.map_err(http_error)?;
    Ok(Json(JobStatusView::from(status)))
}

/// The strongest mined associations by lift.
#[utoipa::path(
    get,
    path = "/admin/analytics/associations",
    tag = "Analytics",
    responses((status = 200, description = "Associations", body = [AssociationView])),
    params(
        ListParams,
        ("x-user-id" = String, Header, description = "The operator.")
    )
)]
pub async fn list_associations_handler(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<AssociationView>>, HttpError> {
    let associations = app_state
        .analytics
        .top_associations(params.limit())
        .await
        .map_err(http_error)?;
    Ok(Json(associations.into_iter().map(AssociationView::from).collect()))
}

/// The most recent recipe drafts.
#[utoipa::path(
    get,
    path = "/admin/analytics/recipes",
    tag = "Analytics",
    responses((status = 200, description = "Recipe drafts", body = [RecipeDraftView])),
    params(
        ListParams,
        ("x-user-id" = String, Header, description = "The operator.")
    )
)]
pub async fn list_recipe_drafts_handler(
    State(app_state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<RecipeDraftView>>, HttpError> {
    let drafts = app_state
        .analytics
        .recipe_drafts(params.limit())
        .await
        .map_err(http_error)?;
    Ok(Json(drafts.into_iter().map(RecipeDraftView::from).collect()))
}
