//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the delivery REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{http_error, HttpError};
use crate::web::admin::{self, AssociationView, IngredientView, JobStatusView, RecipeDraftView};
use crate::web::middleware::CallerId;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use homecare_core::domain::{DeliveryOrder, IssueType, ReportedIssue, VerificationAttempt};
use homecare_core::inspection::{inspection_deadline, InspectionState, IssueReport};
use homecare_core::pin::{Escalation, VerificationOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        dispatch_order_handler,
        get_order_handler,
        cancel_order_handler,
        verify_pin_handler,
        reset_pin_handler,
        verification_history_handler,
        list_issues_handler,
        report_issue_handler,
        confirm_inspection_handler,
        admin::trigger_analysis_handler,
        admin::trigger_recipe_generation_handler,
        admin::job_status_handler,
        admin::list_associations_handler,
        admin::list_recipe_drafts_handler,
    ),
    components(
        schemas(
            DispatchOrderRequest, DispatchOrderResponse, OrderView, VerifyPinRequest,
            VerifyPinResponse, ResetPinRequest, ResetPinResponse, AttemptView,
            ReportIssueRequest, IssueView, JobStatusView, AssociationView, RecipeDraftView,
            IngredientView
        )
    ),
    tags(
        (name = "Deliveries", description = "PIN-verified handover and post-delivery inspection."),
        (name = "Analytics", description = "Operator-triggered association mining and recipe drafting.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct DispatchOrderRequest {
    pub order_id: String,
    /// Line-item ids; issues can only be filed against these.
    pub items: Vec<String>,
}

/// The current state of an order, including its derived inspection state.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderView {
    pub id: String,
    pub status: String,
    pub pin_state: String,
    pub remaining_attempts: u8,
    pub verified_by: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// One of `not_delivered`, `awaiting_inspection`, `inspection_complete`
    /// or `inspection_expired`.
    pub inspection_state: String,
    pub inspection_deadline: Option<DateTime<Utc>>,
    /// Whole seconds left to inspect, while the window is open.
    pub inspection_seconds_remaining: Option<i64>,
    pub inspection_completed_at: Option<DateTime<Utc>>,
    pub items: Vec<String>,
}

impl OrderView {
    pub fn new(order: &DeliveryOrder, now: DateTime<Utc>) -> Self {
        let state = InspectionState::of(order, now);
        let seconds_remaining = match state {
            InspectionState::AwaitingInspection { deadline } => {
                Some((deadline - now).num_seconds())
            }
            _ => None,
        };
        Self {
            id: order.id.clone(),
            status: order.status.to_string(),
            pin_state: order.pin_state.to_string(),
            remaining_attempts: order.remaining_attempts,
            verified_by: order.verified_by.clone(),
            delivered_at: order.delivered_at,
            inspection_state: state.as_str().to_string(),
            inspection_deadline: order.delivered_at.map(inspection_deadline),
            inspection_seconds_remaining: seconds_remaining,
            inspection_completed_at: order.inspection_completed_at,
            items: order.items.clone(),
        }
    }
}

/// Returned on dispatch only; the PIN is relayed to the recipient.
#[derive(Serialize, ToSchema)]
pub struct DispatchOrderResponse {
    pub order: OrderView,
    pub pin: String,
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyPinRequest {
    pub pin: String,
}

#[derive(Serialize, ToSchema)]
pub struct VerifyPinResponse {
    /// `verified`, `rejected` or `locked_out`.
    pub outcome: String,
    pub remaining_attempts: u8,
    /// Set on lockout: what the agent must do next.
    pub escalation: Option<String>,
    pub message: String,
    pub order: OrderView,
}

#[derive(Deserialize, ToSchema)]
pub struct ResetPinRequest {
    pub reason: String,
}

#[derive(Serialize, ToSchema)]
pub struct ResetPinResponse {
    pub pin: String,
    pub order: OrderView,
}

#[derive(Serialize, ToSchema)]
pub struct AttemptView {
    pub agent_id: String,
    pub attempted_at: DateTime<Utc>,
    pub outcome: String,
    pub remaining_attempts: u8,
}

impl From<VerificationAttempt> for AttemptView {
    fn from(attempt: VerificationAttempt) -> Self {
        Self {
            agent_id: attempt.agent_id,
            attempted_at: attempt.attempted_at,
            outcome: attempt.outcome.to_string(),
            remaining_attempts: attempt.remaining_attempts,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ReportIssueRequest {
    pub item_id: String,
    /// `missing`, `damaged`, `wrong_item`, `expired` or `quality_issue`.
    pub issue_type: String,
    pub description: String,
    /// Base64 image or `data:` URL. Required for every issue type; for
    /// `missing` it shows the delivery location or packaging.
    pub photo_evidence: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IssueView {
    pub id: Uuid,
    pub item_id: String,
    pub issue_type: String,
    pub description: String,
    pub photo_ref: String,
    pub resolution_status: String,
    pub resolution_notes: Option<String>,
    pub reported_at: DateTime<Utc>,
}

impl From<ReportedIssue> for IssueView {
    fn from(issue: ReportedIssue) -> Self {
        Self {
            id: issue.id,
            item_id: issue.item_id,
            issue_type: issue.issue_type.to_string(),
            description: issue.description,
            photo_ref: issue.photo_ref,
            resolution_status: issue.resolution_status.to_string(),
            resolution_notes: issue.resolution_notes,
            reported_at: issue.reported_at,
        }
    }
}

fn outcome_message(outcome: &VerificationOutcome) -> String {
    match outcome {
        VerificationOutcome::Verified => "PIN verified. Delivery confirmed.".to_string(),
        VerificationOutcome::Rejected { remaining_attempts } => {
            format!("Incorrect PIN. {} attempt(s) remaining.", remaining_attempts)
        }
        VerificationOutcome::LockedOut {
            escalation: Escalation::CallCustomer,
        } => "Too many incorrect attempts. Call the customer to confirm the delivery.".to_string(),
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Dispatch an order and issue its delivery PIN.
#[utoipa::path(
    post,
    path = "/orders",
    tag = "Deliveries",
    request_body = DispatchOrderRequest,
    responses(
        (status = 201, description = "Order dispatched", body = DispatchOrderResponse),
        (status = 400, description = "Invalid order id or items"),
        (status = 409, description = "Order already exists")
    ),
    params(("x-user-id" = String, Header, description = "The calling operator."))
)]
pub async fn dispatch_order_handler(
    State(app_state): State<Arc<AppState>>,
    Json(body): Json<DispatchOrderRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let order = app_state
        .delivery
        .dispatch_order(&body.order_id, body.items)
        .await
        .map_err(http_error)?;
    let response = DispatchOrderResponse {
        pin: order.pin.as_str().to_string(),
        order: OrderView::new(&order, app_state.clock.utc()),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Read an order with its derived inspection state.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    tag = "Deliveries",
    responses(
        (status = 200, description = "The order", body = OrderView),
        (status = 404, description = "Unknown order")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The caller.")
    )
)]
pub async fn get_order_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, HttpError> {
    let order = app_state
        .delivery
        .get_order(&order_id)
        .await
        .map_err(http_error)?;
    Ok(Json(OrderView::new(&order, app_state.clock.utc())))
}

/// Cancel an order that has not been delivered.
#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    tag = "Deliveries",
    responses(
        (status = 200, description = "Order cancelled", body = OrderView),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order already delivered or cancelled")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The calling operator.")
    )
)]
pub async fn cancel_order_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, HttpError> {
    let order = app_state
        .delivery
        .cancel_order(&order_id, &caller.0)
        .await
        .map_err(http_error)?;
    Ok(Json(OrderView::new(&order, app_state.clock.utc())))
}

/// Enter the recipient's PIN at handover.
///
/// A wrong PIN is not an error: the response reports the remaining attempts,
/// or the lockout and its escalation once they run out.
#[utoipa::path(
    post,
    path = "/orders/{id}/pin/verify",
    tag = "Deliveries",
    request_body = VerifyPinRequest,
    responses(
        (status = 200, description = "Attempt evaluated", body = VerifyPinResponse),
        (status = 400, description = "PIN is not exactly 4 digits"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order already verified, locked, cancelled or contended")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The delivery agent.")
    )
)]
pub async fn verify_pin_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(order_id): Path<String>,
    Json(body): Json<VerifyPinRequest>,
) -> Result<Json<VerifyPinResponse>, HttpError> {
    let verification = app_state
        .delivery
        .verify_pin(&order_id, &body.pin, &caller.0)
        .await
        .map_err(http_error)?;

    let escalation = match verification.outcome {
        VerificationOutcome::LockedOut {
            escalation: Escalation::CallCustomer,
        } => Some("call_customer".to_string()),
        _ => None,
    };
    Ok(Json(VerifyPinResponse {
        outcome: verification.attempt.outcome.to_string(),
        remaining_attempts: verification.order.remaining_attempts,
        escalation,
        message: outcome_message(&verification.outcome),
        order: OrderView::new(&verification.order, app_state.clock.utc()),
    }))
}

/// Issue a new PIN. The old PIN stops working immediately.
#[utoipa::path(
    post,
    path = "/orders/{id}/pin/reset",
    tag = "Deliveries",
    request_body = ResetPinRequest,
    responses(
        (status = 200, description = "New PIN issued", body = ResetPinResponse),
        (status = 400, description = "Missing reason"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order already delivered or cancelled")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The requesting operator.")
    )
)]
pub async fn reset_pin_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerId>,
    Path(order_id): Path<String>,
    Json(body): Json<ResetPinRequest>,
) -> Result<Json<ResetPinResponse>, HttpError> {
    let order = app_state
        .delivery
        .reset_pin(&order_id, &body.reason, &caller.0)
        .await
        .map_err(http_error)?;
    Ok(Json(ResetPinResponse {
        pin: order.pin.as_str().to_string(),
        order: OrderView::new(&order, app_state.clock.utc()),
    }))
}

/// The audited PIN entries for an order, oldest first.
#[utoipa::path(
    get,
    path = "/orders/{id}/pin/attempts",
    tag = "Deliveries",
    responses(
        (status = 200, description = "Verification attempts", body = [AttemptView]),
        (status = 404, description = "Unknown order")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The caller.")
    )
)]
pub async fn verification_history_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<AttemptView>>, HttpError> {
    let attempts = app_state
        .delivery
        .verification_history(&order_id)
        .await
        .map_err(http_error)?;
    Ok(Json(attempts.into_iter().map(AttemptView::from).collect()))
}

/// List the issues filed against an order.
#[utoipa::path(
    get,
    path = "/orders/{id}/issues",
    tag = "Deliveries",
    responses(
        (status = 200, description = "Reported issues", body = [IssueView]),
        (status = 404, description = "Unknown order")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The caller.")
    )
)]
pub async fn list_issues_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<IssueView>>, HttpError> {
    let issues = app_state
        .inspection
        .list_issues(&order_id)
        .await
        .map_err(http_error)?;
    Ok(Json(issues.into_iter().map(IssueView::from).collect()))
}

/// Report a problem with a delivered item, with photographic evidence.
#[utoipa::path(
    post,
    path = "/orders/{id}/issues",
    tag = "Deliveries",
    request_body = ReportIssueRequest,
    responses(
        (status = 201, description = "Issue recorded", body = IssueView),
        (status = 400, description = "Missing description or photo, unknown item or issue type"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Not delivered, already inspected or past the 24h deadline")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The recipient.")
    )
)]
pub async fn report_issue_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(body): Json<ReportIssueRequest>,
) -> Result<impl IntoResponse, HttpError> {
    let issue_type = body
        .issue_type
        .parse::<IssueType>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let report = IssueReport {
        item_id: body.item_id,
        issue_type,
        description: body.description,
        photo_evidence: body.photo_evidence,
    };
    let issue = app_state
        .inspection
        .report_issue(&order_id, report)
        .await
        .map_err(http_error)?;
    Ok((StatusCode::CREATED, Json(IssueView::from(issue))))
}

/// Confirm that everything arrived correctly, closing the inspection.
#[utoipa::path(
    post,
    path = "/orders/{id}/inspection/confirm",
    tag = "Deliveries",
    responses(
        (status = 200, description = "Inspection completed", body = OrderView),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Not delivered, already inspected or past the 24h deadline")
    ),
    params(
        ("id" = String, Path, description = "Order id."),
        ("x-user-id" = String, Header, description = "The recipient.")
    )
)]
pub async fn confirm_inspection_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderView>, HttpError> {
    let order = app_state
        .inspection
        .confirm_all_correct(&order_id)
        .await
        .map_err(http_error)?;
    Ok(Json(OrderView::new(&order, app_state.clock.utc())))
}
