pub mod admin;
pub mod job_task;
pub mod middleware;
pub mod rest;
pub mod state;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_identity;
use state::AppState;

/// Builds the API routes. Every route requires a caller identity.
pub fn router(app_state: Arc<AppState>) -> Router {
    let orders = Router::new()
        .route("/orders", post(rest::dispatch_order_handler))
        .route("/orders/{id}", get(rest::get_order_handler))
        .route("/orders/{id}/cancel", post(rest::cancel_order_handler))
        .route("/orders/{id}/pin/verify", post(rest::verify_pin_handler))
        .route("/orders/{id}/pin/reset", post(rest::reset_pin_handler))
        .route(
            "/orders/{id}/pin/attempts",
            get(rest::verification_history_handler),
        )
        .route(
            "/orders/{id}/issues",
            get(rest::list_issues_handler).post(rest::report_issue_handler),
        )
        .route(
            "/orders/{id}/inspection/confirm",
            post(rest::confirm_inspection_handler),
        );

    let analytics = Router::new()
        .route(
            "/admin/analytics/analyze",
            post(admin::trigger_analysis_handler),
        )
        .route(
            "/admin/analytics/recipes",
            post(admin::trigger_recipe_generation_handler).get(admin::list_recipe_drafts_handler),
        )
        .route(
            "/admin/analytics/status/{kind}",
            get(admin::job_status_handler),
        )
        .route(
            "/admin/analytics/associations",
            get(admin::list_associations_handler),
        );

    Router::new()
        .merge(orders)
        .merge(analytics)
        .layer(axum_middleware::from_fn(require_identity))
        .with_state(app_state)
}
