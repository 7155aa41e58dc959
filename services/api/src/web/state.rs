//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use homecare_core::{AnalyticsService, DeliveryService, InspectionService};
use mockable::Clock;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub clock: Arc<dyn Clock>,
    pub delivery: DeliveryService,
    pub inspection: InspectionService,
    pub analytics: AnalyticsService,
}
