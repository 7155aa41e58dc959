//! crates/homecare_core/src/inspection.rs
//!
//! Post-delivery inspection: the 24-hour window in which a recipient either
//! confirms the delivery or files evidenced issues against line items.
//!
//! The deadline is never stored. It is derived from `delivered_at` on every
//! check, so the window closes by itself as time passes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use mockable::Clock;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::delivery::{load_order, update_order};
use crate::domain::{
    inspection_window, DeliveryOrder, DeliveryStatus, IssueType, ReportedIssue, ResolutionStatus,
};
use crate::error::{ServiceError, ServiceResult};
use crate::ports::{IssueStore, OrderStore, PhotoStorage};

/// When the inspection window of a delivery closes.
pub fn inspection_deadline(delivered_at: DateTime<Utc>) -> DateTime<Utc> {
    delivered_at + inspection_window()
}

/// True iff less than 24 hours have elapsed since `delivered_at`.
pub fn is_within_inspection_deadline(delivered_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - delivered_at < inspection_window()
}

/// The derived inspection state of an order at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectionState {
    NotDelivered,
    AwaitingInspection { deadline: DateTime<Utc> },
    Complete { completed_at: DateTime<Utc> },
    /// The window lapsed without a confirmation. Silent and terminal.
    Expired { deadline: DateTime<Utc> },
}

impl InspectionState {
    pub fn of(order: &DeliveryOrder, now: DateTime<Utc>) -> Self {
        let delivered_at = match (order.status, order.delivered_at) {
            (DeliveryStatus::Delivered, Some(at)) => at,
            _ => return InspectionState::NotDelivered,
        };
        if order.inspection_completed {
            return InspectionState::Complete {
                completed_at: order.inspection_completed_at.unwrap_or(delivered_at),
            };
        }
        let deadline = inspection_deadline(delivered_at);
        if is_within_inspection_deadline(delivered_at, now) {
            InspectionState::AwaitingInspection { deadline }
        } else {
            InspectionState::Expired { deadline }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionState::NotDelivered => "not_delivered",
            InspectionState::AwaitingInspection { .. } => "awaiting_inspection",
            InspectionState::Complete { .. } => "inspection_complete",
            InspectionState::Expired { .. } => "inspection_expired",
        }
    }
}

impl DeliveryOrder {
    /// Returns the delivery timestamp if the order still accepts inspection input.
    pub fn ensure_inspection_open(&self, now: DateTime<Utc>) -> ServiceResult<DateTime<Utc>> {
        match InspectionState::of(self, now) {
            InspectionState::AwaitingInspection { .. } => {
                self.delivered_at.ok_or_else(|| {
                    ServiceError::invalid_state(format!("order {} is not delivered", self.id))
                })
            }
            InspectionState::NotDelivered => Err(ServiceError::invalid_state(format!(
                "order {} has not been delivered yet",
                self.id
            ))),
            InspectionState::Complete { .. } => Err(ServiceError::invalid_state(format!(
                "inspection of order {} is already complete",
                self.id
            ))),
            InspectionState::Expired { deadline } => Err(ServiceError::invalid_state(format!(
                "the inspection deadline for order {} passed at {}",
                self.id,
                deadline.to_rfc3339()
            ))),
        }
    }

    pub fn apply_inspection_complete(&self, now: DateTime<Utc>) -> ServiceResult<DeliveryOrder> {
        self.ensure_inspection_open(now)?;
        let mut next = self.clone();
        next.inspection_completed = true;
        next.inspection_completed_at = Some(now);
        Ok(next)
    }
}

/// Smallest payload accepted as photo evidence. Anything shorter cannot hold
/// a real image, only its header.
pub const MIN_PHOTO_BYTES: usize = 256;

/// A decoded evidence photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoEvidence {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl PhotoEvidence {
    /// Decodes a base64 image, optionally wrapped in a `data:` URL.
    ///
    /// The payload must decode to at least `MIN_PHOTO_BYTES` of JPEG, PNG,
    /// WebP, GIF or HEIC image data. This
    /// applies to every issue type, `missing` included: there the expected
    /// photo shows the delivery location or packaging where the item should be.
    pub fn decode(raw: &str) -> ServiceResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ServiceError::validation(
                "photo evidence is required for every issue",
            ));
        }
        let payload = match raw.strip_prefix("data:") {
            Some(rest) => match rest.split_once(";base64,") {
                Some((_, data)) => data,
                None => {
                    return Err(ServiceError::validation(
                        "photo evidence data URL must be base64 encoded",
                    ))
                }
            },
            None => raw,
        };
        let bytes = STANDARD
            .decode(payload)
            .map_err(|_| ServiceError::validation("photo evidence is not valid base64"))?;
        if bytes.len() < MIN_PHOTO_BYTES {
            return Err(ServiceError::validation(format!(
                "photo evidence is too small to be an image ({} bytes, at least {} required)",
                bytes.len(),
                MIN_PHOTO_BYTES
            )));
        }
        let content_type = sniff_image_type(&bytes).ok_or_else(|| {
            ServiceError::validation("photo evidence must be a JPEG, PNG, WebP, GIF or HEIC image")
        })?;
        Ok(Self {
            content_type,
            bytes,
        })
    }
}

fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.len() >= 12
        && &bytes[4..8] == b"ftyp"
        && matches!(&bytes[8..12], b"heic" | b"heix" | b"mif1")
    {
        Some("image/heic")
    } else {
        None
    }
}

/// A recipient's report about one delivered item.
#[derive(Debug, Clone)]
pub struct IssueReport {
    pub item_id: String,
    pub issue_type: IssueType,
    pub description: String,
    /// Base64 image, optionally as a `data:` URL.
    pub photo_evidence: String,
}

#[derive(Clone)]
pub struct InspectionService {
    orders: Arc<dyn OrderStore>,
    issues: Arc<dyn IssueStore>,
    photos: Arc<dyn PhotoStorage>,
    clock: Arc<dyn Clock>,
}

impl InspectionService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        issues: Arc<dyn IssueStore>,
        photos: Arc<dyn PhotoStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            issues,
            photos,
            clock,
        }
    }

    pub async fn list_issues(&self, order_id: &str) -> ServiceResult<Vec<ReportedIssue>> {
        load_order(self.orders.as_ref(), order_id).await?;
        Ok(self.issues.list_issues(order_id).await?)
    }

    /// Files an evidenced issue. Does not complete the inspection.
    pub async fn report_issue(
        &self,
        order_id: &str,
        report: IssueReport,
    ) -> ServiceResult<ReportedIssue> {
        let description = report.description.trim();
        if description.is_empty() {
            return Err(ServiceError::validation("a description of the issue is required"));
        }
        let photo = PhotoEvidence::decode(&report.photo_evidence)?;

        let now = self.clock.utc();
        let order = load_order(self.orders.as_ref(), order_id).await?;
        if !order.has_item(&report.item_id) {
            return Err(ServiceError::validation(format!(
                "item {} is not part of order {}",
                report.item_id, order_id
            )));
        }
        order.ensure_inspection_open(now)?;

        let photo_ref = self
            .photos
            .store_photo(order_id, photo.content_type, &photo.bytes)
            .await?;

        let issue = ReportedIssue {
            id: Uuid::new_v4(),
            order_id: order.id.clone(),
            item_id: report.item_id,
            issue_type: report.issue_type,
            description: description.to_string(),
            photo_ref,
            resolution_status: ResolutionStatus::Pending,
            resolution_notes: None,
            reported_at: now,
        };

        // Re-checked inside the store: the window may have closed, or the
        // inspection been confirmed, since the read above.
        let appended = self
            .issues
            .append_issue(&issue, now - inspection_window())
            .await;
        if !matches!(appended, Ok(true)) {
            if let Err(e) = self.photos.delete_photo(&issue.photo_ref).await {
                warn!(
                    order_id,
                    photo_ref = %issue.photo_ref,
                    error = %e,
                    "Failed to discard unused photo."
                );
            }
            appended?;
            return Err(ServiceError::invalid_state(format!(
                "order {order_id} no longer accepts issues"
            )));
        }

        info!(
            order_id,
            item_id = %issue.item_id,
            issue_type = %issue.issue_type,
            "Delivery issue reported."
        );
        Ok(issue)
    }

    /// Closes the inspection, whether or not issues were filed.
    pub async fn confirm_all_correct(&self, order_id: &str) -> ServiceResult<DeliveryOrder> {
        let now = self.clock.utc();
        let (order, ()) = update_order(self.orders.as_ref(), order_id, |order| {
            Ok((order.apply_inspection_complete(now)?, ()))
        })
        .await?;
        info!(order_id, "Delivery inspection completed.");
        Ok(order)
    }
}

#[cfg(test)]
#[path = "inspection_tests.rs"]
mod tests;
