//! Tests for the inspection window and issue reporting.

use std::collections::HashSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::TimeDelta;
use rstest::{fixture, rstest};

use super::*;
use crate::domain::PinState;
use crate::pin::Pin;
use crate::ports::MockIssueStore;
use crate::test_support::{fixture_timestamp, InMemoryStore, MutableClock};

fn image_bytes(header: &[u8]) -> Vec<u8> {
    let mut bytes = header.to_vec();
    bytes.resize(MIN_PHOTO_BYTES + 64, 0);
    bytes
}

fn png_photo() -> String {
    STANDARD.encode(image_bytes(b"\x89PNG\r\n\x1a\n"))
}

fn delivered_order(id: &str) -> DeliveryOrder {
    let mut order = DeliveryOrder::dispatched(
        id.to_string(),
        Pin::parse("4821").expect("fixture pin"),
        vec!["milk".to_string(), "eggs".to_string()],
        3,
        fixture_timestamp() - TimeDelta::hours(1),
    );
    order.status = DeliveryStatus::Delivered;
    order.pin_state = PinState::Verified;
    order.delivered_at = Some(fixture_timestamp());
    order
}

fn report(item_id: &str, issue_type: IssueType) -> IssueReport {
    IssueReport {
        item_id: item_id.to_string(),
        issue_type,
        description: "carton split open".to_string(),
        photo_evidence: png_photo(),
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    clock: Arc<MutableClock>,
    service: InspectionService,
}

#[fixture]
fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(MutableClock::new(fixture_timestamp()));
    let service =
        InspectionService::new(store.clone(), store.clone(), store.clone(), clock.clone());
    store.put_order(delivered_order("order-1"));
    Harness {
        store,
        clock,
        service,
    }
}

#[rstest]
#[case(TimeDelta::zero(), true)]
#[case(TimeDelta::hours(23) + TimeDelta::minutes(59), true)]
#[case(TimeDelta::hours(24) - TimeDelta::milliseconds(1), true)]
#[case(TimeDelta::hours(24), false)]
#[case(TimeDelta::hours(24) + TimeDelta::minutes(1), false)]
fn deadline_is_exclusive_at_24_hours(#[case] elapsed: TimeDelta, #[case] open: bool) {
    let delivered_at = fixture_timestamp();
    assert_eq!(
        is_within_inspection_deadline(delivered_at, delivered_at + elapsed),
        open
    );
}

#[test]
fn deadline_is_derived_from_delivery_time() {
    assert_eq!(
        inspection_deadline(fixture_timestamp()),
        fixture_timestamp() + TimeDelta::hours(24)
    );
}

#[test]
fn state_follows_the_clock() {
    let order = delivered_order("order-1");
    let deadline = fixture_timestamp() + TimeDelta::hours(24);
    assert_eq!(
        InspectionState::of(&order, fixture_timestamp()),
        InspectionState::AwaitingInspection { deadline }
    );
    assert_eq!(
        InspectionState::of(&order, deadline),
        InspectionState::Expired { deadline }
    );

    let mut pending = order.clone();
    pending.status = DeliveryStatus::OutForDelivery;
    pending.delivered_at = None;
    assert_eq!(
        InspectionState::of(&pending, fixture_timestamp()),
        InspectionState::NotDelivered
    );
}

#[rstest]
#[tokio::test]
async fn issue_just_before_the_deadline_is_accepted_and_just_after_is_not(harness: Harness) {
    harness
        .clock
        .advance(TimeDelta::hours(23) + TimeDelta::minutes(59));
    let issue = harness
        .service
        .report_issue("order-1", report("milk", IssueType::Damaged))
        .await
        .expect("within window");
    assert_eq!(issue.resolution_status, ResolutionStatus::Pending);
    assert_eq!(issue.photo_ref, "photo:1");

    harness.clock.advance(TimeDelta::minutes(2));
    let err = harness
        .service
        .report_issue("order-1", report("milk", IssueType::Damaged))
        .await
        .expect_err("after window");
    assert!(matches!(err, ServiceError::InvalidState(msg) if msg.contains("deadline")));
    assert_eq!(harness.store.issues().len(), 1);
}

#[rstest]
#[tokio::test]
async fn confirm_fails_once_the_window_has_passed(harness: Harness) {
    harness.clock.advance(TimeDelta::hours(24));
    let err = harness
        .service
        .confirm_all_correct("order-1")
        .await
        .expect_err("expired");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    let stored = harness.store.order("order-1").expect("order stored");
    assert!(!stored.inspection_completed);
}

#[rstest]
#[tokio::test]
async fn photo_is_mandatory_for_every_issue_type(harness: Harness) {
    for issue_type in IssueType::ALL {
        let mut without_photo = report("milk", *issue_type);
        without_photo.photo_evidence = String::new();
        let err = harness
            .service
            .report_issue("order-1", without_photo)
            .await
            .expect_err("photo required");
        assert!(
            matches!(err, ServiceError::Validation(_)),
            "{issue_type} accepted without a photo"
        );
    }
    assert!(harness.store.issues().is_empty());
    assert_eq!(harness.store.photo_count(), 0);
}

#[rstest]
#[case("   ")]
#[case("not base64!")]
#[case("aGVsbG8gd29ybGQ=")]
#[case("data:image/png,abc")]
#[tokio::test]
async fn unusable_photos_are_rejected(harness: Harness, #[case] photo: &str) {
    let mut bad = report("milk", IssueType::Missing);
    bad.photo_evidence = photo.to_string();
    let err = harness
        .service
        .report_issue("order-1", bad)
        .await
        .expect_err("bad photo");
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[test]
fn data_url_photos_are_decoded() {
    let photo = PhotoEvidence::decode(&format!("data:image/png;base64,{}", png_photo()))
        .expect("data url");
    assert_eq!(photo.content_type, "image/png");

    let jpeg = STANDARD.encode(image_bytes(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]));
    assert_eq!(
        PhotoEvidence::decode(&jpeg).expect("jpeg").content_type,
        "image/jpeg"
    );
}

#[rstest]
#[case(vec![0xFF, 0xD8, 0xFF])]
#[case(image_bytes(&[0xFF, 0xD8, 0xFF])[..MIN_PHOTO_BYTES - 1].to_vec())]
fn bare_image_headers_are_not_evidence(#[case] bytes: Vec<u8>) {
    let err = PhotoEvidence::decode(&STANDARD.encode(&bytes)).expect_err("too small");
    assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("too small")));
}

#[rstest]
#[tokio::test]
async fn header_only_photo_does_not_support_a_missing_item_report(harness: Harness) {
    let mut header_only = report("eggs", IssueType::Missing);
    header_only.photo_evidence = STANDARD.encode([0xFF, 0xD8, 0xFF]);
    let err = harness
        .service
        .report_issue("order-1", header_only)
        .await
        .expect_err("header only");
    assert!(matches!(err, ServiceError::Validation(_)));
    assert!(harness.store.issues().is_empty());
    assert_eq!(harness.store.photo_count(), 0);
}

#[rstest]
#[tokio::test]
async fn description_is_required(harness: Harness) {
    let mut blank = report("milk", IssueType::Expired);
    blank.description = "  \n".to_string();
    let err = harness
        .service
        .report_issue("order-1", blank)
        .await
        .expect_err("blank description");
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[rstest]
#[tokio::test]
async fn item_must_belong_to_the_order(harness: Harness) {
    let err = harness
        .service
        .report_issue("order-1", report("caviar", IssueType::WrongItem))
        .await
        .expect_err("foreign item");
    assert!(matches!(err, ServiceError::Validation(msg) if msg.contains("caviar")));
}

#[rstest]
#[tokio::test]
async fn several_issues_then_confirmation_closes_the_window(harness: Harness) {
    harness
        .service
        .report_issue("order-1", report("milk", IssueType::Damaged))
        .await
        .expect("first issue");
    harness
        .service
        .report_issue("order-1", report("eggs", IssueType::Missing))
        .await
        .expect("second issue");

    harness.clock.advance(TimeDelta::hours(2));
    let order = harness
        .service
        .confirm_all_correct("order-1")
        .await
        .expect("confirm");
    assert!(order.inspection_completed);
    assert_eq!(
        order.inspection_completed_at,
        Some(fixture_timestamp() + TimeDelta::hours(2))
    );

    let issues = harness
        .service
        .list_issues("order-1")
        .await
        .expect("issues");
    assert_eq!(issues.len(), 2);
    assert!(matches!(
        InspectionState::of(&order, harness.clock.utc()),
        InspectionState::Complete { .. }
    ));

    let late = harness
        .service
        .report_issue("order-1", report("milk", IssueType::QualityIssue))
        .await
        .expect_err("after completion");
    assert!(matches!(late, ServiceError::InvalidState(_)));

    let twice = harness
        .service
        .confirm_all_correct("order-1")
        .await
        .expect_err("second confirmation");
    assert!(matches!(twice, ServiceError::InvalidState(_)));
}

#[rstest]
#[tokio::test]
async fn confirmation_with_no_issues_is_valid(harness: Harness) {
    let order = harness
        .service
        .confirm_all_correct("order-1")
        .await
        .expect("confirm");
    assert!(order.inspection_completed);
    assert!(harness
        .service
        .list_issues("order-1")
        .await
        .expect("issues")
        .is_empty());
}

#[rstest]
#[tokio::test]
async fn undelivered_orders_cannot_be_inspected(harness: Harness) {
    let mut order = delivered_order("order-2");
    order.status = DeliveryStatus::OutForDelivery;
    order.delivered_at = None;
    harness.store.put_order(order);

    let err = harness
        .service
        .confirm_all_correct("order-2")
        .await
        .expect_err("not delivered");
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let err = harness
        .service
        .report_issue("order-2", report("milk", IssueType::Damaged))
        .await
        .expect_err("not delivered");
    assert!(matches!(err, ServiceError::InvalidState(msg) if msg.contains("not been delivered")));
    assert!(harness.store.issues().is_empty());
    assert_eq!(harness.store.photo_count(), 0);
}

#[tokio::test]
async fn store_refuses_issues_for_orders_that_are_not_delivered() {
    let store = InMemoryStore::new();
    let mut order = delivered_order("order-1");
    order.status = DeliveryStatus::Cancelled;
    store.put_order(order);

    let issue = ReportedIssue {
        id: Uuid::new_v4(),
        order_id: "order-1".to_string(),
        item_id: "milk".to_string(),
        issue_type: IssueType::Damaged,
        description: "carton split open".to_string(),
        photo_ref: "photo:1".to_string(),
        resolution_status: ResolutionStatus::Pending,
        resolution_notes: None,
        reported_at: fixture_timestamp(),
    };
    let appended = store
        .append_issue(&issue, fixture_timestamp() - TimeDelta::hours(24))
        .await
        .expect("append");
    assert!(!appended);
    assert!(store.issues().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_are_all_kept() {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(MutableClock::new(fixture_timestamp()));
    let service = Arc::new(InspectionService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock,
    ));
    store.put_order(delivered_order("order-1"));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let service = service.clone();
            let item = if i % 2 == 0 { "milk" } else { "eggs" };
            tokio::spawn(async move {
                service
                    .report_issue("order-1", report(item, IssueType::Damaged))
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let issue = task.await.expect("task joined").expect("issue filed");
        ids.insert(issue.id);
    }

    let stored = service.list_issues("order-1").await.expect("issues");
    assert_eq!(ids.len(), 8);
    assert_eq!(stored.len(), 8);
    assert!(stored.iter().all(|issue| ids.contains(&issue.id)));
    assert_eq!(store.photo_count(), 8);
}

#[tokio::test]
async fn append_refused_by_the_store_is_a_state_error() {
    let store = Arc::new(InMemoryStore::new());
    store.put_order(delivered_order("order-1"));
    let mut issues = MockIssueStore::new();
    issues.expect_append_issue().times(1).returning(|_, _| Ok(false));

    let service = InspectionService::new(
        store.clone(),
        Arc::new(issues),
        store.clone(),
        Arc::new(MutableClock::new(fixture_timestamp())),
    );
    let err = service
        .report_issue("order-1", report("milk", IssueType::Damaged))
        .await
        .expect_err("closed concurrently");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(store.photo_count(), 0);
}

#[rstest]
#[tokio::test]
async fn photo_of_a_refused_late_report_is_discarded(harness: Harness) {
    // Confirmed in another tab between the read and the append.
    let mut issues = MockIssueStore::new();
    let store = harness.store.clone();
    issues.expect_append_issue().times(1).returning(move |_, _| {
        let mut order = store.order("order-1").expect("order stored");
        order.inspection_completed = true;
        store.put_order(order);
        Ok(false)
    });
    let service = InspectionService::new(
        harness.store.clone(),
        Arc::new(issues),
        harness.store.clone(),
        harness.clock.clone(),
    );

    let err = service
        .report_issue("order-1", report("eggs", IssueType::Missing))
        .await
        .expect_err("confirmed meanwhile");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert_eq!(harness.store.photo_count(), 0);
}
