//! Operator scenarios against the in-process backend.
//!
//! A. Unfiltered view shows both tab counts.
//! B. A filter matching nothing empties both tabs and shows the
//!    per-customer placeholder.
//! C. A second dismiss of an item whose delete is outstanding sends nothing.
//! D. A rejected delete leaves the collection untouched and frees the item.

mod common;

use anomaly_desk_core::{
    record::RecommendedFix,
    session::DismissOutcome,
    sync::LoadPhase,
    types::{BackendIdentity, CollectionKind, ItemKey},
};
use common::{within, FakeBillingApi};
use serde_json::json;

fn single_overcharge() -> FakeBillingApi {
    FakeBillingApi::new(
        vec![json!({
            "account_number": "CUST0001",
            "issue": "Overcharge",
            "explanation": "Billed twice on 04-03-2024",
            "fix": 42.50
        })],
        vec![],
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario A
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unfiltered_view_counts_both_tabs() {
    let api = single_overcharge();
    let session = common::session(&api);
    session.initialize().await.unwrap();

    let view = session.view();
    assert_eq!(view.phase, LoadPhase::Ready);
    assert_eq!(view.anomaly_count, 1);
    assert_eq!(view.autofix_count, 0);
    assert_eq!(view.customers, vec!["CUST0001"]);
    assert_eq!(view.empty_message, None);

    let anomaly = &view.anomalies[0];
    assert_eq!(anomaly.recommended_fix, RecommendedFix::ExpectedCharge(42.5));
    assert_eq!(anomaly.recommended_fix.display(), "Expected charges: 42.50");
    assert_eq!(anomaly.billing_date.as_deref(), Some("04-03-2024"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario B
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn filter_matching_nothing_shows_customer_placeholder() {
    let api = single_overcharge();
    let mut session = common::session(&api);
    session.initialize().await.unwrap();

    session.set_filter("cust0002");
    let view = session.view();
    assert!(view.anomalies.is_empty());
    assert!(view.autofixes.is_empty());
    assert_eq!(view.anomaly_count, 0);
    assert_eq!(view.autofix_count, 0);
    assert_eq!(view.empty_message, Some("No anomalies found for this customer"));
    // The customer list is not narrowed by the filter.
    assert_eq!(view.customers, vec!["CUST0001"]);

    session.set_tab(CollectionKind::Autofixes);
    assert_eq!(
        session.view().empty_message,
        Some("No auto-fixes found for this customer")
    );

    session.set_filter("");
    let view = session.view();
    assert_eq!(view.anomaly_count, 1);
    assert_eq!(view.empty_message, Some("No auto-fixes found"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario C
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_dismiss_while_outstanding_sends_no_request() {
    let api = single_overcharge();
    let mut session = common::session(&api);
    session.initialize().await.unwrap();
    let id = session.view().anomalies[0].item_id.clone();
    let key = ItemKey::new(CollectionKind::Anomalies, id.clone());

    api.hold_deletes(1);
    assert!(session.spawn_dismiss(CollectionKind::Anomalies, id.clone()).is_none());
    assert!(session.is_in_flight(CollectionKind::Anomalies, &id));
    assert_eq!(session.view().in_flight, vec![key.clone()]);
    api.wait_for_delete_requests(1).await;

    // Both the awaited and the background entry points refuse.
    let again = session.dismiss(CollectionKind::Anomalies, id.clone()).await.unwrap();
    assert_eq!(again, DismissOutcome::AlreadyInFlight);
    let report = session
        .spawn_dismiss(CollectionKind::Anomalies, id.clone())
        .expect("refused synchronously");
    assert_eq!(report.outcome, Some(DismissOutcome::AlreadyInFlight));
    assert_eq!(api.delete_requests().len(), 1);

    api.release_deletes(1);
    let done = within(session.next_completed()).await.expect("one task pending");
    assert_eq!(done.key, key);
    assert_eq!(done.outcome, Some(DismissOutcome::Deleted));
    assert_eq!(done.error, None);

    assert_eq!(
        api.delete_requests(),
        vec![(CollectionKind::Anomalies, BackendIdentity::Position(0))]
    );
    assert!(!session.is_in_flight(CollectionKind::Anomalies, &id));
    assert_eq!(session.view().anomaly_count, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario D
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_delete_leaves_collection_and_frees_item() {
    let api = single_overcharge();
    let session = common::session(&api);
    session.initialize().await.unwrap();

    let before = session.sync().snapshot();
    let id = before.anomalies[0].item_id.clone();
    api.fail_deletes(500);

    let err = session
        .dismiss(CollectionKind::Anomalies, id.clone())
        .await
        .unwrap_err();
    assert!(
        err.to_string().starts_with("Failed to delete anomalies 0"),
        "unexpected message: {err}"
    );

    let after = session.sync().snapshot();
    assert_eq!(*after.anomalies, *before.anomalies);
    assert_eq!(*after.autofixes, *before.autofixes);
    assert!(!session.is_in_flight(CollectionKind::Anomalies, &id));

    // Still usable: the error is a banner, not a dead view.
    let view = session.view();
    assert_eq!(view.phase, LoadPhase::Ready);
    assert_eq!(view.error.as_deref(), Some(err.to_string().as_str()));

    // The operator retries once the backend recovers.
    assert_eq!(api.records(CollectionKind::Anomalies).len(), 1);
    api.clear_delete_failure();
    let outcome = session.dismiss(CollectionKind::Anomalies, id).await.unwrap();
    assert_eq!(outcome, DismissOutcome::Deleted);
    let view = session.view();
    assert_eq!(view.anomaly_count, 0);
    assert_eq!(view.error, None);
}
