use std::collections::BTreeSet;

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use elevate_broker::clients::analyzer::{AnalysisResult, Identity, IdentityList};
use elevate_broker::test_utils::{binding, condition};
use elevate_broker::CatalogOptions;
use elevate_common::{ActivationType, Error, UserId};

use crate::helpers::*;

#[tokio::test]
async fn a_stored_topic_only_matches_itself() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/viewer",
        None,
        "has({}.multipartyapprovalconstraint.topic)",
    )
    .await;

    let error = broker
        .catalog
        .list_reviewers(
            &user(REQUESTER),
            &role("project-1", "roles/viewer"),
            &ActivationType::PeerApproval("topic2".to_string()),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, Error::AccessDenied(_)));
}

#[tokio::test]
async fn an_empty_stored_topic_matches_any_requested_topic() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/viewer",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;

    let granted = broker
        .catalog
        .verify_user_can_activate_requester_privileges(
            &user(REQUESTER),
            &project("project-1"),
            &ActivationType::PeerApproval("topic".to_string()),
            &[role("project-1", "roles/viewer")],
        )
        .await
        .unwrap();

    assert_eq!(granted.len(), 1);
    assert_eq!(granted[0].id(), "iam:project-1:roles/viewer");
}

fn request_window() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap()
}

#[tokio::test]
async fn durations_outside_the_configured_range_are_rejected() {
    let broker = broker_with_options(CatalogOptions {
        min_activation_duration: Duration::minutes(1),
        max_activation_duration: Duration::minutes(30),
        ..Default::default()
    });

    for minutes in [31, 0] {
        let request = broker
            .activator
            .create_jit_request(
                &user(REQUESTER),
                vec![role("project-1", "roles/viewer")],
                "emergency",
                request_window(),
                Duration::minutes(minutes),
            )
            .unwrap();

        let error = broker.catalog.validate_request(&request).unwrap_err();
        assert!(
            matches!(error, Error::MalformedRequest(_)),
            "{minutes} minutes"
        );
    }

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/viewer")],
            "emergency",
            request_window(),
            Duration::minutes(30),
        )
        .unwrap();
    assert!(broker.catalog.validate_request(&request).is_ok());
}

#[tokio::test]
async fn reviewer_counts_outside_the_configured_range_are_rejected() {
    let broker = broker_with_options(CatalogOptions {
        min_reviewers: 2,
        max_reviewers: 2,
        ..Default::default()
    });
    fn reviewers(emails: &[&str]) -> BTreeSet<UserId> {
        emails.iter().copied().map(user).collect()
    }

    for (case, set) in [
        ("one reviewer", reviewers(&["reviewer-1@example.com"])),
        (
            "three reviewers",
            reviewers(&[
                "reviewer-1@example.com",
                "reviewer-2@example.com",
                "reviewer-3@example.com",
            ]),
        ),
        (
            "the requester reviewing themselves",
            reviewers(&[REQUESTER, "reviewer-1@example.com"]),
        ),
    ] {
        let request = broker
            .activator
            .create_mpa_request(
                &user(REQUESTER),
                vec![role("project-1", "roles/viewer")],
                set,
                ActivationType::PeerApproval(String::new()),
                "emergency",
                request_window(),
                Duration::minutes(10),
            )
            .unwrap();

        let error = broker.catalog.validate_request(&request).unwrap_err();
        assert!(matches!(error, Error::MalformedRequest(_)), "{case}");
    }

    let request = broker
        .activator
        .create_mpa_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/viewer")],
            reviewers(&["reviewer-1@example.com", "reviewer-2@example.com"]),
            ActivationType::PeerApproval(String::new()),
            "emergency",
            request_window(),
            Duration::minutes(10),
        )
        .unwrap();
    assert!(broker.catalog.validate_request(&request).is_ok());
}

#[tokio::test]
async fn reviewers_never_include_the_caller() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/viewer",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;
    grant_holders(
        &broker,
        "project-1",
        "roles/viewer",
        "has({}.multiPartyApprovalConstraint)",
        &[&format!("user:{REQUESTER}"), "user:peer@example.com"],
    )
    .await;

    let reviewers = broker
        .catalog
        .list_reviewers(
            &user(REQUESTER),
            &role("project-1", "roles/viewer"),
            &ActivationType::PeerApproval(String::new()),
        )
        .await
        .unwrap();

    let expected: BTreeSet<_> = [user("peer@example.com")].into_iter().collect();
    assert_eq!(reviewers, expected);
}

#[tokio::test]
async fn external_approval_reviewers_come_from_reviewer_privileges() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/viewer",
        None,
        "has({}.externalApprovalConstraint.audit)",
    )
    .await;
    // A peer with the same external eligibility is not a reviewer; only
    // reviewer-privilege holders are.
    grant_holders(
        &broker,
        "project-1",
        "roles/viewer",
        "has({}.externalApprovalConstraint.audit)",
        &["user:peer@example.com"],
    )
    .await;
    grant_holders(
        &broker,
        "project-1",
        "roles/viewer",
        "has({}.reviewerPrivilege.audit)",
        &["user:auditor@example.com"],
    )
    .await;

    let reviewers = broker
        .catalog
        .list_reviewers(
            &user(REQUESTER),
            &role("project-1", "roles/viewer"),
            &ActivationType::ExternalApproval("audit".to_string()),
        )
        .await
        .unwrap();

    let expected: BTreeSet<_> = [user("auditor@example.com")].into_iter().collect();
    assert_eq!(reviewers, expected);
}

#[tokio::test]
async fn group_held_eligibilities_expand_through_the_identity_list() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/viewer",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;
    let result = AnalysisResult {
        attached_resource: project("project-1").full_resource_name(),
        iam_binding: binding(
            "roles/viewer",
            &["group:eng@example.com"],
            Some(condition(None, "has({}.multiPartyApprovalConstraint)")),
        ),
        access_control_lists: vec![],
        identity_list: Some(IdentityList {
            identities: vec![
                Identity::new("user:peer@example.com"),
                Identity::new("serviceAccount:robot@project.iam.gserviceaccount.com"),
            ],
        }),
    };
    broker
        .analyzer
        .principals
        .lock()
        .await
        .entry(project("project-1").full_resource_name())
        .or_default()
        .results
        .push(result);

    let reviewers = broker
        .catalog
        .list_reviewers(
            &user(REQUESTER),
            &role("project-1", "roles/viewer"),
            &ActivationType::PeerApproval(String::new()),
        )
        .await
        .unwrap();

    let expected: BTreeSet<_> = [user("peer@example.com")].into_iter().collect();
    assert_eq!(reviewers, expected);
}
