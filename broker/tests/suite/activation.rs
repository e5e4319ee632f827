use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use regex::Regex;

use elevate_broker::clients::{BindingOption, RegexJustificationPolicy};
use elevate_broker::{Activator, UserContext};
use elevate_common::{ActivationType, Error, TimeSpan};

use crate::helpers::*;

const APPROVER: &str = "approver@example.com";

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap()
}

const TEMPORAL_2040: &str = r#"(request.time >= timestamp("2040-01-01T00:00:00Z") && request.time < timestamp("2040-01-01T00:05:00Z"))"#;

#[tokio::test]
async fn jit_provisioning_writes_the_exact_binding() {
    let broker = broker();
    let member = format!("user:{REQUESTER}");
    for role_name in ["roles/role-1", "roles/role-2"] {
        grant(
            &broker,
            &member,
            "project-1",
            role_name,
            None,
            "has({}.jitAccessConstraint)",
        )
        .await;
    }

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![
                role("project-1", "roles/role-1"),
                role("project-1", "roles/role-2"),
            ],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let activation = broker
        .activator
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap();

    assert_eq!(activation.request_id, request.id());
    assert_eq!(
        activation.span,
        TimeSpan::starting_at(start(), Duration::minutes(5))
    );

    let applied = broker.resource_manager.applied.lock().await;
    assert_eq!(applied.len(), 2);
    let roles: Vec<&str> = applied.iter().map(|a| a.binding.role.as_str()).collect();
    assert_eq!(roles, vec!["roles/role-1", "roles/role-2"]);
    for applied_binding in applied.iter() {
        assert_eq!(applied_binding.project, project("project-1"));
        assert_eq!(applied_binding.binding.members, vec![member.clone()]);
        let condition = applied_binding.binding.condition.as_ref().unwrap();
        assert_eq!(condition.title.as_deref(), Some("JIT access"));
        assert_eq!(condition.expression.as_deref(), Some(TEMPORAL_2040));
        assert_eq!(
            condition.description.as_deref(),
            Some("Self-approved, justification: emergency")
        );
        assert_eq!(
            applied_binding.options,
            BTreeSet::from([BindingOption::PurgeExistingTemporaryBindings])
        );
        assert_eq!(applied_binding.rationale, "Self-approved, justification: emergency");
    }
}

#[tokio::test]
async fn a_resource_condition_wraps_the_temporal_clause() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.jitAccessConstraint) && (resource.name=='x' || resource.name=='y')",
    )
    .await;

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    broker
        .activator
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap();

    let applied = broker.resource_manager.applied.lock().await;
    assert_eq!(applied.len(), 1);
    assert_eq!(
        applied[0].binding.condition.as_ref().unwrap().expression.as_deref(),
        Some(
            r#"((request.time >= timestamp("2040-01-01T00:00:00Z") && request.time < timestamp("2040-01-01T00:05:00Z"))) && (resource.name=='x' || resource.name=='y')"#
        )
    );
}

#[tokio::test]
async fn approval_provisions_with_the_approver_rationale() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;
    grant_holders(
        &broker,
        "project-1",
        "roles/role-1",
        "has({}.multiPartyApprovalConstraint)",
        &[&format!("user:{APPROVER}")],
    )
    .await;

    let request = broker
        .activator
        .create_mpa_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            BTreeSet::from([user(APPROVER)]),
            ActivationType::PeerApproval(String::new()),
            "fixing prod",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let activation = broker
        .activator
        .approve(&UserContext::new(user(APPROVER)), &request)
        .await
        .unwrap();

    assert_eq!(activation.request_id, request.id());
    let applied = broker.resource_manager.applied.lock().await;
    assert_eq!(applied.len(), 1);
    let condition = applied[0].binding.condition.as_ref().unwrap();
    assert_eq!(condition.expression.as_deref(), Some(TEMPORAL_2040));
    assert_eq!(
        condition.description.as_deref(),
        Some("Approved by approver@example.com, justification: fixing prod")
    );
    assert_eq!(
        applied[0].binding.members,
        vec![format!("user:{REQUESTER}")]
    );
}

#[tokio::test]
async fn only_the_requester_can_activate() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.jitAccessConstraint)",
    )
    .await;

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = broker
        .activator
        .activate(&UserContext::new(user("someone-else@example.com")), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::AccessDenied(_)));
    assert!(broker.resource_manager.applied.lock().await.is_empty());
}

#[tokio::test]
async fn ineligible_users_are_denied() {
    let broker = broker();

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = broker
        .activator
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::AccessDenied(_)));
}

#[tokio::test]
async fn the_requester_cannot_approve_their_own_request() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;

    let request = broker
        .activator
        .create_mpa_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            BTreeSet::from([user(APPROVER)]),
            ActivationType::PeerApproval(String::new()),
            "fixing prod",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = broker
        .activator
        .approve(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::AccessDenied(_)));
}

#[tokio::test]
async fn rejected_justifications_block_activation() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.jitAccessConstraint)",
    )
    .await;
    let strict = Activator::new(
        broker.catalog.clone(),
        Arc::new(broker.resource_manager.clone()),
        Arc::new(RegexJustificationPolicy::new(
            Regex::new(r"^b/\d+$").unwrap(),
            "a ticket reference such as b/12345",
        )),
    );

    let request = strict
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "no ticket",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = strict
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::InvalidJustification(_)));
    assert!(broker.resource_manager.applied.lock().await.is_empty());
}

#[tokio::test]
async fn every_role_is_attempted_and_failures_aggregate() {
    let broker = broker();
    let member = format!("user:{REQUESTER}");
    for role_name in ["roles/role-1", "roles/role-2", "roles/role-3"] {
        grant(
            &broker,
            &member,
            "project-1",
            role_name,
            None,
            "has({}.jitAccessConstraint)",
        )
        .await;
    }
    broker
        .resource_manager
        .failing_roles
        .lock()
        .await
        .extend(["roles/role-1".to_string(), "roles/role-3".to_string()]);

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![
                role("project-1", "roles/role-1"),
                role("project-1", "roles/role-2"),
                role("project-1", "roles/role-3"),
            ],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = broker
        .activator
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Aggregate(_)));
    let message = error.to_string();
    assert!(message.contains("roles/role-1"));
    assert!(message.contains("roles/role-3"));
    // The middle role was still applied; retrying is idempotent.
    let applied = broker.resource_manager.applied.lock().await;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].binding.role, "roles/role-2");
}

#[tokio::test]
async fn a_single_failure_is_surfaced_directly() {
    let broker = broker();
    grant(
        &broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.jitAccessConstraint)",
    )
    .await;
    broker
        .resource_manager
        .failing_roles
        .lock()
        .await
        .insert("roles/role-1".to_string());

    let request = broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "emergency",
            start(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = broker
        .activator
        .activate(&UserContext::new(user(REQUESTER)), &request)
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Transient(_)));
}
