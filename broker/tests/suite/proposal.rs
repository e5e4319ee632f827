use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use url::Url;

use elevate_broker::clients::MailFlag;
use elevate_broker::test_utils::{LocalJwtOracle, RecordingMailer};
use elevate_broker::{ProposalHandler, ProposalHandlerOptions, TokenSigner, UserContext};
use elevate_common::{ActivationType, Error};

use crate::helpers::*;

const APPROVER: &str = "approver@example.com";
const SIGNER: &str = "elevate@project.iam.gserviceaccount.com";

struct ProposalFixture {
    broker: TestBroker,
    mailer: RecordingMailer,
    handler: ProposalHandler,
}

fn proposal_fixture() -> ProposalFixture {
    let broker = broker();
    let mailer = RecordingMailer::default();
    let handler = ProposalHandler::new(
        Arc::new(TokenSigner::new(Arc::new(LocalJwtOracle::new(SIGNER)))),
        Arc::new(mailer.clone()),
        broker.activator.clone(),
        ProposalHandlerOptions {
            proposal_timeout: Duration::minutes(30),
            approval_base_url: Url::parse("https://elevate.example.com/approve").unwrap(),
        },
    );
    ProposalFixture {
        broker,
        mailer,
        handler,
    }
}

async fn grant_mpa_pair(broker: &TestBroker) {
    grant(
        broker,
        &format!("user:{REQUESTER}"),
        "project-1",
        "roles/role-1",
        None,
        "has({}.multiPartyApprovalConstraint)",
    )
    .await;
    grant_holders(
        broker,
        "project-1",
        "roles/role-1",
        "has({}.multiPartyApprovalConstraint)",
        &[&format!("user:{APPROVER}")],
    )
    .await;
}

fn mpa_request(broker: &TestBroker) -> elevate_broker::ActivationRequest {
    broker
        .activator
        .create_mpa_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            BTreeSet::from([user(APPROVER)]),
            ActivationType::PeerApproval(String::new()),
            "fixing <prod>",
            Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap(),
            Duration::minutes(5),
        )
        .unwrap()
}

#[tokio::test]
async fn a_proposal_notifies_reviewers_and_its_token_activates() {
    let fixture = proposal_fixture();
    grant_mpa_pair(&fixture.broker).await;
    let request = mpa_request(&fixture.broker);

    let token = fixture.handler.propose(&request).await.unwrap();
    assert_eq!(
        token.expiry_time,
        token.issue_time + Duration::minutes(30)
    );

    {
        let sent = fixture.mailer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let mail = &sent[0];
        assert_eq!(mail.to, BTreeSet::from([user(APPROVER)]));
        assert_eq!(mail.cc, BTreeSet::from([user(REQUESTER)]));
        assert_eq!(
            mail.subject,
            "user-1@example.com requests access to project project-1"
        );
        assert!(mail.body.contains(&token.token));
        // User-supplied text is escaped.
        assert!(mail.body.contains("fixing &lt;prod&gt;"));
        assert!(mail.flags.is_empty());
    }

    let activation = fixture
        .handler
        .consume(&UserContext::new(user(APPROVER)), &token.token)
        .await
        .unwrap();
    assert_eq!(activation.request_id, request.id());

    let applied = fixture.broker.resource_manager.applied.lock().await;
    assert_eq!(applied.len(), 1);
    assert_eq!(
        applied[0].binding.condition.as_ref().unwrap().description.as_deref(),
        Some("Approved by approver@example.com, justification: fixing <prod>")
    );

    let sent = fixture.mailer.sent.lock().await;
    assert_eq!(sent.len(), 2);
    let mail = &sent[1];
    assert_eq!(mail.to, BTreeSet::from([user(REQUESTER)]));
    assert_eq!(mail.cc, BTreeSet::from([user(APPROVER)]));
    assert_eq!(
        mail.subject,
        "approver@example.com approved access for user-1@example.com"
    );
    assert_eq!(mail.flags, BTreeSet::from([MailFlag::Reply]));
}

#[tokio::test]
async fn self_approved_requests_cannot_be_proposed() {
    let fixture = proposal_fixture();
    let request = fixture
        .broker
        .activator
        .create_jit_request(
            &user(REQUESTER),
            vec![role("project-1", "roles/role-1")],
            "emergency",
            Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap(),
            Duration::minutes(5),
        )
        .unwrap();

    let error = fixture.handler.propose(&request).await.unwrap_err();
    assert!(matches!(error, Error::MalformedRequest(_)));
}

#[tokio::test]
async fn an_undeliverable_proposal_fails() {
    let fixture = proposal_fixture();
    grant_mpa_pair(&fixture.broker).await;
    *fixture.mailer.broken.lock().await = true;

    let error = fixture
        .handler
        .propose(&mpa_request(&fixture.broker))
        .await
        .unwrap_err();

    assert!(matches!(error, Error::Transient(_)));
}

#[tokio::test]
async fn a_failed_follow_up_notification_does_not_undo_the_activation() {
    let fixture = proposal_fixture();
    grant_mpa_pair(&fixture.broker).await;
    let request = mpa_request(&fixture.broker);

    let token = fixture.handler.propose(&request).await.unwrap();
    *fixture.mailer.broken.lock().await = true;

    let activation = fixture
        .handler
        .consume(&UserContext::new(user(APPROVER)), &token.token)
        .await
        .unwrap();

    assert_eq!(activation.request_id, request.id());
    assert_eq!(fixture.broker.resource_manager.applied.lock().await.len(), 1);
    assert_eq!(fixture.mailer.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn garbage_tokens_are_rejected() {
    let fixture = proposal_fixture();

    let error = fixture
        .handler
        .consume(&UserContext::new(user(APPROVER)), "not-a-token")
        .await
        .unwrap_err();

    assert!(matches!(error, Error::TokenVerification));
}
