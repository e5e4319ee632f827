//! Mediates between an approval-based request and its eventual
//! approval: tokenizes the request, notifies the reviewers, and turns
//! the returned token back into an activation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use tracing::{instrument, warn};
use url::Url;

use elevate_common::span::rfc3339;
use elevate_common::{Error, UserId};

use crate::activator::{Activation, ActivationRequest, Activator, UserContext};
use crate::clients::{MailFlag, Mailer};
use crate::token::{ProposalToken, TokenPayload, TokenSigner};

#[derive(Clone, Debug)]
pub struct ProposalHandlerOptions {
    /// How long a proposal token stays valid; reviewers must act within
    /// this window.
    pub proposal_timeout: Duration,
    /// Base URL of the approval endpoint the notification links to.
    pub approval_base_url: Url,
}

pub struct ProposalHandler {
    signer: Arc<TokenSigner>,
    mailer: Arc<dyn Mailer>,
    activator: Arc<Activator>,
    options: ProposalHandlerOptions,
}

impl ProposalHandler {
    pub fn new(
        signer: Arc<TokenSigner>,
        mailer: Arc<dyn Mailer>,
        activator: Arc<Activator>,
        options: ProposalHandlerOptions,
    ) -> Self {
        Self {
            signer,
            mailer,
            activator,
            options,
        }
    }

    /// Tokenize an approval-based request and notify its reviewers. The
    /// requester is kept on copy. A notification that cannot be sent
    /// fails the proposal: an undelivered token serves nobody.
    #[instrument(skip(self, request), fields(request.id = request.id()))]
    pub async fn propose(&self, request: &ActivationRequest) -> Result<ProposalToken, Error> {
        if !request.activation_type().requires_reviewers() {
            return Err(Error::MalformedRequest(
                "only approval-based requests can be proposed".to_string(),
            ));
        }
        let project = request
            .entitlements()
            .first()
            .map(|role| role.project().clone())
            .ok_or_else(|| {
                Error::MalformedRequest("a request must name at least one entitlement".to_string())
            })?;

        let token = self
            .signer
            .sign(
                TokenPayload::from_request(request),
                self.options.proposal_timeout,
            )
            .await?;

        let subject = format!(
            "{} requests access to project {project}",
            request.requesting_user()
        );
        let body = proposal_body(request, &approval_link(&self.options.approval_base_url, &token));
        let cc = BTreeSet::from([request.requesting_user().clone()]);
        self.mailer
            .send_mail(request.reviewers(), &cc, &subject, &body, &BTreeSet::new())
            .await?;

        Ok(token)
    }

    /// Handle an approval callback: verify the token, reconstruct the
    /// request, and approve it as the calling user. The post-approval
    /// notification is best effort; the activation stands either way.
    #[instrument(skip(self, token))]
    pub async fn consume(&self, approver: &UserContext, token: &str) -> Result<Activation, Error> {
        let payload = self.signer.verify(token).await?;
        let request = payload.into_request()?;

        let activation = self.activator.approve(approver, &request).await?;

        let subject = format!(
            "{} approved access for {}",
            approver.user(),
            request.requesting_user()
        );
        let body = approved_body(&request, approver.user(), &activation);
        let to = BTreeSet::from([request.requesting_user().clone()]);
        if let Err(err) = self
            .mailer
            .send_mail(
                &to,
                request.reviewers(),
                &subject,
                &body,
                &BTreeSet::from([MailFlag::Reply]),
            )
            .await
        {
            warn!(
                error = &err as &dyn std::error::Error,
                "failed to send the post-approval notification"
            );
        }

        Ok(activation)
    }
}

fn approval_link(base: &Url, token: &ProposalToken) -> String {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("activation", &token.token);
    url.to_string()
}

/// Escape user-supplied text for embedding into the HTML body.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn role_list(request: &ActivationRequest) -> String {
    request
        .entitlements()
        .iter()
        .map(|role| format!("<li><code>{}</code></li>", escape_html(&role.id())))
        .collect::<Vec<_>>()
        .join("")
}

fn proposal_body(request: &ActivationRequest, link: &str) -> String {
    let span = request.span();
    format!(
        "<p><b>{user}</b> asks you to approve their access request:</p>\
         <ul>{roles}</ul>\
         <p>Justification: <i>{justification}</i></p>\
         <p>Requested window: {start} to {end}</p>\
         <p><a href=\"{link}\">Review and approve</a></p>",
        user = escape_html(request.requesting_user().email()),
        roles = role_list(request),
        justification = escape_html(request.justification()),
        start = rfc3339(&span.start),
        end = rfc3339(&span.end),
        link = escape_html(link),
    )
}

fn approved_body(request: &ActivationRequest, approver: &UserId, activation: &Activation) -> String {
    format!(
        "<p><b>{approver}</b> approved the access request of <b>{user}</b>:</p>\
         <ul>{roles}</ul>\
         <p>The access is valid from {start} to {end}.</p>",
        approver = escape_html(approver.email()),
        user = escape_html(request.requesting_user().email()),
        roles = role_list(request),
        start = rfc3339(&activation.span.start),
        end = rfc3339(&activation.span.end),
    )
}
