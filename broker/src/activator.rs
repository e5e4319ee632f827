//! Request construction and the provisioning step that turns a request
//! into a time-bounded binding.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument};
use ulid::Ulid;

use elevate_common::span::rfc3339;
use elevate_common::{ActivationType, Error, PrincipalId, ProjectRole, TimeSpan, UserId};

use crate::catalog::Catalog;
use crate::clients::{
    Binding, BindingOption, ConditionExpression, JustificationPolicy, ResourceManager,
};
use crate::conditions::ACTIVATION_CONDITION_TITLE;

/// The authenticated caller of an activation or approval.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserContext {
    user: UserId,
}

impl UserContext {
    pub fn new(user: UserId) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }
}

/// An immutable activation request. Instances are built through
/// [`Activator::create_jit_request`] and
/// [`Activator::create_mpa_request`], or reconstructed from a verified
/// proposal token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActivationRequest {
    id: String,
    requesting_user: UserId,
    reviewers: BTreeSet<UserId>,
    entitlements: Vec<ProjectRole>,
    justification: String,
    activation_type: ActivationType,
    start_time: DateTime<Utc>,
    duration: Duration,
}

impl ActivationRequest {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        requesting_user: UserId,
        reviewers: BTreeSet<UserId>,
        entitlements: Vec<ProjectRole>,
        justification: String,
        activation_type: ActivationType,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            id,
            requesting_user,
            reviewers,
            entitlements,
            justification,
            activation_type,
            start_time,
            duration,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requesting_user(&self) -> &UserId {
        &self.requesting_user
    }

    pub fn reviewers(&self) -> &BTreeSet<UserId> {
        &self.reviewers
    }

    pub fn entitlements(&self) -> &[ProjectRole] {
        &self.entitlements
    }

    pub fn justification(&self) -> &str {
        &self.justification
    }

    pub fn activation_type(&self) -> &ActivationType {
        &self.activation_type
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The window the activation will be valid for.
    pub fn span(&self) -> TimeSpan {
        TimeSpan::starting_at(self.start_time, self.duration)
    }
}

/// The outcome of a provisioned request. The end of the span is
/// authoritative for expiry; nothing needs revoking.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Activation {
    pub request_id: String,
    pub span: TimeSpan,
}

pub struct Activator {
    catalog: Arc<Catalog>,
    resource_manager: Arc<dyn ResourceManager>,
    justification_policy: Arc<dyn JustificationPolicy>,
}

impl Activator {
    pub fn new(
        catalog: Arc<Catalog>,
        resource_manager: Arc<dyn ResourceManager>,
        justification_policy: Arc<dyn JustificationPolicy>,
    ) -> Self {
        Self {
            catalog,
            resource_manager,
            justification_policy,
        }
    }

    /// Build a self-approved request.
    pub fn create_jit_request(
        &self,
        user: &UserId,
        roles: Vec<ProjectRole>,
        justification: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Result<ActivationRequest, Error> {
        if roles.is_empty() {
            return Err(Error::MalformedRequest(
                "a request must name at least one entitlement".to_string(),
            ));
        }
        Ok(ActivationRequest {
            id: Ulid::new().to_string(),
            requesting_user: user.clone(),
            reviewers: BTreeSet::new(),
            entitlements: roles,
            justification: justification.into(),
            activation_type: ActivationType::SelfApproval,
            start_time,
            duration,
        })
    }

    /// Build an approval-based request for the given peer or external
    /// activation type.
    #[allow(clippy::too_many_arguments)]
    pub fn create_mpa_request(
        &self,
        user: &UserId,
        roles: Vec<ProjectRole>,
        reviewers: BTreeSet<UserId>,
        activation_type: ActivationType,
        justification: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: Duration,
    ) -> Result<ActivationRequest, Error> {
        if roles.is_empty() {
            return Err(Error::MalformedRequest(
                "a request must name at least one entitlement".to_string(),
            ));
        }
        if !activation_type.requires_reviewers() {
            return Err(Error::MalformedRequest(format!(
                "{activation_type} is not an approval-based activation type"
            )));
        }
        if reviewers.is_empty() {
            return Err(Error::MalformedRequest(
                "an approval-based request needs at least one reviewer".to_string(),
            ));
        }
        Ok(ActivationRequest {
            id: Ulid::new().to_string(),
            requesting_user: user.clone(),
            reviewers,
            entitlements: roles,
            justification: justification.into(),
            activation_type,
            start_time,
            duration,
        })
    }

    /// Activate a self-approved request.
    #[instrument(skip(self, request), fields(request.id = request.id()))]
    pub async fn activate(
        &self,
        ctx: &UserContext,
        request: &ActivationRequest,
    ) -> Result<Activation, Error> {
        if ctx.user() != request.requesting_user() {
            return Err(Error::AccessDenied(
                "a request can only be activated by its requester".to_string(),
            ));
        }
        if *request.activation_type() != ActivationType::SelfApproval {
            return Err(Error::MalformedRequest(
                "the request requires approval and cannot be self-activated".to_string(),
            ));
        }
        self.justification_policy
            .check_justification(ctx.user(), request.justification())?;
        let granted = self.catalog.verify_user_can_request(request).await?;

        self.provision(
            request,
            &granted,
            &format!("Self-approved, justification: {}", request.justification()),
        )
        .await
    }

    /// Activate an approval-based request on behalf of an approver.
    #[instrument(skip(self, request), fields(request.id = request.id()))]
    pub async fn approve(
        &self,
        ctx: &UserContext,
        request: &ActivationRequest,
    ) -> Result<Activation, Error> {
        if !request.activation_type().requires_reviewers() {
            return Err(Error::MalformedRequest(
                "a self-approved request cannot be approved by a reviewer".to_string(),
            ));
        }
        self.justification_policy
            .check_justification(request.requesting_user(), request.justification())?;
        let granted = self.catalog.verify_user_can_request(request).await?;
        self.catalog.verify_user_can_approve(ctx.user(), request).await?;

        self.provision(
            request,
            &granted,
            &format!(
                "Approved by {}, justification: {}",
                ctx.user(),
                request.justification()
            ),
        )
        .await
    }

    /// Apply one conditional binding per role. Every role is attempted;
    /// failures are collected and surfaced after the last attempt. The
    /// mutator is idempotent on identical windows, so callers retry the
    /// whole request.
    async fn provision(
        &self,
        request: &ActivationRequest,
        roles: &[ProjectRole],
        rationale: &str,
    ) -> Result<Activation, Error> {
        let span = request.span();
        let temporal = format!(
            r#"(request.time >= timestamp("{}") && request.time < timestamp("{}"))"#,
            rfc3339(&span.start),
            rfc3339(&span.end)
        );
        let member = PrincipalId::User(request.requesting_user().clone()).to_member();
        let options = BTreeSet::from([BindingOption::PurgeExistingTemporaryBindings]);

        let mut failures = Vec::new();
        for role in roles {
            let expression = match role.resource_condition() {
                Some(narrowing) => format!("({temporal}) && ({narrowing})"),
                None => temporal.clone(),
            };
            let binding = Binding {
                role: role.role().to_string(),
                members: vec![member.clone()],
                condition: Some(ConditionExpression {
                    title: Some(ACTIVATION_CONDITION_TITLE.to_string()),
                    expression: Some(expression),
                    description: Some(rationale.to_string()),
                }),
            };
            if let Err(err) = self
                .resource_manager
                .add_project_iam_binding(role.project(), &binding, &options, rationale)
                .await
            {
                failures.push(err);
            }
        }

        if !failures.is_empty() {
            return Err(Error::aggregate(failures));
        }

        info!(
            request.id = request.id(),
            user = %request.requesting_user(),
            roles = roles.len(),
            %span,
            "provisioned activation"
        );
        Ok(Activation {
            request_id: request.id().to_string(),
            span,
        })
    }
}
