//! The user-facing façade over entitlement discovery and request
//! authorization.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Duration;
use tracing::instrument;

use elevate_common::{ActivationType, Error, ProjectId, ProjectRole, UserId};

use crate::activator::ActivationRequest;
use crate::clients::ResourceManager;
use crate::repository::{EntitlementRepository, EntitlementSet, PrivilegeStatus};

#[derive(Clone, Debug)]
pub struct CatalogOptions {
    /// When set, project listing searches by this query instead of
    /// discovering projects through the policy source.
    pub project_query: Option<String>,
    pub min_activation_duration: Duration,
    pub max_activation_duration: Duration,
    /// Reviewer-count bounds for approval-based requests.
    pub min_reviewers: usize,
    pub max_reviewers: usize,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            project_query: None,
            min_activation_duration: Duration::minutes(5),
            max_activation_duration: Duration::hours(2),
            min_reviewers: 1,
            max_reviewers: 10,
        }
    }
}

pub struct Catalog {
    repository: Arc<dyn EntitlementRepository>,
    resource_manager: Arc<dyn ResourceManager>,
    options: CatalogOptions,
}

impl Catalog {
    pub fn new(
        repository: Arc<dyn EntitlementRepository>,
        resource_manager: Arc<dyn ResourceManager>,
        options: CatalogOptions,
    ) -> Self {
        Self {
            repository,
            resource_manager,
            options,
        }
    }

    pub fn options(&self) -> &CatalogOptions {
        &self.options
    }

    /// Projects the user can request access on, sorted.
    #[instrument(skip(self))]
    pub async fn list_scopes(&self, user: &UserId) -> Result<BTreeSet<ProjectId>, Error> {
        match &self.options.project_query {
            Some(query) => self.resource_manager.search_project_ids(query).await,
            None => self.repository.find_projects_with_entitlements(user).await,
        }
    }

    /// The user's requestable and active privileges on one project.
    #[instrument(skip(self))]
    pub async fn list_requester_privileges(
        &self,
        user: &UserId,
        project: &ProjectId,
    ) -> Result<EntitlementSet, Error> {
        self.repository
            .find_entitlements(
                user,
                project,
                &[
                    ActivationType::SelfApproval,
                    ActivationType::PeerApproval(String::new()),
                    ActivationType::ExternalApproval(String::new()),
                ],
                &[PrivilegeStatus::Available, PrivilegeStatus::Active],
            )
            .await
    }

    /// Users that can review an activation of the given privilege,
    /// excluding the caller. The caller must itself be eligible for the
    /// privilege.
    #[instrument(skip(self))]
    pub async fn list_reviewers(
        &self,
        user: &UserId,
        role: &ProjectRole,
        activation_type: &ActivationType,
    ) -> Result<BTreeSet<UserId>, Error> {
        self.verify_user_can_activate_requester_privileges(
            user,
            role.project(),
            activation_type,
            std::slice::from_ref(role),
        )
        .await?;

        let mut holders = self
            .repository
            .find_entitlement_holders(role, activation_type)
            .await?;
        holders.remove(user);
        Ok(holders)
    }

    /// Check a request against the catalog's duration and reviewer
    /// constraints. Topics are not checked here; topic-to-policy
    /// matching happens when the requester's privileges are verified.
    pub fn validate_request(&self, request: &ActivationRequest) -> Result<(), Error> {
        if request.entitlements().is_empty() {
            return Err(Error::MalformedRequest(
                "a request must name at least one entitlement".to_string(),
            ));
        }

        let duration = request.duration();
        if duration < self.options.min_activation_duration
            || duration > self.options.max_activation_duration
        {
            return Err(Error::MalformedRequest(format!(
                "the activation duration must be between {} and {} minutes",
                self.options.min_activation_duration.num_minutes(),
                self.options.max_activation_duration.num_minutes()
            )));
        }

        if request.activation_type().requires_reviewers() {
            let reviewers = request.reviewers().len();
            if reviewers < self.options.min_reviewers || reviewers > self.options.max_reviewers {
                return Err(Error::MalformedRequest(format!(
                    "the number of reviewers must be between {} and {}",
                    self.options.min_reviewers, self.options.max_reviewers
                )));
            }
            if request.reviewers().contains(request.requesting_user()) {
                return Err(Error::MalformedRequest(
                    "the requesting user cannot review their own request".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Assert that the user holds an available privilege matching the
    /// requested activation type for every role, and return the stored
    /// privileges' roles. The stored roles carry the resource
    /// conditions that policy attaches to them; provisioning uses those
    /// rather than the requester-supplied roles.
    #[instrument(skip(self, roles))]
    pub async fn verify_user_can_activate_requester_privileges(
        &self,
        user: &UserId,
        project: &ProjectId,
        activation_type: &ActivationType,
        roles: &[ProjectRole],
    ) -> Result<Vec<ProjectRole>, Error> {
        let entitlements = self
            .repository
            .find_entitlements(
                user,
                project,
                std::slice::from_ref(activation_type),
                &[PrivilegeStatus::Available],
            )
            .await?;

        let mut granted = Vec::with_capacity(roles.len());
        for role in roles {
            let stored = entitlements.available.iter().find(|privilege| {
                privilege.role.binding_key() == role.binding_key()
                    && privilege.activation_type.matches(activation_type)
            });
            match stored {
                Some(privilege) => granted.push(privilege.role.clone()),
                None => {
                    return Err(Error::AccessDenied(format!(
                        "{user} is not eligible to activate {} with {activation_type}",
                        role.id()
                    )));
                }
            }
        }
        Ok(granted)
    }

    /// Validation plus the activation check for the requesting user.
    /// Returns the stored roles to provision, in request order.
    pub async fn verify_user_can_request(
        &self,
        request: &ActivationRequest,
    ) -> Result<Vec<ProjectRole>, Error> {
        self.validate_request(request)?;

        let mut by_project: BTreeMap<ProjectId, Vec<ProjectRole>> = BTreeMap::new();
        for role in request.entitlements() {
            by_project
                .entry(role.project().clone())
                .or_default()
                .push(role.clone());
        }

        let mut granted = BTreeMap::new();
        for (project, roles) in &by_project {
            let stored = self
                .verify_user_can_activate_requester_privileges(
                    request.requesting_user(),
                    project,
                    request.activation_type(),
                    roles,
                )
                .await?;
            for role in stored {
                granted.insert(role.binding_key(), role);
            }
        }

        request
            .entitlements()
            .iter()
            .map(|role| {
                granted.get(&role.binding_key()).cloned().ok_or_else(|| {
                    Error::AccessDenied(format!("no available privilege for {}", role.id()))
                })
            })
            .collect()
    }

    /// Assert that the approver can approve every role in the request:
    /// they must be one of its reviewers and hold a matching peer or
    /// reviewer privilege.
    #[instrument(skip(self, request))]
    pub async fn verify_user_can_approve(
        &self,
        approver: &UserId,
        request: &ActivationRequest,
    ) -> Result<(), Error> {
        if approver == request.requesting_user() {
            return Err(Error::AccessDenied(
                "a request cannot be approved by its requester".to_string(),
            ));
        }
        if !request.reviewers().contains(approver) {
            return Err(Error::AccessDenied(format!(
                "{approver} is not a reviewer of this request"
            )));
        }
        for role in request.entitlements() {
            let holders = self
                .repository
                .find_entitlement_holders(role, request.activation_type())
                .await?;
            if !holders.contains(approver) {
                return Err(Error::AccessDenied(format!(
                    "{approver} does not hold a reviewer privilege for {}",
                    role.id()
                )));
            }
        }
        Ok(())
    }
}
