use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use elevate_common::{ActivationType, Error, PrincipalId, ProjectId, ProjectRole, UserId};

use crate::clients::analyzer::{AnalysisResult, ConditionEvaluation, PolicyAnalyzer};
use crate::conditions::{classify, PolicyCondition};

use super::{
    holds_approver_privilege, EntitlementRepository, EntitlementSet, EntitlementSetBuilder,
    PrivilegeStatus, RepositoryOptions, PROJECT_DISCOVERY_PERMISSION,
};

/// Entitlement discovery over the policy-analyzer service.
///
/// The analyzer searches per user, expands groups on our behalf, and
/// reports inherited bindings with an access-control list enumerating
/// the effective child resources.
pub struct PolicyAnalyzerRepository {
    client: Arc<dyn PolicyAnalyzer>,
    options: RepositoryOptions,
}

impl PolicyAnalyzerRepository {
    pub fn new(client: Arc<dyn PolicyAnalyzer>, options: RepositoryOptions) -> Self {
        Self { client, options }
    }

    /// Projects one analysis result applies to: the attached resource
    /// when it is itself a project, plus every effective project the
    /// access-control list enumerates (inherited bindings attach to a
    /// folder or organization instead).
    fn candidate_projects(result: &AnalysisResult) -> Vec<ProjectId> {
        let mut projects = Vec::new();
        if let Some(project) = ProjectId::from_resource_name(&result.attached_resource) {
            projects.push(project);
        }
        for acl in &result.access_control_lists {
            for resource in &acl.resources {
                if resource.evaluation == ConditionEvaluation::False {
                    continue;
                }
                if let Some(project) = ProjectId::from_resource_name(&resource.full_resource_name)
                {
                    if !projects.contains(&project) {
                        projects.push(project);
                    }
                }
            }
        }
        projects
    }

    fn is_unconditional(result: &AnalysisResult) -> bool {
        match &result.iam_binding.condition {
            None => true,
            Some(condition) => condition
                .expression
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty(),
        }
    }
}

#[async_trait]
impl EntitlementRepository for PolicyAnalyzerRepository {
    #[instrument(skip(self))]
    async fn find_projects_with_entitlements(
        &self,
        user: &UserId,
    ) -> Result<BTreeSet<ProjectId>, Error> {
        let response = self
            .client
            .find_accessible_resources_by_user(
                &self.options.scope,
                user,
                Some(PROJECT_DISCOVERY_PERMISSION),
                None,
                true,
            )
            .await?;

        let mut projects = BTreeSet::new();
        for result in &response.results {
            let eligible = Self::is_unconditional(result)
                || result.iam_binding.condition.as_ref().is_some_and(|c| {
                    matches!(
                        classify(c.title.as_deref(), c.expression.as_deref()),
                        Ok(PolicyCondition::Eligibility(_))
                    )
                });
            if eligible {
                projects.extend(Self::candidate_projects(result));
            }
        }
        Ok(projects)
    }

    #[instrument(skip(self, types, statuses))]
    async fn find_entitlements(
        &self,
        user: &UserId,
        project: &ProjectId,
        types: &[ActivationType],
        statuses: &[PrivilegeStatus],
    ) -> Result<EntitlementSet, Error> {
        let response = self
            .client
            .find_accessible_resources_by_user(
                &self.options.scope,
                user,
                None,
                Some(&project.full_resource_name()),
                false,
            )
            .await?;

        let mut builder = EntitlementSetBuilder::default();
        for warning in response.non_critical_errors {
            builder.add_warning(warning);
        }

        for result in &response.results {
            let Some(condition) = result.iam_binding.condition.as_ref() else {
                // Unconditional bindings are held, not activatable.
                continue;
            };
            match classify(condition.title.as_deref(), condition.expression.as_deref()) {
                Ok(PolicyCondition::Eligibility(eligibility)) if !eligibility.is_reviewer() => {
                    for project in Self::candidate_projects(result) {
                        let mut role = ProjectRole::new(project, &result.iam_binding.role);
                        if let Some(narrowing) = eligibility.resource_condition() {
                            role = role.with_resource_condition(narrowing);
                        }
                        builder.add_eligibility(role, eligibility.activation_type());
                    }
                }
                // Reviewer privileges are approver-side; they are not
                // listed as requestable.
                Ok(PolicyCondition::Eligibility(_)) => {}
                Ok(PolicyCondition::Activation(activation)) => {
                    for project in Self::candidate_projects(result) {
                        builder.add_activation(
                            ProjectRole::new(project, &result.iam_binding.role),
                            activation.span(),
                        );
                    }
                }
                Ok(PolicyCondition::None) => {
                    builder.add_warning(format!(
                        "unrecognized condition on {} for {}",
                        result.attached_resource, result.iam_binding.role
                    ));
                }
                Err(err) => {
                    builder.add_warning(format!("{}: {err}", result.attached_resource));
                }
            }
        }

        Ok(builder.build(types, statuses, Utc::now()))
    }

    #[instrument(skip(self))]
    async fn find_entitlement_holders(
        &self,
        role: &ProjectRole,
        activation_type: &ActivationType,
    ) -> Result<BTreeSet<UserId>, Error> {
        let response = self
            .client
            .find_permissioned_principals_by_resource(
                &self.options.scope,
                &role.project().full_resource_name(),
                role.role(),
            )
            .await?;

        let mut holders = BTreeSet::new();
        for result in &response.results {
            if result.iam_binding.role != role.role() {
                continue;
            }
            let Some(condition) = result.iam_binding.condition.as_ref() else {
                continue;
            };
            let Ok(PolicyCondition::Eligibility(eligibility)) =
                classify(condition.title.as_deref(), condition.expression.as_deref())
            else {
                continue;
            };
            if !holds_approver_privilege(&eligibility, activation_type) {
                continue;
            }

            for member in &result.iam_binding.members {
                match PrincipalId::parse_member(member) {
                    Some(PrincipalId::User(user)) => {
                        holders.insert(user);
                    }
                    Some(PrincipalId::Group(_)) => {
                        // The analyzer's identity list carries the
                        // expanded membership.
                        if let Some(identities) = &result.identity_list {
                            for identity in &identities.identities {
                                if let Some(PrincipalId::User(user)) =
                                    PrincipalId::parse_member(&identity.name)
                                {
                                    holders.insert(user);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(holders)
    }
}
