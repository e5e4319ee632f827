use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{instrument, warn};

use elevate_common::{ActivationType, Error, PrincipalId, ProjectId, ProjectRole, UserId};

use crate::clients::inventory::AssetInventory;
use crate::clients::{Binding, Directory};
use crate::conditions::{classify, PolicyCondition};

use super::{
    holds_approver_privilege, EntitlementRepository, EntitlementSet, EntitlementSetBuilder,
    PrivilegeStatus, RepositoryOptions,
};

/// Entitlement discovery over the asset-inventory service.
///
/// The inventory returns the effective policies on a project's ancestry
/// path, outermost resource first, without any per-user filtering or
/// group expansion; this repository performs both, expanding groups one
/// hop through the directory.
pub struct AssetInventoryRepository {
    inventory: Arc<dyn AssetInventory>,
    directory: Arc<dyn Directory>,
    options: RepositoryOptions,
}

impl AssetInventoryRepository {
    pub fn new(
        inventory: Arc<dyn AssetInventory>,
        directory: Arc<dyn Directory>,
        options: RepositoryOptions,
    ) -> Self {
        Self {
            inventory,
            directory,
            options,
        }
    }

    /// Bindings on the project that apply to the user, either directly
    /// or through one of their direct groups. Bindings matched directly
    /// sort before bindings matched via groups; both preserve upstream
    /// order (outermost resource first).
    ///
    /// The policy fetch and the group lookup run concurrently; both
    /// must succeed.
    #[instrument(skip(self))]
    pub async fn find_project_bindings(
        &self,
        user: &UserId,
        project: &ProjectId,
    ) -> Result<Vec<Binding>, Error> {
        let (policies, groups) = futures::try_join!(
            self.inventory
                .get_effective_iam_policies(&self.options.scope, project),
            self.directory.list_direct_group_memberships(user),
        )?;

        let user_principal = PrincipalId::User(user.clone());
        let group_principals: HashSet<PrincipalId> =
            groups.into_iter().map(PrincipalId::Group).collect();

        let mut direct = Vec::new();
        let mut via_groups = Vec::new();
        for info in &policies {
            for binding in &info.policy.bindings {
                let members: Vec<PrincipalId> = binding
                    .members
                    .iter()
                    .filter_map(|member| PrincipalId::parse_member(member))
                    .collect();
                if members.contains(&user_principal) {
                    direct.push(binding.clone());
                } else if members
                    .iter()
                    .any(|member| group_principals.contains(member))
                {
                    via_groups.push(binding.clone());
                }
            }
        }
        direct.extend(via_groups);
        Ok(direct)
    }
}

#[async_trait]
impl EntitlementRepository for AssetInventoryRepository {
    async fn find_projects_with_entitlements(
        &self,
        _user: &UserId,
    ) -> Result<BTreeSet<ProjectId>, Error> {
        // The inventory is a per-project API; discovery needs the
        // catalog's project search query instead.
        Err(Error::MalformedRequest(
            "project discovery is not supported on this policy source, configure a project search query"
                .to_string(),
        ))
    }

    #[instrument(skip(self, types, statuses))]
    async fn find_entitlements(
        &self,
        user: &UserId,
        project: &ProjectId,
        types: &[ActivationType],
        statuses: &[PrivilegeStatus],
    ) -> Result<EntitlementSet, Error> {
        let bindings = self.find_project_bindings(user, project).await?;

        let mut builder = EntitlementSetBuilder::default();
        for binding in &bindings {
            let Some(condition) = binding.condition.as_ref() else {
                continue;
            };
            match classify(condition.title.as_deref(), condition.expression.as_deref()) {
                Ok(PolicyCondition::Eligibility(eligibility)) if !eligibility.is_reviewer() => {
                    let mut role = ProjectRole::new(project.clone(), &binding.role);
                    if let Some(narrowing) = eligibility.resource_condition() {
                        role = role.with_resource_condition(narrowing);
                    }
                    builder.add_eligibility(role, eligibility.activation_type());
                }
                Ok(PolicyCondition::Eligibility(_)) => {}
                Ok(PolicyCondition::Activation(activation)) => {
                    builder.add_activation(
                        ProjectRole::new(project.clone(), &binding.role),
                        activation.span(),
                    );
                }
                Ok(PolicyCondition::None) => {
                    builder.add_warning(format!(
                        "unrecognized condition on {project} for {}",
                        binding.role
                    ));
                }
                Err(err) => {
                    builder.add_warning(format!("{project}: {err}"));
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
        let policies = self
            .inventory
            .get_effective_iam_policies(&self.options.scope, role.project())
            .await?;

        let mut holders = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for info in &policies {
            for binding in &info.policy.bindings {
                if binding.role != role.role() {
                    continue;
                }
                let Some(condition) = binding.condition.as_ref() else {
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
                for member in &binding.members {
                    match PrincipalId::parse_member(member) {
                        Some(PrincipalId::User(user)) => {
                            holders.insert(user);
                        }
                        Some(PrincipalId::Group(group)) => {
                            groups.insert(group);
                        }
                        _ => {}
                    }
                }
            }
        }

        // One-hop expansion with bounded fan-out. A group the broker
        // cannot read drops out with a warning.
        let expansions: Vec<_> = stream::iter(groups.into_iter().map(|group| {
            let directory = self.directory.clone();
            async move {
                let members = directory.list_direct_group_members(&group).await;
                (group, members)
            }
        }))
        .buffer_unordered(self.options.parallelism.max(1))
        .collect()
        .await;

        for (group, members) in expansions {
            match members {
                Ok(members) => holders.extend(members),
                Err(err) => {
                    warn!(
                        %group,
                        error = &err as &dyn std::error::Error,
                        "skipping group that could not be expanded"
                    );
                }
            }
        }
        Ok(holders)
    }
}
