//! Entitlement discovery over the two supported policy sources.
//!
//! Both repository variants classify raw policy bindings through
//! [`crate::conditions`] and merge the candidates into an
//! [`EntitlementSet`] under the same deterministic rules.

mod analyzer;
mod inventory;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use elevate_common::{ActivationType, Error, ProjectId, ProjectRole, TimeSpan, UserId};

use crate::conditions::EligibilityCondition;

pub use analyzer::PolicyAnalyzerRepository;
pub use inventory::AssetInventoryRepository;

/// Permission used to discover projects a user can see at all.
pub const PROJECT_DISCOVERY_PERMISSION: &str = "resourcemanager.projects.get";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivilegeStatus {
    /// May be requested.
    Available,
    /// Currently provisioned, with a validity span.
    Active,
    /// Past provisioning; retained for display.
    Expired,
}

/// One privilege a user may request (or, for reviewers, approve).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RequesterPrivilege {
    pub role: ProjectRole,
    /// Display name; the role itself unless policy supplies better.
    pub name: String,
    pub activation_type: ActivationType,
    pub status: PrivilegeStatus,
    pub validity: Option<TimeSpan>,
}

/// The merged view over a user's policy bindings for one project.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct EntitlementSet {
    /// Requestable privileges, one per (project, role).
    pub available: Vec<RequesterPrivilege>,
    /// Live provisioned windows, end in the future.
    pub current_activations: BTreeMap<ProjectRole, TimeSpan>,
    /// Past provisioned windows, retained for display and audit.
    pub expired_activations: BTreeMap<ProjectRole, TimeSpan>,
    /// Bindings that could not be interpreted. Never fatal.
    pub warnings: Vec<String>,
}

impl EntitlementSet {
    pub fn is_empty(&self) -> bool {
        self.available.is_empty()
            && self.current_activations.is_empty()
            && self.expired_activations.is_empty()
            && self.warnings.is_empty()
    }
}

/// Rank used to resolve duplicate eligibility candidates for one role:
/// self-approval beats peer approval beats external approval.
fn rank(activation_type: &ActivationType) -> u8 {
    match activation_type {
        ActivationType::SelfApproval => 0,
        ActivationType::PeerApproval(_) => 1,
        ActivationType::ExternalApproval(_) => 2,
        ActivationType::None => 3,
    }
}

/// Accumulates classified candidates and applies the merge rules.
#[derive(Default)]
pub(crate) struct EntitlementSetBuilder {
    eligibilities: Vec<(ProjectRole, ActivationType)>,
    activations: Vec<(ProjectRole, TimeSpan)>,
    warnings: Vec<String>,
}

impl EntitlementSetBuilder {
    pub fn add_eligibility(&mut self, role: ProjectRole, activation_type: ActivationType) {
        self.eligibilities.push((role, activation_type));
    }

    pub fn add_activation(&mut self, role: ProjectRole, span: TimeSpan) {
        self.activations.push((role, span));
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn build(
        self,
        types: &[ActivationType],
        statuses: &[PrivilegeStatus],
        now: DateTime<Utc>,
    ) -> EntitlementSet {
        let mut set = EntitlementSet {
            warnings: self.warnings,
            ..Default::default()
        };

        if statuses.contains(&PrivilegeStatus::Available) {
            // One winner per (project, role): the lowest rank, source
            // order breaking ties.
            let mut available: BTreeMap<String, RequesterPrivilege> = BTreeMap::new();
            for (role, activation_type) in self.eligibilities {
                if !types.iter().any(|t| t.same_variant(&activation_type)) {
                    continue;
                }
                let privilege = RequesterPrivilege {
                    name: role.role().to_string(),
                    role,
                    activation_type,
                    status: PrivilegeStatus::Available,
                    validity: None,
                };
                match available.entry(privilege.role.id()) {
                    std::collections::btree_map::Entry::Vacant(entry) => {
                        entry.insert(privilege);
                    }
                    std::collections::btree_map::Entry::Occupied(mut entry) => {
                        if rank(&privilege.activation_type) < rank(&entry.get().activation_type) {
                            entry.insert(privilege);
                        }
                    }
                }
            }
            set.available = available.into_values().collect();
        }

        for (role, span) in self.activations {
            let bucket = if span.has_ended(now) {
                if !statuses.contains(&PrivilegeStatus::Expired) {
                    continue;
                }
                &mut set.expired_activations
            } else {
                if !statuses.contains(&PrivilegeStatus::Active) {
                    continue;
                }
                &mut set.current_activations
            };
            // The latest-ending window wins for one role.
            bucket
                .entry(role)
                .and_modify(|existing| {
                    if span.end > existing.end {
                        *existing = span;
                    }
                })
                .or_insert(span);
        }

        set
    }
}

/// Whether an eligibility marks its holders as approvers for the given
/// activation type: peers for peer approval, reviewer-privilege holders
/// for external approval.
pub(crate) fn holds_approver_privilege(
    eligibility: &EligibilityCondition,
    activation_type: &ActivationType,
) -> bool {
    match activation_type {
        ActivationType::PeerApproval(_) => {
            eligibility.is_mpa_eligible()
                && eligibility.activation_type().matches(activation_type)
        }
        ActivationType::ExternalApproval(_) => {
            eligibility.is_reviewer() && eligibility.activation_type().matches(activation_type)
        }
        ActivationType::SelfApproval | ActivationType::None => false,
    }
}

/// Options shared by the repository variants.
#[derive(Clone, Debug)]
pub struct RepositoryOptions {
    /// Organization scope queries run under, such as `organizations/1`.
    pub scope: String,
    /// Bound on concurrent fan-out to external services.
    pub parallelism: usize,
}

impl RepositoryOptions {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            parallelism: default_parallelism(),
        }
    }
}

pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Entitlement discovery over one policy source.
#[async_trait]
pub trait EntitlementRepository: Send + Sync {
    /// Projects on which the user holds at least one eligibility.
    async fn find_projects_with_entitlements(
        &self,
        user: &UserId,
    ) -> Result<BTreeSet<ProjectId>, Error>;

    /// The user's entitlements on one project, filtered by activation
    /// type variant and status.
    async fn find_entitlements(
        &self,
        user: &UserId,
        project: &ProjectId,
        types: &[ActivationType],
        statuses: &[PrivilegeStatus],
    ) -> Result<EntitlementSet, Error>;

    /// Users that can approve an activation of the given role: peers
    /// for peer approval, reviewer-privilege holders for external
    /// approval. The caller is responsible for excluding the requester.
    async fn find_entitlement_holders(
        &self,
        role: &ProjectRole,
        activation_type: &ActivationType,
    ) -> Result<BTreeSet<UserId>, Error>;
}
