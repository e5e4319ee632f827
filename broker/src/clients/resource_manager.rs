use std::collections::BTreeSet;

use async_trait::async_trait;

use elevate_common::{Error, ProjectId};

use super::Binding;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BindingOption {
    /// Atomically remove any pre-existing binding for the same member
    /// and role whose condition title is the activation sentinel, so
    /// that repeated activations do not accumulate bindings.
    PurgeExistingTemporaryBindings,
}

/// The resource-manager service: project search and policy mutation.
///
/// The mutation is idempotent over the (member, role, window) tuple;
/// concurrent activations on the same member and role are serialized by
/// the purge semantics, last writer winning on the window.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Projects matching a configured search query.
    async fn search_project_ids(&self, query: &str) -> Result<BTreeSet<ProjectId>, Error>;

    /// Add a conditional binding to a project policy. The rationale is
    /// recorded with the policy delta for audit.
    async fn add_project_iam_binding(
        &self,
        project: &ProjectId,
        binding: &Binding,
        options: &BTreeSet<BindingOption>,
        rationale: &str,
    ) -> Result<(), Error>;
}
