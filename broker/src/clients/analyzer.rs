use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use elevate_common::{Error, UserId};

use super::Binding;

/// One analysis result: a binding attached to a resource, the effective
/// resources it grants access to, and (when expansion was requested)
/// the principals it matched.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Full resource name the binding is attached to; may be a folder
    /// or organization for inherited bindings.
    pub attached_resource: String,
    pub iam_binding: Binding,
    #[serde(default)]
    pub access_control_lists: Vec<AccessControlList>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_list: Option<IdentityList>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlList {
    pub resources: Vec<ResourceAccess>,
}

/// An effective resource with the analyzer's verdict on the binding's
/// condition for that resource.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAccess {
    pub full_resource_name: String,
    pub evaluation: ConditionEvaluation,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionEvaluation {
    /// The condition could not be evaluated statically; dormant
    /// eligibilities evaluate to this.
    Conditional,
    True,
    False,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityList {
    pub identities: Vec<Identity>,
}

/// A matched principal in policy member form, expanded transitively by
/// the analyzer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    #[serde(default)]
    pub results: Vec<AnalysisResult>,
    /// Upstream analysis warnings; carried into the entitlement set.
    #[serde(default)]
    pub non_critical_errors: Vec<String>,
}

/// The policy-analyzer service: per-user search over conditional
/// bindings.
#[async_trait]
pub trait PolicyAnalyzer: Send + Sync {
    /// Find resources a user has (possibly conditional) access to under
    /// the given scope.
    async fn find_accessible_resources_by_user(
        &self,
        scope: &str,
        user: &UserId,
        permission_filter: Option<&str>,
        resource_filter: Option<&str>,
        expand_groups: bool,
    ) -> Result<AnalysisResponse, Error>;

    /// Find principals that hold the given role on a resource.
    async fn find_permissioned_principals_by_resource(
        &self,
        scope: &str,
        resource: &str,
        role: &str,
    ) -> Result<AnalysisResponse, Error>;
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
