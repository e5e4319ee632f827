use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use elevate_common::{Error, ProjectId};

use super::Binding;

/// The policy of one resource on the ancestry path of a project,
/// outermost resource first.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInfo {
    pub attached_resource: String,
    pub policy: Policy,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// The asset-inventory service: effective policies for a project,
/// including inherited bindings.
#[async_trait]
pub trait AssetInventory: Send + Sync {
    async fn get_effective_iam_policies(
        &self,
        scope: &str,
        project: &ProjectId,
    ) -> Result<Vec<PolicyInfo>, Error>;
}
