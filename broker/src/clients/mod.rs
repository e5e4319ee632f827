//! Interfaces to the broker's external collaborators.
//!
//! The core owns none of the transports; each collaborator is reached
//! through one of these traits, and tests supply in-memory
//! implementations (see `test_utils`).

pub mod analyzer;
pub mod directory;
pub mod inventory;
pub mod justification;
pub mod mailer;
pub mod resource_manager;
pub mod signer;

use serde::{Deserialize, Serialize};

pub use analyzer::PolicyAnalyzer;
pub use directory::Directory;
pub use inventory::AssetInventory;
pub use justification::{JustificationPolicy, RegexJustificationPolicy};
pub use mailer::{MailFlag, Mailer};
pub use resource_manager::{BindingOption, ResourceManager};
pub use signer::JwtOracle;

/// A condition attached to a role binding.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionExpression {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One role binding as it appears in a policy: a role, its members in
/// prefixed form (`user:`, `group:`, `serviceAccount:`), and an
/// optional condition.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub role: String,
    pub members: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionExpression>,
}
