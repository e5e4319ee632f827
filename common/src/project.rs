use std::fmt::Formatter;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{InvalidProjectId, InvalidRoleId};

/// Prefix of the canonical full resource name of a project.
pub const PROJECT_RESOURCE_PREFIX: &str = "//cloudresourcemanager.googleapis.com/projects/";

/// Prefix used by the stable string id of a [`ProjectRole`].
const ROLE_ID_PREFIX: &str = "iam";

/// An opaque project slug, such as `project-1`.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: &str) -> Result<Self, InvalidProjectId> {
        let id = id.trim();
        if !id.is_empty()
            && !id.contains('/')
            && !id.contains(':')
            && !id.contains(char::is_whitespace)
        {
            Ok(Self(id.to_string()))
        } else {
            Err(InvalidProjectId(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The canonical full resource name, derived by prefix concatenation.
    pub fn full_resource_name(&self) -> String {
        format!("{PROJECT_RESOURCE_PREFIX}{}", self.0)
    }

    /// Extract a project from a resource name. Accepts the canonical
    /// full form and the bare `projects/{id}` path form; anything else
    /// (folders, organizations, sub-resources) returns `None`.
    pub fn from_resource_name(name: &str) -> Option<Self> {
        let path = name
            .strip_prefix(PROJECT_RESOURCE_PREFIX)
            .or_else(|| name.strip_prefix("projects/"))?;
        Self::new(path).ok()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for ProjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(DeError::custom)
    }
}

/// A role granted on a project, without any condition.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RoleBinding {
    pub project: ProjectId,
    pub role: String,
}

/// A role on a project, optionally narrowed by a resource condition
/// carried over from the originating policy binding.
///
/// The stable string id is `iam:{project}:{role}`; the resource
/// condition is not part of the id, and the id is also the serialized
/// form.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProjectRole {
    project: ProjectId,
    role: String,
    resource_condition: Option<String>,
}

impl ProjectRole {
    pub fn new(project: ProjectId, role: impl Into<String>) -> Self {
        Self {
            project,
            role: role.into(),
            resource_condition: None,
        }
    }

    pub fn with_resource_condition(mut self, condition: impl Into<String>) -> Self {
        self.resource_condition = Some(condition.into());
        self
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn resource_condition(&self) -> Option<&str> {
        self.resource_condition.as_deref()
    }

    /// The stable, comparable id of this entitlement.
    pub fn id(&self) -> String {
        format!("{ROLE_ID_PREFIX}:{}:{}", self.project, self.role)
    }

    /// The underlying (project, role) pair, without the resource
    /// condition. Duplicate candidates for the same pair merge on it.
    pub fn binding_key(&self) -> RoleBinding {
        RoleBinding {
            project: self.project.clone(),
            role: self.role.clone(),
        }
    }
}

impl std::fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for ProjectRole {
    type Err = InvalidRoleId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ROLE_ID_PREFIX), Some(project), Some(role)) if !role.is_empty() => {
                let project = ProjectId::new(project).map_err(|_| InvalidRoleId(s.to_string()))?;
                Ok(Self::new(project, role))
            }
            _ => Err(InvalidRoleId(s.to_string())),
        }
    }
}

impl Serialize for ProjectRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.id())
    }
}

impl<'de> Deserialize<'de> for ProjectRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(DeError::custom)
    }
}
