use std::fmt::Formatter;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InvalidActivationType;

/// How an eligibility may be turned into an active binding.
///
/// The topic carried by the peer and external variants partitions
/// approvals; an empty topic is a wildcard that matches any requested
/// topic.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ActivationType {
    /// Not activatable.
    None,
    /// The requesting user approves their own activation (JIT).
    SelfApproval,
    /// Approval by a peer holding the same eligibility (MPA).
    PeerApproval(String),
    /// Approval by an out-of-band reviewer.
    ExternalApproval(String),
}

impl ActivationType {
    /// Whether a stored activation type satisfies a requested one: the
    /// variants must agree and the topics must be equal, where an empty
    /// stored topic matches any requested topic.
    pub fn matches(&self, requested: &ActivationType) -> bool {
        match (self, requested) {
            (Self::None, Self::None) => true,
            (Self::SelfApproval, Self::SelfApproval) => true,
            (Self::PeerApproval(stored), Self::PeerApproval(requested))
            | (Self::ExternalApproval(stored), Self::ExternalApproval(requested)) => {
                stored.is_empty() || stored == requested
            }
            _ => false,
        }
    }

    /// Whether two activation types are the same variant, regardless of
    /// topic.
    pub fn same_variant(&self, other: &ActivationType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn requires_reviewers(&self) -> bool {
        matches!(self, Self::PeerApproval(_) | Self::ExternalApproval(_))
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::PeerApproval(topic) | Self::ExternalApproval(topic) => Some(topic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::SelfApproval => f.write_str("self_approval"),
            Self::PeerApproval(topic) if topic.is_empty() => f.write_str("peer_approval"),
            Self::PeerApproval(topic) => write!(f, "peer_approval:{topic}"),
            Self::ExternalApproval(topic) if topic.is_empty() => f.write_str("external_approval"),
            Self::ExternalApproval(topic) => write!(f, "external_approval:{topic}"),
        }
    }
}

impl FromStr for ActivationType {
    type Err = InvalidActivationType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, topic) = match s.split_once(':') {
            Some((name, topic)) => (name, topic),
            None => (s, ""),
        };
        match name {
            "none" if topic.is_empty() => Ok(Self::None),
            "self_approval" if topic.is_empty() => Ok(Self::SelfApproval),
            "peer_approval" => Ok(Self::PeerApproval(topic.to_string())),
            "external_approval" => Ok(Self::ExternalApproval(topic.to_string())),
            _ => Err(InvalidActivationType(s.to_string())),
        }
    }
}

impl Serialize for ActivationType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActivationType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(DeError::custom)
    }
}
