use std::fmt::Formatter;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::InvalidPrincipal;

fn is_email_shaped(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, host)) => {
            !local.is_empty() && !host.is_empty() && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

macro_rules! email_identifier {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// Normalized to lowercase at construction so that equality,
        /// ordering, and hashing are case-insensitive.
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(email: &str) -> Result<Self, InvalidPrincipal> {
                let email = email.trim();
                if is_email_shaped(email) {
                    Ok(Self(email.to_lowercase()))
                } else {
                    Err(InvalidPrincipal(email.to_string()))
                }
            }

            pub fn email(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = InvalidPrincipal;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                String::deserialize(deserializer)?
                    .parse()
                    .map_err(DeError::custom)
            }
        }
    };
}

email_identifier!(UserId, "The email identity of an end user.");
email_identifier!(GroupId, "The email identity of a group.");
email_identifier!(
    ServiceAccountId,
    "The email identity of a service account."
);

/// A principal as it appears in a policy member list, such as
/// `user:alice@example.com` or `group:eng@example.com`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PrincipalId {
    User(UserId),
    Group(GroupId),
    ServiceAccount(ServiceAccountId),
}

impl PrincipalId {
    /// Parse a policy member string. Returns `None` for prefixes this
    /// broker does not interpret (`deleted:`, `domain:`, `allUsers`, ...)
    /// and for malformed emails.
    pub fn parse_member(member: &str) -> Option<Self> {
        let (prefix, email) = member.trim().split_once(':')?;
        match prefix.to_lowercase().as_str() {
            "user" => UserId::new(email).ok().map(Self::User),
            "group" => GroupId::new(email).ok().map(Self::Group),
            "serviceaccount" => ServiceAccountId::new(email).ok().map(Self::ServiceAccount),
            _ => None,
        }
    }

    /// Render back to the policy member form.
    pub fn to_member(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Group(id) => format!("group:{id}"),
            Self::ServiceAccount(id) => format!("serviceAccount:{id}"),
        }
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_member())
    }
}
