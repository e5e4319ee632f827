use async_trait::async_trait;

use elevate_common::{Error, GroupId, UserId};

/// The directory service used for group expansion.
///
/// Expansion is one hop by design: members of directly nested groups
/// are not resolved.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Groups the user is a direct member of.
    async fn list_direct_group_memberships(&self, user: &UserId) -> Result<Vec<GroupId>, Error>;

    /// Direct user members of a group. May fail with `AccessDenied` for
    /// groups the broker cannot read; callers treat that as non-fatal.
    async fn list_direct_group_members(&self, group: &GroupId) -> Result<Vec<UserId>, Error>;
}
