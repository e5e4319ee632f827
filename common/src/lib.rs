pub mod activation;
pub mod error;
pub mod identifiers;
pub mod project;
pub mod span;

pub use activation::ActivationType;
pub use error::Error;
pub use identifiers::{GroupId, PrincipalId, ServiceAccountId, UserId};
pub use project::{ProjectId, ProjectRole, RoleBinding};
pub use span::TimeSpan;
