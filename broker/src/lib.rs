//! Entitlement catalog and activation engine.
//!
//! End users hold *eligible* (dormant) role bindings on projects; this
//! crate discovers those eligibilities by parsing conditional policy
//! bindings, validates activation requests against duration and
//! reviewer constraints, carries multi-party requests across trust
//! boundaries as signed tokens, and provisions the resulting
//! time-bounded bindings through the policy mutator.
//!
//! Transports, audit sinks, and the raw cloud clients live elsewhere;
//! they reach this crate exclusively through the interfaces in
//! [`clients`].

pub mod activator;
pub mod catalog;
pub mod clients;
pub mod conditions;
pub mod proposal;
pub mod repository;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod token;

pub use activator::{Activation, ActivationRequest, Activator, UserContext};
pub use catalog::{Catalog, CatalogOptions};
pub use proposal::{ProposalHandler, ProposalHandlerOptions};
pub use token::{ProposalToken, TokenPayload, TokenSigner};
