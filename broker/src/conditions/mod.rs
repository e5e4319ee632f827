//! Parser and classifier for policy condition expressions.
//!
//! A condition on a role binding is interpreted as one of three things:
//! an *eligibility* (a dormant binding a user may activate), an
//! *activation* (a provisioned, time-bounded binding), or nothing this
//! broker recognizes.

mod activation;
mod eligibility;
mod expression;

pub use activation::ActivationCondition;
pub use eligibility::EligibilityCondition;

/// Title carried by every binding this broker provisions; bindings with
/// this title are classified as activations.
pub const ACTIVATION_CONDITION_TITLE: &str = "JIT access";

/// A condition was recognized as one of ours but violates the grammar.
#[derive(Debug, thiserror::Error)]
#[error("Malformed policy condition: {0}")]
pub struct MalformedConditionError(pub(crate) String);

/// The interpretation of one policy condition.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicyCondition {
    /// Absent, empty, or not a condition this broker interprets.
    None,
    Eligibility(EligibilityCondition),
    Activation(ActivationCondition),
}

impl PolicyCondition {
    pub fn as_eligibility(&self) -> Option<&EligibilityCondition> {
        match self {
            Self::Eligibility(condition) => Some(condition),
            _ => None,
        }
    }
}

/// Classify a policy condition by title and expression.
///
/// Absent, empty, and unrecognized expressions are `None`; an
/// expression that carries a recognized marker or temporal clause but
/// violates the grammar fails with [`MalformedConditionError`]. Callers
/// surface such failures as warnings on the entitlement set rather than
/// aborting the listing.
pub fn classify(
    title: Option<&str>,
    expression: Option<&str>,
) -> Result<PolicyCondition, MalformedConditionError> {
    let expression = expression.map(str::trim).unwrap_or_default();
    if expression.is_empty() {
        // An empty expression is ignored even under the activation
        // title.
        return Ok(PolicyCondition::None);
    }

    if title.map(str::trim) == Some(ACTIVATION_CONDITION_TITLE) {
        if let Some(condition) = activation::parse(expression)? {
            return Ok(PolicyCondition::Activation(condition));
        }
    }

    match eligibility::parse(expression)? {
        Some(condition) => Ok(PolicyCondition::Eligibility(condition)),
        None => Ok(PolicyCondition::None),
    }
}
