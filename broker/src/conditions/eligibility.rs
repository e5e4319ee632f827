use once_cell::sync::Lazy;
use regex::Regex;

use elevate_common::ActivationType;

use super::expression::{join_residual, split_top_level, unwrap_parens};
use super::MalformedConditionError;

/// An eligibility marker recognized in a policy condition expression.
///
/// The marker fragment is matched case- and whitespace-insensitively;
/// the topic segment, when present, keeps its original case.
static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^has\(\{\}\.(jitaccessconstraint|multipartyapprovalconstraint|externalapprovalconstraint|reviewerprivilege)(?:\.([A-Za-z0-9_]+))?\)$",
    )
    .expect("eligibility marker pattern is valid")
});

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Marker {
    Jit,
    Mpa,
    External,
    Reviewer,
}

/// A policy condition marking a dormant role binding as activatable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EligibilityCondition {
    marker: Marker,
    topic: Option<String>,
    resource_condition: Option<String>,
}

impl EligibilityCondition {
    pub fn is_jit_eligible(&self) -> bool {
        self.marker == Marker::Jit
    }

    pub fn is_mpa_eligible(&self) -> bool {
        self.marker == Marker::Mpa
    }

    /// Whether this condition marks a reviewer for external approvals
    /// rather than a requestable eligibility.
    pub fn is_reviewer(&self) -> bool {
        self.marker == Marker::Reviewer
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn resource_condition(&self) -> Option<&str> {
        self.resource_condition.as_deref()
    }

    /// The activation type this eligibility (or reviewer privilege)
    /// corresponds to. An absent topic maps to the empty-topic wildcard.
    pub fn activation_type(&self) -> ActivationType {
        let topic = self.topic.clone().unwrap_or_default();
        match self.marker {
            Marker::Jit => ActivationType::SelfApproval,
            Marker::Mpa => ActivationType::PeerApproval(topic),
            Marker::External | Marker::Reviewer => ActivationType::ExternalApproval(topic),
        }
    }
}

fn parse_marker(clause: &str) -> Option<(Marker, Option<String>)> {
    let stripped: String = unwrap_parens(clause)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let caps = MARKER.captures(&stripped)?;
    let marker = match caps[1].to_lowercase().as_str() {
        "jitaccessconstraint" => Marker::Jit,
        "multipartyapprovalconstraint" => Marker::Mpa,
        "externalapprovalconstraint" => Marker::External,
        "reviewerprivilege" => Marker::Reviewer,
        _ => unreachable!("pattern only captures known markers"),
    };
    let topic = caps.get(2).map(|topic| topic.as_str().to_string());
    Some((marker, topic))
}

/// Parse an expression as an eligibility condition.
///
/// An expression without any marker is not an eligibility (`None`); an
/// expression carrying a marker must consist of exactly that marker
/// plus an optional resource sub-condition.
pub(crate) fn parse(
    expression: &str,
) -> Result<Option<EligibilityCondition>, MalformedConditionError> {
    let mut marker: Option<(Marker, Option<String>)> = None;
    let mut residual_clauses: Vec<&str> = Vec::new();

    for clause in split_top_level(expression, &["&&"]) {
        match parse_marker(clause) {
            Some(parsed) => {
                if marker.is_some() {
                    return Err(MalformedConditionError(format!(
                        "more than one eligibility marker in: {expression}"
                    )));
                }
                marker = Some(parsed);
            }
            None => residual_clauses.push(clause),
        }
    }

    let Some((marker, topic)) = marker else {
        return Ok(None);
    };
    let resource_condition = if residual_clauses.is_empty() {
        None
    } else {
        Some(join_residual(&residual_clauses)?)
    };

    Ok(Some(EligibilityCondition {
        marker,
        topic,
        resource_condition,
    }))
}
