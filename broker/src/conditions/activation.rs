use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use elevate_common::TimeSpan;

use super::expression::{join_residual, split_top_level, unwrap_parens};
use super::MalformedConditionError;

/// The temporal clause of an activation binding, with its outer
/// parentheses stripped.
static TEMPORAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^request\.time\s*>=\s*timestamp\(\s*"([^"]+)"\s*\)\s*&&\s*request\.time\s*<\s*timestamp\(\s*"([^"]+)"\s*\)$"#,
    )
    .expect("temporal clause pattern is valid")
});

/// A policy condition bounding a provisioned binding to a time window.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActivationCondition {
    span: TimeSpan,
    resource_condition: Option<String>,
}

impl ActivationCondition {
    pub fn span(&self) -> TimeSpan {
        self.span
    }

    pub fn resource_condition(&self) -> Option<&str> {
        self.resource_condition.as_deref()
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MalformedConditionError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| MalformedConditionError(format!("invalid timestamp {value:?}: {err}")))
}

/// Parse an expression as an activation condition. Returns `None` when
/// no temporal clause is present; a present temporal clause must carry
/// valid timestamps and, at most, a resource sub-condition.
pub(crate) fn parse(
    expression: &str,
) -> Result<Option<ActivationCondition>, MalformedConditionError> {
    let mut window: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    let mut residual_clauses: Vec<&str> = Vec::new();

    for clause in split_top_level(expression, &["&&"]) {
        match TEMPORAL.captures(unwrap_parens(clause)) {
            Some(caps) => {
                if window.is_some() {
                    return Err(MalformedConditionError(format!(
                        "more than one temporal clause in: {expression}"
                    )));
                }
                window = Some((parse_timestamp(&caps[1])?, parse_timestamp(&caps[2])?));
            }
            None => residual_clauses.push(clause),
        }
    }

    let Some((start, end)) = window else {
        return Ok(None);
    };
    let resource_condition = if residual_clauses.is_empty() {
        None
    } else {
        Some(join_residual(&residual_clauses)?)
    };

    Ok(Some(ActivationCondition {
        span: TimeSpan::new(start, end),
        resource_condition,
    }))
}
