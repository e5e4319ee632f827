//! Lexical helpers for the small condition grammar: top-level clause
//! splitting, parenthesis stripping, and validation of resource
//! sub-conditions.

use super::MalformedConditionError;

const COMPARISON_OPERATORS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

/// Split an expression on the given separators, ignoring occurrences
/// inside parentheses and string literals. The returned clauses are
/// trimmed.
pub(crate) fn split_top_level<'a>(expression: &'a str, separators: &[&str]) -> Vec<&'a str> {
    let chars: Vec<(usize, char)> = expression.char_indices().collect();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    let mut idx = 0usize;

    while idx < chars.len() {
        let (pos, c) = chars[idx];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            idx += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                idx += 1;
            }
            '(' => {
                depth += 1;
                idx += 1;
            }
            ')' => {
                depth = depth.saturating_sub(1);
                idx += 1;
            }
            _ if depth == 0 => {
                if let Some(sep) = separators
                    .iter()
                    .find(|sep| expression[pos..].starts_with(**sep))
                {
                    parts.push(expression[start..pos].trim());
                    idx += sep.chars().count();
                    start = pos + sep.len();
                } else {
                    idx += 1;
                }
            }
            _ => idx += 1,
        }
    }

    parts.push(expression[start..].trim());
    parts
}

/// Strip outer parentheses as long as they wrap the entire clause.
pub(crate) fn unwrap_parens(clause: &str) -> &str {
    let mut clause = clause.trim();
    while let Some(inner) = clause
        .strip_prefix('(')
        .and_then(|c| c.strip_suffix(')'))
        .filter(|inner| is_balanced(inner))
    {
        clause = inner.trim();
    }
    clause
}

fn is_balanced(clause: &str) -> bool {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in clause.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Collapse whitespace runs to single spaces.
pub(crate) fn normalize(clause: &str) -> String {
    clause.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Find the first top-level comparison operator outside string literals.
fn find_operator(atom: &str) -> Option<(usize, &'static str)> {
    let chars: Vec<(usize, char)> = atom.char_indices().collect();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for &(pos, c) in &chars {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                if let Some(op) = COMPARISON_OPERATORS
                    .iter()
                    .find(|op| atom[pos..].starts_with(**op))
                {
                    return Some((pos, *op));
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether a clause is a boolean of the form `a <op> b`, possibly
/// and/or-joined and parenthesized.
fn is_boolean_expression(expression: &str) -> bool {
    let expression = unwrap_parens(expression);
    let atoms = split_top_level(expression, &["&&", "||"]);
    if atoms.len() > 1 {
        return atoms
            .iter()
            .all(|atom| !atom.is_empty() && is_boolean_expression(atom));
    }
    match find_operator(expression) {
        Some((pos, op)) => {
            let lhs = expression[..pos].trim();
            let rhs = expression[pos + op.len()..].trim();
            !lhs.is_empty() && !rhs.is_empty() && find_operator(rhs).is_none()
        }
        None => false,
    }
}

/// Validate and normalize the residual of a condition as a resource
/// sub-condition. Outer parentheses are stripped and whitespace runs
/// collapse to single spaces; the text is otherwise kept verbatim.
pub(crate) fn parse_resource_condition(residual: &str) -> Result<String, MalformedConditionError> {
    let residual = unwrap_parens(residual);
    if residual.is_empty() || !is_boolean_expression(residual) {
        return Err(MalformedConditionError(format!(
            "unrecognized resource condition: {residual}"
        )));
    }
    Ok(normalize(residual))
}

fn contains_top_level_or(clause: &str) -> bool {
    split_top_level(clause, &["||"]).len() > 1
}

/// Join residual clauses back into one resource sub-condition,
/// re-parenthesizing clauses whose top-level `||` would otherwise bind
/// across the join.
pub(crate) fn join_residual(clauses: &[&str]) -> Result<String, MalformedConditionError> {
    let mut parts = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let parsed = parse_resource_condition(clause)?;
        if clauses.len() > 1 && contains_top_level_or(&parsed) {
            parts.push(format!("({parsed})"));
        } else {
            parts.push(parsed);
        }
    }
    Ok(parts.join(" && "))
}
