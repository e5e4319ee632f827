use regex::Regex;

use elevate_common::{Error, UserId};

/// Policy deciding whether a justification text is acceptable.
pub trait JustificationPolicy: Send + Sync {
    fn check_justification(&self, user: &UserId, justification: &str) -> Result<(), Error>;

    /// A hint describing the expected format, for request surfaces.
    fn hint(&self) -> String;
}

/// A justification policy that matches the text against a configured
/// pattern, such as a ticket-number format.
pub struct RegexJustificationPolicy {
    pattern: Regex,
    hint: String,
}

impl RegexJustificationPolicy {
    pub fn new(pattern: Regex, hint: impl Into<String>) -> Self {
        Self {
            pattern,
            hint: hint.into(),
        }
    }
}

impl JustificationPolicy for RegexJustificationPolicy {
    fn check_justification(&self, user: &UserId, justification: &str) -> Result<(), Error> {
        if self.pattern.is_match(justification.trim()) {
            Ok(())
        } else {
            tracing::debug!(%user, "rejected justification");
            Err(Error::InvalidJustification(format!(
                "expected: {}",
                self.hint
            )))
        }
    }

    fn hint(&self) -> String {
        self.hint.clone()
    }
}
