use http::StatusCode;

/// The error taxonomy shared by all broker components.
///
/// Classification failures on individual policy bindings and lookup
/// failures on individual groups are *warnings* on the entitlement set,
/// not variants of this enum.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An authorization check failed: the caller is not eligible, not a
    /// reviewer, or otherwise not permitted. Never retried.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The justification text was rejected by the justification policy.
    #[error("Invalid justification: {0}")]
    InvalidJustification(String),

    /// Duration or reviewer constraints were violated, or an identifier
    /// could not be parsed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Upstream credentials were missing or rejected.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// A queried project, role, or policy does not exist.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Signature, issuer, audience, or expiry verification failed. The
    /// message is deliberately opaque.
    #[error("Token verification failed")]
    TokenVerification,

    /// A network failure, timeout, or 5xx from a collaborator. The core
    /// does not retry; callers may.
    #[error("Transient upstream failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// Composite wrapper raised when a fan-out produced more than one
    /// failure. All children are included verbatim.
    #[error("Multiple operations failed: [{}]", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<Error>),
}

impl Error {
    /// Collapse the failures of a fan-out: empty is a programmer bug, a
    /// single failure is surfaced directly, anything more is aggregated.
    pub fn aggregate(mut errors: Vec<Error>) -> Error {
        match errors.len() {
            0 => panic!("aggregating an empty error set"),
            1 => errors.remove(0),
            _ => Error::Aggregate(errors),
        }
    }

    pub fn transient(error: impl Into<anyhow::Error>) -> Error {
        Error::Transient(error.into())
    }

    /// The HTTP-equivalent status of this error, for transports that
    /// need one.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::AccessDenied(_) | Error::TokenVerification => StatusCode::FORBIDDEN,
            Error::InvalidJustification(_) | Error::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotAuthenticated(_) => StatusCode::UNAUTHORIZED,
            Error::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Aggregate(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid principal identifier: {0}")]
pub struct InvalidPrincipal(pub String);

#[derive(Debug, thiserror::Error)]
#[error("Invalid project identifier: {0}")]
pub struct InvalidProjectId(pub String);

#[derive(Debug, thiserror::Error)]
#[error("Invalid role identifier: {0}")]
pub struct InvalidRoleId(pub String);

#[derive(Debug, thiserror::Error)]
#[error("Invalid activation type: {0}")]
pub struct InvalidActivationType(pub String);

impl From<InvalidPrincipal> for Error {
    fn from(err: InvalidPrincipal) -> Self {
        Error::MalformedRequest(err.to_string())
    }
}

impl From<InvalidProjectId> for Error {
    fn from(err: InvalidProjectId) -> Self {
        Error::MalformedRequest(err.to_string())
    }
}

impl From<InvalidRoleId> for Error {
    fn from(err: InvalidRoleId) -> Self {
        Error::MalformedRequest(err.to_string())
    }
}

impl From<InvalidActivationType> for Error {
    fn from(err: InvalidActivationType) -> Self {
        Error::MalformedRequest(err.to_string())
    }
}
