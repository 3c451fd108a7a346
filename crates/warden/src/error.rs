use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Phase of the authentication lifecycle an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Login,
    Renew,
    Revoke,
    SelfLookup,
    Unwrap,
}

impl std::fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            AuthPhase::Login => "login",
            AuthPhase::Renew => "renew",
            AuthPhase::Revoke => "revoke",
            AuthPhase::SelfLookup => "self-lookup",
            AuthPhase::Unwrap => "unwrap",
        };
        f.write_str(phase)
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Token cannot be used as a header value. Must be ASCII.")]
    InvalidHeaderValue,
    #[error("Request failed: {0}")]
    ReqwestFailed(#[from] Arc<reqwest::Error>),
    #[error("{method} {path} returned status {status}: {message}")]
    Server {
        method: String,
        path: String,
        status: u16,
        message: String,
    },
    #[error("No resource at {path}")]
    NotFound { path: String },
    #[error("Failed to deserialize response body: {0}")]
    Deserialization(String),
    #[error("Login failed ({phase}) at {path}: {message}")]
    Login {
        phase: AuthPhase,
        path: String,
        message: String,
    },
    #[error("Token renewal failed{}: {message}", fmt_status(.status))]
    TokenRenewal { status: Option<u16>, message: String },
    #[error("Credential source failed: {0}")]
    Credential(String),
    #[error("Token self-lookup failed: {0}")]
    SelfLookup(String),
    #[error("Token revocation failed: {0}")]
    Revocation(String),
    #[error("Response unwrapping failed: {0}")]
    Unwrap(String),
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("Invalid lifecycle state: {0}")]
    State(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" with status {status}"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a [`Error::Login`] wrapping another failure.
    pub(crate) fn login(phase: AuthPhase, path: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Error::Login {
            phase,
            path: path.into(),
            message: cause.to_string(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::ReqwestFailed(Arc::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_error_carries_phase_and_path() {
        let err = Error::login(AuthPhase::Login, "auth/approle/login", "boom");
        assert_eq!(
            err.to_string(),
            "Login failed (login) at auth/approle/login: boom"
        );
    }

    #[test]
    fn test_renewal_error_without_status() {
        let err = Error::TokenRenewal {
            status: None,
            message: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "Token renewal failed: connection reset");
    }

    #[test]
    fn test_renewal_error_with_status() {
        let err = Error::TokenRenewal {
            status: Some(403),
            message: "permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "Token renewal failed with status 403: permission denied"
        );
    }
}
