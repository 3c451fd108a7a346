use std::time::Duration;

use http::HeaderValue;

use crate::error::{Error, Result};

/// Header carrying the session token on authenticated requests
/// (`X-Vault-Token`; header names are case-insensitive on the wire).
pub const TOKEN_HEADER: &str = "x-vault-token";

/// An opaque credential accepted by the secrets service.
///
/// The token value is treated as a secret: `Debug` output is redacted and the
/// value never appears in log or error messages.
#[derive(Clone, PartialEq, Eq, veil::Redact)]
pub struct VaultToken {
    #[redact]
    token: String,
}

impl VaultToken {
    /// Wrap a raw token string.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the token is empty.
    pub fn of(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::Configuration("Token must not be empty".into()));
        }
        Ok(Self { token })
    }

    /// The raw token value. Handle with care; never log this.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// Render the token as a sensitive `X-Vault-Token` header value.
    ///
    /// # Errors
    /// Fails with [`Error::InvalidHeaderValue`] if the token is not ASCII.
    pub fn header_value(&self) -> Result<HeaderValue> {
        if !self.token.is_ascii() {
            return Err(Error::InvalidHeaderValue);
        }
        let mut value = HeaderValue::from_str(&self.token).map_err(|_e| Error::InvalidHeaderValue)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Server-side token type.
///
/// Batch tokens are neither renewable nor revocable; their lifecycle ends at
/// their TTL. Tokens of unknown type are treated as service tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    #[default]
    Service,
    Batch,
    Unknown,
}

impl TokenType {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "service" => TokenType::Service,
            "batch" => TokenType::Batch,
            _ => TokenType::Unknown,
        }
    }
}

/// A session token together with the lease metadata a login endpoint returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken {
    token: VaultToken,
    renewable: bool,
    lease_duration: Duration,
    token_type: TokenType,
    accessor: Option<String>,
}

impl LoginToken {
    /// A non-renewable token without a lease.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the token is empty.
    pub fn of(token: impl Into<String>) -> Result<Self> {
        Ok(Self::builder(VaultToken::of(token)?).build())
    }

    /// A non-renewable token leased for `lease_duration`.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the token is empty.
    pub fn of_leased(token: impl Into<String>, lease_duration: Duration) -> Result<Self> {
        Ok(Self::builder(VaultToken::of(token)?)
            .lease_duration(lease_duration)
            .build())
    }

    /// A renewable token leased for `lease_duration`.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the token is empty.
    pub fn renewable(token: impl Into<String>, lease_duration: Duration) -> Result<Self> {
        Ok(Self::builder(VaultToken::of(token)?)
            .renewable(true)
            .lease_duration(lease_duration)
            .build())
    }

    /// Start building a [`LoginToken`] from an already-validated token.
    #[must_use]
    pub fn builder(token: VaultToken) -> LoginTokenBuilder {
        LoginTokenBuilder {
            token,
            renewable: false,
            lease_duration: Duration::ZERO,
            token_type: TokenType::Service,
            accessor: None,
        }
    }

    #[must_use]
    pub fn token(&self) -> &VaultToken {
        &self.token
    }

    #[must_use]
    pub fn is_renewable(&self) -> bool {
        self.renewable
    }

    /// Remaining lease at issue time. Zero means the token is not leased.
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    #[must_use]
    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    #[must_use]
    pub fn accessor(&self) -> Option<&str> {
        self.accessor.as_deref()
    }

    /// Whether this is a service token. Tokens of unspecified type count as
    /// service tokens.
    #[must_use]
    pub fn is_service_token(&self) -> bool {
        matches!(self.token_type, TokenType::Service | TokenType::Unknown)
    }

    #[must_use]
    pub fn is_batch_token(&self) -> bool {
        self.token_type == TokenType::Batch
    }
}

/// Builder for [`LoginToken`].
#[derive(Debug, Clone)]
pub struct LoginTokenBuilder {
    token: VaultToken,
    renewable: bool,
    lease_duration: Duration,
    token_type: TokenType,
    accessor: Option<String>,
}

impl LoginTokenBuilder {
    #[must_use]
    pub fn renewable(mut self, renewable: bool) -> Self {
        self.renewable = renewable;
        self
    }

    #[must_use]
    pub fn lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    #[must_use]
    pub fn token_type(mut self, token_type: TokenType) -> Self {
        self.token_type = token_type;
        self
    }

    #[must_use]
    pub fn accessor(mut self, accessor: impl Into<String>) -> Self {
        self.accessor = Some(accessor.into());
        self
    }

    #[must_use]
    pub fn build(self) -> LoginToken {
        LoginToken {
            token: self.token,
            renewable: self.renewable,
            lease_duration: self.lease_duration,
            token_type: self.token_type,
            accessor: self.accessor,
        }
    }
}

/// The token the session manager hands out.
///
/// `Opaque` tokens were supplied without lease metadata (for example a
/// statically configured token whose self-lookup failed); `Login` tokens carry
/// the metadata a login or lookup endpoint returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionToken {
    Opaque(VaultToken),
    Login(LoginToken),
}

impl SessionToken {
    #[must_use]
    pub fn vault_token(&self) -> &VaultToken {
        match self {
            SessionToken::Opaque(token) => token,
            SessionToken::Login(token) => token.token(),
        }
    }

    /// The raw token value. Handle with care; never log this.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.vault_token().as_str()
    }

    #[must_use]
    pub fn as_login(&self) -> Option<&LoginToken> {
        match self {
            SessionToken::Opaque(_) => None,
            SessionToken::Login(token) => Some(token),
        }
    }

    #[must_use]
    pub fn is_renewable(&self) -> bool {
        self.as_login().is_some_and(LoginToken::is_renewable)
    }

    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        self.as_login()
            .map_or(Duration::ZERO, LoginToken::lease_duration)
    }

    #[must_use]
    pub fn is_batch_token(&self) -> bool {
        self.as_login().is_some_and(LoginToken::is_batch_token)
    }
}

impl From<LoginToken> for SessionToken {
    fn from(value: LoginToken) -> Self {
        SessionToken::Login(value)
    }
}

impl From<VaultToken> for SessionToken {
    fn from(value: VaultToken) -> Self {
        SessionToken::Opaque(value)
    }
}
