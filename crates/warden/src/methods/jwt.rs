use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::{supply_credential, AuthMethod, CredentialSource};
use crate::steps::AuthSteps;

/// Authenticate with an externally issued JWT (OIDC identity tokens, signed
/// workload assertions and similar).
#[derive(Clone)]
pub struct JwtAuthOptions {
    path: String,
    role: Option<String>,
    jwt_source: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for JwtAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl JwtAuthOptions {
    #[must_use]
    pub fn builder() -> JwtAuthOptionsBuilder {
        JwtAuthOptionsBuilder {
            path: "jwt".into(),
            role: None,
            jwt_source: None,
        }
    }
}

/// Builder for [`JwtAuthOptions`].
pub struct JwtAuthOptionsBuilder {
    path: String,
    role: Option<String>,
    jwt_source: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for JwtAuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl JwtAuthOptionsBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the named role. Optional; the mount's default role applies
    /// otherwise.
    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn jwt_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.jwt_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if no JWT source is set.
    pub fn build(self) -> Result<JwtAuthOptions> {
        let jwt_source = self
            .jwt_source
            .ok_or_else(|| Error::Configuration("JWT authentication requires a JWT source".into()))?;
        Ok(JwtAuthOptions {
            path: self.path,
            role: self.role,
            jwt_source,
        })
    }
}

impl AuthMethod for JwtAuthOptions {
    fn name(&self) -> &str {
        "jwt"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        supply_credential(Arc::clone(&self.jwt_source))
            .map(move |jwt| {
                let mut body = json!({"jwt": jwt});
                if let Some(role) = &role {
                    body["role"] = json!(role);
                }
                Ok(body)
            })
            .login(format!("auth/{}/login", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    #[test]
    fn test_jwt_source_required() {
        assert!(JwtAuthOptions::builder().role("r").build().is_err());
    }

    #[test]
    fn test_role_is_optional_in_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/jwt/login")
            .match_body(mockito::Matcher::Json(json!({"jwt": "header.claims.sig"})))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = JwtAuthOptions::builder()
            .jwt_source(|| Ok("header.claims.sig".to_string()))
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        execute(&options.steps(), &transport).unwrap();
        mock.assert();
    }
}
