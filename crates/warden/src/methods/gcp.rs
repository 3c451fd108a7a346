use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::{supply_credential, AuthMethod, CredentialSource};
use crate::steps::AuthSteps;

/// Authenticate with a Google Cloud signed identity JWT.
#[derive(Clone)]
pub struct GcpAuthOptions {
    path: String,
    role: String,
    jwt_source: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for GcpAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpAuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl GcpAuthOptions {
    #[must_use]
    pub fn builder() -> GcpAuthOptionsBuilder {
        GcpAuthOptionsBuilder {
            path: "gcp".into(),
            role: None,
            jwt_source: None,
        }
    }
}

/// Builder for [`GcpAuthOptions`].
pub struct GcpAuthOptionsBuilder {
    path: String,
    role: Option<String>,
    jwt_source: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for GcpAuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpAuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl GcpAuthOptionsBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Source of the service-account-signed identity JWT.
    #[must_use]
    pub fn jwt_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.jwt_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if role or JWT source is missing.
    pub fn build(self) -> Result<GcpAuthOptions> {
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Configuration("GCP authentication requires a role".into()))?;
        let jwt_source = self
            .jwt_source
            .ok_or_else(|| Error::Configuration("GCP authentication requires a JWT source".into()))?;
        Ok(GcpAuthOptions {
            path: self.path,
            role,
            jwt_source,
        })
    }
}

impl AuthMethod for GcpAuthOptions {
    fn name(&self) -> &str {
        "gcp"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        supply_credential(Arc::clone(&self.jwt_source))
            .map(move |jwt| Ok(json!({"role": role, "jwt": jwt})))
            .login(format!("auth/{}/login", self.path))
    }
}
