use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::{supply_credential, AuthMethod, CredentialSource, FileCredentialSource};
use crate::steps::AuthSteps;

const DEFAULT_SA_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Authenticate with a Kubernetes service-account JWT.
#[derive(Clone)]
pub struct KubernetesAuthOptions {
    path: String,
    role: String,
    jwt_source: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for KubernetesAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesAuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl KubernetesAuthOptions {
    /// Start building options. The mount path defaults to `kubernetes` and
    /// the JWT is read from the in-pod service-account token file unless a
    /// custom source is set.
    #[must_use]
    pub fn builder() -> KubernetesAuthOptionsBuilder {
        KubernetesAuthOptionsBuilder {
            path: "kubernetes".into(),
            role: None,
            jwt_source: None,
        }
    }
}

/// Builder for [`KubernetesAuthOptions`].
pub struct KubernetesAuthOptionsBuilder {
    path: String,
    role: Option<String>,
    jwt_source: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for KubernetesAuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesAuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl KubernetesAuthOptionsBuilder {
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

    #[must_use]
    pub fn jwt_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.jwt_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the role is missing.
    pub fn build(self) -> Result<KubernetesAuthOptions> {
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Configuration("Kubernetes authentication requires a role".into()))?;
        let jwt_source = self
            .jwt_source
            .unwrap_or_else(|| Arc::new(FileCredentialSource::new(DEFAULT_SA_TOKEN_PATH)));
        Ok(KubernetesAuthOptions {
            path: self.path,
            role,
            jwt_source,
        })
    }
}

impl AuthMethod for KubernetesAuthOptions {
    fn name(&self) -> &str {
        "kubernetes"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        supply_credential(Arc::clone(&self.jwt_source))
            .map(move |jwt| Ok(json!({"role": role, "jwt": jwt})))
            .login(format!("auth/{}/login", self.path))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    #[test]
    fn test_role_is_required() {
        assert!(KubernetesAuthOptions::builder().build().is_err());
    }

    #[test]
    fn test_login_posts_role_and_jwt() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/kubernetes/login")
            .match_body(mockito::Matcher::Json(
                json!({"role": "web", "jwt": "sa-jwt"}),
            ))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = KubernetesAuthOptions::builder()
            .role("web")
            .jwt_source(|| Ok("sa-jwt".to_string()))
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let token = execute(&options.steps(), &transport).unwrap();
        mock.assert();
        assert_eq!(token.as_str(), "t");
    }
}
