use std::sync::Arc;

use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::{supply_credential, AuthMethod, CredentialSource};
use crate::steps::AuthSteps;

/// The VM identity reported by the instance metadata service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureVmEnvironment {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub vm_name: String,
    pub vmss_name: Option<String>,
}

impl AzureVmEnvironment {
    #[must_use]
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            vm_name: vm_name.into(),
            vmss_name: None,
        }
    }
}

/// Authenticate with an Azure managed-service-identity JWT plus the VM's
/// metadata identity.
#[derive(Clone)]
pub struct AzureAuthOptions {
    path: String,
    role: String,
    environment: AzureVmEnvironment,
    jwt_source: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for AzureAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureAuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl AzureAuthOptions {
    #[must_use]
    pub fn builder() -> AzureAuthOptionsBuilder {
        AzureAuthOptionsBuilder {
            path: "azure".into(),
            role: None,
            environment: None,
            jwt_source: None,
        }
    }
}

/// Builder for [`AzureAuthOptions`].
pub struct AzureAuthOptionsBuilder {
    path: String,
    role: Option<String>,
    environment: Option<AzureVmEnvironment>,
    jwt_source: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for AzureAuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureAuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl AzureAuthOptionsBuilder {
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
    pub fn environment(mut self, environment: AzureVmEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Source of the MSI-issued JWT.
    #[must_use]
    pub fn jwt_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.jwt_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if role, VM environment or JWT
    /// source is missing.
    pub fn build(self) -> Result<AzureAuthOptions> {
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Configuration("Azure authentication requires a role".into()))?;
        let environment = self.environment.ok_or_else(|| {
            Error::Configuration("Azure authentication requires the VM environment".into())
        })?;
        let jwt_source = self.jwt_source.ok_or_else(|| {
            Error::Configuration("Azure authentication requires a JWT source".into())
        })?;
        Ok(AzureAuthOptions {
            path: self.path,
            role,
            environment,
            jwt_source,
        })
    }
}

impl AuthMethod for AzureAuthOptions {
    fn name(&self) -> &str {
        "azure"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        let environment = self.environment.clone();
        supply_credential(Arc::clone(&self.jwt_source))
            .map(move |jwt| {
                let mut body = json!({
                    "role": role,
                    "jwt": jwt,
                    "subscription_id": environment.subscription_id,
                    "resource_group_name": environment.resource_group_name,
                    "vm_name": environment.vm_name,
                });
                if let Some(vmss_name) = &environment.vmss_name {
                    body["vmss_name"] = json!(vmss_name);
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
    fn test_environment_required() {
        let err = AzureAuthOptions::builder()
            .role("web")
            .jwt_source(|| Ok("jwt".to_string()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(m) if m.contains("VM environment")));
    }

    #[test]
    fn test_body_carries_vm_identity() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/azure/login")
            .match_body(mockito::Matcher::Json(json!({
                "role": "web",
                "jwt": "msi-jwt",
                "subscription_id": "sub-1",
                "resource_group_name": "rg-1",
                "vm_name": "vm-1",
            })))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = AzureAuthOptions::builder()
            .role("web")
            .environment(AzureVmEnvironment::new("sub-1", "rg-1", "vm-1"))
            .jwt_source(|| Ok("msi-jwt".to_string()))
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        execute(&options.steps(), &transport).unwrap();
        mock.assert();
    }
}
