//! Authentication flows against the secrets service.
//!
//! Every flow is an immutable, validated options record plus an
//! [`AuthMethod`] implementation that renders the flow as a login pipeline
//! ([`AuthSteps`]). The session manager drives whichever method it is given;
//! flows can also be executed directly through the step executors.

mod approle;
mod aws;
mod azure;
mod cert;
mod cubbyhole;
mod gcp;
mod jwt;
mod kubernetes;
mod token;
mod userpass;

use std::path::PathBuf;
use std::sync::Arc;

pub use approle::{AppRoleAuthOptions, AppRoleAuthOptionsBuilder, RoleId, SecretId};
pub use aws::{AwsEc2AuthOptions, AwsEc2AuthOptionsBuilder, AwsIamAuthOptions, AwsIamAuthOptionsBuilder, Nonce};
pub use azure::{AzureAuthOptions, AzureAuthOptionsBuilder, AzureVmEnvironment};
pub use cert::{ClientCertificateAuthOptions, ClientCertificateAuthOptionsBuilder};
pub use cubbyhole::CubbyholeAuthOptions;
pub use gcp::{GcpAuthOptions, GcpAuthOptionsBuilder};
pub use jwt::{JwtAuthOptions, JwtAuthOptionsBuilder};
pub use kubernetes::{KubernetesAuthOptions, KubernetesAuthOptionsBuilder};
pub use token::TokenAuth;
pub use userpass::{UserPasswordAuthOptions, UserPasswordAuthOptionsBuilder};

use crate::error::{Error, Result};
use crate::steps::AuthSteps;
use crate::token::SessionToken;
use crate::transport::{AsyncTransport, Transport};

/// An authentication strategy the session manager can drive.
#[async_trait::async_trait]
pub trait AuthMethod: Send + Sync {
    /// Method name for diagnostics, e.g. `approle`.
    fn name(&self) -> &str;

    /// Render this flow as a login pipeline.
    fn steps(&self) -> AuthSteps;

    /// Execute the flow on an asynchronous transport.
    ///
    /// # Errors
    /// See [`crate::steps::execute_async`].
    async fn login(&self, transport: &dyn AsyncTransport) -> Result<SessionToken> {
        crate::steps::execute_async(&self.steps(), transport).await
    }

    /// Execute the flow on a blocking transport.
    ///
    /// # Errors
    /// See [`crate::steps::execute`].
    fn login_blocking(&self, transport: &dyn Transport) -> Result<SessionToken> {
        crate::steps::execute(&self.steps(), transport)
    }
}

/// Produces a signed or otherwise externally-issued credential string, e.g. a
/// service-account JWT or a PKCS#7-signed instance identity document.
///
/// The concrete cryptography lives outside this crate; flows only consume the
/// resulting string.
pub trait CredentialSource: Send + Sync {
    /// Produce the credential.
    ///
    /// # Errors
    /// Failures propagate unchanged through the flow that consumes them.
    fn credential(&self) -> Result<String>;
}

impl<F> CredentialSource for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn credential(&self) -> Result<String> {
        self()
    }
}

/// Reads a credential from a file, trimming surrounding whitespace.
/// Suits mounted service-account tokens and similar projected credentials.
#[derive(Debug, Clone)]
pub struct FileCredentialSource {
    path: PathBuf,
}

impl FileCredentialSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for FileCredentialSource {
    fn credential(&self) -> Result<String> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Credential(format!(
                "Cannot read credential file {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(raw.trim().to_owned())
    }
}

/// Pipeline fragment yielding a credential as a JSON string value.
pub(crate) fn supply_credential(source: Arc<dyn CredentialSource>) -> AuthSteps {
    AuthSteps::from_supplier(move || Ok(serde_json::Value::String(source.credential()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_credential_source() {
        let source = || Ok("signed".to_string());
        assert_eq!(source.credential().unwrap(), "signed");
    }

    #[test]
    fn test_file_credential_source_trims() {
        let dir = std::env::temp_dir().join("warden-cred-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("jwt");
        std::fs::write(&path, "my-jwt\n").unwrap();
        let source = FileCredentialSource::new(&path);
        assert_eq!(source.credential().unwrap(), "my-jwt");
    }

    #[test]
    fn test_missing_credential_file() {
        let source = FileCredentialSource::new("/definitely/not/here");
        assert!(matches!(
            source.credential(),
            Err(Error::Credential(m)) if m.contains("not/here")
        ));
    }
}
