//! AWS instance and principal authentication.
//!
//! The EC2 flow posts a PKCS#7-signed instance identity document together
//! with a client nonce; the IAM flow posts a presigned
//! `sts:GetCallerIdentity` request. Producing the signed material is the
//! platform's job and enters through [`CredentialSource`].

use std::sync::Arc;

use base64::Engine as _;
use rand::distr::Alphanumeric;
use rand::RngExt as _;
use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::{supply_credential, AuthMethod, CredentialSource};
use crate::steps::AuthSteps;

const DEFAULT_STS_URL: &str = "https://sts.amazonaws.com/";
const DEFAULT_STS_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";

/// Client nonce for EC2 re-authentication protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(String);

impl Nonce {
    #[must_use]
    pub fn provided(nonce: impl Into<String>) -> Self {
        Self(nonce.into())
    }

    /// Generate a random nonce once; the same value is reused for every
    /// login of this configuration.
    #[must_use]
    pub fn generated() -> Self {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self(nonce)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Options for the EC2 instance-identity flow.
#[derive(Clone)]
pub struct AwsEc2AuthOptions {
    path: String,
    role: String,
    nonce: Nonce,
    identity_source: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for AwsEc2AuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsEc2AuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl AwsEc2AuthOptions {
    #[must_use]
    pub fn builder() -> AwsEc2AuthOptionsBuilder {
        AwsEc2AuthOptionsBuilder {
            path: "aws-ec2".into(),
            role: None,
            nonce: None,
            identity_source: None,
        }
    }
}

/// Builder for [`AwsEc2AuthOptions`].
pub struct AwsEc2AuthOptionsBuilder {
    path: String,
    role: Option<String>,
    nonce: Option<Nonce>,
    identity_source: Option<Arc<dyn CredentialSource>>,
}

impl std::fmt::Debug for AwsEc2AuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsEc2AuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl AwsEc2AuthOptionsBuilder {
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

    /// Set the nonce. A random nonce is generated otherwise.
    #[must_use]
    pub fn nonce(mut self, nonce: Nonce) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Source of the PKCS#7-signed instance identity document.
    #[must_use]
    pub fn identity_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.identity_source = Some(Arc::new(source));
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if role or identity source is
    /// missing.
    pub fn build(self) -> Result<AwsEc2AuthOptions> {
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Configuration("EC2 authentication requires a role".into()))?;
        let identity_source = self.identity_source.ok_or_else(|| {
            Error::Configuration(
                "EC2 authentication requires an identity document source".into(),
            )
        })?;
        Ok(AwsEc2AuthOptions {
            path: self.path,
            role,
            nonce: self.nonce.unwrap_or_else(Nonce::generated),
            identity_source,
        })
    }
}

impl AuthMethod for AwsEc2AuthOptions {
    fn name(&self) -> &str {
        "aws-ec2"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        let nonce = self.nonce.clone();
        supply_credential(Arc::clone(&self.identity_source))
            .map(move |pkcs7| {
                Ok(json!({"role": role, "pkcs7": pkcs7, "nonce": nonce.as_str()}))
            })
            .login(format!("auth/{}/login", self.path))
    }
}

/// Options for the IAM principal flow.
#[derive(Clone)]
pub struct AwsIamAuthOptions {
    path: String,
    role: String,
    signed_headers_source: Arc<dyn CredentialSource>,
    sts_url: String,
    sts_body: String,
}

impl std::fmt::Debug for AwsIamAuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIamAuthOptions")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("sts_url", &self.sts_url)
            .finish_non_exhaustive()
    }
}

impl AwsIamAuthOptions {
    #[must_use]
    pub fn builder() -> AwsIamAuthOptionsBuilder {
        AwsIamAuthOptionsBuilder {
            path: "aws".into(),
            role: None,
            signed_headers_source: None,
            sts_url: DEFAULT_STS_URL.into(),
            sts_body: DEFAULT_STS_BODY.into(),
        }
    }
}

/// Builder for [`AwsIamAuthOptions`].
pub struct AwsIamAuthOptionsBuilder {
    path: String,
    role: Option<String>,
    signed_headers_source: Option<Arc<dyn CredentialSource>>,
    sts_url: String,
    sts_body: String,
}

impl std::fmt::Debug for AwsIamAuthOptionsBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIamAuthOptionsBuilder")
            .field("path", &self.path)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl AwsIamAuthOptionsBuilder {
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

    /// Source of the SigV4-signed `sts:GetCallerIdentity` headers, JSON
    /// encoded as the server expects them.
    #[must_use]
    pub fn signed_headers_source(mut self, source: impl CredentialSource + 'static) -> Self {
        self.signed_headers_source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn sts_url(mut self, url: impl Into<String>) -> Self {
        self.sts_url = url.into();
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if role or header source is
    /// missing.
    pub fn build(self) -> Result<AwsIamAuthOptions> {
        let role = self
            .role
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::Configuration("IAM authentication requires a role".into()))?;
        let signed_headers_source = self.signed_headers_source.ok_or_else(|| {
            Error::Configuration("IAM authentication requires a signed header source".into())
        })?;
        Ok(AwsIamAuthOptions {
            path: self.path,
            role,
            signed_headers_source,
            sts_url: self.sts_url,
            sts_body: self.sts_body,
        })
    }
}

impl AuthMethod for AwsIamAuthOptions {
    fn name(&self) -> &str {
        "aws"
    }

    fn steps(&self) -> AuthSteps {
        let role = self.role.clone();
        let engine = base64::engine::general_purpose::STANDARD;
        let url = engine.encode(&self.sts_url);
        let body = engine.encode(&self.sts_body);
        supply_credential(Arc::clone(&self.signed_headers_source))
            .map(move |headers| {
                let encoded_headers = match &headers {
                    serde_json::Value::String(raw) => engine.encode(raw),
                    other => {
                        return Err(Error::Credential(format!(
                            "Signed header source must yield a string, got {other}"
                        )))
                    }
                };
                Ok(json!({
                    "role": role,
                    "iam_http_request_method": "POST",
                    "iam_request_url": url,
                    "iam_request_body": body,
                    "iam_request_headers": encoded_headers,
                }))
            })
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
    fn test_generated_nonce_is_stable_per_options() {
        let nonce = Nonce::generated();
        assert_eq!(nonce.as_str().len(), 32);
        assert_eq!(nonce, nonce.clone());
    }

    #[test]
    fn test_ec2_requires_identity_source() {
        let err = AwsEc2AuthOptions::builder().role("web").build().unwrap_err();
        assert!(matches!(err, Error::Configuration(m) if m.contains("identity document")));
    }

    #[test]
    fn test_ec2_body_shape() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/aws-ec2/login")
            .match_body(mockito::Matcher::Json(json!({
                "role": "web",
                "pkcs7": "signed-doc",
                "nonce": "fixed-nonce",
            })))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = AwsEc2AuthOptions::builder()
            .role("web")
            .nonce(Nonce::provided("fixed-nonce"))
            .identity_source(|| Ok("signed-doc".to_string()))
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        execute(&options.steps(), &transport).unwrap();
        mock.assert();
    }

    #[test]
    fn test_iam_body_is_base64_encoded() {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/aws/login")
            .match_body(mockito::Matcher::Json(json!({
                "role": "deploy",
                "iam_http_request_method": "POST",
                "iam_request_url": engine.encode(DEFAULT_STS_URL),
                "iam_request_body": engine.encode(DEFAULT_STS_BODY),
                "iam_request_headers": engine.encode(r#"{"Authorization":"AWS4-HMAC-SHA256 ..."}"#),
            })))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = AwsIamAuthOptions::builder()
            .role("deploy")
            .signed_headers_source(|| Ok(r#"{"Authorization":"AWS4-HMAC-SHA256 ..."}"#.to_string()))
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        execute(&options.steps(), &transport).unwrap();
        mock.assert();
    }
}
