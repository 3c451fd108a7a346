use serde_json::json;

use crate::error::Result;
use crate::methods::AuthMethod;
use crate::steps::AuthSteps;

/// TLS client-certificate authentication.
///
/// The certificate itself is presented at the TLS layer; configure it on the
/// transport's underlying client. The login request carries at most the name
/// of the certificate role to authenticate against.
#[derive(Debug, Clone)]
pub struct ClientCertificateAuthOptions {
    path: String,
    name: Option<String>,
}

impl ClientCertificateAuthOptions {
    #[must_use]
    pub fn builder() -> ClientCertificateAuthOptionsBuilder {
        ClientCertificateAuthOptionsBuilder {
            path: "cert".into(),
            name: None,
        }
    }
}

/// Builder for [`ClientCertificateAuthOptions`].
#[derive(Debug, Clone)]
pub struct ClientCertificateAuthOptionsBuilder {
    path: String,
    name: Option<String>,
}

impl ClientCertificateAuthOptionsBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Restrict the login to a named certificate role.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the options. Certificate login has no invalid combinations.
    ///
    /// # Errors
    /// Reserved; always succeeds today.
    pub fn build(self) -> Result<ClientCertificateAuthOptions> {
        Ok(ClientCertificateAuthOptions {
            path: self.path,
            name: self.name,
        })
    }
}

impl AuthMethod for ClientCertificateAuthOptions {
    fn name(&self) -> &str {
        "cert"
    }

    fn steps(&self) -> AuthSteps {
        let body = match &self.name {
            Some(name) => json!({"name": name}),
            None => json!({}),
        };
        AuthSteps::from_value(body).login(format!("auth/{}/login", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    #[test]
    fn test_login_with_named_role() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/cert/login")
            .match_body(mockito::Matcher::Json(json!({"name": "web"})))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = ClientCertificateAuthOptions::builder()
            .name("web")
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        execute(&options.steps(), &transport).unwrap();
        mock.assert();
    }
}
