use crate::methods::AuthMethod;
use crate::steps::AuthSteps;
use crate::token::VaultToken;

/// Authenticate with a statically configured token.
///
/// The token is handed to the session manager as-is; the manager performs a
/// self-lookup to learn its lease metadata.
#[derive(Debug, Clone)]
pub struct TokenAuth {
    token: VaultToken,
}

impl TokenAuth {
    #[must_use]
    pub fn new(token: VaultToken) -> Self {
        Self { token }
    }
}

impl AuthMethod for TokenAuth {
    fn name(&self) -> &str {
        "token"
    }

    fn steps(&self) -> AuthSteps {
        AuthSteps::just(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_token_auth_yields_configured_token() {
        let method = TokenAuth::new(VaultToken::of("static-token").unwrap());
        let server = mockito::Server::new_async().await;
        let transport = crate::transport::HttpTransport::new(
            crate::transport::VaultEndpoint::parse(&server.url()).unwrap(),
        );
        let token = method.login(&transport).await.unwrap();
        assert_eq!(token.as_str(), "static-token");
    }
}
