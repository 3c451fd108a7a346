use serde_json::json;

use crate::error::Error;
use crate::methods::AuthMethod;
use crate::response::{unwrap_response, unwrap_token};
use crate::steps::AuthSteps;
use crate::token::VaultToken;
use crate::transport::TransportRequest;

/// Retrieve a session token that was handed out response-wrapped.
///
/// The wrapping token is exchanged at `cubbyhole/response`; the unwrapped
/// envelope carries the actual session token. The resulting token has no
/// lease metadata; the session manager's self-lookup fills it in.
#[derive(Debug, Clone)]
pub struct CubbyholeAuthOptions {
    wrapping_token: VaultToken,
}

impl CubbyholeAuthOptions {
    #[must_use]
    pub fn new(wrapping_token: VaultToken) -> Self {
        Self { wrapping_token }
    }
}

impl AuthMethod for CubbyholeAuthOptions {
    fn name(&self) -> &str {
        "cubbyhole"
    }

    fn steps(&self) -> AuthSteps {
        AuthSteps::from_request(
            TransportRequest::get("cubbyhole/response").with_token(self.wrapping_token.clone()),
        )
        .map(|value| {
            let response =
                serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))?;
            let unwrapped = unwrap_response(&response)?;
            Ok(json!(unwrap_token(&unwrapped)?.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    #[test]
    fn test_wrapped_token_is_unwrapped() {
        let mut server = mockito::Server::new();
        let inner = json!({"auth": {"client_token": "real-token"}});
        let mock = server
            .mock("GET", "/v1/cubbyhole/response")
            .match_header("x-vault-token", "wrapping")
            .with_status(200)
            .with_body(json!({"data": {"response": inner.to_string()}}).to_string())
            .create();

        let options = CubbyholeAuthOptions::new(VaultToken::of("wrapping").unwrap());
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let token = execute(&options.steps(), &transport).unwrap();
        mock.assert();
        assert_eq!(token.as_str(), "real-token");
        assert!(token.as_login().is_none());
    }

    #[test]
    fn test_unwrap_failure_names_the_problem() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v1/cubbyhole/response")
            .with_status(200)
            .with_body(
                json!({"data": {"response": json!({"data": {"a": "1", "b": "2"}}).to_string()}})
                    .to_string(),
            )
            .create();

        let options = CubbyholeAuthOptions::new(VaultToken::of("wrapping").unwrap());
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let err = execute(&options.steps(), &transport).unwrap_err();
        assert!(matches!(err, Error::Unwrap(m) if m.contains("unique token")));
    }
}
