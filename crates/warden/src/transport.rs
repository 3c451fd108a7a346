//! The HTTP seam the library drives the secrets service through.
//!
//! The core never retries at this layer; it sends one prepared request and
//! surfaces status, headers and body. Two flavors exist in parallel: a
//! blocking [`Transport`] and an [`AsyncTransport`]. Cancelling an async call
//! is done by dropping the future; deadlines are per-request.

use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::token::{VaultToken, TOKEN_HEADER};

/// Base endpoint of the secrets service, e.g. `https://vault.example.com:8200`.
///
/// Relative request paths such as `auth/approle/login` resolve against the
/// versioned API root (`<endpoint>/v1/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultEndpoint {
    url: Url,
}

impl VaultEndpoint {
    /// Create an endpoint from a base URL without a path.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the URL cannot serve as a base.
    pub fn new(url: Url) -> Result<Self> {
        if url.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "URL `{url}` cannot be used as a base endpoint"
            )));
        }
        Ok(Self { url })
    }

    /// Parse an endpoint from a string.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] on malformed URLs.
    pub fn parse(url: &str) -> Result<Self> {
        let url = Url::parse(url)
            .map_err(|e| Error::Configuration(format!("Invalid endpoint URL `{url}`: {e}")))?;
        Self::new(url)
    }

    /// Resolve an API-relative path against this endpoint.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the path does not resolve.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        let base = format!("{}/v1/", self.url.as_str().trim_end_matches('/'));
        Url::parse(&base)
            .and_then(|base| base.join(path.trim_start_matches('/')))
            .map_err(|e| Error::Configuration(format!("Cannot resolve path `{path}`: {e}")))
    }
}

/// A prepared request against the secrets service.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the versioned API root, e.g. `auth/token/renew-self`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Token to attach as the auth header, if any.
    pub token: Option<VaultToken>,
    /// Per-request deadline. The transport's own timeout applies otherwise.
    pub deadline: Option<Duration>,
}

impl TransportRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            token: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: VaultToken) -> Self {
        self.token = Some(token);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Status, headers and raw body of a completed exchange.
///
/// Transport errors (connection reset, TLS, timeout) surface as `Err`; HTTP
/// error statuses come back as a response and are classified by
/// [`TransportResponse::ensure_success`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl TransportResponse {
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Classify the response status. `404` maps to [`Error::NotFound`], any
    /// other non-2xx to [`Error::Server`].
    ///
    /// # Errors
    /// See above.
    pub fn ensure_success(self, method: &Method, path: &str) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }
        if self.status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound { path: path.into() });
        }
        Err(Error::Server {
            method: method.to_string(),
            path: path.into(),
            status: self.status.as_u16(),
            message: String::from_utf8_lossy(&self.body).into_owned(),
        })
    }

    /// Deserialize the body.
    ///
    /// # Errors
    /// Fails with [`Error::Deserialization`] on malformed bodies.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Blocking transport flavor.
pub trait Transport: Send + Sync {
    /// Execute one prepared request.
    ///
    /// # Errors
    /// Fails with a transport-level error if the exchange could not complete.
    /// HTTP error statuses are returned as responses, not errors.
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;
}

/// Asynchronous transport flavor. Dropping the returned future cancels the
/// in-flight exchange.
#[async_trait::async_trait]
pub trait AsyncTransport: Send + Sync {
    /// Execute one prepared request.
    ///
    /// # Errors
    /// Fails with a transport-level error if the exchange could not complete.
    /// HTTP error statuses are returned as responses, not errors.
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse>;
}

fn header_values(request: &TransportRequest) -> Result<Vec<(http::HeaderName, http::HeaderValue)>> {
    let mut headers = Vec::with_capacity(request.headers.len() + 1);
    for (name, value) in &request.headers {
        let name = http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_e| Error::InvalidHeaderValue)?;
        let value = http::HeaderValue::from_str(value).map_err(|_e| Error::InvalidHeaderValue)?;
        headers.push((name, value));
    }
    if let Some(token) = &request.token {
        headers.push((
            http::HeaderName::from_static(TOKEN_HEADER),
            token.header_value()?,
        ));
    }
    Ok(headers)
}

/// Asynchronous `reqwest`-backed transport.
///
/// Redirects are disabled on the default client to keep credentialed requests
/// from leaving the configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: VaultEndpoint,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a default client (redirects disabled).
    ///
    /// # Panics
    /// Panics if the TLS backend cannot be initialized
    /// (if `reqwest::Client::builder().build()` panics).
    #[must_use]
    pub fn new(endpoint: VaultEndpoint) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create reqwest client");
        Self { endpoint, client }
    }

    /// Set a custom `reqwest::Client`.
    /// When setting a custom client, please make sure to set the `redirect`
    /// policy to `Policy::none()` to prevent SSRF vulnerabilities.
    #[must_use]
    pub fn set_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &VaultEndpoint {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl AsyncTransport for HttpTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let url = self.endpoint.resolve(&request.path)?;
        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in header_values(request)? {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(deadline) = request.deadline {
            builder = builder.timeout(deadline);
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(TransportResponse::new(status, headers, body))
    }
}

/// Blocking `reqwest`-backed transport.
#[cfg(feature = "blocking")]
#[derive(Debug, Clone)]
pub struct BlockingHttpTransport {
    endpoint: VaultEndpoint,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "blocking")]
impl BlockingHttpTransport {
    /// Create a transport with a default client (redirects disabled).
    ///
    /// # Panics
    /// Panics if the TLS backend cannot be initialized
    /// (if `reqwest::blocking::Client::builder().build()` panics).
    #[must_use]
    pub fn new(endpoint: VaultEndpoint) -> Self {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to create reqwest client");
        Self { endpoint, client }
    }

    /// Set a custom `reqwest::blocking::Client`.
    #[must_use]
    pub fn set_client(mut self, client: reqwest::blocking::Client) -> Self {
        self.client = client;
        self
    }
}

#[cfg(feature = "blocking")]
impl Transport for BlockingHttpTransport {
    fn send(&self, request: &TransportRequest) -> Result<TransportResponse> {
        let url = self.endpoint.resolve(&request.path)?;
        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in header_values(request)? {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(deadline) = request.deadline {
            builder = builder.timeout(deadline);
        }
        let response = builder.send()?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();
        Ok(TransportResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::response::VaultResponse;

    #[test]
    fn test_resolve_appends_api_version() {
        let endpoint = VaultEndpoint::parse("https://vault.example.com:8200").unwrap();
        let url = endpoint.resolve("auth/approle/login").unwrap();
        assert_eq!(
            url.as_str(),
            "https://vault.example.com:8200/v1/auth/approle/login"
        );
    }

    #[test]
    fn test_resolve_tolerates_leading_slash() {
        let endpoint = VaultEndpoint::parse("https://vault.example.com").unwrap();
        let url = endpoint.resolve("/cubbyhole/response").unwrap();
        assert_eq!(url.as_str(), "https://vault.example.com/v1/cubbyhole/response");
    }

    #[test]
    fn test_not_found_is_distinct_from_server_error() {
        let missing = TransportResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), vec![]);
        let err = missing
            .ensure_success(&Method::GET, "secret/absent")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { path } if path == "secret/absent"));

        let denied = TransportResponse::new(
            StatusCode::FORBIDDEN,
            HeaderMap::new(),
            b"permission denied".to_vec(),
        );
        let err = denied
            .ensure_success(&Method::GET, "secret/denied")
            .unwrap_err();
        assert!(matches!(err, Error::Server { status: 403, .. }));
    }

    #[test]
    fn test_no_content_is_success() {
        let response = TransportResponse::new(StatusCode::NO_CONTENT, HeaderMap::new(), vec![]);
        assert!(response
            .ensure_success(&Method::POST, "auth/token/revoke-self")
            .is_ok());
    }

    #[tokio::test]
    async fn test_async_transport_attaches_token_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/auth/token/lookup-self")
            .match_header("x-vault-token", "my-token")
            .with_status(200)
            .with_body(json!({"data": {"ttl": 10}}).to_string())
            .create_async()
            .await;

        let transport = HttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let request = TransportRequest::get("auth/token/lookup-self")
            .with_token(VaultToken::of("my-token").unwrap());
        let response = transport.send(&request).await.unwrap();
        mock.assert_async().await;

        let parsed: VaultResponse = response.json().unwrap();
        assert!(parsed.data.is_some());
    }

    #[cfg(feature = "blocking")]
    #[test]
    fn test_blocking_transport_posts_json_body() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/approle/login")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(
                json!({"role_id": "hello", "secret_id": "world"}),
            ))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let transport = BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let request = TransportRequest::post("auth/approle/login")
            .with_body(json!({"role_id": "hello", "secret_id": "world"}));
        let response = transport.send(&request).unwrap();
        mock.assert();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
