//! Serde models for the secrets service's JSON envelope and the
//! response-wrapping (cubbyhole) exchange.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::token::{LoginToken, TokenType, VaultToken};

/// The generic response envelope returned by the secrets service.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthPayload>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

/// The `auth` block of a login or renewal response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub client_token: String,
    #[serde(default)]
    pub accessor: Option<String>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub token_policies: Vec<String>,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl AuthPayload {
    /// Build a [`LoginToken`] from this auth block.
    ///
    /// Absent fields take the documented defaults: zero lease, non-renewable,
    /// unknown token type, no accessor.
    ///
    /// # Errors
    /// Fails if `client_token` is empty.
    pub fn login_token(&self) -> Result<LoginToken> {
        let mut builder = LoginToken::builder(VaultToken::of(&self.client_token)?)
            .renewable(self.renewable)
            .lease_duration(Duration::from_secs(self.lease_duration))
            .token_type(
                self.token_type
                    .as_deref()
                    .map_or(TokenType::Unknown, TokenType::parse),
            );
        if let Some(accessor) = &self.accessor {
            builder = builder.accessor(accessor);
        }
        Ok(builder.build())
    }
}

/// The `data` block of `auth/token/lookup-self`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenLookup {
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
    #[serde(default)]
    pub accessor: Option<String>,
}

impl TokenLookup {
    /// Promote a bare token to a [`LoginToken`] using the looked-up metadata.
    pub(crate) fn into_login_token(self, token: VaultToken) -> LoginToken {
        let mut builder = LoginToken::builder(token)
            .renewable(self.renewable)
            .lease_duration(Duration::from_secs(self.ttl))
            .token_type(
                self.token_type
                    .as_deref()
                    .map_or(TokenType::Unknown, TokenType::parse),
            );
        if let Some(accessor) = self.accessor {
            builder = builder.accessor(accessor);
        }
        builder.build()
    }
}

/// Decode the wrapped envelope out of a `cubbyhole/response` reply.
///
/// The outer response carries a JSON-encoded inner response under
/// `data.response`.
///
/// # Errors
/// - [`Error::Unwrap`] if the outer response has no data or no wrapped
///   response string.
/// - [`Error::Deserialization`] if the inner envelope is not valid JSON.
pub fn unwrap_response(response: &VaultResponse) -> Result<VaultResponse> {
    let data = response
        .data
        .as_ref()
        .ok_or_else(|| Error::Unwrap("Wrapping response contains no data".into()))?;
    let wrapped = data
        .get("response")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Unwrap("Wrapping response contains no wrapped response".into()))?;
    serde_json::from_str(wrapped).map_err(|e| Error::Deserialization(e.to_string()))
}

/// Extract the token an unwrapped envelope carries.
///
/// A token may arrive either as `auth.client_token` or as the single value of
/// the `data` block.
///
/// # Errors
/// - [`Error::Unwrap`] with "does not contain a token" if the data block is
///   empty or holds a non-string value.
/// - [`Error::Unwrap`] with "does not contain an unique token" if the data
///   block has more than one entry.
pub fn unwrap_token(response: &VaultResponse) -> Result<VaultToken> {
    if let Some(auth) = &response.auth {
        return VaultToken::of(&auth.client_token);
    }
    let entries = data_entries(response)?;
    match entries.as_slice() {
        [(_, Value::String(token))] => VaultToken::of(token.clone()),
        [_] | [] => Err(Error::Unwrap(
            "Wrapped response does not contain a token".into(),
        )),
        _ => Err(Error::Unwrap(
            "Wrapped response does not contain an unique token".into(),
        )),
    }
}

/// Extract a named string field from an unwrapped envelope's data block.
///
/// # Errors
/// Fails with [`Error::Unwrap`] if the field is absent or not a string.
pub fn unwrap_data_field(response: &VaultResponse, field: &str) -> Result<String> {
    let entries = data_entries(response)?;
    entries
        .iter()
        .find(|(key, _)| key == field)
        .and_then(|(_, value)| value.as_str())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Error::Unwrap(format!("Wrapped response does not contain {field}")))
}

fn data_entries(response: &VaultResponse) -> Result<Vec<(String, Value)>> {
    let data = response
        .data
        .as_ref()
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Unwrap("Wrapped response does not contain a token".into()))?;
    Ok(data
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn parse(value: Value) -> VaultResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_login_token_from_auth_block() {
        let response = parse(json!({
            "auth": {
                "client_token": "my-token",
                "renewable": true,
                "lease_duration": 10,
                "accessor": "acc-1",
                "token_type": "service"
            }
        }));
        let token = response.auth.unwrap().login_token().unwrap();
        assert_eq!(token.token().as_str(), "my-token");
        assert!(token.is_renewable());
        assert_eq!(token.lease_duration(), Duration::from_secs(10));
        assert_eq!(token.accessor(), Some("acc-1"));
        assert!(token.is_service_token());
    }

    #[test]
    fn test_login_token_defaults() {
        let response = parse(json!({"auth": {"client_token": "t"}}));
        let token = response.auth.unwrap().login_token().unwrap();
        assert!(!token.is_renewable());
        assert_eq!(token.lease_duration(), Duration::ZERO);
        assert_eq!(token.accessor(), None);
        assert_eq!(token.token_type(), TokenType::Unknown);
    }

    #[test]
    fn test_unwrap_response_round_trip() {
        let inner = json!({"auth": {"client_token": "inner-token"}});
        let outer = parse(json!({"data": {"response": inner.to_string()}}));
        let unwrapped = unwrap_response(&outer).unwrap();
        assert_eq!(
            unwrapped.auth.unwrap().client_token,
            "inner-token".to_string()
        );
    }

    #[test]
    fn test_unwrap_response_without_data() {
        let outer = parse(json!({"request_id": "1"}));
        let err = unwrap_response(&outer).unwrap_err();
        assert!(matches!(err, Error::Unwrap(m) if m.contains("no data")));
    }

    #[test]
    fn test_unwrap_token_from_auth() {
        let inner = parse(json!({"auth": {"client_token": "tok"}}));
        assert_eq!(unwrap_token(&inner).unwrap().as_str(), "tok");
    }

    #[test]
    fn test_unwrap_token_from_unique_data_value() {
        let inner = parse(json!({"data": {"token": "tok"}}));
        assert_eq!(unwrap_token(&inner).unwrap().as_str(), "tok");
    }

    #[test]
    fn test_unwrap_token_empty_data() {
        let inner = parse(json!({"data": {}}));
        let err = unwrap_token(&inner).unwrap_err();
        assert!(matches!(err, Error::Unwrap(m) if m.contains("does not contain a token")));
    }

    #[test]
    fn test_unwrap_token_ambiguous_data() {
        let inner = parse(json!({"data": {"a": "1", "b": "2"}}));
        let err = unwrap_token(&inner).unwrap_err();
        assert!(matches!(err, Error::Unwrap(m) if m.contains("unique token")));
    }

    #[test]
    fn test_unwrap_secret_id_field() {
        let inner = parse(json!({"data": {"secret_id": "my_secret_id"}}));
        assert_eq!(
            unwrap_data_field(&inner, "secret_id").unwrap(),
            "my_secret_id"
        );
    }

    #[test]
    fn test_lookup_promotes_bare_token() {
        let lookup: TokenLookup = serde_json::from_value(json!({
            "ttl": 456,
            "renewable": false,
            "type": "service"
        }))
        .unwrap();
        let token = lookup.into_login_token(VaultToken::of("raw").unwrap());
        assert_eq!(token.lease_duration(), Duration::from_secs(456));
        assert!(!token.is_renewable());
        assert!(token.is_service_token());
    }
}
