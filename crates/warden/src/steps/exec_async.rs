//! Asynchronous interpreter for [`AuthSteps`] graphs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};

use super::exec::{final_token_from_value, login_token_from_response, parse_body};
use super::{AuthSteps, Node, StepValue};
use crate::error::{AuthPhase, Error, Result};
use crate::token::SessionToken;
use crate::transport::{AsyncTransport, TransportRequest};

/// Execute a login pipeline on an asynchronous transport.
///
/// Semantics match [`execute`](super::execute), with two differences: the
/// branches of a zip run concurrently, and dropping the returned future
/// cancels the in-flight request without evaluating further nodes. The caller
/// thread is never blocked.
///
/// # Errors
/// See [`execute`](super::execute).
pub async fn execute_async(
    steps: &AuthSteps,
    transport: &dyn AsyncTransport,
) -> Result<SessionToken> {
    let memo = Mutex::new(HashMap::new());
    match steps.root.as_ref() {
        Node::SupplyToken(token) => Ok(SessionToken::Opaque(token.clone())),
        Node::Login { parent, path, body } => {
            let state = eval(parent, transport, &memo).await?;
            let body = match body {
                Some(mapper) => mapper(state)?,
                None => state,
            };
            let response = transport
                .send(&TransportRequest::post(path.clone()).with_body(body))
                .await
                .map_err(|e| Error::login(AuthPhase::Login, path, e))?;
            login_token_from_response(path, &response)
        }
        _ => {
            let value = eval(&steps.root, transport, &memo).await?;
            final_token_from_value(value)
        }
    }
}

fn eval<'a>(
    node: &'a Arc<Node>,
    transport: &'a dyn AsyncTransport,
    memo: &'a Mutex<HashMap<usize, StepValue>>,
) -> BoxFuture<'a, Result<StepValue>> {
    async move {
        let key = Arc::as_ptr(node) as usize;
        if let Some(cached) = memo.lock().expect("Non-poisoned lock").get(&key) {
            return Ok(cached.clone());
        }
        let value = match node.as_ref() {
            Node::SupplyToken(token) => StepValue::String(token.as_str().to_owned()),
            Node::SupplyValue(supplier) => supplier()?,
            Node::HttpRequest(request) => {
                let response = transport
                    .send(request)
                    .await?
                    .ensure_success(&request.method, &request.path)?;
                parse_body(&response)?
            }
            Node::Map { parent, mapper } => mapper(eval(parent, transport, memo).await?)?,
            Node::OnNext { parent, inspector } => {
                let value = eval(parent, transport, memo).await?;
                inspector(&value);
                value
            }
            Node::Zip { left, right } => {
                let (left, right) = futures::future::try_join(
                    eval(left, transport, memo),
                    eval(right, transport, memo),
                )
                .await?;
                StepValue::Array(vec![left, right])
            }
            Node::Login { path, .. } => {
                return Err(Error::login(
                    AuthPhase::Login,
                    path,
                    "Login must be the terminal step of a pipeline",
                ));
            }
        };
        memo.lock()
            .expect("Non-poisoned lock")
            .insert(key, value.clone());
        Ok(value)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::response::{unwrap_response, unwrap_token};
    use crate::steps::unzip;
    use crate::token::VaultToken;
    use crate::transport::{HttpTransport, VaultEndpoint};

    fn transport(server: &mockito::ServerGuard) -> HttpTransport {
        HttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap())
    }

    #[tokio::test]
    async fn test_async_login() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/kubernetes/login")
            .match_body(mockito::Matcher::Json(
                json!({"role": "web", "jwt": "sa-jwt"}),
            ))
            .with_status(200)
            .with_body(
                json!({"auth": {"client_token": "k8s-token", "lease_duration": 60, "renewable": true}})
                    .to_string(),
            )
            .create_async()
            .await;

        let steps = AuthSteps::from_value(json!({"role": "web", "jwt": "sa-jwt"}))
            .login("auth/kubernetes/login");
        let token = execute_async(&steps, &transport(&server)).await.unwrap();
        mock.assert_async().await;
        assert_eq!(token.as_str(), "k8s-token");
    }

    #[tokio::test]
    async fn test_async_zip_executes_both_branches() {
        let mut server = mockito::Server::new_async().await;
        let role = server
            .mock("GET", "/v1/auth/approle/role/web/role-id")
            .with_status(200)
            .with_body(json!({"data": {"role_id": "pulled-role"}}).to_string())
            .create_async()
            .await;
        let secret = server
            .mock("POST", "/v1/auth/approle/role/web/secret-id")
            .with_status(200)
            .with_body(json!({"data": {"secret_id": "pulled-secret"}}).to_string())
            .create_async()
            .await;
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .match_body(mockito::Matcher::Json(
                json!({"role_id": "pulled-role", "secret_id": "pulled-secret"}),
            ))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "my-token"}}).to_string())
            .create_async()
            .await;

        let role_id = AuthSteps::from_request(TransportRequest::get(
            "auth/approle/role/web/role-id",
        ))
        .map(|v| Ok(v["data"]["role_id"].clone()));
        let secret_id = AuthSteps::from_request(TransportRequest::post(
            "auth/approle/role/web/secret-id",
        ))
        .map(|v| Ok(v["data"]["secret_id"].clone()));
        let steps = role_id
            .zip_with(secret_id)
            .map(|pair| {
                let (role_id, secret_id) = unzip(pair)?;
                Ok(json!({"role_id": role_id, "secret_id": secret_id}))
            })
            .login("auth/approle/login");

        let token = execute_async(&steps, &transport(&server)).await.unwrap();
        role.assert_async().await;
        secret.assert_async().await;
        login.assert_async().await;
        assert_eq!(token.as_str(), "my-token");
    }

    #[tokio::test]
    async fn test_async_wrapped_token_retrieval() {
        let mut server = mockito::Server::new_async().await;
        let inner = json!({"auth": {"client_token": "unwrapped-token"}});
        let mock = server
            .mock("GET", "/v1/cubbyhole/response")
            .match_header("x-vault-token", "wrapping-token")
            .with_status(200)
            .with_body(json!({"data": {"response": inner.to_string()}}).to_string())
            .create_async()
            .await;

        let steps = AuthSteps::from_request(
            TransportRequest::get("cubbyhole/response")
                .with_token(VaultToken::of("wrapping-token").unwrap()),
        )
        .map(|value| {
            let response = serde_json::from_value(value)
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            let unwrapped = unwrap_response(&response)?;
            Ok(json!(unwrap_token(&unwrapped)?.as_str()))
        });

        let token = execute_async(&steps, &transport(&server)).await.unwrap();
        mock.assert_async().await;
        assert_eq!(token.as_str(), "unwrapped-token");
        assert!(token.as_login().is_none());
    }

    #[tokio::test]
    async fn test_async_re_execution_produces_equal_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/auth/jwt/login")
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "same"}}).to_string())
            .expect(2)
            .create_async()
            .await;

        let steps = AuthSteps::from_value(json!({"jwt": "x"})).login("auth/jwt/login");
        let transport = transport(&server);
        let first = execute_async(&steps, &transport).await.unwrap();
        let second = execute_async(&steps, &transport).await.unwrap();
        mock.assert_async().await;
        assert_eq!(first, second);
    }
}
