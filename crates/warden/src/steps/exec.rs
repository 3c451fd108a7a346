//! Blocking interpreter for [`AuthSteps`] graphs.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;

use super::{AuthSteps, Node, StepValue};
use crate::error::{AuthPhase, Error, Result};
use crate::response::VaultResponse;
use crate::token::{SessionToken, VaultToken};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Execute a login pipeline on a blocking transport.
///
/// Evaluation is depth-first from the terminal node, memoizing each node's
/// result for the duration of a single run. Re-execution starts afresh.
///
/// # Errors
/// - [`Error::Login`] if the login request fails or the response carries no
///   `auth` block, annotated with the login path.
/// - Supplier and request failures propagate unchanged.
pub fn execute(steps: &AuthSteps, transport: &dyn Transport) -> Result<SessionToken> {
    let mut memo = HashMap::new();
    match steps.root.as_ref() {
        Node::SupplyToken(token) => Ok(SessionToken::Opaque(token.clone())),
        Node::Login { parent, path, body } => {
            let state = eval(parent, transport, &mut memo)?;
            let body = match body {
                Some(mapper) => mapper(state)?,
                None => state,
            };
            let response = transport
                .send(&TransportRequest::post(path.clone()).with_body(body))
                .map_err(|e| Error::login(AuthPhase::Login, path, e))?;
            login_token_from_response(path, &response)
        }
        _ => {
            let value = eval(&steps.root, transport, &mut memo)?;
            final_token_from_value(value)
        }
    }
}

fn eval(
    node: &Arc<Node>,
    transport: &dyn Transport,
    memo: &mut HashMap<usize, StepValue>,
) -> Result<StepValue> {
    let key = Arc::as_ptr(node) as usize;
    if let Some(cached) = memo.get(&key) {
        return Ok(cached.clone());
    }
    let value = match node.as_ref() {
        Node::SupplyToken(token) => StepValue::String(token.as_str().to_owned()),
        Node::SupplyValue(supplier) => supplier()?,
        Node::HttpRequest(request) => {
            let response = transport
                .send(request)?
                .ensure_success(&request.method, &request.path)?;
            parse_body(&response)?
        }
        Node::Map { parent, mapper } => mapper(eval(parent, transport, memo)?)?,
        Node::OnNext { parent, inspector } => {
            let value = eval(parent, transport, memo)?;
            inspector(&value);
            value
        }
        Node::Zip { left, right } => StepValue::Array(vec![
            eval(left, transport, memo)?,
            eval(right, transport, memo)?,
        ]),
        Node::Login { path, .. } => {
            return Err(Error::login(
                AuthPhase::Login,
                path,
                "Login must be the terminal step of a pipeline",
            ));
        }
    };
    memo.insert(key, value.clone());
    Ok(value)
}

pub(super) fn parse_body(response: &TransportResponse) -> Result<StepValue> {
    if response.body().is_empty() {
        return Ok(StepValue::Null);
    }
    response.json()
}

/// Extract a [`SessionToken`] from a login response.
pub(super) fn login_token_from_response(
    path: &str,
    response: &TransportResponse,
) -> Result<SessionToken> {
    let response = response
        .clone()
        .ensure_success(&Method::POST, path)
        .map_err(|e| Error::login(AuthPhase::Login, path, e))?;
    let parsed: VaultResponse = response
        .json()
        .map_err(|e| Error::login(AuthPhase::Login, path, e))?;
    let auth = parsed.auth.ok_or_else(|| {
        Error::login(AuthPhase::Login, path, "Login response contains no auth block")
    })?;
    Ok(SessionToken::Login(
        auth.login_token()
            .map_err(|e| Error::login(AuthPhase::Login, path, e))?,
    ))
}

/// A pipeline without a login terminal yields its final value; a string value
/// is an opaque session token (e.g. an unwrapped cubbyhole token).
pub(super) fn final_token_from_value(value: StepValue) -> Result<SessionToken> {
    match value {
        StepValue::String(token) => Ok(SessionToken::Opaque(VaultToken::of(token)?)),
        other => Err(Error::login(
            AuthPhase::Login,
            "",
            format!("Pipeline did not terminate in a session token (got {other})"),
        )),
    }
}
