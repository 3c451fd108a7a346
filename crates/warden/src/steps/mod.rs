//! Declarative, restartable login pipelines.
//!
//! An [`AuthSteps`] value is an immutable graph describing how to obtain a
//! session token: supply a value, issue requests, transform and combine
//! intermediate results, and finally post a login request. Graphs are
//! first-class values; both executors interpret the same graph any number of
//! times without carrying state between runs.
//!
//! Values flowing through a graph are plain JSON ([`StepValue`]): suppliers
//! yield strings, requests yield their parsed response body, and
//! [`AuthSteps::zip_with`] yields a two-element array.

mod exec;
mod exec_async;

use std::sync::Arc;

pub use exec::execute;
pub use exec_async::execute_async;

use crate::error::Result;
use crate::token::VaultToken;
use crate::transport::TransportRequest;

/// The value type flowing between steps.
pub type StepValue = serde_json::Value;

pub(crate) type ValueSupplier = Arc<dyn Fn() -> Result<StepValue> + Send + Sync>;
pub(crate) type ValueMapper = Arc<dyn Fn(StepValue) -> Result<StepValue> + Send + Sync>;
pub(crate) type ValueInspector = Arc<dyn Fn(&StepValue) + Send + Sync>;

pub(crate) enum Node {
    /// Terminal: yields the given token.
    SupplyToken(VaultToken),
    /// Yields the result of an effect-free producer.
    SupplyValue(ValueSupplier),
    /// Yields the parsed response of one request.
    HttpRequest(TransportRequest),
    /// Transforms the parent's output.
    Map {
        parent: Arc<Node>,
        mapper: ValueMapper,
    },
    /// Taps the parent's output without changing it.
    OnNext {
        parent: Arc<Node>,
        inspector: ValueInspector,
    },
    /// Yields the pair of both branches.
    Zip {
        left: Arc<Node>,
        right: Arc<Node>,
    },
    /// Terminal: POSTs the current value to the login path and extracts the
    /// session token from the response.
    Login {
        parent: Arc<Node>,
        path: String,
        body: Option<ValueMapper>,
    },
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::SupplyToken(_) => f.write_str("SupplyToken"),
            Node::SupplyValue(_) => f.write_str("SupplyValue"),
            Node::HttpRequest(request) => {
                write!(f, "HttpRequest({} {})", request.method, request.path)
            }
            Node::Map { parent, .. } => f.debug_tuple("Map").field(parent).finish(),
            Node::OnNext { parent, .. } => f.debug_tuple("OnNext").field(parent).finish(),
            Node::Zip { left, right } => f.debug_tuple("Zip").field(left).field(right).finish(),
            Node::Login { parent, path, .. } => {
                f.debug_struct("Login").field("parent", parent).field("path", path).finish()
            }
        }
    }
}

/// An immutable login pipeline. See the [module docs](self).
#[derive(Debug, Clone)]
pub struct AuthSteps {
    pub(crate) root: Arc<Node>,
}

impl AuthSteps {
    /// A pipeline that yields the given token without any request.
    #[must_use]
    pub fn just(token: VaultToken) -> Self {
        Self {
            root: Arc::new(Node::SupplyToken(token)),
        }
    }

    /// A pipeline that starts from a produced value, e.g. a file read.
    #[must_use]
    pub fn from_supplier(
        supplier: impl Fn() -> Result<StepValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: Arc::new(Node::SupplyValue(Arc::new(supplier))),
        }
    }

    /// A pipeline that starts from a fixed value.
    #[must_use]
    pub fn from_value(value: StepValue) -> Self {
        Self::from_supplier(move || Ok(value.clone()))
    }

    /// A pipeline that starts from the response of one request.
    #[must_use]
    pub fn from_request(request: TransportRequest) -> Self {
        Self {
            root: Arc::new(Node::HttpRequest(request)),
        }
    }

    /// Transform the current value.
    #[must_use]
    pub fn map(
        self,
        mapper: impl Fn(StepValue) -> Result<StepValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: Arc::new(Node::Map {
                parent: self.root,
                mapper: Arc::new(mapper),
            }),
        }
    }

    /// Observe the current value without changing it.
    #[must_use]
    pub fn on_next(self, inspector: impl Fn(&StepValue) + Send + Sync + 'static) -> Self {
        Self {
            root: Arc::new(Node::OnNext {
                parent: self.root,
                inspector: Arc::new(inspector),
            }),
        }
    }

    /// Pair this pipeline's value with another's. Both branches are executed;
    /// their relative ordering is unspecified.
    #[must_use]
    pub fn zip_with(self, other: AuthSteps) -> Self {
        Self {
            root: Arc::new(Node::Zip {
                left: self.root,
                right: other.root,
            }),
        }
    }

    /// Terminate the pipeline by POSTing the current value as the JSON body
    /// of a login request at `path`.
    #[must_use]
    pub fn login(self, path: impl Into<String>) -> Self {
        Self {
            root: Arc::new(Node::Login {
                parent: self.root,
                path: path.into(),
                body: None,
            }),
        }
    }

    /// Terminate the pipeline by POSTing a derived body to `path`.
    #[must_use]
    pub fn login_with(
        self,
        path: impl Into<String>,
        body: impl Fn(StepValue) -> Result<StepValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            root: Arc::new(Node::Login {
                parent: self.root,
                path: path.into(),
                body: Some(Arc::new(body)),
            }),
        }
    }
}

/// Split the array produced by [`AuthSteps::zip_with`] back into its halves.
///
/// # Errors
/// Fails if the value is not a two-element array.
pub fn unzip(value: StepValue) -> Result<(StepValue, StepValue)> {
    match value {
        serde_json::Value::Array(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            let left = items.next().expect("length checked");
            let right = items.next().expect("length checked");
            Ok((left, right))
        }
        other => Err(crate::error::Error::Login {
            phase: crate::error::AuthPhase::Login,
            path: String::new(),
            message: format!("Expected a zipped pair, got {other}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_graph_is_cheaply_cloneable() {
        let steps = AuthSteps::from_value(json!({"role_id": "x"})).login("auth/approle/login");
        let cloned = steps.clone();
        assert!(Arc::ptr_eq(&steps.root, &cloned.root));
    }

    #[test]
    fn test_unzip_pair() {
        let (left, right) = unzip(json!(["a", "b"])).unwrap();
        assert_eq!(left, json!("a"));
        assert_eq!(right, json!("b"));
    }

    #[test]
    fn test_unzip_rejects_non_pair() {
        assert!(unzip(json!("a")).is_err());
        assert!(unzip(json!(["a"])).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let steps = AuthSteps::just(VaultToken::of("secret-token").unwrap());
        let debug = format!("{steps:?}");
        assert!(!debug.contains("secret-token"), "{debug}");
    }
}
