#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]

//! # Session & Certificate Lifecycle Client
//!
//! This crate keeps a process authenticated against a Vault-compatible
//! secrets service and keeps its short-lived X.509 certificates fresh.
//! Features include:
//!
//! * A dozen authentication flows (static token, AppRole with pull mode and
//!   response-wrapped credentials, username/password, LDAP, Kubernetes, JWT,
//!   TLS client certificates, AWS EC2/IAM, Azure, GCP, cubbyhole) built on
//!   one declarative, restartable step pipeline
//! * Blocking and asynchronous executors for the same pipeline values
//! * A lifecycle-aware session manager: lock-free token reads, pre-expiry
//!   renewal with jitter in a background task, re-login when a lease cannot
//!   be carried forward, revocation on destroy
//! * A certificate container that issues or fetches named certificates,
//!   rotates them ahead of `notAfter` and dispatches lifecycle events
//! * Safe defaults - does not follow redirects and hides tokens in Debug
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warden::methods::{AppRoleAuthOptions, RoleId, SecretId};
//! use warden::session::SessionManager;
//! use warden::transport::{HttpTransport, VaultEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> warden::Result<()> {
//!     let transport = Arc::new(HttpTransport::new(VaultEndpoint::parse(
//!         "https://vault.example.com:8200",
//!     )?));
//!     let method = Arc::new(
//!         AppRoleAuthOptions::builder()
//!             .role_id(RoleId::Provided("my-role-id".into()))
//!             .secret_id(SecretId::Provided("my-secret-id".into()))
//!             .build()?,
//!     );
//!
//!     // The manager logs in on first use and keeps the token renewed in a
//!     // background task.
//!     let sessions = SessionManager::new(transport, method);
//!     let token = sessions.session_token().await?;
//!     println!(
//!         "authenticated, accessor {:?}",
//!         token.as_login().and_then(|login| login.accessor())
//!     );
//!
//!     // Revoke the login token on the way out.
//!     sessions.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **all**: Includes `rustls-tls`, `blocking`, and `runtime-tokio`.
//! - **default**: Includes `rustls-tls`, `blocking`, and `runtime-tokio`.
//! - **rustls-tls**: Enables `reqwest/rustls-tls` and `reqwest/rustls-tls-native-roots`.
//! - **blocking**: Enables the blocking transport (`reqwest/blocking`); the
//!   blocking step executor works without an async runtime.
//! - **runtime-tokio**: Enables the `tokio` runtime (currently the only
//!   supported async runtime). The session manager, the certificate
//!   container and the renewal scheduler spawn background tasks on it.
//!

#[cfg(feature = "runtime-tokio")]
pub mod certs;
pub mod error;
pub mod methods;
pub mod response;
pub mod schedule;
#[cfg(feature = "runtime-tokio")]
pub mod session;
pub mod steps;
mod token;
pub mod transport;

#[cfg(feature = "runtime-tokio")]
pub use certs::{CertificateContainer, RequestedCertificate};
pub use error::{Error, Result};
#[cfg(feature = "runtime-tokio")]
pub use session::SessionManager;
pub use token::{LoginToken, LoginTokenBuilder, SessionToken, TokenType, VaultToken, TOKEN_HEADER};
