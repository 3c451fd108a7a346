//! Role/secret authentication with optional pull mode and response-wrapped
//! credentials.

use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::AuthMethod;
use crate::response::{unwrap_data_field, unwrap_response, VaultResponse};
use crate::steps::{unzip, AuthSteps, StepValue};
use crate::token::VaultToken;
use crate::transport::TransportRequest;

/// How the role id is obtained.
#[derive(Debug, Clone)]
pub enum RoleId {
    /// Use the given role id directly.
    Provided(String),
    /// Pull the role id from `auth/<path>/role/<role>/role-id` using an
    /// operator-provided initial token.
    Pull { initial_token: VaultToken },
    /// Unwrap the role id from a response-wrapping token.
    Wrapped { wrapping_token: VaultToken },
}

/// How the secret id is obtained.
#[derive(Debug, Clone)]
pub enum SecretId {
    /// Use the given secret id directly.
    Provided(String),
    /// Generate a secret id via `auth/<path>/role/<role>/secret-id` using an
    /// operator-provided initial token.
    Pull { initial_token: VaultToken },
    /// Unwrap the secret id from a response-wrapping token.
    Wrapped { wrapping_token: VaultToken },
    /// The role does not require a secret id (`bind_secret_id=false`).
    Absent,
}

/// Options for the role/secret flow.
#[derive(Debug, Clone)]
pub struct AppRoleAuthOptions {
    path: String,
    app_role: Option<String>,
    role_id: RoleId,
    secret_id: SecretId,
}

impl AppRoleAuthOptions {
    /// Start building options. The mount path defaults to `approle`.
    #[must_use]
    pub fn builder() -> AppRoleAuthOptionsBuilder {
        AppRoleAuthOptionsBuilder {
            path: "approle".into(),
            app_role: None,
            role_id: None,
            secret_id: SecretId::Absent,
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Builder for [`AppRoleAuthOptions`].
#[derive(Debug, Clone)]
pub struct AppRoleAuthOptionsBuilder {
    path: String,
    app_role: Option<String>,
    role_id: Option<RoleId>,
    secret_id: SecretId,
}

impl AppRoleAuthOptionsBuilder {
    /// Override the mount path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the role name. Required for pull mode.
    #[must_use]
    pub fn app_role(mut self, app_role: impl Into<String>) -> Self {
        self.app_role = Some(app_role.into());
        self
    }

    #[must_use]
    pub fn role_id(mut self, role_id: RoleId) -> Self {
        self.role_id = Some(role_id);
        self
    }

    #[must_use]
    pub fn secret_id(mut self, secret_id: SecretId) -> Self {
        self.secret_id = secret_id;
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if the role id is missing, or if
    /// pull mode is requested without a role name.
    pub fn build(self) -> Result<AppRoleAuthOptions> {
        let Some(role_id) = self.role_id else {
            return Err(Error::Configuration(
                "AppRole authentication requires either a direct role id or a pull token".into(),
            ));
        };
        let pull_requested = matches!(role_id, RoleId::Pull { .. })
            || matches!(self.secret_id, SecretId::Pull { .. });
        if pull_requested && self.app_role.is_none() {
            return Err(Error::Configuration(
                "AppRole authentication in pull mode requires the role name".into(),
            ));
        }
        Ok(AppRoleAuthOptions {
            path: self.path,
            app_role: self.app_role,
            role_id,
            secret_id: self.secret_id,
        })
    }
}

fn parse_response(value: StepValue) -> Result<VaultResponse> {
    serde_json::from_value(value).map_err(|e| Error::Deserialization(e.to_string()))
}

fn unwrap_field_steps(wrapping_token: VaultToken, field: &'static str) -> AuthSteps {
    AuthSteps::from_request(
        TransportRequest::get("cubbyhole/response").with_token(wrapping_token),
    )
    .map(move |value| {
        let unwrapped = unwrap_response(&parse_response(value)?)?;
        Ok(json!(unwrap_data_field(&unwrapped, field)?))
    })
}

impl AppRoleAuthOptions {
    fn role_id_steps(&self) -> AuthSteps {
        match &self.role_id {
            RoleId::Provided(role_id) => AuthSteps::from_value(json!(role_id)),
            RoleId::Pull { initial_token } => {
                let path = format!(
                    "auth/{}/role/{}/role-id",
                    self.path,
                    self.app_role.as_deref().expect("validated at build")
                );
                AuthSteps::from_request(
                    TransportRequest::get(path).with_token(initial_token.clone()),
                )
                .map(|value| {
                    let response = parse_response(value)?;
                    let data = response.data.unwrap_or_default();
                    data.get("role_id").cloned().ok_or_else(|| {
                        Error::Unwrap("Role id response does not contain role_id".into())
                    })
                })
            }
            RoleId::Wrapped { wrapping_token } => {
                unwrap_field_steps(wrapping_token.clone(), "role_id")
            }
        }
    }

    fn secret_id_steps(&self) -> Option<AuthSteps> {
        match &self.secret_id {
            SecretId::Provided(secret_id) => Some(AuthSteps::from_value(json!(secret_id))),
            SecretId::Pull { initial_token } => {
                let path = format!(
                    "auth/{}/role/{}/secret-id",
                    self.path,
                    self.app_role.as_deref().expect("validated at build")
                );
                Some(
                    AuthSteps::from_request(
                        TransportRequest::post(path).with_token(initial_token.clone()),
                    )
                    .map(|value| {
                        let response = parse_response(value)?;
                        let data = response.data.unwrap_or_default();
                        data.get("secret_id").cloned().ok_or_else(|| {
                            Error::Unwrap("Secret id response does not contain secret_id".into())
                        })
                    }),
                )
            }
            SecretId::Wrapped { wrapping_token } => {
                Some(unwrap_field_steps(wrapping_token.clone(), "secret_id"))
            }
            SecretId::Absent => None,
        }
    }
}

impl AuthMethod for AppRoleAuthOptions {
    fn name(&self) -> &str {
        "approle"
    }

    fn steps(&self) -> AuthSteps {
        let login_path = format!("auth/{}/login", self.path);
        let role_id = self.role_id_steps();
        match self.secret_id_steps() {
            Some(secret_id) => role_id
                .zip_with(secret_id)
                .map(|pair| {
                    let (role_id, secret_id) = unzip(pair)?;
                    Ok(json!({"role_id": role_id, "secret_id": secret_id}))
                })
                .login(login_path),
            None => role_id
                .map(|role_id| Ok(json!({"role_id": role_id})))
                .login(login_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    fn transport(server: &mockito::Server) -> BlockingHttpTransport {
        BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap())
    }

    #[test]
    fn test_role_id_is_required() {
        let err = AppRoleAuthOptions::builder().build().unwrap_err();
        assert!(matches!(err, Error::Configuration(m) if m.contains("role id")));
    }

    #[test]
    fn test_pull_mode_requires_role_name() {
        let err = AppRoleAuthOptions::builder()
            .role_id(RoleId::Pull {
                initial_token: VaultToken::of("init").unwrap(),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(m) if m.contains("role name")));
    }

    #[test]
    fn test_provided_role_and_secret_login() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/approle/login")
            .match_body(mockito::Matcher::Json(
                json!({"role_id": "hello", "secret_id": "world"}),
            ))
            .with_status(200)
            .with_body(
                json!({"auth": {"client_token": "my-token", "renewable": true, "lease_duration": 10}})
                    .to_string(),
            )
            .create();

        let options = AppRoleAuthOptions::builder()
            .role_id(RoleId::Provided("hello".into()))
            .secret_id(SecretId::Provided("world".into()))
            .build()
            .unwrap();
        let token = execute(&options.steps(), &transport(&server)).unwrap();
        mock.assert();
        assert_eq!(token.as_str(), "my-token");
        assert!(token.is_renewable());
    }

    #[test]
    fn test_wrapped_secret_id_is_unwrapped_before_login() {
        let mut server = mockito::Server::new();
        let envelope = json!({"data": {"secret_id": "my_secret_id"}});
        server
            .mock("GET", "/v1/cubbyhole/response")
            .match_header("x-vault-token", "unwrapping_token")
            .with_status(200)
            .with_body(json!({"data": {"response": envelope.to_string()}}).to_string())
            .create();
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .match_body(mockito::Matcher::Json(
                json!({"role_id": "my_role_id", "secret_id": "my_secret_id"}),
            ))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "my-token"}}).to_string())
            .create();

        let options = AppRoleAuthOptions::builder()
            .role_id(RoleId::Provided("my_role_id".into()))
            .secret_id(SecretId::Wrapped {
                wrapping_token: VaultToken::of("unwrapping_token").unwrap(),
            })
            .build()
            .unwrap();
        let token = execute(&options.steps(), &transport(&server)).unwrap();
        login.assert();
        assert_eq!(token.as_str(), "my-token");
    }

    #[test]
    fn test_pull_mode_fetches_both_ids() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/v1/auth/approle/role/web/role-id")
            .match_header("x-vault-token", "init")
            .with_status(200)
            .with_body(json!({"data": {"role_id": "pulled-role"}}).to_string())
            .create();
        server
            .mock("POST", "/v1/auth/approle/role/web/secret-id")
            .match_header("x-vault-token", "init")
            .with_status(200)
            .with_body(json!({"data": {"secret_id": "pulled-secret"}}).to_string())
            .create();
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .match_body(mockito::Matcher::Json(
                json!({"role_id": "pulled-role", "secret_id": "pulled-secret"}),
            ))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "my-token"}}).to_string())
            .create();

        let init = VaultToken::of("init").unwrap();
        let options = AppRoleAuthOptions::builder()
            .app_role("web")
            .role_id(RoleId::Pull {
                initial_token: init.clone(),
            })
            .secret_id(SecretId::Pull {
                initial_token: init,
            })
            .build()
            .unwrap();
        let token = execute(&options.steps(), &transport(&server)).unwrap();
        login.assert();
        assert_eq!(token.as_str(), "my-token");
    }

    #[test]
    fn test_secret_id_absent_omits_field() {
        let mut server = mockito::Server::new();
        let login = server
            .mock("POST", "/v1/auth/approle/login")
            .match_body(mockito::Matcher::Json(json!({"role_id": "solo"})))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = AppRoleAuthOptions::builder()
            .role_id(RoleId::Provided("solo".into()))
            .build()
            .unwrap();
        execute(&options.steps(), &transport(&server)).unwrap();
        login.assert();
    }
}
