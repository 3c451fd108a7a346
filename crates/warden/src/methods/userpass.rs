use serde_json::json;

use crate::error::{Error, Result};
use crate::methods::AuthMethod;
use crate::steps::AuthSteps;

/// Username/password authentication.
///
/// The same wire contract backs several mounts; use
/// [`UserPasswordAuthOptionsBuilder::path`] to target `ldap`, `okta` or
/// `radius` instead of the default `userpass`.
#[derive(veil::Redact, Clone)]
pub struct UserPasswordAuthOptions {
    path: String,
    username: String,
    #[redact]
    password: String,
}

impl UserPasswordAuthOptions {
    #[must_use]
    pub fn builder() -> UserPasswordAuthOptionsBuilder {
        UserPasswordAuthOptionsBuilder {
            path: "userpass".into(),
            username: None,
            password: None,
        }
    }

    /// Builder preconfigured for the `ldap` mount.
    #[must_use]
    pub fn ldap() -> UserPasswordAuthOptionsBuilder {
        UserPasswordAuthOptionsBuilder {
            path: "ldap".into(),
            username: None,
            password: None,
        }
    }
}

/// Builder for [`UserPasswordAuthOptions`].
#[derive(Debug, Clone)]
pub struct UserPasswordAuthOptionsBuilder {
    path: String,
    username: Option<String>,
    password: Option<String>,
}

impl UserPasswordAuthOptionsBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    /// Fails with [`Error::Configuration`] if username or password is missing
    /// or empty.
    pub fn build(self) -> Result<UserPasswordAuthOptions> {
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::Configuration("Username must not be empty".into()))?;
        let password = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::Configuration("Password must not be empty".into()))?;
        Ok(UserPasswordAuthOptions {
            path: self.path,
            username,
            password,
        })
    }
}

impl AuthMethod for UserPasswordAuthOptions {
    fn name(&self) -> &str {
        &self.path
    }

    fn steps(&self) -> AuthSteps {
        let login_path = format!("auth/{}/login/{}", self.path, self.username);
        AuthSteps::from_value(json!({"password": self.password})).login(login_path)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::steps::execute;
    use crate::transport::{BlockingHttpTransport, VaultEndpoint};

    #[test]
    fn test_username_and_password_required() {
        assert!(UserPasswordAuthOptions::builder().build().is_err());
        assert!(UserPasswordAuthOptions::builder()
            .username("u")
            .password("")
            .build()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let options = UserPasswordAuthOptions::builder()
            .username("admin")
            .password("hunter2")
            .build()
            .unwrap();
        assert!(!format!("{options:?}").contains("hunter2"));
    }

    #[test]
    fn test_login_path_includes_username() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/auth/ldap/login/admin")
            .match_body(mockito::Matcher::Json(json!({"password": "hunter2"})))
            .with_status(200)
            .with_body(json!({"auth": {"client_token": "t"}}).to_string())
            .create();

        let options = UserPasswordAuthOptions::ldap()
            .username("admin")
            .password("hunter2")
            .build()
            .unwrap();
        let transport =
            BlockingHttpTransport::new(VaultEndpoint::parse(&server.url()).unwrap());
        let token = execute(&options.steps(), &transport).unwrap();
        mock.assert();
        assert_eq!(token.as_str(), "t");
    }
}
