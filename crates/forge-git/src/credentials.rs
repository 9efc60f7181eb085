//! Credentials for querying private repositories

use k8s_openapi::api::core::v1::Secret;

/// Username used when authenticating with a bare access token
pub const TOKEN_USERNAME: &str = "oauth2";

/// Secret key holding the username
pub const USERNAME_KEY: &str = "username";

/// Secret key holding the password or token
pub const PASSWORD_KEY: &str = "password";

/// Basic-auth credentials for a git remote
#[derive(Clone, PartialEq, Eq)]
pub struct GitCredentials {
    /// Username
    pub username: String,
    /// Password or access token
    pub password: String,
}

impl GitCredentials {
    /// Credentials for a bare access token
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            username: TOKEN_USERNAME.to_string(),
            password: token.into(),
        }
    }

    /// Read `username`/`password` from a Secret.
    ///
    /// Returns `None` when either key is missing or empty, which callers
    /// treat as anonymous access.
    pub fn from_secret(secret: &Secret) -> Option<Self> {
        let username = secret_value(secret, USERNAME_KEY)?;
        let password = secret_value(secret, PASSWORD_KEY)?;
        Some(Self { username, password })
    }
}

impl std::fmt::Debug for GitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    let from_data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok());
    let from_string_data = || secret.string_data.as_ref().and_then(|d| d.get(key)).cloned();

    from_data
        .or_else(from_string_data)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
