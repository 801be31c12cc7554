//! Push credentials handed from a registry to the image pusher.

use oci_client::secrets::RegistryAuth;
use std::fmt;

/// Username used for OAuth2 bearer tokens presented as basic credentials.
pub const OAUTH2_USERNAME: &str = "oauth2accesstoken";

/// Opaque credentials authorizing a registry write.
#[derive(Clone, PartialEq, Eq)]
pub struct Authenticator {
    username: String,
    password: String,
}

impl Authenticator {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Wrap an OAuth2 access token.
    pub fn oauth2_token(token: impl Into<String>) -> Self {
        Self::basic(OAUTH2_USERNAME, token)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl From<&Authenticator> for RegistryAuth {
    fn from(auth: &Authenticator) -> Self {
        RegistryAuth::Basic(auth.username.clone(), auth.password.clone())
    }
}
