//! The authenticated caller

use serde::{Deserialize, Serialize};

/// How the caller proved who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    SessionToken,
    ApiKey,
}

/// Identity produced by tenant resolution for every accepted request.
///
/// Fields are private so a principal cannot be altered after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Principal {
    auth_mode: AuthMode,
    user_id: String,
    role_id: String,
    client_type_id: String,
    /// Row-level access descriptors, forwarded to backends verbatim.
    #[serde(default)]
    row_access: Vec<serde_json::Value>,
}

impl Principal {
    /// Principal for a session token, as reported by the auth service.
    pub fn session(
        user_id: impl Into<String>,
        role_id: impl Into<String>,
        client_type_id: impl Into<String>,
        row_access: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            auth_mode: AuthMode::SessionToken,
            user_id: user_id.into(),
            role_id: role_id.into(),
            client_type_id: client_type_id.into(),
            row_access,
        }
    }

    /// Principal for an api-key caller. The user identity is always empty.
    pub fn api_key(role_id: impl Into<String>, client_type_id: impl Into<String>) -> Self {
        Self {
            auth_mode: AuthMode::ApiKey,
            user_id: String::new(),
            role_id: role_id.into(),
            client_type_id: client_type_id.into(),
            row_access: Vec::new(),
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn role_id(&self) -> &str {
        &self.role_id
    }

    pub fn client_type_id(&self) -> &str {
        &self.client_type_id
    }

    pub fn row_access(&self) -> &[serde_json::Value] {
        &self.row_access
    }
}
