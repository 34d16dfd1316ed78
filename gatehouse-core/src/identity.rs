//! Tenancy coordinates and request identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// The (project, environment) pair that scopes every non-public operation.
///
/// Both halves are required; there is no way to construct a `TenantKey`
/// with one side missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TenantKey {
    pub project_id: Uuid,
    pub environment_id: Uuid,
}

impl TenantKey {
    pub fn new(project_id: Uuid, environment_id: Uuid) -> Self {
        Self {
            project_id,
            environment_id,
        }
    }

    /// Build a key from optional raw strings, reporting which half is absent.
    ///
    /// Empty strings count as missing. The project half is checked first so
    /// that a request with neither id reports the project.
    pub fn from_parts(project_id: Option<&str>, environment_id: Option<&str>) -> CoreResult<Self> {
        let project_id = parse_id("project_id", project_id)?;
        let environment_id = parse_id("environment_id", environment_id)?;
        Ok(Self::new(project_id, environment_id))
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.environment_id)
    }
}

fn parse_id(field: &'static str, raw: Option<&str>) -> CoreResult<Uuid> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CoreError::MissingField { field })?;
    Uuid::parse_str(raw).map_err(|e| CoreError::InvalidValue {
        field,
        reason: e.to_string(),
    })
}

/// Generate a fresh correlation id (UUIDv7, timestamp-sortable).
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}
