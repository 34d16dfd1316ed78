//! Backend resources and the api-key bindings that lead to them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::identity::TenantKey;

// ============================================================================
// SERVICE CLASS
// ============================================================================

/// Downstream service families the gateway can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "kebab-case")]
pub enum ServiceClass {
    ObjectBuilder,
    Function,
    Analytics,
    Template,
    Auth,
    Company,
    Notification,
}

impl ServiceClass {
    pub const ALL: [ServiceClass; 7] = [
        ServiceClass::ObjectBuilder,
        ServiceClass::Function,
        ServiceClass::Analytics,
        ServiceClass::Template,
        ServiceClass::Auth,
        ServiceClass::Company,
        ServiceClass::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::ObjectBuilder => "object-builder",
            ServiceClass::Function => "function",
            ServiceClass::Analytics => "analytics",
            ServiceClass::Template => "template",
            ServiceClass::Auth => "auth",
            ServiceClass::Company => "company",
            ServiceClass::Notification => "notification",
        }
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceClass {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        ServiceClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| CoreError::UnknownVariant {
                kind: "service class",
                value: s.to_string(),
            })
    }
}

// ============================================================================
// ENGINE CLASS / NODE TYPE
// ============================================================================

/// The two incompatible backend dialects behind the object-builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EngineClass {
    A,
    B,
}

impl EngineClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineClass::A => "A",
            EngineClass::B => "B",
        }
    }
}

impl fmt::Display for EngineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing hint for the backend deployment that hosts a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    /// Shared multi-tenant node.
    #[default]
    Low,
    /// Dedicated node.
    High,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Low => "LOW",
            NodeType::High => "HIGH",
        }
    }
}

// ============================================================================
// RESOURCE DESCRIPTOR
// ============================================================================

/// Everything needed to reach the backend serving a tenant for one service class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ResourceDescriptor {
    pub service_class: ServiceClass,
    pub engine_class: EngineClass,
    pub resource_id: String,
    /// Effective project scope at the backend.
    pub resource_environment_id: String,
    #[serde(default)]
    pub node_type: NodeType,
}

// ============================================================================
// API KEY BINDING
// ============================================================================

/// What an api-key app id is bound to. Fetched from the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiKeyBinding {
    pub app_id: String,
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub environment_id: Option<Uuid>,
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub client_type_id: String,
}

impl ApiKeyBinding {
    /// The tenant named by this binding. Both halves must be present.
    pub fn tenant_key(&self) -> CoreResult<TenantKey> {
        let project_id = self.project_id.ok_or(CoreError::MissingField {
            field: "project_id",
        })?;
        let environment_id = self.environment_id.ok_or(CoreError::MissingField {
            field: "environment_id",
        })?;
        Ok(TenantKey::new(project_id, environment_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_class_round_trips_through_str() -> CoreResult<()> {
        for class in ServiceClass::ALL {
            assert_eq!(class.as_str().parse::<ServiceClass>()?, class);
        }
        Ok(())
    }

    #[test]
    fn test_service_class_serde_matches_as_str() -> Result<(), serde_json::Error> {
        let json = serde_json::to_string(&ServiceClass::ObjectBuilder)?;
        assert_eq!(json, "\"object-builder\"");
        Ok(())
    }

    #[test]
    fn test_unknown_service_class() {
        let err = "storage".parse::<ServiceClass>().unwrap_err();
        assert!(matches!(err, CoreError::UnknownVariant { .. }));
    }

    #[test]
    fn test_descriptor_defaults_node_type() -> Result<(), serde_json::Error> {
        let descriptor: ResourceDescriptor = serde_json::from_str(
            r#"{"service_class":"object-builder","engine_class":"B","resource_id":"r1","resource_environment_id":"env-1"}"#,
        )?;
        assert_eq!(descriptor.engine_class, EngineClass::B);
        assert_eq!(descriptor.node_type, NodeType::Low);
        Ok(())
    }

    #[test]
    fn test_binding_without_project() {
        let binding = ApiKeyBinding {
            app_id: "app".to_string(),
            project_id: None,
            environment_id: Some(Uuid::now_v7()),
            role_id: String::new(),
            client_type_id: String::new(),
        };
        let err = binding.tenant_key().unwrap_err();
        assert_eq!(err.to_string(), "project_id is missing");
    }
}
