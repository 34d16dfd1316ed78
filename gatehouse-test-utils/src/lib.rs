//! Gatehouse Test Utilities
//!
//! Shared test infrastructure for the Gatehouse workspace:
//! - Proptest generators for tenancy, resource and hook types
//! - Fixtures for common request scenarios

pub use gatehouse_core::{
    ApiKeyBinding, EngineClass, HookDispatch, HookPhase, HookRecord, NodeType, Principal,
    ResourceDescriptor, ServiceClass, TenantKey,
};

use serde_json::{Map, Value};
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Gatehouse types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_key() -> impl Strategy<Value = TenantKey> {
        (arb_uuid(), arb_uuid()).prop_map(|(project, env)| TenantKey::new(project, env))
    }

    pub fn arb_service_class() -> impl Strategy<Value = ServiceClass> {
        prop::sample::select(ServiceClass::ALL.to_vec())
    }

    pub fn arb_engine_class() -> impl Strategy<Value = EngineClass> {
        prop_oneof![Just(EngineClass::A), Just(EngineClass::B)]
    }

    pub fn arb_node_type() -> impl Strategy<Value = NodeType> {
        prop_oneof![Just(NodeType::Low), Just(NodeType::High)]
    }

    pub fn arb_resource_descriptor() -> impl Strategy<Value = ResourceDescriptor> {
        (
            arb_service_class(),
            arb_engine_class(),
            "[a-z0-9]{8}",
            arb_uuid(),
            arb_node_type(),
        )
            .prop_map(|(service_class, engine_class, resource_id, env, node_type)| {
                ResourceDescriptor {
                    service_class,
                    engine_class,
                    resource_id,
                    resource_environment_id: env.to_string(),
                    node_type,
                }
            })
    }

    /// Table slugs as handlers see them: lowercase words joined by underscores.
    pub fn arb_table_slug() -> impl Strategy<Value = String> {
        "[a-z]{1,8}(_[a-z]{1,8}){0,2}"
    }

    /// Scalar JSON leaves.
    pub fn arb_json_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 _-]{0,12}".prop_map(Value::String),
        ]
    }

    /// Arbitrary nested JSON values, at most three levels deep.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        arb_json_leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// A JSON object as a list of entries, in the order they were generated.
    ///
    /// Keys are unique so the same entries can be inserted in any order.
    pub fn arb_json_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
        prop::collection::btree_map("[a-z_]{1,10}", arb_json_value(), 0..8)
            .prop_map(|m| m.into_iter().collect())
            .prop_shuffle()
    }

    pub fn arb_hook_dispatch() -> impl Strategy<Value = HookDispatch> {
        prop_oneof![Just(HookDispatch::Blocking), Just(HookDispatch::FireAndForget)]
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common request scenarios.

    use super::*;

    /// A tenant with fresh project and environment ids.
    pub fn test_tenant() -> TenantKey {
        TenantKey::new(Uuid::now_v7(), Uuid::now_v7())
    }

    /// A binding that names `tenant` fully.
    pub fn api_key_binding(app_id: &str, tenant: TenantKey) -> ApiKeyBinding {
        ApiKeyBinding {
            app_id: app_id.to_string(),
            project_id: Some(tenant.project_id),
            environment_id: Some(tenant.environment_id),
            role_id: "role-admin".to_string(),
            client_type_id: "client-web".to_string(),
        }
    }

    /// A binding whose project half is missing.
    pub fn api_key_binding_without_project(app_id: &str) -> ApiKeyBinding {
        ApiKeyBinding {
            app_id: app_id.to_string(),
            project_id: None,
            environment_id: Some(Uuid::now_v7()),
            role_id: String::new(),
            client_type_id: String::new(),
        }
    }

    /// An object-builder resource on the given engine.
    pub fn object_builder_resource(engine_class: EngineClass) -> ResourceDescriptor {
        ResourceDescriptor {
            service_class: ServiceClass::ObjectBuilder,
            engine_class,
            resource_id: "res-1".to_string(),
            resource_environment_id: "env-res-1".to_string(),
            node_type: NodeType::Low,
        }
    }

    /// A hook whose name and function path are both `name`.
    pub fn hook(name: &str, phase: HookPhase, dispatch: HookDispatch) -> HookRecord {
        HookRecord {
            name: name.to_string(),
            path: name.to_string(),
            dispatch,
            phase,
            attributes: Map::new(),
        }
    }

    /// A hook carrying extra attributes.
    pub fn hook_with_attributes(
        name: &str,
        phase: HookPhase,
        dispatch: HookDispatch,
        attributes: Value,
    ) -> HookRecord {
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        HookRecord {
            attributes,
            ..hook(name, phase, dispatch)
        }
    }
}
