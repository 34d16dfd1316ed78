//! Backend Clients
//!
//! Pooled HTTP channels to every downstream service, the typed service
//! traits the pipeline calls through, and their HTTP implementations.

mod error;
mod http;
mod pool;
mod services;

pub use error::{BackendCode, BackendError, BackendResult};
pub use http::{HttpAuthService, HttpCompanyService, HttpFunctionService, HttpObjectBuilder};
pub use pool::{BackendClients, BackendPool, Channel, ChannelManager, PoolStatus};
pub use services::{
    AccessCheck, AccessGrant, AuthService, CompanyService, FunctionService, FunctionResponse,
    ObjectBuilderStub, ResourceLookup,
};

use gatehouse_core::{EngineClass, ServiceClass};
use std::fmt;

/// A deployment the gateway holds a connection pool for.
///
/// The object-builder runs as two deployments, one per engine class; every
/// other service class has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Upstream {
    Auth,
    Company,
    Function,
    ObjectBuilderA,
    ObjectBuilderB,
    Analytics,
    Template,
    Notification,
}

impl Upstream {
    pub const ALL: [Upstream; 8] = [
        Upstream::Auth,
        Upstream::Company,
        Upstream::Function,
        Upstream::ObjectBuilderA,
        Upstream::ObjectBuilderB,
        Upstream::Analytics,
        Upstream::Template,
        Upstream::Notification,
    ];

    pub fn object_builder(engine: EngineClass) -> Self {
        match engine {
            EngineClass::A => Upstream::ObjectBuilderA,
            EngineClass::B => Upstream::ObjectBuilderB,
        }
    }

    pub fn service_class(&self) -> ServiceClass {
        match self {
            Upstream::Auth => ServiceClass::Auth,
            Upstream::Company => ServiceClass::Company,
            Upstream::Function => ServiceClass::Function,
            Upstream::ObjectBuilderA | Upstream::ObjectBuilderB => ServiceClass::ObjectBuilder,
            Upstream::Analytics => ServiceClass::Analytics,
            Upstream::Template => ServiceClass::Template,
            Upstream::Notification => ServiceClass::Notification,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Upstream::Auth => "auth",
            Upstream::Company => "company",
            Upstream::Function => "function",
            Upstream::ObjectBuilderA => "object-builder-a",
            Upstream::ObjectBuilderB => "object-builder-b",
            Upstream::Analytics => "analytics",
            Upstream::Template => "template",
            Upstream::Notification => "notification",
        }
    }

    /// Environment variable holding the base URL.
    pub fn env_var(&self) -> &'static str {
        match self {
            Upstream::Auth => "GATEHOUSE_AUTH_URL",
            Upstream::Company => "GATEHOUSE_COMPANY_URL",
            Upstream::Function => "GATEHOUSE_FUNCTION_URL",
            Upstream::ObjectBuilderA => "GATEHOUSE_OBJECT_BUILDER_A_URL",
            Upstream::ObjectBuilderB => "GATEHOUSE_OBJECT_BUILDER_B_URL",
            Upstream::Analytics => "GATEHOUSE_ANALYTICS_URL",
            Upstream::Template => "GATEHOUSE_TEMPLATE_URL",
            Upstream::Notification => "GATEHOUSE_NOTIFICATION_URL",
        }
    }

    pub fn default_url(&self) -> String {
        let port = match self {
            Upstream::Auth => 9101,
            Upstream::Company => 9102,
            Upstream::Function => 9103,
            Upstream::ObjectBuilderA => 9104,
            Upstream::ObjectBuilderB => 9105,
            Upstream::Analytics => 9106,
            Upstream::Template => 9107,
            Upstream::Notification => 9108,
        };
        format!("http://127.0.0.1:{}", port)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_upstream_has_distinct_env_var_and_port() {
        let vars: HashSet<_> = Upstream::ALL.iter().map(|u| u.env_var()).collect();
        let urls: HashSet<_> = Upstream::ALL.iter().map(|u| u.default_url()).collect();
        assert_eq!(vars.len(), Upstream::ALL.len());
        assert_eq!(urls.len(), Upstream::ALL.len());
    }

    #[test]
    fn test_object_builder_upstreams_share_service_class() {
        assert_eq!(
            Upstream::object_builder(EngineClass::A).service_class(),
            Upstream::object_builder(EngineClass::B).service_class()
        );
        assert_ne!(
            Upstream::object_builder(EngineClass::A),
            Upstream::object_builder(EngineClass::B)
        );
    }
}
