//! Gatehouse Core - Tenancy and Routing Types
//!
//! Pure data structures shared by the cache, the gateway and the test
//! utilities. Nothing in this crate performs I/O.

pub mod error;
pub mod hook;
pub mod identity;
pub mod principal;
pub mod resource;

pub use error::{CoreError, CoreResult};
pub use hook::{HookDispatch, HookMethod, HookPhase, HookRecord, HookSet};
pub use identity::{new_correlation_id, TenantKey};
pub use principal::{AuthMode, Principal};
pub use resource::{ApiKeyBinding, EngineClass, NodeType, ResourceDescriptor, ServiceClass};
