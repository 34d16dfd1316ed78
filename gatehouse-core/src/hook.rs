//! User-registered "custom event" hooks
//!
//! Hook definitions come from the object-builder backend and are consumed
//! read-only. The wire labels for the dispatch mode are inverted relative to
//! common usage: `"ASYNC"` means the caller waits for the hook, `"SYNC"` means
//! it does not. [`HookDispatch`] keeps those wire labels but names the
//! variants after what they do.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the mutation waits for the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum HookDispatch {
    /// Invoked inline; its failure is reported to the caller.
    #[serde(rename = "ASYNC")]
    Blocking,
    /// Invoked on a detached task; its failure is only logged.
    #[serde(rename = "SYNC")]
    FireAndForget,
}

impl HookDispatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookDispatch::Blocking => "blocking",
            HookDispatch::FireAndForget => "fire_and_forget",
        }
    }
}

/// When the hook runs relative to the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Before,
    After,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookPhase::Before => "before",
            HookPhase::After => "after",
        }
    }
}

/// Mutating method a hook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookMethod {
    Create,
    Update,
    Delete,
}

impl HookMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookMethod::Create => "CREATE",
            HookMethod::Update => "UPDATE",
            HookMethod::Delete => "DELETE",
        }
    }

    /// Whether the payload carries the object as it was before the mutation.
    pub fn has_pre_image(&self) -> bool {
        matches!(self, HookMethod::Update | HookMethod::Delete)
    }

    /// Whether the payload carries the object as it is after the mutation.
    pub fn has_post_image(&self) -> bool {
        matches!(self, HookMethod::Create | HookMethod::Update)
    }
}

impl fmt::Display for HookMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One registered hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct HookRecord {
    pub name: String,
    /// Path under `<function-service>/function/`.
    pub path: String,
    #[serde(rename = "request_type")]
    pub dispatch: HookDispatch,
    #[serde(rename = "action")]
    pub phase: HookPhase,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Hooks for one (table, method, role), split by phase in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookSet {
    pub before: Vec<HookRecord>,
    pub after: Vec<HookRecord>,
}

impl HookSet {
    pub fn from_records(records: impl IntoIterator<Item = HookRecord>) -> Self {
        let (before, after) = records
            .into_iter()
            .partition(|hook| hook.phase == HookPhase::Before);
        Self { before, after }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_wire_labels_are_inverted() -> Result<(), serde_json::Error> {
        let blocking: HookDispatch = serde_json::from_value(json!("ASYNC"))?;
        let detached: HookDispatch = serde_json::from_value(json!("SYNC"))?;
        assert_eq!(blocking, HookDispatch::Blocking);
        assert_eq!(detached, HookDispatch::FireAndForget);
        assert_eq!(serde_json::to_value(HookDispatch::Blocking)?, json!("ASYNC"));
        Ok(())
    }

    #[test]
    fn test_hook_set_preserves_order_within_phase() -> Result<(), serde_json::Error> {
        let records: Vec<HookRecord> = serde_json::from_value(json!([
            {"name": "a", "path": "a", "request_type": "ASYNC", "action": "before"},
            {"name": "b", "path": "b", "request_type": "SYNC", "action": "after"},
            {"name": "c", "path": "c", "request_type": "ASYNC", "action": "before"},
        ]))?;
        let set = HookSet::from_records(records);
        let names: Vec<_> = set.before.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(set.after.len(), 1);
        Ok(())
    }

    #[test]
    fn test_images_per_method() {
        assert!(!HookMethod::Create.has_pre_image());
        assert!(HookMethod::Create.has_post_image());
        assert!(HookMethod::Update.has_pre_image());
        assert!(HookMethod::Update.has_post_image());
        assert!(HookMethod::Delete.has_pre_image());
        assert!(!HookMethod::Delete.has_post_image());
    }
}
