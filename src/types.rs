//! Convenience types for provider implementations, plus the protocol constants
//! shared by the handshake and reattach paths.
//!
//! These types provide a more ergonomic API over the raw protobuf types.

use serde::{Deserialize, Serialize};

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<serde_json::Value>,
    /// The value after the change (None if deleting).
    pub after: Option<serde_json::Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// Create a change for a new attribute.
    pub fn added(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// Create a change for a removed attribute.
    pub fn removed(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// Create a change for a modified attribute.
    pub fn modified(
        path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

impl From<crate::generated::AttributeChange> for AttributeChange {
    fn from(proto: crate::generated::AttributeChange) -> Self {
        Self {
            path: proto.path,
            before: if proto.before.is_empty() {
                None
            } else {
                serde_json::from_slice(&proto.before).ok()
            },
            after: if proto.after.is_empty() {
                None
            } else {
                serde_json::from_slice(&proto.after).ok()
            },
        }
    }
}

impl From<AttributeChange> for crate::generated::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        Self {
            path: change.path,
            before: change
                .before
                .map(|v| serde_json::to_vec(&v).unwrap_or_default())
                .unwrap_or_default(),
            after: change
                .after
                .map(|v| serde_json::to_vec(&v).unwrap_or_default())
                .unwrap_or_default(),
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: serde_json::Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: serde_json::Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying this plan would do anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// An imported resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: serde_json::Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Provider metadata returned by GetMetadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// Server capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Whether the provider supports planning destroy operations.
    pub plan_destroy: bool,
}

/// Version of the plugin handshake itself (first handshake field).
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Default application protocol version.
pub const PROTOCOL_VERSION: u32 = 5;

/// Application protocol versions this provider can serve.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[PROTOCOL_VERSION];

/// RPC protocol announced in the handshake and reattach config.
pub const PROTOCOL_NAME: &str = "grpc";

/// Network type announced in the handshake and reattach config.
pub const NETWORK_TCP: &str = "tcp";

/// Environment variable the host sets when it launches a plugin.
pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";

/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

/// Format the handshake line a host-launched plugin prints on stdout.
///
/// Format: `CORE-VERSION|APP-VERSION|NETWORK|ADDRESS|PROTOCOL`
pub fn handshake_line(protocol_version: u32, addr: &std::net::SocketAddr) -> String {
    format!(
        "{}|{}|{}|{}|{}",
        CORE_PROTOCOL_VERSION, protocol_version, NETWORK_TCP, addr, PROTOCOL_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("length", serde_json::json!(16));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(serde_json::json!(16)));

        let removed = AttributeChange::removed("result", serde_json::json!("abc"));
        assert_eq!(removed.before, Some(serde_json::json!("abc")));
        assert!(removed.after.is_none());

        let modified =
            AttributeChange::modified("length", serde_json::json!(8), serde_json::json!(12));
        assert_eq!(modified.before, Some(serde_json::json!(8)));
        assert_eq!(modified.after, Some(serde_json::json!(12)));
    }

    #[test]
    fn test_attribute_change_conversion() {
        let change = AttributeChange::modified(
            "keepers",
            serde_json::json!({"ami": "a"}),
            serde_json::json!({"ami": "b"}),
        );

        let proto: crate::generated::AttributeChange = change.clone().into();
        assert_eq!(proto.path, "keepers");

        let back: AttributeChange = proto.into();
        assert_eq!(back, change);
    }

    #[test]
    fn test_added_change_has_empty_before_bytes() {
        let proto: crate::generated::AttributeChange =
            AttributeChange::added("length", serde_json::json!(4)).into();
        assert!(proto.before.is_empty());
        assert_eq!(proto.after, b"4");
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(serde_json::json!({"id": "abc"}));
        assert!(!no_change.has_changes());
        assert!(!no_change.requires_replace);

        let replace = PlanResult::with_changes(
            serde_json::json!({"length": 12}),
            vec![AttributeChange::modified(
                "length",
                serde_json::json!(8),
                serde_json::json!(12),
            )],
            true,
        );
        assert!(replace.has_changes());
        assert!(replace.requires_replace);
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("random_uuid", serde_json::json!({"id": "x"}));
        assert_eq!(imported.resource_type, "random_uuid");
        assert_eq!(imported.state["id"], "x");
    }

    #[test]
    fn test_handshake_line() {
        let addr: std::net::SocketAddr = "127.0.0.1:4321".parse().unwrap();
        assert_eq!(handshake_line(5, &addr), "1|5|tcp|127.0.0.1:4321|grpc");
    }
}
