// ABOUTME: Endpoint identity types: coordinator-assigned ids, process kinds and endpoint info.
// ABOUTME: EndpointInfo is what every snapshot entry and channel tag carries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coordinator-assigned endpoint id, unique for the coordinator's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(u64);

impl EndpointId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of process behind an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    /// A renderer-style process that subscribes on load and re-subscribes on reload.
    #[default]
    View,
    /// A background process that registers explicitly and must finish a handshake.
    Worker,
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessKind::View => f.write_str("view"),
            ProcessKind::Worker => f.write_str("worker"),
        }
    }
}

/// A registered endpoint as seen in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub id: EndpointId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Secondary handle, e.g. a window handle supplied by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub kind: ProcessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl EndpointInfo {
    pub fn new(id: EndpointId, kind: ProcessKind) -> Self {
        Self {
            id,
            identifier: None,
            handle: None,
            url: None,
            kind,
            pid: None,
        }
    }

    /// Set the identifier. Empty identifiers are stored as absent.
    pub fn with_identifier(mut self, identifier: Option<String>) -> Self {
        self.identifier = normalize_identifier(identifier);
        self
    }

    pub fn with_handle(mut self, handle: Option<String>) -> Self {
        self.handle = handle;
        self
    }

    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Short label for logs: the identifier if present, otherwise the id.
    pub fn label(&self) -> String {
        match &self.identifier {
            Some(identifier) => identifier.clone(),
            None => format!("#{}", self.id),
        }
    }
}

/// Treat empty or whitespace-only identifiers as absent.
pub fn normalize_identifier(identifier: Option<String>) -> Option<String> {
    identifier.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identifier_is_absent() {
        let info = EndpointInfo::new(EndpointId::new(1), ProcessKind::View)
            .with_identifier(Some("  ".to_string()));
        assert_eq!(info.identifier, None);

        let info = info.with_identifier(Some("controller".to_string()));
        assert_eq!(info.identifier.as_deref(), Some("controller"));
    }

    #[test]
    fn test_label() {
        let info = EndpointInfo::new(EndpointId::new(7), ProcessKind::Worker);
        assert_eq!(info.label(), "#7");

        let info = info.with_identifier(Some("indexer".to_string()));
        assert_eq!(info.label(), "indexer");
    }

    #[test]
    fn test_serializes_without_empty_fields() {
        let info = EndpointInfo::new(EndpointId::new(2), ProcessKind::View)
            .with_identifier(Some("output".to_string()));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 2, "identifier": "output", "kind": "view"})
        );
    }
}
