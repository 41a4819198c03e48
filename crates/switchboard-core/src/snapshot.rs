// ABOUTME: Registry snapshots pushed by the coordinator and cached by every endpoint.
// ABOUTME: Provides selector resolution against the snapshot and id-based diffing.

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointId, EndpointInfo};
use crate::error::SwitchboardError;
use crate::selector::{select_all, select_one, Selector};

/// Full registry contents at a given registry version.
///
/// Versions increase monotonically with every registry change, so a client
/// can discard a snapshot that is older than the one it already holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub endpoints: Vec<EndpointInfo>,
}

/// Endpoints added and removed between two snapshots, compared by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<EndpointInfo>,
    pub removed: Vec<EndpointInfo>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl Snapshot {
    pub fn new(version: u64, endpoints: Vec<EndpointInfo>) -> Self {
        Self { version, endpoints }
    }

    pub fn get(&self, id: EndpointId) -> Option<&EndpointInfo> {
        self.endpoints.iter().find(|endpoint| endpoint.id == id)
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Resolve a single-target selector, skipping `exclude` (the caller itself).
    pub fn resolve_one(
        &self,
        selector: &Selector,
        exclude: EndpointId,
    ) -> Result<&EndpointInfo, SwitchboardError> {
        select_one(selector, self.endpoints.iter().filter(|e| e.id != exclude))
    }

    /// Every endpoint a broadcast selector reaches, skipping `exclude`.
    pub fn resolve_all(&self, selector: &Selector, exclude: EndpointId) -> Vec<&EndpointInfo> {
        select_all(selector, self.endpoints.iter().filter(|e| e.id != exclude))
    }

    /// Compare against the previous snapshot by endpoint id.
    pub fn diff(&self, previous: &Snapshot) -> SnapshotDiff {
        let added = self
            .endpoints
            .iter()
            .filter(|endpoint| !previous.contains(endpoint.id))
            .cloned()
            .collect();
        let removed = previous
            .endpoints
            .iter()
            .filter(|endpoint| !self.contains(endpoint.id))
            .cloned()
            .collect();
        SnapshotDiff { added, removed }
    }
}
