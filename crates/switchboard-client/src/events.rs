// ABOUTME: Membership events derived from successive registry snapshots.

use switchboard_core::{EndpointInfo, SnapshotDiff};

/// An endpoint appeared in or disappeared from the local snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    Added(EndpointInfo),
    Removed(EndpointInfo),
}

impl EndpointEvent {
    pub fn endpoint(&self) -> &EndpointInfo {
        match self {
            Self::Added(info) | Self::Removed(info) => info,
        }
    }

    /// Removals first, then additions.
    pub(crate) fn from_diff(diff: SnapshotDiff) -> Vec<Self> {
        diff.removed
            .into_iter()
            .map(Self::Removed)
            .chain(diff.added.into_iter().map(Self::Added))
            .collect()
    }
}
