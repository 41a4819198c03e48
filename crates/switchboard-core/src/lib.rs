// ABOUTME: Shared protocol types for the switchboard endpoint broker.
// ABOUTME: Endpoint identity, selectors, snapshots, envelopes, channels and config.

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod selector;
pub mod snapshot;

// Channels
pub use channel::{
    duplex, ChannelEnd, ChannelFactory, ChannelReceiver, ChannelSender, InProcessChannels,
};

// Configuration
pub use config::{SwitchboardConfig, DEFAULT_REQUEST_BUFFER};

// Endpoint identity
pub use endpoint::{normalize_identifier, EndpointId, EndpointInfo, ProcessKind};

// Wire envelopes
pub use envelope::{Envelope, InvokeRequest, InvokeResponse, PlainMessage};

// Error types
pub use error::SwitchboardError;

// Coordinator catalogue
pub use protocol::{CoordinatorLink, EndpointLink, ProcessSpec, Push, Request, RoutedRequest};

// Selectors and snapshots
pub use selector::{select_all, select_one, Selector, SelectorKind};
pub use snapshot::{Snapshot, SnapshotDiff};
