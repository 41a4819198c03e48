// ABOUTME: Endpoint registry and channel broker run by the privileged coordinator process.
// ABOUTME: Owns identifier uniqueness, the channel-pair cache and snapshot broadcasting.

pub mod pairs;
pub mod registry;
pub mod service;
pub mod state;

pub use pairs::{PairCache, PairKey};
pub use registry::Registry;
pub use service::Coordinator;
pub use state::CoordinatorState;
