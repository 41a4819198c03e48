// ABOUTME: Endpoint clients for processes attached to a switchboard coordinator.
// ABOUTME: View and worker variants share one client core; Throttled coalesces high-rate traffic.

mod channels;
pub mod client;
pub mod endpoint;
pub mod events;
pub mod listener;
pub mod registration;
pub mod throttle;
pub mod view;
pub mod worker;

pub use client::Client;
pub use endpoint::Endpoint;
pub use events::EndpointEvent;
pub use listener::{
    handler, listener, Handler, HandlerFuture, Listener, ListenerId, ListenerRegistry,
};
pub use registration::{Admission, QueuedMessage, RegistrationGate, RegistrationState};
pub use throttle::Throttled;
pub use view::ViewClient;
pub use worker::WorkerClient;
