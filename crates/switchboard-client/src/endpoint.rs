// ABOUTME: Shared contract implemented by every endpoint client variant.
// ABOUTME: The coalescing layer wraps anything implementing it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{EndpointId, Selector, Snapshot, SwitchboardError};

use crate::client::Client;
use crate::listener::{Handler, Listener, ListenerId};

#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    fn id(&self) -> EndpointId;

    fn snapshot(&self) -> Snapshot;

    fn on(&self, channel: &str, listener: Listener) -> ListenerId;

    fn off(&self, channel: &str, id: ListenerId) -> bool;

    fn handle(&self, channel: &str, handler: Handler);

    fn remove_handler(&self, channel: &str) -> bool;

    async fn send(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError>;

    async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError>;
}

#[async_trait]
impl Endpoint for Client {
    fn id(&self) -> EndpointId {
        Client::id(self)
    }

    fn snapshot(&self) -> Snapshot {
        Client::snapshot(self)
    }

    fn on(&self, channel: &str, listener: Listener) -> ListenerId {
        Client::on(self, channel, listener)
    }

    fn off(&self, channel: &str, id: ListenerId) -> bool {
        Client::off(self, channel, id)
    }

    fn handle(&self, channel: &str, handler: Handler) {
        Client::handle(self, channel, handler)
    }

    fn remove_handler(&self, channel: &str) -> bool {
        Client::remove_handler(self, channel)
    }

    async fn send(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError> {
        Client::send(self, selector, channel, args).await
    }

    async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        Client::invoke(self, selector, channel, args, timeout).await
    }
}
