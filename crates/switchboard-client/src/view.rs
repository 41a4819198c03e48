// ABOUTME: Endpoint client for UI view processes.
// ABOUTME: Subscribes on construction and re-subscribes as a new client after every reload.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{
    normalize_identifier, EndpointId, EndpointLink, ProcessKind, Selector, Snapshot,
    SwitchboardConfig, SwitchboardError,
};
use tracing::info;

use crate::client::Client;
use crate::endpoint::Endpoint;
use crate::listener::{Handler, Listener, ListenerId};

/// Client for a view process.
///
/// A view is registered by its SUBSCRIBE handshake, which completes before
/// [`connect`](Self::connect) returns. After a navigation or reload the host
/// hands the process a fresh link and a new `ViewClient` is built from it.
#[derive(Debug, Clone)]
pub struct ViewClient {
    client: Client,
}

impl ViewClient {
    /// Subscribe under `identifier` (blank means none). Fails on identifier conflict.
    pub async fn connect(
        link: EndpointLink,
        identifier: Option<String>,
        config: SwitchboardConfig,
    ) -> Result<Self, SwitchboardError> {
        let identifier = normalize_identifier(identifier);
        let client = Client::start(link, ProcessKind::View, config);
        let snapshot = client.subscribe(identifier.clone()).await?;
        info!(
            id = %client.id(),
            identifier = identifier.as_deref().unwrap_or("-"),
            endpoints = snapshot.len(),
            "View subscribed"
        );
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn update_identifier(
        &self,
        identifier: impl Into<String>,
    ) -> Result<(), SwitchboardError> {
        self.client.update_identifier(identifier).await
    }

    pub async fn refresh_map(&self) -> Result<Snapshot, SwitchboardError> {
        self.client.refresh_map().await
    }
}

#[async_trait]
impl Endpoint for ViewClient {
    fn id(&self) -> EndpointId {
        self.client.id()
    }

    fn snapshot(&self) -> Snapshot {
        self.client.snapshot()
    }

    fn on(&self, channel: &str, listener: Listener) -> ListenerId {
        self.client.on(channel, listener)
    }

    fn off(&self, channel: &str, id: ListenerId) -> bool {
        self.client.off(channel, id)
    }

    fn handle(&self, channel: &str, handler: Handler) {
        self.client.handle(channel, handler)
    }

    fn remove_handler(&self, channel: &str) -> bool {
        self.client.remove_handler(channel)
    }

    async fn send(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError> {
        self.client.send(selector, channel, args).await
    }

    async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        self.client.invoke(selector, channel, args, timeout).await
    }
}
