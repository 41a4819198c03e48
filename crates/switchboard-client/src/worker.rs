// ABOUTME: Endpoint client for background worker processes.
// ABOUTME: Registers asynchronously and queues sends until the coordinator confirms it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::{
    normalize_identifier, EndpointId, EndpointLink, ProcessKind, Selector, Snapshot,
    SwitchboardConfig, SwitchboardError,
};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::endpoint::Endpoint;
use crate::listener::{Handler, Listener, ListenerId};
use crate::registration::{Admission, QueuedMessage, RegistrationGate, RegistrationState};

/// Client for a worker process.
///
/// [`connect`](Self::connect) returns immediately with the registration in
/// flight. Sends made before the coordinator confirms the worker are queued
/// and flushed in order; if confirmation never arrives within the
/// registration timeout they are discarded and later sends fail with
/// [`SwitchboardError::RegistrationTimeout`]. Invokes wait for the outcome.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    client: Client,
    gate: Arc<RegistrationGate>,
}

impl WorkerClient {
    /// Start the client and begin registering `identifier`. Needs a tokio runtime.
    pub fn connect(
        link: EndpointLink,
        identifier: impl Into<String>,
        handle: Option<String>,
        config: SwitchboardConfig,
    ) -> Result<Self, SwitchboardError> {
        let identifier = identifier.into();
        let Some(identifier) = normalize_identifier(Some(identifier.clone())) else {
            return Err(SwitchboardError::InvalidIdentifier(identifier));
        };

        let client = Client::start(link, ProcessKind::Worker, config);
        let gate = Arc::new(RegistrationGate::new(identifier.clone()));
        gate.begin();

        tokio::spawn(register(client.clone(), Arc::clone(&gate), identifier, handle));
        Ok(Self { client, gate })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn identifier(&self) -> &str {
        self.gate.identifier()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.gate.state()
    }

    /// Wait for the registration outcome.
    pub async fn wait_registered(&self) -> Result<(), SwitchboardError> {
        match self.gate.wait().await {
            RegistrationState::Registered => Ok(()),
            _ => Err(self.gate.failure()),
        }
    }

    /// Send now if registered, otherwise queue until registration completes.
    pub async fn send(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError> {
        match self
            .gate
            .admit(QueuedMessage::new(selector.clone(), channel, args))
            .await
        {
            Admission::Queued { position } => {
                debug!(channel, position, "Queued until registration completes");
                Ok(())
            }
            Admission::Dispatch(message) => {
                self.client
                    .send(&message.selector, &message.channel, message.args)
                    .await
            }
            Admission::Rejected(e) => Err(e),
        }
    }

    /// Invoke once registered. Waits for registration to settle first.
    pub async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        self.wait_registered().await?;
        self.client.invoke(selector, channel, args, timeout).await
    }

    /// Remove this worker from the registry.
    pub async fn unregister(&self) -> Result<(), SwitchboardError> {
        self.client
            .coordinator()
            .unregister_worker(self.gate.identifier().to_string())
            .await?;
        info!(identifier = %self.gate.identifier(), "Worker unregistered");
        Ok(())
    }
}

async fn register(
    client: Client,
    gate: Arc<RegistrationGate>,
    identifier: String,
    handle: Option<String>,
) {
    let limit = client.config().registration_timeout();
    let handshake = {
        let client = client.clone();
        let identifier = identifier.clone();
        async move {
            client
                .coordinator()
                .register_worker(identifier, handle)
                .await?;
            client.wait_confirmed().await
        }
    };

    match tokio::time::timeout(limit, handshake).await {
        Ok(Ok(())) => {
            gate.complete(|message| {
                let client = client.clone();
                async move {
                    client
                        .send(&message.selector, &message.channel, message.args)
                        .await
                }
            })
            .await;
        }
        Ok(Err(e)) => {
            warn!(identifier = %identifier, error = %e, "Worker registration rejected");
            gate.fail().await;
        }
        Err(_) => {
            warn!(
                identifier = %identifier,
                timeout_ms = limit.as_millis() as u64,
                "Worker registration not confirmed in time"
            );
            gate.fail().await;
        }
    }
}

#[async_trait]
impl Endpoint for WorkerClient {
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
        WorkerClient::send(self, selector, channel, args).await
    }

    async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        WorkerClient::invoke(self, selector, channel, args, timeout).await
    }
}
