// ABOUTME: Coordinator actor task and the host-facing handle that drives it.
// ABOUTME: Host lifecycle commands and endpoint requests are served one at a time from two queues.

use std::sync::Arc;

use switchboard_core::{
    ChannelFactory, EndpointId, EndpointLink, InProcessChannels, ProcessSpec, RoutedRequest,
    Snapshot, SwitchboardConfig, SwitchboardError,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::state::CoordinatorState;

/// Commands only the host shell issues.
#[derive(Debug)]
enum HostCommand {
    Attach {
        spec: ProcessSpec,
        reply: oneshot::Sender<EndpointLink>,
    },
    Navigate {
        id: EndpointId,
        reply: oneshot::Sender<Result<EndpointLink, SwitchboardError>>,
    },
    Detach {
        id: EndpointId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

/// Host-side handle to a running coordinator.
///
/// The coordinator task stops when [`shutdown`](Self::shutdown) is called or
/// every clone of this handle is dropped; endpoint requests then fail with
/// [`SwitchboardError::CoordinatorUnavailable`].
///
/// # Example
///
/// ```ignore
/// let coordinator = Coordinator::spawn(&SwitchboardConfig::default());
/// let link = coordinator.attach(ProcessSpec::view().with_url("app://main")).await?;
/// let client = ViewClient::connect(link, Some("main".into()), config).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Coordinator {
    host: mpsc::Sender<HostCommand>,
}

impl Coordinator {
    /// Start a coordinator that brokers in-process channels.
    pub fn spawn(config: &SwitchboardConfig) -> Self {
        Self::spawn_with_factory(config, Arc::new(InProcessChannels))
    }

    /// Start a coordinator with a host-supplied channel factory.
    pub fn spawn_with_factory(
        config: &SwitchboardConfig,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        let buffer = config.request_buffer.max(1);
        let (request_tx, request_rx) = mpsc::channel(buffer);
        let (host_tx, host_rx) = mpsc::channel(buffer);

        let state = CoordinatorState::new(factory, request_tx);
        tokio::spawn(run(state, host_rx, request_rx));

        Self { host: host_tx }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, SwitchboardError> {
        let (reply, response) = oneshot::channel();
        self.host
            .send(build(reply))
            .await
            .map_err(|_| SwitchboardError::CoordinatorUnavailable)?;
        response
            .await
            .map_err(|_| SwitchboardError::CoordinatorUnavailable)
    }

    /// A process was created. Returns the link the process builds its client from.
    pub async fn attach(&self, spec: ProcessSpec) -> Result<EndpointLink, SwitchboardError> {
        self.call(|reply| HostCommand::Attach { spec, reply }).await
    }

    /// A process navigated or reloaded. Returns a fresh link for the new page.
    pub async fn navigate(&self, id: EndpointId) -> Result<EndpointLink, SwitchboardError> {
        self.call(|reply| HostCommand::Navigate { id, reply })
            .await?
    }

    /// A process exited. Returns false if the id was unknown.
    pub async fn detach(&self, id: EndpointId) -> Result<bool, SwitchboardError> {
        self.call(|reply| HostCommand::Detach { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot, SwitchboardError> {
        self.call(|reply| HostCommand::Snapshot { reply }).await
    }

    pub async fn shutdown(&self) {
        if self.host.send(HostCommand::Shutdown).await.is_err() {
            debug!("Coordinator already stopped");
        }
    }
}

async fn run(
    mut state: CoordinatorState,
    mut host_rx: mpsc::Receiver<HostCommand>,
    mut request_rx: mpsc::Receiver<RoutedRequest>,
) {
    info!("Coordinator started");
    loop {
        tokio::select! {
            biased;
            command = host_rx.recv() => match command {
                Some(HostCommand::Shutdown) | None => break,
                Some(command) => handle_host(&mut state, command),
            },
            Some(routed) = request_rx.recv() => state.handle_request(routed),
        }
    }
    info!(endpoints = state.registry().len(), "Coordinator stopped");
}

fn handle_host(state: &mut CoordinatorState, command: HostCommand) {
    let delivered = match command {
        HostCommand::Attach { spec, reply } => reply.send(state.attach(spec)).is_ok(),
        HostCommand::Navigate { id, reply } => reply.send(state.navigate(id)).is_ok(),
        HostCommand::Detach { id, reply } => reply.send(state.detach(id)).is_ok(),
        HostCommand::Snapshot { reply } => reply.send(state.snapshot()).is_ok(),
        HostCommand::Shutdown => true,
    };
    if !delivered {
        debug!("Host went away before the reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{Push, Selector};

    #[tokio::test]
    async fn test_attach_subscribe_and_snapshot() {
        let coordinator = Coordinator::spawn(&SwitchboardConfig::default());
        let a = coordinator.attach(ProcessSpec::view()).await.unwrap();
        let b = coordinator.attach(ProcessSpec::view()).await.unwrap();
        assert_ne!(a.id(), b.id());

        a.coordinator
            .subscribe(Some("controller".to_string()))
            .await
            .unwrap();
        let snapshot = b
            .coordinator
            .subscribe(Some("output".to_string()))
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(coordinator.snapshot().await.unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_get_port_pushes_channel_to_both() {
        let coordinator = Coordinator::spawn(&SwitchboardConfig::default());
        let mut a = coordinator.attach(ProcessSpec::view()).await.unwrap();
        let mut b = coordinator.attach(ProcessSpec::view()).await.unwrap();
        a.coordinator.subscribe(Some("a".to_string())).await.unwrap();
        b.coordinator.subscribe(Some("b".to_string())).await.unwrap();

        let ok = a
            .coordinator
            .get_port(Selector::identifier("b"))
            .await
            .unwrap();
        assert!(ok);

        // a saw b subscribe, then the port
        assert!(matches!(a.inbox.recv().await, Some(Push::MapUpdate(_))));
        match a.inbox.recv().await {
            Some(Push::Port { peer, .. }) => assert_eq!(peer.id, b.id()),
            other => panic!("expected port, got {other:?}"),
        }
        match b.inbox.recv().await {
            Some(Push::Port { peer, .. }) => assert_eq!(peer.id, a.id()),
            other => panic!("expected port, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_detach_and_navigate_unknown() {
        let coordinator = Coordinator::spawn(&SwitchboardConfig::default());
        let a = coordinator.attach(ProcessSpec::view()).await.unwrap();
        assert!(coordinator.detach(a.id()).await.unwrap());
        assert!(!coordinator.detach(a.id()).await.unwrap());

        let err = coordinator.navigate(a.id()).await.unwrap_err();
        assert_eq!(err, SwitchboardError::NotRegistered(a.id()));
    }

    #[tokio::test]
    async fn test_shutdown_makes_links_unavailable() {
        let coordinator = Coordinator::spawn(&SwitchboardConfig::default());
        let a = coordinator.attach(ProcessSpec::view()).await.unwrap();
        coordinator.shutdown().await;

        let err = a.coordinator.refresh_map().await.unwrap_err();
        assert_eq!(err, SwitchboardError::CoordinatorUnavailable);
        assert!(coordinator.snapshot().await.is_err());
    }
}
