// ABOUTME: Request/push catalogue between endpoints and the coordinator.
// ABOUTME: CoordinatorLink wraps the request queue with one async method per request kind.

use tokio::sync::{mpsc, oneshot};

use crate::channel::ChannelEnd;
use crate::endpoint::{EndpointId, EndpointInfo, ProcessKind};
use crate::error::SwitchboardError;
use crate::selector::Selector;
use crate::snapshot::Snapshot;

pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UPDATE_IDENTIFIER: &str = "UPDATE_IDENTIFIER";
pub const GET_PORT: &str = "GET_PORT";
pub const REFRESH_MAP: &str = "REFRESH_MAP";
pub const MAP_UPDATE: &str = "MAP_UPDATE";
pub const PORT_MESSAGE: &str = "PORT_MESSAGE";
pub const WORKER_REGISTER: &str = "WORKER_REGISTER";
pub const WORKER_UNREGISTER: &str = "WORKER_UNREGISTER";

type Reply<T> = oneshot::Sender<Result<T, SwitchboardError>>;

/// Requests an endpoint can make of the coordinator.
#[derive(Debug)]
pub enum Request {
    Subscribe {
        identifier: Option<String>,
        reply: Reply<Snapshot>,
    },
    UpdateIdentifier {
        identifier: String,
        reply: Reply<()>,
    },
    /// Ask for a channel to the endpoint the selector resolves to. The channel
    /// itself arrives out-of-band as a [`Push::Port`].
    GetPort {
        selector: Selector,
        reply: Reply<bool>,
    },
    RefreshMap {
        reply: Reply<Snapshot>,
    },
    WorkerRegister {
        identifier: String,
        handle: Option<String>,
        reply: Reply<()>,
    },
    WorkerUnregister {
        identifier: String,
        reply: Reply<()>,
    },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Subscribe { .. } => SUBSCRIBE,
            Request::UpdateIdentifier { .. } => UPDATE_IDENTIFIER,
            Request::GetPort { .. } => GET_PORT,
            Request::RefreshMap { .. } => REFRESH_MAP,
            Request::WorkerRegister { .. } => WORKER_REGISTER,
            Request::WorkerUnregister { .. } => WORKER_UNREGISTER,
        }
    }
}

/// A request tagged with the endpoint that sent it.
#[derive(Debug)]
pub struct RoutedRequest {
    pub from: EndpointId,
    pub request: Request,
}

/// Messages the coordinator pushes to an endpoint.
#[derive(Debug)]
pub enum Push {
    /// The registry changed.
    MapUpdate(Snapshot),
    /// A freshly brokered channel to `peer`.
    Port { peer: EndpointInfo, channel: ChannelEnd },
}

impl Push {
    pub fn name(&self) -> &'static str {
        match self {
            Push::MapUpdate(_) => MAP_UPDATE,
            Push::Port { .. } => PORT_MESSAGE,
        }
    }
}

/// What the host shell knows about a process when it attaches it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    pub kind: ProcessKind,
    pub url: Option<String>,
    pub handle: Option<String>,
    pub pid: Option<u32>,
}

impl ProcessSpec {
    pub fn view() -> Self {
        Self::default()
    }

    pub fn worker() -> Self {
        Self {
            kind: ProcessKind::Worker,
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}

/// An endpoint's request handle to the coordinator, bound to its id.
#[derive(Debug, Clone)]
pub struct CoordinatorLink {
    id: EndpointId,
    requests: mpsc::Sender<RoutedRequest>,
}

impl CoordinatorLink {
    pub fn new(id: EndpointId, requests: mpsc::Sender<RoutedRequest>) -> Self {
        Self { id, requests }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Request,
    ) -> Result<T, SwitchboardError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(RoutedRequest {
                from: self.id,
                request: build(reply),
            })
            .await
            .map_err(|_| SwitchboardError::CoordinatorUnavailable)?;
        response
            .await
            .map_err(|_| SwitchboardError::CoordinatorUnavailable)?
    }

    pub async fn subscribe(
        &self,
        identifier: Option<String>,
    ) -> Result<Snapshot, SwitchboardError> {
        self.call(|reply| Request::Subscribe { identifier, reply })
            .await
    }

    pub async fn update_identifier(&self, identifier: String) -> Result<(), SwitchboardError> {
        self.call(|reply| Request::UpdateIdentifier { identifier, reply })
            .await
    }

    pub async fn get_port(&self, selector: Selector) -> Result<bool, SwitchboardError> {
        self.call(|reply| Request::GetPort { selector, reply }).await
    }

    pub async fn refresh_map(&self) -> Result<Snapshot, SwitchboardError> {
        self.call(|reply| Request::RefreshMap { reply }).await
    }

    pub async fn register_worker(
        &self,
        identifier: String,
        handle: Option<String>,
    ) -> Result<(), SwitchboardError> {
        self.call(|reply| Request::WorkerRegister {
            identifier,
            handle,
            reply,
        })
        .await
    }

    pub async fn unregister_worker(&self, identifier: String) -> Result<(), SwitchboardError> {
        self.call(|reply| Request::WorkerUnregister { identifier, reply })
            .await
    }
}

/// Everything a process receives when the host attaches it to the coordinator.
#[derive(Debug)]
pub struct EndpointLink {
    pub coordinator: CoordinatorLink,
    pub inbox: mpsc::UnboundedReceiver<Push>,
}

impl EndpointLink {
    pub fn id(&self) -> EndpointId {
        self.coordinator.id()
    }
}
