// ABOUTME: Coordinator state machine: registry, pair cache and per-process push inboxes.
// ABOUTME: Every request is handled synchronously against this state by the coordinator actor.

use std::collections::HashMap;
use std::sync::Arc;

use switchboard_core::{
    normalize_identifier, ChannelFactory, CoordinatorLink, EndpointId, EndpointInfo, EndpointLink,
    ProcessKind, ProcessSpec, Push, Request, RoutedRequest, Selector, Snapshot, SwitchboardError,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::pairs::{PairCache, PairKey};
use crate::registry::Registry;

/// An attached process: what the host told us about it and where to push.
#[derive(Debug)]
struct Connection {
    spec: ProcessSpec,
    push: mpsc::UnboundedSender<Push>,
}

pub struct CoordinatorState {
    registry: Registry,
    pairs: PairCache,
    connections: HashMap<EndpointId, Connection>,
    next_id: u64,
    version: u64,
    factory: Arc<dyn ChannelFactory>,
    requests: mpsc::Sender<RoutedRequest>,
}

impl CoordinatorState {
    /// `requests` is the queue links created by [`attach`](Self::attach) will feed.
    pub fn new(factory: Arc<dyn ChannelFactory>, requests: mpsc::Sender<RoutedRequest>) -> Self {
        Self {
            registry: Registry::new(),
            pairs: PairCache::new(),
            connections: HashMap::new(),
            next_id: 1,
            version: 0,
            factory,
            requests,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn has_pair(&self, a: EndpointId, b: EndpointId) -> bool {
        self.pairs.contains(&PairKey::new(a, b))
    }

    /// Current registry contents at the current version.
    pub fn snapshot(&self) -> Snapshot {
        self.registry.snapshot(self.version)
    }

    // ------------------------------------------------------------------
    // Host lifecycle
    // ------------------------------------------------------------------

    /// A process was created: allocate its id and hand back its link.
    pub fn attach(&mut self, spec: ProcessSpec) -> EndpointLink {
        let id = EndpointId::new(self.next_id);
        self.next_id += 1;

        let (push, inbox) = mpsc::unbounded_channel();
        info!(endpoint_id = %id, kind = %spec.kind, url = ?spec.url, "Process attached");
        self.connections.insert(id, Connection { spec, push });

        EndpointLink {
            coordinator: CoordinatorLink::new(id, self.requests.clone()),
            inbox,
        }
    }

    /// The process navigated or reloaded: replace its inbox.
    ///
    /// Its channel pairs stay recorded until it subscribes again.
    pub fn navigate(&mut self, id: EndpointId) -> Result<EndpointLink, SwitchboardError> {
        let connection = self
            .connections
            .get_mut(&id)
            .ok_or(SwitchboardError::NotRegistered(id))?;

        let (push, inbox) = mpsc::unbounded_channel();
        connection.push = push;
        debug!(endpoint_id = %id, "Process navigated");

        Ok(EndpointLink {
            coordinator: CoordinatorLink::new(id, self.requests.clone()),
            inbox,
        })
    }

    /// The process is gone: drop its connection and its endpoint.
    pub fn detach(&mut self, id: EndpointId) -> bool {
        let attached = self.connections.remove(&id).is_some();
        let registered = self.remove_endpoint(id);
        if attached {
            info!(endpoint_id = %id, "Process detached");
        }
        attached || registered
    }

    // ------------------------------------------------------------------
    // Endpoint requests
    // ------------------------------------------------------------------

    pub fn handle_request(&mut self, routed: RoutedRequest) {
        let RoutedRequest { from, request } = routed;
        let name = request.name();
        debug!(endpoint_id = %from, request = name, "Coordinator request");

        match request {
            Request::Subscribe { identifier, reply } => {
                respond(reply, self.subscribe(from, identifier), from, name)
            }
            Request::UpdateIdentifier { identifier, reply } => {
                respond(reply, self.update_identifier(from, identifier), from, name)
            }
            Request::GetPort { selector, reply } => {
                respond(reply, self.get_channel(from, &selector), from, name)
            }
            Request::RefreshMap { reply } => respond(reply, Ok(self.refresh_map()), from, name),
            Request::WorkerRegister {
                identifier,
                handle,
                reply,
            } => respond(
                reply,
                self.register_worker(from, identifier, handle),
                from,
                name,
            ),
            Request::WorkerUnregister { identifier, reply } => {
                respond(reply, self.unregister_worker(&identifier), from, name)
            }
        }
    }

    /// Register or refresh the caller's endpoint and broadcast the new snapshot.
    ///
    /// A caller that is already registered is reloading: every channel pair
    /// it was part of is forgotten first.
    pub fn subscribe(
        &mut self,
        from: EndpointId,
        identifier: Option<String>,
    ) -> Result<Snapshot, SwitchboardError> {
        let spec = self.spec(from)?;
        let identifier = normalize_identifier(identifier);
        self.registry.check_identifier(from, identifier.as_deref())?;

        if self.registry.contains(from) {
            let purged = self.pairs.purge(from);
            info!(endpoint_id = %from, purged, "Endpoint re-subscribed, channel pairs invalidated");
        }

        let info = endpoint_from_spec(from, &spec, spec.kind).with_identifier(identifier);
        self.registry.insert(info)?;

        let snapshot = self.next_snapshot();
        self.broadcast(&snapshot, Some(from));
        Ok(snapshot)
    }

    pub fn update_identifier(
        &mut self,
        from: EndpointId,
        identifier: String,
    ) -> Result<(), SwitchboardError> {
        self.registry.set_identifier(from, Some(identifier))?;
        let snapshot = self.next_snapshot();
        self.broadcast(&snapshot, Some(from));
        Ok(())
    }

    /// Broker a channel between the caller and the endpoint `selector` names.
    ///
    /// Returns true when the pair has a channel (new or existing); false when
    /// one side's inbox is gone and nothing was recorded.
    pub fn get_channel(
        &mut self,
        from: EndpointId,
        selector: &Selector,
    ) -> Result<bool, SwitchboardError> {
        let caller = self
            .registry
            .get(from)
            .cloned()
            .ok_or(SwitchboardError::NotRegistered(from))?;
        let target = self.registry.resolve(selector, from)?.clone();

        let key = PairKey::new(from, target.id);
        let both_open = self.inbox_open(from) && self.inbox_open(target.id);
        if self.pairs.contains(&key) {
            if both_open {
                debug!(pair = %key, "Channel already brokered, reusing");
                return Ok(true);
            }
            // One side's client is gone without a detach or reload.
            self.pairs.remove(&key);
            debug!(pair = %key, "Forgetting pair with a closed endpoint inbox");
        }
        if !both_open {
            warn!(pair = %key, "Endpoint inbox closed, not brokering");
            return Ok(false);
        }

        let (caller_end, target_end) = self.factory.create();
        let target_id = target.id;
        let to_caller = self.push(
            from,
            Push::Port {
                peer: target,
                channel: caller_end,
            },
        );
        let to_target = self.push(
            target_id,
            Push::Port {
                peer: caller,
                channel: target_end,
            },
        );

        if !(to_caller && to_target) {
            warn!(pair = %key, "Could not deliver channel to both endpoints");
            return Ok(false);
        }

        self.pairs.insert(key);
        info!(pair = %key, "Channel brokered");
        Ok(true)
    }

    pub fn refresh_map(&self) -> Snapshot {
        self.snapshot()
    }

    /// Register the caller as a worker-kind endpoint.
    ///
    /// The new snapshot goes to every endpoint including the worker, which
    /// treats it as confirmation of the handshake.
    pub fn register_worker(
        &mut self,
        from: EndpointId,
        identifier: String,
        handle: Option<String>,
    ) -> Result<(), SwitchboardError> {
        let spec = self.spec(from)?;
        let identifier = normalize_identifier(Some(identifier)).ok_or_else(|| {
            SwitchboardError::InvalidIdentifier("worker identifier must not be empty".to_string())
        })?;
        self.registry.check_identifier(from, Some(&identifier))?;

        if self.registry.contains(from) {
            let purged = self.pairs.purge(from);
            info!(endpoint_id = %from, purged, "Worker re-registered, channel pairs invalidated");
        }

        let info = endpoint_from_spec(from, &spec, ProcessKind::Worker)
            .with_identifier(Some(identifier.clone()))
            .with_handle(handle.or(spec.handle.clone()));
        self.registry.insert(info)?;
        info!(endpoint_id = %from, identifier = %identifier, "Worker registered");

        let snapshot = self.next_snapshot();
        self.broadcast(&snapshot, None);
        Ok(())
    }

    pub fn unregister_worker(&mut self, identifier: &str) -> Result<(), SwitchboardError> {
        let id = self
            .registry
            .lookup_identifier(identifier)
            .filter(|id| {
                self.registry
                    .get(*id)
                    .is_some_and(|e| e.kind == ProcessKind::Worker)
            })
            .ok_or_else(|| SwitchboardError::NotFound(format!("worker '{identifier}'")))?;

        self.remove_endpoint(id);
        info!(endpoint_id = %id, identifier, "Worker unregistered");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn spec(&self, id: EndpointId) -> Result<ProcessSpec, SwitchboardError> {
        self.connections
            .get(&id)
            .map(|c| c.spec.clone())
            .ok_or(SwitchboardError::NotRegistered(id))
    }

    /// Purge an endpoint and its pairs, then broadcast. Returns whether it was registered.
    fn remove_endpoint(&mut self, id: EndpointId) -> bool {
        if self.registry.remove(id).is_none() {
            return false;
        }
        let purged = self.pairs.purge(id);
        debug!(endpoint_id = %id, purged, "Endpoint removed");

        let snapshot = self.next_snapshot();
        self.broadcast(&snapshot, None);
        true
    }

    fn next_snapshot(&mut self) -> Snapshot {
        self.version += 1;
        self.snapshot()
    }

    fn broadcast(&self, snapshot: &Snapshot, except: Option<EndpointId>) {
        for id in self.registry.ids() {
            if Some(id) != except {
                self.push(id, Push::MapUpdate(snapshot.clone()));
            }
        }
    }

    fn inbox_open(&self, id: EndpointId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|connection| !connection.push.is_closed())
    }

    fn push(&self, id: EndpointId, push: Push) -> bool {
        let name = push.name();
        match self.connections.get(&id) {
            Some(connection) if connection.push.send(push).is_ok() => true,
            _ => {
                debug!(endpoint_id = %id, push = name, "Endpoint inbox closed, dropping push");
                false
            }
        }
    }
}

fn endpoint_from_spec(id: EndpointId, spec: &ProcessSpec, kind: ProcessKind) -> EndpointInfo {
    EndpointInfo::new(id, kind)
        .with_handle(spec.handle.clone())
        .with_url(spec.url.clone())
        .with_pid(spec.pid)
}

fn respond<T>(
    reply: oneshot::Sender<Result<T, SwitchboardError>>,
    result: Result<T, SwitchboardError>,
    from: EndpointId,
    request: &'static str,
) {
    if let Err(e) = &result {
        debug!(endpoint_id = %from, request, error = %e, "Request failed");
    }
    if reply.send(result).is_err() {
        debug!(endpoint_id = %from, request, "Requester went away before the reply");
    }
}
