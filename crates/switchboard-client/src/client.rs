// ABOUTME: Endpoint client core shared by view and worker processes.
// ABOUTME: Keeps the local snapshot, caches brokered channels, and routes messages and RPCs.

use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use futures::future::join_all;
use futures::Stream;
use serde_json::Value;
use switchboard_core::{
    ChannelEnd, ChannelReceiver, ChannelSender, CoordinatorLink, EndpointId, EndpointInfo,
    EndpointLink, Envelope, InvokeRequest, InvokeResponse, PlainMessage, ProcessKind, Push,
    Selector, Snapshot, SwitchboardConfig, SwitchboardError,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::channels::{CachedChannel, ChannelTable, Lookup};
use crate::events::EndpointEvent;
use crate::listener::{emit, Handler, Listener, ListenerId, ListenerRegistry};

const EVENT_BUFFER: usize = 64;

type PendingReply = oneshot::Sender<Result<Value, SwitchboardError>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one endpoint's client. Cheap to clone; all clones share state.
///
/// The client stops its background tasks and closes every cached channel
/// once the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

struct Inner {
    id: EndpointId,
    kind: ProcessKind,
    coordinator: CoordinatorLink,
    config: SwitchboardConfig,
    snapshot: RwLock<Snapshot>,
    channels: Mutex<ChannelTable>,
    pending: Mutex<HashMap<String, PendingReply>>,
    listeners: Mutex<ListenerRegistry>,
    handlers: RwLock<HashMap<String, Handler>>,
    events: broadcast::Sender<EndpointEvent>,
    confirmed: watch::Sender<bool>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Start the client for an attached process. Does not subscribe.
    pub fn start(link: EndpointLink, kind: ProcessKind, config: SwitchboardConfig) -> Self {
        let EndpointLink { coordinator, inbox } = link;
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (confirmed, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            id: coordinator.id(),
            kind,
            coordinator,
            config,
            snapshot: RwLock::new(Snapshot::default()),
            channels: Mutex::new(ChannelTable::default()),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(ListenerRegistry::new()),
            handlers: RwLock::new(HashMap::new()),
            events,
            confirmed,
            push_task: Mutex::new(None),
        });

        let task = tokio::spawn(run_push_loop(Arc::downgrade(&inner), inbox));
        *lock(&inner.push_task) = Some(task);

        debug!(id = %inner.id, kind = %kind, "Client started");
        Self { inner }
    }

    pub fn id(&self) -> EndpointId {
        self.inner.id
    }

    pub fn kind(&self) -> ProcessKind {
        self.inner.kind
    }

    pub fn config(&self) -> &SwitchboardConfig {
        &self.inner.config
    }

    pub(crate) fn coordinator(&self) -> &CoordinatorLink {
        &self.inner.coordinator
    }

    /// Most recent registry snapshot this client has seen.
    pub fn snapshot(&self) -> Snapshot {
        read(&self.inner.snapshot).clone()
    }

    pub fn endpoints(&self) -> Vec<EndpointInfo> {
        read(&self.inner.snapshot).endpoints.clone()
    }

    /// This endpoint's own entry, once the coordinator has confirmed it.
    pub fn info(&self) -> Option<EndpointInfo> {
        read(&self.inner.snapshot).get(self.inner.id).cloned()
    }

    /// Membership changes seen in later snapshots.
    pub fn events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.inner.events.subscribe()
    }

    /// Membership changes as a stream. Lagged events are skipped.
    pub fn event_stream(&self) -> impl Stream<Item = EndpointEvent> + Send + 'static {
        BroadcastStream::new(self.events()).filter_map(Result::ok)
    }

    /// Whether a snapshot containing this endpoint has arrived.
    pub fn is_confirmed(&self) -> bool {
        *self.inner.confirmed.borrow()
    }

    pub async fn wait_confirmed(&self) -> Result<(), SwitchboardError> {
        let mut confirmed = self.inner.confirmed.subscribe();
        confirmed
            .wait_for(|confirmed| *confirmed)
            .await
            .map(|_| ())
            .map_err(|_| SwitchboardError::CoordinatorUnavailable)
    }

    /// Bind this endpoint under `identifier` and adopt the returned snapshot.
    pub async fn subscribe(
        &self,
        identifier: Option<String>,
    ) -> Result<Snapshot, SwitchboardError> {
        let snapshot = self.inner.coordinator.subscribe(identifier).await?;
        self.inner.apply_snapshot(snapshot);
        Ok(self.snapshot())
    }

    /// Rebind this endpoint's identifier, then refresh the local snapshot.
    pub async fn update_identifier(
        &self,
        identifier: impl Into<String>,
    ) -> Result<(), SwitchboardError> {
        self.inner
            .coordinator
            .update_identifier(identifier.into())
            .await?;
        self.refresh_map().await.map(|_| ())
    }

    /// Ask the coordinator for the current snapshot.
    pub async fn refresh_map(&self) -> Result<Snapshot, SwitchboardError> {
        let snapshot = self.inner.coordinator.refresh_map().await?;
        self.inner.apply_snapshot(snapshot);
        Ok(self.snapshot())
    }

    pub fn on(&self, channel: &str, listener: Listener) -> ListenerId {
        lock(&self.inner.listeners).add(channel, listener)
    }

    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(channel, id)
    }

    /// Register the RPC handler for `channel`, replacing any previous one.
    pub fn handle(&self, channel: &str, handler: Handler) {
        if write(&self.inner.handlers)
            .insert(channel.to_string(), handler)
            .is_some()
        {
            info!(channel, "Replaced existing handler");
        }
    }

    pub fn remove_handler(&self, channel: &str) -> bool {
        write(&self.inner.handlers).remove(channel).is_some()
    }

    pub fn has_channel(&self, peer: EndpointId) -> bool {
        lock(&self.inner.channels).contains(peer)
    }

    pub fn channel_count(&self) -> usize {
        lock(&self.inner.channels).len()
    }

    /// Send a plain message.
    ///
    /// Single-target selectors must resolve to exactly one endpoint. `All`
    /// and `Pattern` deliver to every match; zero matches is only a warning.
    pub async fn send(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError> {
        if !selector.is_broadcast() {
            let target = self.resolve_one(selector)?;
            return self.send_to(&target, channel, args).await;
        }

        let targets: Vec<EndpointInfo> = read(&self.inner.snapshot)
            .resolve_all(selector, self.inner.id)
            .into_iter()
            .cloned()
            .collect();
        if targets.is_empty() {
            warn!(selector = %selector, channel, "No endpoints matched broadcast");
            return Ok(());
        }

        let deliveries = targets
            .iter()
            .map(|target| self.send_to(target, channel, args.clone()));
        for (target, result) in targets.iter().zip(join_all(deliveries).await) {
            if let Err(e) = result {
                warn!(target = %target.label(), channel, error = %e, "Broadcast delivery failed");
            }
        }
        Ok(())
    }

    /// Call the remote handler for `channel` and wait for its result.
    ///
    /// `timeout` defaults to the configured invoke timeout. A response that
    /// arrives after the timeout is discarded.
    pub async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        let target = self.resolve_one(selector)?;
        let sender = self.channel_to(&target).await?;

        let request_id = Uuid::new_v4().to_string();
        let (reply, response) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id.clone(), reply);

        let envelope = Envelope::invoke(channel, request_id.as_str(), args);
        if let Err(e) = sender.post(envelope, target.id) {
            lock(&self.inner.pending).remove(&request_id);
            return Err(e);
        }
        trace!(target = %target.label(), channel, request_id = %request_id, "Invoke sent");

        let deadline = timeout.unwrap_or_else(|| self.inner.config.invoke_timeout());
        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SwitchboardError::ChannelClosed(target.id)),
            Err(_) => {
                lock(&self.inner.pending).remove(&request_id);
                warn!(
                    target = %target.label(),
                    channel,
                    request_id = %request_id,
                    "Invoke timed out"
                );
                Err(SwitchboardError::timeout(format!("invoke '{channel}'"), deadline))
            }
        }
    }

    /// Stop background work and close every cached channel.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    fn resolve_one(&self, selector: &Selector) -> Result<EndpointInfo, SwitchboardError> {
        read(&self.inner.snapshot)
            .resolve_one(selector, self.inner.id)
            .cloned()
    }

    async fn send_to(
        &self,
        target: &EndpointInfo,
        channel: &str,
        args: Vec<Value>,
    ) -> Result<(), SwitchboardError> {
        let sender = self.channel_to(target).await?;
        sender.post(Envelope::message(channel, args), target.id)?;
        trace!(target = %target.label(), channel, "Message sent");
        Ok(())
    }

    /// Cached channel to `target`, requesting one from the coordinator if needed.
    async fn channel_to(&self, target: &EndpointInfo) -> Result<ChannelSender, SwitchboardError> {
        let lookup = lock(&self.inner.channels).lookup(target.id);
        let (first, ticket, waiter) = match lookup {
            Lookup::Ready(sender) => return Ok(sender),
            Lookup::Wait {
                first,
                ticket,
                waiter,
            } => (first, ticket, waiter),
        };

        if first {
            debug!(target = %target.label(), "Requesting channel");
            let requested = self
                .inner
                .coordinator
                .get_port(Selector::id(target.id))
                .await;
            let failure = match requested {
                Ok(true) => None,
                Ok(false) => Some(SwitchboardError::ChannelClosed(target.id)),
                Err(e) => Some(e),
            };
            if let Some(e) = failure {
                lock(&self.inner.channels).cancel_waiters(target.id);
                return Err(e);
            }
        }

        let limit = self.inner.config.channel_timeout();
        match tokio::time::timeout(limit, waiter).await {
            Ok(Ok(sender)) => Ok(sender),
            Ok(Err(_)) => Err(SwitchboardError::ChannelClosed(target.id)),
            Err(_) => {
                lock(&self.inner.channels).withdraw(target.id, ticket);
                Err(SwitchboardError::timeout(
                    format!("channel to {}", target.label()),
                    limit,
                ))
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Adopt a snapshot unless it is older than the one held.
    fn apply_snapshot(&self, snapshot: Snapshot) {
        let confirmed = snapshot.contains(self.id);
        let diff = {
            let mut current = write(&self.snapshot);
            if snapshot.version < current.version {
                debug!(
                    stale = snapshot.version,
                    current = current.version,
                    "Ignoring stale snapshot"
                );
                return;
            }
            let diff = snapshot.diff(&current);
            *current = snapshot;
            diff
        };

        if confirmed {
            self.confirmed.send_replace(true);
        }

        for removed in &diff.removed {
            if let Some(channel) = lock(&self.channels).evict(removed.id) {
                debug!(peer = %removed.label(), "Dropping channel to departed endpoint");
                channel.close();
            }
        }

        for event in EndpointEvent::from_diff(diff) {
            if event.endpoint().id == self.id {
                continue;
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn accept_channel(self: &Arc<Self>, peer: EndpointInfo, end: ChannelEnd) {
        let (sender, receiver) = end.split();
        let reader = tokio::spawn(run_reader(
            Arc::downgrade(self),
            peer.id,
            sender.clone(),
            receiver,
        ));
        debug!(peer = %peer.label(), "Channel established");
        let replaced = lock(&self.channels).install(CachedChannel::new(peer, sender, reader));
        if let Some(old) = replaced {
            debug!(peer = %old.peer.label(), "Replaced cached channel");
            old.close();
        }
    }

    fn forget_channel(&self, peer: EndpointId, sender: &ChannelSender) {
        if lock(&self.channels).forget_if_same(peer, sender) {
            debug!(peer = %peer, "Channel closed by peer");
        }
    }

    fn peer_info(&self, peer: EndpointId) -> EndpointInfo {
        if let Some(info) = read(&self.snapshot).get(peer) {
            return info.clone();
        }
        lock(&self.channels)
            .peer(peer)
            .cloned()
            .unwrap_or_else(|| EndpointInfo::new(peer, ProcessKind::default()))
    }

    fn dispatch(&self, peer: EndpointId, reply: &ChannelSender, envelope: Envelope) {
        match envelope {
            Envelope::Message(PlainMessage { message, args }) => {
                let listeners = lock(&self.listeners).get(&message);
                if listeners.is_empty() {
                    trace!(channel = %message, "No listeners");
                    return;
                }
                emit(&listeners, &message, &self.peer_info(peer), &args);
            }
            Envelope::Invoke(request) => self.answer(peer, reply.clone(), request),
            Envelope::InvokeResponse(response) => self.complete(response),
        }
    }

    fn answer(&self, peer: EndpointId, reply: ChannelSender, request: InvokeRequest) {
        let InvokeRequest {
            channel,
            request_id,
            args,
        } = request;
        let handler = read(&self.handlers).get(&channel).cloned();
        let sender = self.peer_info(peer);

        tokio::spawn(async move {
            let response = match handler {
                Some(handler) => match handler(sender, args).await {
                    Ok(data) => InvokeResponse::ok(request_id.as_str(), data),
                    Err(e) => {
                        debug!(channel = %channel, error = %e, "Handler failed");
                        InvokeResponse::err(request_id.as_str(), e.to_string())
                    }
                },
                None => {
                    let missing = SwitchboardError::HandlerMissing {
                        channel: channel.clone(),
                    };
                    warn!(channel = %channel, "{missing}");
                    InvokeResponse::err(request_id.as_str(), missing.to_string())
                }
            };
            if let Err(e) = reply.post(Envelope::InvokeResponse(response), peer) {
                debug!(channel = %channel, error = %e, "Could not deliver invoke response");
            }
        });
    }

    fn complete(&self, response: InvokeResponse) {
        let Some(waiter) = lock(&self.pending).remove(&response.request_id) else {
            debug!(request_id = %response.request_id, "Discarding late invoke response");
            return;
        };
        let result = if response.success {
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            Err(SwitchboardError::Remote(
                response
                    .error
                    .unwrap_or_else(|| "invoke failed".to_string()),
            ))
        };
        let _ = waiter.send(result);
    }

    fn shutdown(&self) {
        if let Some(task) = lock(&self.push_task).take() {
            task.abort();
        }
        lock(&self.channels).close_all();
        lock(&self.pending).clear();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
        debug!(id = %self.id, "Client dropped");
    }
}

async fn run_push_loop(inner: Weak<Inner>, mut inbox: mpsc::UnboundedReceiver<Push>) {
    while let Some(push) = inbox.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        trace!(push = push.name(), "Push received");
        match push {
            Push::MapUpdate(snapshot) => inner.apply_snapshot(snapshot),
            Push::Port { peer, channel } => inner.accept_channel(peer, channel),
        }
    }
    debug!("Push inbox closed");
}

async fn run_reader(
    inner: Weak<Inner>,
    peer: EndpointId,
    sender: ChannelSender,
    mut receiver: ChannelReceiver,
) {
    while let Some(envelope) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.dispatch(peer, &sender, envelope);
    }
    if let Some(inner) = inner.upgrade() {
        inner.forget_channel(peer, &sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_core::{duplex, CoordinatorLink};

    /// A client whose coordinator link goes nowhere, fed pushes by hand.
    fn detached(
        id: u64,
    ) -> (
        Client,
        mpsc::UnboundedSender<Push>,
        mpsc::Receiver<switchboard_core::RoutedRequest>,
    ) {
        let (requests_tx, requests_rx) = mpsc::channel(8);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let link = EndpointLink {
            coordinator: CoordinatorLink::new(EndpointId::new(id), requests_tx),
            inbox: push_rx,
        };
        let client = Client::start(link, ProcessKind::View, SwitchboardConfig::default());
        (client, push_tx, requests_rx)
    }

    fn view(id: u64, identifier: &str) -> EndpointInfo {
        EndpointInfo::new(EndpointId::new(id), ProcessKind::View)
            .with_identifier(Some(identifier.to_string()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_ignored() {
        let (client, push, _requests) = detached(1);
        push.send(Push::MapUpdate(Snapshot::new(3, vec![view(1, "a"), view(2, "b")])))
            .unwrap();
        push.send(Push::MapUpdate(Snapshot::new(2, vec![view(1, "a")])))
            .unwrap();
        settle().await;

        let snapshot = client.snapshot();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.len(), 2);
        assert!(client.is_confirmed());
    }

    #[tokio::test]
    async fn test_membership_events_skip_self() {
        let (client, push, _requests) = detached(1);
        let mut events = client.events();

        push.send(Push::MapUpdate(Snapshot::new(1, vec![view(1, "a"), view(2, "b")])))
            .unwrap();
        push.send(Push::MapUpdate(Snapshot::new(2, vec![view(1, "a")])))
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), EndpointEvent::Added(view(2, "b")));
        assert_eq!(events.recv().await.unwrap(), EndpointEvent::Removed(view(2, "b")));
        drop(client);
    }

    #[tokio::test]
    async fn test_pushed_channel_delivers_to_listeners() {
        let (client, push, _requests) = detached(1);
        push.send(Push::MapUpdate(Snapshot::new(1, vec![view(1, "a"), view(2, "b")])))
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on(
            "ping",
            crate::listener::listener(move |sender, args| {
                tx.send((sender.identifier.clone(), args.to_vec()))?;
                Ok(())
            }),
        );

        let (ours, theirs) = duplex();
        push.send(Push::Port {
            peer: view(2, "b"),
            channel: ours,
        })
        .unwrap();

        let (peer_tx, _peer_rx) = theirs.split();
        peer_tx
            .post(Envelope::message("ping", vec![json!(1)]), EndpointId::new(1))
            .unwrap();

        let (identifier, args) = rx.recv().await.unwrap();
        assert_eq!(identifier.as_deref(), Some("b"));
        assert_eq!(args, vec![json!(1)]);
        assert!(client.has_channel(EndpointId::new(2)));
    }

    #[tokio::test]
    async fn test_missing_handler_replies_with_error() {
        let (client, push, _requests) = detached(1);
        let (ours, theirs) = duplex();
        push.send(Push::Port {
            peer: view(2, "b"),
            channel: ours,
        })
        .unwrap();

        let (peer_tx, mut peer_rx) = theirs.split();
        peer_tx
            .post(Envelope::invoke("nope", "r1", vec![]), EndpointId::new(1))
            .unwrap();

        match peer_rx.recv().await {
            Some(Envelope::InvokeResponse(response)) => {
                assert_eq!(response.request_id, "r1");
                assert!(!response.success);
                assert_eq!(
                    response.error.as_deref(),
                    Some("No handler registered for channel 'nope'")
                );
            }
            other => panic!("expected invoke response, got {other:?}"),
        }
        drop(client);
    }

    #[tokio::test]
    async fn test_peer_departure_evicts_channel() {
        let (client, push, _requests) = detached(1);
        push.send(Push::MapUpdate(Snapshot::new(1, vec![view(1, "a"), view(2, "b")])))
            .unwrap();
        let (ours, _theirs) = duplex();
        push.send(Push::Port {
            peer: view(2, "b"),
            channel: ours,
        })
        .unwrap();
        settle().await;
        assert!(client.has_channel(EndpointId::new(2)));

        push.send(Push::MapUpdate(Snapshot::new(2, vec![view(1, "a")])))
            .unwrap();
        settle().await;
        assert!(!client.has_channel(EndpointId::new(2)));
    }

    #[tokio::test]
    async fn test_send_to_unknown_selector() {
        let (client, _push, _requests) = detached(1);
        let err = client
            .send(&Selector::identifier("ghost"), "ping", vec![])
            .await
            .unwrap_err();
        assert_eq!(err, SwitchboardError::NotFound("identifier:ghost".to_string()));

        // Broadcast with no matches is only a warning.
        client.send(&Selector::All, "ping", vec![]).await.unwrap();
    }
}
