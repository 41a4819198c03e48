// ABOUTME: Coalescing dispatch layer over any endpoint client.
// ABOUTME: Sends and listener deliveries collapse to the latest payload per key within one tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use switchboard_core::{
    EndpointId, EndpointInfo, Selector, SelectorKind, Snapshot, SwitchboardError,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{trace, warn};

use crate::client::lock;
use crate::endpoint::Endpoint;
use crate::listener::{emit, listener, Handler, Listener, ListenerId};

/// How long a burst must stay silent before a multi-thread flush drains it.
const QUIET_WINDOW: Duration = Duration::from_millis(2);

/// Outgoing messages coalesce on selector and channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SendKey {
    kind: SelectorKind,
    value: String,
    channel: String,
}

struct PendingSend {
    selector: Selector,
    channel: String,
    args: Vec<Value>,
}

#[derive(Default)]
struct SendQueue {
    pending: HashMap<SendKey, PendingSend>,
    generation: u64,
    scheduled: bool,
}

/// Local listeners for one channel, fed by a single listener on the wrapped endpoint.
struct ReceiveSlot {
    listeners: Vec<(ListenerId, Listener)>,
    upstream: ListenerId,
    latest: Option<(EndpointInfo, Vec<Value>)>,
    generation: u64,
    scheduled: bool,
}

struct Shared<E> {
    endpoint: Arc<E>,
    sends: Mutex<SendQueue>,
    receives: Mutex<HashMap<String, ReceiveSlot>>,
    next_listener: AtomicU64,
}

/// Coalescing wrapper around an [`Endpoint`].
///
/// Within one tick only the last `send` per `(selector, channel)` goes out,
/// and each channel's listeners see only the last inbound payload. Handlers
/// and invokes pass straight through. Must be used inside a tokio runtime;
/// flushes run as spawned tasks.
///
/// On a current-thread runtime a tick ends when the producing task yields.
/// On a multi-thread runtime the producer may keep running on another worker
/// while the flush is scheduled, so a tick ends once the burst has been
/// silent for a short quiet window (a couple of milliseconds).
pub struct Throttled<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for Throttled<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: Endpoint> Throttled<E> {
    pub fn new(endpoint: Arc<E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint,
                sends: Mutex::new(SendQueue::default()),
                receives: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    pub fn endpoint(&self) -> &Arc<E> {
        &self.shared.endpoint
    }

    pub fn id(&self) -> EndpointId {
        self.shared.endpoint.id()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.endpoint.snapshot()
    }

    /// Queue a send, replacing any pending payload for the same selector and channel.
    pub fn send(&self, selector: Selector, channel: &str, args: Vec<Value>) {
        let key = SendKey {
            kind: selector.kind(),
            value: selector.value(),
            channel: channel.to_string(),
        };
        let mut queue = lock(&self.shared.sends);
        queue.generation += 1;
        if queue
            .pending
            .insert(
                key,
                PendingSend {
                    selector,
                    channel: channel.to_string(),
                    args,
                },
            )
            .is_some()
        {
            trace!(channel, "Coalesced outgoing message");
        }
        if !queue.scheduled {
            queue.scheduled = true;
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.flush_sends().await });
        }
    }

    /// Sends waiting for the next flush.
    pub fn pending_sends(&self) -> usize {
        lock(&self.shared.sends).pending.len()
    }

    pub fn on(&self, channel: &str, listener: Listener) -> ListenerId {
        let id = ListenerId::new(self.shared.next_listener.fetch_add(1, Ordering::Relaxed) + 1);
        let mut receives = lock(&self.shared.receives);
        if let Some(slot) = receives.get_mut(channel) {
            slot.listeners.push((id, listener));
            return id;
        }

        let upstream = self.shared.endpoint.on(channel, self.upstream_listener(channel));
        receives.insert(
            channel.to_string(),
            ReceiveSlot {
                listeners: vec![(id, listener)],
                upstream,
                latest: None,
                generation: 0,
                scheduled: false,
            },
        );
        id
    }

    /// Remove a listener. The upstream listener goes when the last local one does.
    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        let mut receives = lock(&self.shared.receives);
        let Some(slot) = receives.get_mut(channel) else {
            return false;
        };
        let before = slot.listeners.len();
        slot.listeners.retain(|(existing, _)| *existing != id);
        let removed = slot.listeners.len() != before;

        if slot.listeners.is_empty() {
            if let Some(slot) = receives.remove(channel) {
                self.shared.endpoint.off(channel, slot.upstream);
            }
        }
        removed
    }

    pub fn handle(&self, channel: &str, handler: Handler) {
        self.shared.endpoint.handle(channel, handler);
    }

    pub fn remove_handler(&self, channel: &str) -> bool {
        self.shared.endpoint.remove_handler(channel)
    }

    pub async fn invoke(
        &self,
        selector: &Selector,
        channel: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, SwitchboardError> {
        self.shared
            .endpoint
            .invoke(selector, channel, args, timeout)
            .await
    }

    fn upstream_listener(&self, channel: &str) -> Listener {
        let shared = Arc::downgrade(&self.shared);
        let channel = channel.to_string();
        listener(move |sender, args| {
            if let Some(shared) = shared.upgrade() {
                shared.record_inbound(&channel, sender, args);
            }
            Ok(())
        })
    }
}

impl<E: Endpoint> Shared<E> {
    async fn flush_sends(&self) {
        settle_burst(|| lock(&self.sends).generation).await;
        let batch: Vec<PendingSend> = {
            let mut queue = lock(&self.sends);
            queue.scheduled = false;
            queue.pending.drain().map(|(_, send)| send).collect()
        };
        trace!(count = batch.len(), "Flushing coalesced sends");

        let deliveries = batch.into_iter().map(|send| async move {
            let PendingSend {
                selector,
                channel,
                args,
            } = send;
            let result = self.endpoint.send(&selector, &channel, args).await;
            (selector, channel, result)
        });
        for (selector, channel, result) in join_all(deliveries).await {
            if let Err(e) = result {
                warn!(
                    selector = %selector,
                    channel = %channel,
                    error = %e,
                    "Coalesced send failed"
                );
            }
        }
    }

    fn record_inbound(self: &Arc<Self>, channel: &str, sender: &EndpointInfo, args: &[Value]) {
        let mut receives = lock(&self.receives);
        let Some(slot) = receives.get_mut(channel) else {
            return;
        };
        slot.generation += 1;
        if slot.latest.replace((sender.clone(), args.to_vec())).is_some() {
            trace!(channel, "Coalesced inbound message");
        }
        if !slot.scheduled {
            slot.scheduled = true;
            let shared = Arc::clone(self);
            let channel = channel.to_string();
            tokio::spawn(async move { shared.flush_inbound(&channel).await });
        }
    }

    async fn flush_inbound(&self, channel: &str) {
        settle_burst(|| {
            lock(&self.receives)
                .get(channel)
                .map_or(0, |slot| slot.generation)
        })
        .await;

        let (latest, listeners) = {
            let mut receives = lock(&self.receives);
            let Some(slot) = receives.get_mut(channel) else {
                return;
            };
            slot.scheduled = false;
            let listeners: Vec<Listener> =
                slot.listeners.iter().map(|(_, l)| Arc::clone(l)).collect();
            (slot.latest.take(), listeners)
        };
        if let Some((sender, args)) = latest {
            emit(&listeners, channel, &sender, &args);
        }
    }
}

/// Wait for the producer's tick to end before a flush drains.
///
/// A spawned flush on a current-thread runtime only runs once the producer
/// has yielded, so it drains at once. Elsewhere the burst is over when its
/// generation stops moving for a whole quiet window.
async fn settle_burst(generation: impl Fn() -> u64) {
    if !on_multi_thread_runtime() {
        return;
    }
    let mut seen = generation();
    loop {
        tokio::time::sleep(QUIET_WINDOW).await;
        let current = generation();
        if current == seen {
            return;
        }
        seen = current;
    }
}

fn on_multi_thread_runtime() -> bool {
    Handle::try_current()
        .is_ok_and(|handle| handle.runtime_flavor() != RuntimeFlavor::CurrentThread)
}
