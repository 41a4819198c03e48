// ABOUTME: Per-peer channel cache plus the callers waiting on a channel that was requested.
// ABOUTME: Only the first waiter for a peer asks the coordinator; later ones share the result.

use std::collections::HashMap;

use switchboard_core::{ChannelSender, EndpointId, EndpointInfo};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// An established channel and the task reading its inbound side.
#[derive(Debug)]
pub(crate) struct CachedChannel {
    pub peer: EndpointInfo,
    pub sender: ChannelSender,
    reader: JoinHandle<()>,
}

impl CachedChannel {
    pub fn new(peer: EndpointInfo, sender: ChannelSender, reader: JoinHandle<()>) -> Self {
        Self {
            peer,
            sender,
            reader,
        }
    }

    /// Stop reading. Dropping the sender closes our half.
    pub fn close(self) {
        self.reader.abort();
    }
}

/// Result of asking the table for a channel.
#[derive(Debug)]
pub(crate) enum Lookup {
    Ready(ChannelSender),
    Wait {
        /// Whether this caller must send the GET_PORT request.
        first: bool,
        ticket: u64,
        waiter: oneshot::Receiver<ChannelSender>,
    },
}

#[derive(Debug, Default)]
pub(crate) struct ChannelTable {
    next_ticket: u64,
    cached: HashMap<EndpointId, CachedChannel>,
    waiting: HashMap<EndpointId, Vec<(u64, oneshot::Sender<ChannelSender>)>>,
}

impl ChannelTable {
    pub fn lookup(&mut self, peer: EndpointId) -> Lookup {
        if let Some(channel) = self.cached.get(&peer) {
            if !channel.sender.is_closed() {
                return Lookup::Ready(channel.sender.clone());
            }
            if let Some(stale) = self.cached.remove(&peer) {
                stale.close();
            }
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let (tx, waiter) = oneshot::channel();
        let waiters = self.waiting.entry(peer).or_default();
        let first = waiters.is_empty();
        waiters.push((ticket, tx));
        Lookup::Wait {
            first,
            ticket,
            waiter,
        }
    }

    /// Cache a new channel and hand it to everyone waiting. Returns the channel it replaced.
    pub fn install(&mut self, channel: CachedChannel) -> Option<CachedChannel> {
        let peer = channel.peer.id;
        for (_, waiter) in self.waiting.remove(&peer).unwrap_or_default() {
            let _ = waiter.send(channel.sender.clone());
        }
        self.cached.insert(peer, channel)
    }

    /// Drop the cached channel and fail pending waiters for `peer`.
    pub fn evict(&mut self, peer: EndpointId) -> Option<CachedChannel> {
        self.waiting.remove(&peer);
        self.cached.remove(&peer)
    }

    /// Forget the channel only if it is still the one identified by `sender`.
    pub fn forget_if_same(&mut self, peer: EndpointId, sender: &ChannelSender) -> bool {
        let matches = self
            .cached
            .get(&peer)
            .is_some_and(|channel| channel.sender.same_channel(sender));
        if matches {
            self.cached.remove(&peer);
        }
        matches
    }

    /// Fail every waiter for `peer` (the GET_PORT request itself failed).
    pub fn cancel_waiters(&mut self, peer: EndpointId) -> usize {
        self.waiting.remove(&peer).map_or(0, |waiters| waiters.len())
    }

    /// Withdraw a single waiter that gave up.
    pub fn withdraw(&mut self, peer: EndpointId, ticket: u64) {
        if let Some(waiters) = self.waiting.get_mut(&peer) {
            waiters.retain(|(t, _)| *t != ticket);
            if waiters.is_empty() {
                self.waiting.remove(&peer);
            }
        }
    }

    pub fn peer(&self, peer: EndpointId) -> Option<&EndpointInfo> {
        self.cached.get(&peer).map(|channel| &channel.peer)
    }

    pub fn contains(&self, peer: EndpointId) -> bool {
        self.cached.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn close_all(&mut self) {
        self.waiting.clear();
        for (_, channel) in self.cached.drain() {
            channel.close();
        }
    }
}
