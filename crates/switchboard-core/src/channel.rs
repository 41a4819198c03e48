// ABOUTME: Point-to-point duplex channels between two endpoints.
// ABOUTME: Typed sender/receiver wrappers plus the factory that mints channel pairs.

use std::fmt;

use tokio::sync::mpsc;

use crate::endpoint::EndpointId;
use crate::envelope::Envelope;
use crate::error::SwitchboardError;

/// Sending half of a channel end.
///
/// Posting never blocks; delivery on one channel is FIFO.
#[derive(Clone)]
pub struct ChannelSender {
    inner: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSender {
    pub fn new(sender: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { inner: sender }
    }

    /// Post an envelope to the peer.
    pub fn post(&self, envelope: Envelope, peer: EndpointId) -> Result<(), SwitchboardError> {
        self.inner
            .send(envelope)
            .map_err(|_| SwitchboardError::ChannelClosed(peer))
    }

    /// Whether the peer has dropped its receiving half.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Whether both senders feed the same channel.
    pub fn same_channel(&self, other: &ChannelSender) -> bool {
        self.inner.same_channel(&other.inner)
    }
}

impl fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving half of a channel end.
#[derive(Debug)]
pub struct ChannelReceiver {
    inner: mpsc::UnboundedReceiver<Envelope>,
}

impl ChannelReceiver {
    pub fn new(receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { inner: receiver }
    }

    /// Receive the next envelope, or `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inner.recv().await
    }
}

/// One end of a duplex channel, handed to exactly one endpoint.
#[derive(Debug)]
pub struct ChannelEnd {
    pub sender: ChannelSender,
    pub receiver: ChannelReceiver,
}

impl ChannelEnd {
    pub fn split(self) -> (ChannelSender, ChannelReceiver) {
        (self.sender, self.receiver)
    }
}

/// Create a connected pair of channel ends.
pub fn duplex() -> (ChannelEnd, ChannelEnd) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        ChannelEnd {
            sender: ChannelSender::new(b_tx),
            receiver: ChannelReceiver::new(a_rx),
        },
        ChannelEnd {
            sender: ChannelSender::new(a_tx),
            receiver: ChannelReceiver::new(b_rx),
        },
    )
}

/// Source of duplex channels, supplied by the host shell.
pub trait ChannelFactory: Send + Sync {
    fn create(&self) -> (ChannelEnd, ChannelEnd);
}

/// Default factory: in-process unbounded mpsc pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessChannels;

impl ChannelFactory for InProcessChannels {
    fn create(&self) -> (ChannelEnd, ChannelEnd) {
        duplex()
    }
}
