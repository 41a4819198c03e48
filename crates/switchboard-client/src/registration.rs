// ABOUTME: Worker registration state machine and the queue of sends made before confirmation.
// ABOUTME: Queued sends flush in FIFO order once registered and are discarded on failure.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;
use switchboard_core::{Selector, SwitchboardError};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Lifecycle of a worker's registration with the coordinator.
///
/// `Uninitialized -> Subscribing -> Registered | Failed`; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Uninitialized,
    Subscribing,
    Registered,
    Failed,
}

impl RegistrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Registered | Self::Failed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Subscribing)
                | (Self::Subscribing, Self::Registered)
                | (Self::Subscribing, Self::Failed)
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Subscribing => "subscribing",
            Self::Registered => "registered",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A send made while registration was still in flight.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub selector: Selector,
    pub channel: String,
    pub args: Vec<Value>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(selector: Selector, channel: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            selector,
            channel: channel.into(),
            args,
            enqueued_at: Utc::now(),
        }
    }
}

/// What the gate decided about an outgoing send.
#[derive(Debug)]
pub enum Admission {
    /// Held until registration completes.
    Queued { position: usize },
    /// Registered: deliver now.
    Dispatch(QueuedMessage),
    /// Registration failed.
    Rejected(SwitchboardError),
}

/// Gate in front of a worker's sends.
///
/// The queue lock is held while flushing, so sends admitted after
/// registration completes are delivered after every queued message.
#[derive(Debug)]
pub struct RegistrationGate {
    identifier: String,
    state: watch::Sender<RegistrationState>,
    queue: Mutex<VecDeque<QueuedMessage>>,
}

impl RegistrationGate {
    pub fn new(identifier: impl Into<String>) -> Self {
        let (state, _) = watch::channel(RegistrationState::Uninitialized);
        Self {
            identifier: identifier.into(),
            state,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    fn transition(&self, next: RegistrationState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(
                identifier = %self.identifier,
                from = %current,
                to = %next,
                "Ignoring invalid registration transition"
            );
            return false;
        }
        self.state.send_replace(next);
        debug!(
            identifier = %self.identifier,
            from = %current,
            to = %next,
            "Registration state changed"
        );
        true
    }

    /// Registration request is about to go out.
    pub fn begin(&self) -> bool {
        self.transition(RegistrationState::Subscribing)
    }

    pub async fn admit(&self, message: QueuedMessage) -> Admission {
        let mut queue = self.queue.lock().await;
        match self.state() {
            RegistrationState::Uninitialized | RegistrationState::Subscribing => {
                queue.push_back(message);
                Admission::Queued {
                    position: queue.len(),
                }
            }
            RegistrationState::Registered => Admission::Dispatch(message),
            RegistrationState::Failed => Admission::Rejected(self.failure()),
        }
    }

    /// Mark registered and flush the queue in order through `dispatch`.
    ///
    /// Returns how many queued messages were delivered.
    pub async fn complete<F, Fut>(&self, mut dispatch: F) -> usize
    where
        F: FnMut(QueuedMessage) -> Fut,
        Fut: Future<Output = Result<(), SwitchboardError>>,
    {
        let mut queue = self.queue.lock().await;
        if !self.transition(RegistrationState::Registered) {
            return 0;
        }

        let total = queue.len();
        let mut delivered = 0;
        while let Some(message) = queue.pop_front() {
            let channel = message.channel.clone();
            match dispatch(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        identifier = %self.identifier,
                        channel = %channel,
                        error = %e,
                        "Queued message failed to send"
                    );
                }
            }
        }
        info!(identifier = %self.identifier, delivered, total, "Worker registered");
        delivered
    }

    /// Mark failed and discard the queue, logging every dropped message.
    pub async fn fail(&self) -> Vec<QueuedMessage> {
        let mut queue = self.queue.lock().await;
        if !self.transition(RegistrationState::Failed) {
            return Vec::new();
        }

        let dropped: Vec<QueuedMessage> = queue.drain(..).collect();
        let reason = self.failure();
        for message in &dropped {
            warn!(
                identifier = %self.identifier,
                selector = %message.selector,
                channel = %message.channel,
                queued_at = %message.enqueued_at.to_rfc3339(),
                error = %reason,
                "Discarding queued message"
            );
        }
        dropped
    }

    /// Wait until registration reaches a terminal state.
    pub async fn wait(&self) -> RegistrationState {
        let mut state = self.state.subscribe();
        let reached = match state.wait_for(|s| s.is_terminal()).await {
            Ok(reached) => *reached,
            Err(_) => self.state(),
        };
        reached
    }

    pub async fn queued(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub fn failure(&self) -> SwitchboardError {
        SwitchboardError::RegistrationTimeout {
            identifier: self.identifier.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn message(channel: &str) -> QueuedMessage {
        QueuedMessage::new(Selector::identifier("controller"), channel, vec![])
    }

    #[test]
    fn test_transitions() {
        use RegistrationState::*;
        assert!(Uninitialized.can_transition_to(Subscribing));
        assert!(Subscribing.can_transition_to(Registered));
        assert!(Subscribing.can_transition_to(Failed));
        assert!(!Registered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Registered));
        assert!(!Uninitialized.can_transition_to(Registered));
        assert!(Registered.is_terminal());
        assert!(!Subscribing.is_terminal());
    }

    #[tokio::test]
    async fn test_flush_preserves_order_then_dispatches_directly() {
        let gate = RegistrationGate::new("worker");
        assert!(gate.begin());

        for channel in ["one", "two", "three"] {
            assert!(matches!(gate.admit(message(channel)).await, Admission::Queued { .. }));
        }
        assert_eq!(gate.queued().await, 3);

        let mut flushed = Vec::new();
        let delivered = gate
            .complete(|m| {
                flushed.push(m.channel);
                async { Ok(()) }
            })
            .await;
        assert_eq!(delivered, 3);
        assert_eq!(flushed, vec!["one", "two", "three"]);
        assert_eq!(gate.state(), RegistrationState::Registered);

        match gate.admit(message("four")).await {
            Admission::Dispatch(m) => assert_eq!(m.channel, "four"),
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_discards_queue_and_rejects() {
        let gate = RegistrationGate::new("worker");
        gate.begin();
        gate.admit(message("one")).await;
        gate.admit(message("two")).await;

        let dropped = gate.fail().await;
        assert_eq!(dropped.len(), 2);
        assert_eq!(gate.queued().await, 0);

        match gate.admit(message("three")).await {
            Admission::Rejected(e) => assert_eq!(
                e,
                SwitchboardError::RegistrationTimeout {
                    identifier: "worker".to_string()
                }
            ),
            other => panic!("expected rejection, got {other:?}"),
        }

        // Terminal states stay put.
        assert_eq!(gate.complete(|_| async { Ok(()) }).await, 0);
        assert_eq!(gate.state(), RegistrationState::Failed);
    }

    #[tokio::test]
    async fn test_wait_observes_outcome() {
        let gate = Arc::new(RegistrationGate::new("worker"));
        gate.begin();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::task::yield_now().await;
        gate.complete(|_| async { Ok(()) }).await;

        assert_eq!(waiter.await.unwrap(), RegistrationState::Registered);
    }

    #[tokio::test]
    async fn test_wait_returns_settled_failure_immediately() {
        let gate = RegistrationGate::new("worker");
        gate.begin();
        gate.fail().await;

        let state = tokio::time::timeout(std::time::Duration::from_secs(1), gate.wait())
            .await
            .unwrap();
        assert_eq!(state, RegistrationState::Failed);
    }
}
