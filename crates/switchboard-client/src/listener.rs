// ABOUTME: Listener and RPC handler types plus the string-keyed listener registry.
// ABOUTME: Listener failures are logged and never stop the remaining listeners.

use std::collections::HashMap;
use std::fmt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use switchboard_core::EndpointInfo;
use tracing::warn;

/// Callback for plain messages: `(sender, args)`.
///
/// An `Err` or a panic is logged and counted as a failure; the channel keeps
/// delivering to this and every other listener.
pub type Listener = Arc<dyn Fn(&EndpointInfo, &[Value]) -> anyhow::Result<()> + Send + Sync>;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// RPC handler: `(sender, args) -> value`. An error becomes a failed invoke-response.
pub type Handler = Arc<dyn Fn(EndpointInfo, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&EndpointInfo, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(EndpointInfo, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |sender: EndpointInfo, args: Vec<Value>| -> HandlerFuture {
        Box::pin(f(sender, args))
    })
}

/// Token returned by `on`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Listeners keyed by channel name.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    by_channel: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: &str, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId::new(self.next_id);
        self.by_channel
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn remove(&mut self, channel: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.by_channel.get_mut(channel) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.by_channel.remove(channel);
        }
        removed
    }

    /// Snapshot of the listeners for a channel, safe to call without holding the registry.
    pub fn get(&self, channel: &str) -> Vec<Listener> {
        self.by_channel
            .get(channel)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.by_channel.get(channel).map_or(0, Vec::len)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .by_channel
            .iter()
            .map(|(channel, listeners)| (channel.as_str(), listeners.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("channels", &counts)
            .finish()
    }
}

/// Run every listener, logging failures. Returns how many failed.
pub(crate) fn emit(
    listeners: &[Listener],
    channel: &str,
    sender: &EndpointInfo,
    args: &[Value],
) -> usize {
    let mut failed = 0;
    for listener in listeners {
        let error = match panic::catch_unwind(AssertUnwindSafe(|| listener(sender, args))) {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("listener panicked: {}", panic_message(payload.as_ref())),
        };
        failed += 1;
        warn!(channel, sender = %sender.label(), error = %error, "Listener failed");
    }
    failed
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use switchboard_core::{EndpointId, ProcessKind};

    fn sender() -> EndpointInfo {
        EndpointInfo::new(EndpointId::new(1), ProcessKind::View)
            .with_identifier(Some("controller".to_string()))
    }

    #[test]
    fn test_add_remove() {
        let mut registry = ListenerRegistry::new();
        let a = registry.add("ping", listener(|_, _| Ok(())));
        let b = registry.add("ping", listener(|_, _| Ok(())));
        assert_ne!(a, b);
        assert_eq!(registry.count("ping"), 2);

        assert!(registry.remove("ping", a));
        assert!(!registry.remove("ping", a));
        assert!(!registry.remove("pong", b));
        assert_eq!(registry.count("ping"), 1);

        assert!(registry.remove("ping", b));
        assert!(registry.get("ping").is_empty());
    }

    #[test]
    fn test_emit_continues_after_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::clone(&seen);
        let last = Arc::clone(&seen);

        let listeners = vec![
            listener(move |_, args| {
                first.lock().unwrap().push(args.to_vec());
                Ok(())
            }),
            listener(|_, _| anyhow::bail!("listener exploded")),
            listener(move |sender, _| {
                last.lock().unwrap().push(vec![json!(sender.label())]);
                Ok(())
            }),
        ];

        let failed = emit(&listeners, "ping", &sender(), &[json!(1)]);
        assert_eq!(failed, 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![json!(1)], vec![json!("controller")]]
        );
    }

    #[test]
    fn test_emit_survives_panicking_listener() {
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let listeners = vec![
            listener(|_, _| panic!("listener blew up")),
            listener(move |_, _| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
        ];

        assert_eq!(emit(&listeners, "ping", &sender(), &[]), 1);
        assert_eq!(emit(&listeners, "ping", &sender(), &[]), 1);
        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(payload.as_ref()), "static text");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned text"));
        assert_eq!(panic_message(payload.as_ref()), "owned text");
        let payload: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_handler_wrapper() {
        let add = handler(|_sender, args| async move {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });
        let result = add(sender(), vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(result, json!(5));
    }
}
