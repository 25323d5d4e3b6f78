//! One shared push socket, fanned out to listeners by topic.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::api::events::{ClientCommand, ServerEvent, Topic};

pub type EventCallback = Arc<dyn Fn(&ServerEvent) + Send + Sync>;
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by listener registration, needed to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Exponential backoff between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

#[derive(Clone)]
pub struct LiveRouter {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    next_id: AtomicU64,
    listeners: Mutex<HashMap<Topic, Vec<(ListenerId, EventCallback)>>>,
    connect_listeners: Mutex<Vec<(ListenerId, ConnectCallback)>>,
    /// Present only while a socket is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
    scope: Mutex<Option<String>>,
    /// Number of sockets opened so far.
    connections: watch::Sender<u64>,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveRouter {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (connections, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                policy,
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(HashMap::new()),
                connect_listeners: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                scope: Mutex::new(None),
                connections,
                started: AtomicBool::new(false),
                shutdown,
                task: Mutex::new(None),
            }),
        }
    }

    /// Start the background connection task. Calling it again is a no-op.
    ///
    /// Outside a tokio runtime nothing is started and the call can be
    /// repeated later. Connection failures are logged and retried; they
    /// never reach the caller.
    pub fn connect(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("no async runtime available, push socket not started");
            return;
        };
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move { inner.run().await });
        *self.inner.task.lock() = Some(handle);
    }

    /// Stop the connection task and wait for it to finish. The router does not reconnect afterwards.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("push socket task ended abnormally: {e}");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn add_listener<F>(&self, topic: Topic, callback: F) -> ListenerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id();
        self.inner
            .listeners
            .lock()
            .entry(topic)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_listener(&self, topic: Topic, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let Some(entries) = listeners.get_mut(&topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(lid, _)| *lid != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&topic);
        }
        removed
    }

    /// Count of successful connects. It changes on every (re)connect, so a
    /// value above 1 means pushes may have been missed in between.
    pub fn connections(&self) -> watch::Receiver<u64> {
        self.inner.connections.subscribe()
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.inner.listeners.lock().get(&topic).map_or(0, Vec::len)
    }

    /// Register a callback fired after every successful (re)connect.
    pub fn add_connect_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id();
        self.inner.connect_listeners.lock().push((id, Arc::new(callback)));
        id
    }

    pub fn remove_connect_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.connect_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Make `contact_id` the single active scope of this connection.
    ///
    /// A different previous scope is unsubscribed first. Returns `false` when no
    /// socket is open; the scope is still recorded and the caller is expected to
    /// re-issue the subscription once connected.
    pub fn subscribe_to_contact(&self, contact_id: &str) -> bool {
        let previous = self.inner.scope.lock().replace(contact_id.to_string());
        if let Some(prev) = previous.filter(|p| p != contact_id) {
            self.inner.send(ClientCommand::UnsubscribeContact { contact_id: prev });
        }
        self.inner.send(ClientCommand::SubscribeContact {
            contact_id: contact_id.to_string(),
        })
    }

    /// Drop the active scope, if any, and return it.
    pub fn unsubscribe_from_contact(&self) -> Option<String> {
        let previous = self.inner.scope.lock().take();
        if let Some(prev) = &previous {
            self.inner.send(ClientCommand::UnsubscribeContact {
                contact_id: prev.clone(),
            });
        }
        previous
    }

    /// Unsubscribe only if `contact_id` is still the active scope.
    pub fn release_scope(&self, contact_id: &str) -> bool {
        let released = {
            let mut scope = self.inner.scope.lock();
            if scope.as_deref() == Some(contact_id) {
                scope.take()
            } else {
                None
            }
        };
        match released {
            Some(id) => {
                self.inner.send(ClientCommand::UnsubscribeContact { contact_id: id });
                true
            }
            None => false,
        }
    }

    pub fn active_scope(&self) -> Option<String> {
        self.inner.scope.lock().clone()
    }

    /// Decode one raw frame and route it, exactly as frames read from the socket are.
    pub fn dispatch_text(&self, text: &str) {
        self.inner.dispatch_text(text);
    }

    /// Invoke every listener registered for the event's topic. Returns how many ran.
    pub fn dispatch(&self, event: &ServerEvent) -> usize {
        self.inner.dispatch(event)
    }
}

impl std::fmt::Debug for LiveRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRouter")
            .field("url", &self.inner.redacted_url())
            .field("connected", &self.is_connected())
            .field("scope", &self.active_scope())
            .finish()
    }
}

impl Inner {
    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn redacted_url(&self) -> &str {
        self.url.split('?').next().unwrap_or(&self.url)
    }

    fn send(&self, cmd: ClientCommand) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(cmd).is_ok(),
            None => {
                log::debug!("push socket offline, not sending {cmd:?}");
                false
            }
        }
    }

    fn dispatch_text(&self, text: &str) {
        match ServerEvent::decode(text) {
            Ok(Some(event)) => {
                self.dispatch(&event);
            }
            Ok(None) => log::debug!("ignoring push of unknown type"),
            Err(e) => log::debug!("ignoring malformed push: {e}"),
        }
    }

    fn dispatch(&self, event: &ServerEvent) -> usize {
        let callbacks: Vec<EventCallback> = self
            .listeners
            .lock()
            .get(&event.topic())
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for cb in &callbacks {
            cb(event);
        }
        callbacks.len()
    }

    fn notify_connected(&self) {
        let callbacks: Vec<ConnectCallback> = self
            .connect_listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for cb in &callbacks {
            cb();
        }
    }

    async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut delay = self.policy.initial;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let attempt = tokio::select! {
                res = connect_async(self.url.as_str()) => res,
                _ = shutdown.changed() => break,
            };
            match attempt {
                Ok((stream, _)) => {
                    log::info!("push socket connected to {}", self.redacted_url());
                    delay = self.policy.initial;
                    self.serve(stream, &mut shutdown).await;
                    log::info!("push socket to {} closed", self.redacted_url());
                }
                Err(e) => log::warn!("push socket connect to {} failed: {e}", self.redacted_url()),
            }
            if *shutdown.borrow() {
                break;
            }
            log::debug!("reconnecting in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
            delay = self.policy.next_delay(delay);
        }
        *self.outbound.lock() = None;
        log::debug!("push socket task stopped");
    }

    async fn serve<S>(&self, stream: WebSocketStream<S>, shutdown: &mut watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<ClientCommand>();
        *self.outbound.lock() = Some(tx);
        self.connections.send_modify(|n| *n += 1);
        self.notify_connected();

        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => {
                    let text = match serde_json::to_string(&cmd) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("failed to encode {cmd:?}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(text)).await {
                        log::warn!("push socket send failed: {e}");
                        break;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("push socket error: {e}");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        *self.outbound.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const CONTACT_PUSH: &str =
        r#"{"type":"contact_update","data":{"contact_id":"1","lead_status":"resolved"}}"#;

    fn router() -> LiveRouter {
        LiveRouter::new("ws://127.0.0.1:9/ws?token=secret", ReconnectPolicy::default())
    }

    /// Pretend a socket is open and capture what would be written to it.
    fn attach_outbound(router: &LiveRouter) -> mpsc::UnboundedReceiver<ClientCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        *router.inner.outbound.lock() = Some(tx);
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientCommand>) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn dispatch_reaches_every_listener_of_the_topic() {
        let router = router();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            router.add_listener(Topic::ContactUpdate, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        let other = Arc::new(AtomicUsize::new(0));
        {
            let other = Arc::clone(&other);
            router.add_listener(Topic::ChatLogUpdate, move |_| {
                other.fetch_add(1, Ordering::SeqCst);
            });
        }

        router.dispatch_text(CONTACT_PUSH);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removed_listener_is_not_called() {
        let router = router();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = Arc::clone(&hits);
            router.add_listener(Topic::ContactUpdate, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(router.remove_listener(Topic::ContactUpdate, id));
        assert!(!router.remove_listener(Topic::ContactUpdate, id));
        assert_eq!(router.listener_count(Topic::ContactUpdate), 0);

        router.dispatch_text(CONTACT_PUSH);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_and_malformed_frames_are_ignored() {
        let router = router();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            router.add_listener(Topic::ContactUpdate, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        router.dispatch_text(r#"{"type":"presence","data":{}}"#);
        router.dispatch_text("{");
        router.dispatch_text(r#"{"type":"contact_update","data":{"lead_status":"assigned"}}"#);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn switching_scope_unsubscribes_previous_one() {
        let router = router();
        let mut rx = attach_outbound(&router);

        assert!(router.subscribe_to_contact("A"));
        assert!(router.subscribe_to_contact("B"));

        assert_eq!(router.active_scope().as_deref(), Some("B"));
        assert_eq!(
            drain(&mut rx),
            vec![
                ClientCommand::SubscribeContact { contact_id: "A".into() },
                ClientCommand::UnsubscribeContact { contact_id: "A".into() },
                ClientCommand::SubscribeContact { contact_id: "B".into() },
            ]
        );
    }

    #[test]
    fn resubscribing_same_scope_does_not_unsubscribe() {
        let router = router();
        let mut rx = attach_outbound(&router);
        router.subscribe_to_contact("A");
        router.subscribe_to_contact("A");
        assert_eq!(
            drain(&mut rx),
            vec![
                ClientCommand::SubscribeContact { contact_id: "A".into() },
                ClientCommand::SubscribeContact { contact_id: "A".into() },
            ]
        );
    }

    #[test]
    fn subscribe_while_offline_records_scope() {
        let router = router();
        assert!(!router.is_connected());
        assert!(!router.subscribe_to_contact("A"));
        assert_eq!(router.active_scope().as_deref(), Some("A"));
    }

    #[test]
    fn release_scope_only_touches_matching_scope() {
        let router = router();
        let mut rx = attach_outbound(&router);
        router.subscribe_to_contact("A");
        drain(&mut rx);

        assert!(!router.release_scope("B"));
        assert_eq!(router.active_scope().as_deref(), Some("A"));
        assert!(drain(&mut rx).is_empty());

        assert!(router.release_scope("A"));
        assert!(router.active_scope().is_none());
        assert_eq!(
            drain(&mut rx),
            vec![ClientCommand::UnsubscribeContact { contact_id: "A".into() }]
        );
        assert_eq!(router.unsubscribe_from_contact(), None);
    }

    #[test]
    fn connect_without_runtime_does_not_start() {
        let router = router();
        router.connect();
        assert!(!router.inner.started.load(Ordering::SeqCst));
        assert!(router.inner.task.lock().is_none());
        assert!(!router.is_connected());
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        let d1 = policy.next_delay(policy.initial);
        let d2 = policy.next_delay(d1);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(350));
        assert_eq!(policy.next_delay(d2), Duration::from_millis(350));
    }

    #[test]
    fn debug_output_hides_token() {
        let text = format!("{:?}", router());
        assert!(!text.contains("secret"));
    }
}
