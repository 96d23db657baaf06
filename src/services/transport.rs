//! Reconnecting, heartbeating push channel with typed subscriptions.
//!
//! One background task owns the live connection for each `connect` cycle. It
//! reads inbound frames, writes queued outbound frames, sends heartbeats and
//! schedules fixed-interval reconnects after abnormal closes. Subscriber
//! handlers run on that task, in registration order.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use reqwest::Url;
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{self, Envelope, GameStartPayload, GameStopPayload},
    error::{ClientError, TransportError},
};

/// Close code of a deliberate shutdown.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code of an endpoint going away.
pub const GOING_AWAY: u16 = 1001;
/// Close code used when the connection dropped or never opened.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Reconnect and heartbeat tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub reconnect_enabled: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_enabled: true,
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Query parameters appended to the push endpoint.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub token: Option<String>,
    pub activity_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Closed set of channels a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    ReconnectFailed,
    GameStart,
    GameStop,
    /// Wildcard: every decoded inbound envelope except heartbeat replies.
    Message,
}

/// Event delivered to subscribers; one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Close { code: Option<u16>, reason: String },
    Error { message: String },
    /// The connection failed `failures` times in a row; no further attempt is made.
    ReconnectFailed { failures: u32 },
    GameStart(GameStartPayload),
    GameStop(GameStopPayload),
    Message(Envelope),
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Open => EventKind::Open,
            TransportEvent::Close { .. } => EventKind::Close,
            TransportEvent::Error { .. } => EventKind::Error,
            TransportEvent::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            TransportEvent::GameStart(_) => EventKind::GameStart,
            TransportEvent::GameStop(_) => EventKind::GameStop,
            TransportEvent::Message(_) => EventKind::Message,
        }
    }
}

/// Handle returned by [`DuplexTransport::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

type Handler = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// Frame read from a live connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

/// One open duplex connection.
pub trait Connection: Send {
    fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>>;
    /// Next inbound frame; `None` once the stream ended without a close frame.
    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Frame, TransportError>>>;
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Factory opening [`Connection`]s.
pub trait Connector: Send + Sync {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<Box<dyn Connection>, TransportError>>;
}

struct Shared {
    status: watch::Sender<ConnectionStatus>,
    registry: Mutex<HashMap<EventKind, IndexMap<SubscriptionId, Handler>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    failures: AtomicU32,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<EventKind, IndexMap<SubscriptionId, Handler>>> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    fn dispatch(&self, event: &TransportEvent) {
        // Snapshot so handlers may (un)subscribe without deadlocking.
        let handlers: Vec<Handler> = self
            .registry()
            .get(&event.kind())
            .map(|handlers| handlers.values().cloned().collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }

    fn handle_text(&self, text: &str) {
        let envelope = match Envelope::from_json_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                let err = ClientError::MalformedMessage {
                    reason: err.to_string(),
                };
                warn!(error = %err, "dropping push frame");
                return;
            }
        };

        let typed = match envelope.kind.as_str() {
            ws::PONG => {
                trace!("heartbeat acknowledged");
                return;
            }
            ws::GAME_START => {
                decode_payload(&envelope).map(|payload| Some(TransportEvent::GameStart(payload)))
            }
            ws::GAME_STOP => {
                decode_payload(&envelope).map(|payload| Some(TransportEvent::GameStop(payload)))
            }
            _ => Ok(None),
        };

        match typed {
            Ok(Some(event)) => self.dispatch(&event),
            Ok(None) => {}
            Err(err) => {
                warn!(kind = %envelope.kind, error = %err, "dropping push frame");
                return;
            }
        }
        self.dispatch(&TransportEvent::Message(envelope));
    }
}

/// Decode a typed payload; a missing payload decodes like an empty object.
fn decode_payload<T>(envelope: &Envelope) -> Result<T, ClientError>
where
    T: serde::de::DeserializeOwned,
{
    let payload = if envelope.payload.is_null() {
        Value::Object(Default::default())
    } else {
        envelope.payload.clone()
    };
    serde_json::from_value(payload).map_err(|err| ClientError::MalformedMessage {
        reason: format!("{} payload: {err}", envelope.kind),
    })
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.cancel.cancel();
        }
    }
}

/// Cloneable handle to the push channel.
#[derive(Clone)]
pub struct DuplexTransport {
    inner: Arc<Inner>,
}

impl DuplexTransport {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Arc::new(Shared {
                    status,
                    registry: Mutex::new(HashMap::new()),
                    outbound: Mutex::new(None),
                    failures: AtomicU32::new(0),
                }),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.shared.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.shared.status.subscribe()
    }

    /// Failed connections in a row since the last successful open.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.shared.failures.load(Ordering::SeqCst)
    }

    /// Start the connection task. A no-op while a previous cycle is still running.
    pub fn connect(&self, endpoint: &str, params: &ConnectParams) -> Result<(), TransportError> {
        let mut url = Url::parse(endpoint).map_err(|_| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(token) = &params.token {
                query.append_pair("token", token);
            }
            if let Some(activity_id) = &params.activity_id {
                query.append_pair("activityId", activity_id);
            }
        }

        let mut running = self.inner.running();
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                debug!("push channel already running; connect ignored");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        self.inner.shared.failures.store(0, Ordering::SeqCst);
        self.inner.shared.set_status(ConnectionStatus::Connecting);
        let handle = tokio::spawn(run_connection_loop(
            self.inner.shared.clone(),
            self.inner.connector.clone(),
            self.inner.config.clone(),
            url,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Queue an envelope for sending. Returns `false` unless connected.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        if self.status() != ConnectionStatus::Connected {
            debug!(kind, "push channel not connected; message dropped");
            return false;
        }
        let text = match Envelope::new(kind, payload).to_json_string() {
            Ok(text) => text,
            Err(err) => {
                warn!(kind, error = %err, "failed to encode push message");
                return false;
            }
        };
        self.inner
            .shared
            .outbound()
            .as_ref()
            .is_some_and(|outbound| outbound.send(text).is_ok())
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.inner
            .shared
            .registry()
            .entry(kind)
            .or_default()
            .insert(id, Arc::new(handler));
        id
    }

    /// Remove a handler. Returns `false` when it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.inner
            .shared
            .registry()
            .get_mut(&kind)
            .is_some_and(|handlers| handlers.shift_remove(&id).is_some())
    }

    /// Stop the connection task and any pending reconnect. Idempotent.
    pub fn close(&self) {
        if let Some(running) = self.inner.running().take() {
            running.cancel.cancel();
            info!("push channel closed by client");
        }
        self.inner.shared.outbound().take();
        self.inner.shared.set_status(ConnectionStatus::Disconnected);
    }
}

/// Why a live connection stopped.
enum SessionEnd {
    Cancelled,
    Closed { code: Option<u16>, reason: String },
}

enum Wake {
    Cancelled,
    Heartbeat,
    Outbound(String),
    Inbound(Option<Result<Frame, TransportError>>),
}

async fn run_connection_loop(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: TransportConfig,
    url: Url,
    cancel: CancellationToken,
) {
    loop {
        shared.set_status(ConnectionStatus::Connecting);
        debug!(host = url.host_str().unwrap_or_default(), "opening push channel");

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connector.connect(url.clone()) => result,
        };

        let end = match connected {
            Ok(connection) => {
                shared.failures.store(0, Ordering::SeqCst);
                run_session(&shared, &config, connection, &cancel).await
            }
            Err(err) => {
                warn!(error = %err, "push channel connection failed");
                shared.dispatch(&TransportEvent::Error {
                    message: err.to_string(),
                });
                SessionEnd::Closed {
                    code: Some(ABNORMAL_CLOSE),
                    reason: err.to_string(),
                }
            }
        };

        let SessionEnd::Closed { code, reason } = end else {
            return;
        };

        shared.outbound().take();
        shared.set_status(ConnectionStatus::Disconnected);
        shared.dispatch(&TransportEvent::Close {
            code,
            reason: reason.clone(),
        });

        if matches!(code, Some(NORMAL_CLOSE | GOING_AWAY)) {
            info!(?code, %reason, "push channel closed normally");
            return;
        }
        if !config.reconnect_enabled {
            info!(?code, %reason, "push channel closed; reconnect disabled");
            return;
        }

        let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= config.max_reconnect_attempts {
            let err = ClientError::ReconnectExhausted { failures };
            error!(error = %err, "push channel unavailable");
            shared.dispatch(&TransportEvent::ReconnectFailed { failures });
            return;
        }

        info!(
            failures,
            max = config.max_reconnect_attempts,
            delay_ms = config.reconnect_interval.as_millis() as u64,
            "push channel closed abnormally; reconnecting"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = time::sleep(config.reconnect_interval) => {}
        }
    }
}

async fn run_session(
    shared: &Shared,
    config: &TransportConfig,
    mut connection: Box<dyn Connection>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound() = Some(outbound_tx);
    shared.set_status(ConnectionStatus::Connected);
    info!("push channel open");
    shared.dispatch(&TransportEvent::Open);

    let mut heartbeat = time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = heartbeat.tick() => Wake::Heartbeat,
            Some(text) = outbound_rx.recv() => Wake::Outbound(text),
            frame = connection.recv() => Wake::Inbound(frame),
        };

        let outgoing = match wake {
            Wake::Cancelled => {
                if let Err(err) = connection.close().await {
                    debug!(error = %err, "failed to close push channel cleanly");
                }
                shared.dispatch(&TransportEvent::Close {
                    code: Some(NORMAL_CLOSE),
                    reason: "closed by client".into(),
                });
                return SessionEnd::Cancelled;
            }
            Wake::Heartbeat => match Envelope::new(ws::PING, Value::Null).to_json_string() {
                Ok(ping) => ping,
                Err(err) => {
                    warn!(error = %err, "failed to encode heartbeat");
                    continue;
                }
            },
            Wake::Outbound(text) => text,
            Wake::Inbound(Some(Ok(Frame::Text(text)))) => {
                shared.handle_text(&text);
                continue;
            }
            Wake::Inbound(Some(Ok(Frame::Closed { code, reason }))) => {
                return SessionEnd::Closed { code, reason };
            }
            Wake::Inbound(Some(Err(err))) => {
                warn!(error = %err, "push channel read failed");
                shared.dispatch(&TransportEvent::Error {
                    message: err.to_string(),
                });
                return SessionEnd::Closed {
                    code: Some(ABNORMAL_CLOSE),
                    reason: err.to_string(),
                };
            }
            Wake::Inbound(None) => {
                return SessionEnd::Closed {
                    code: Some(ABNORMAL_CLOSE),
                    reason: "stream ended".into(),
                };
            }
        };

        if let Err(err) = connection.send(outgoing).await {
            warn!(error = %err, "push channel write failed");
            shared.dispatch(&TransportEvent::Error {
                message: err.to_string(),
            });
            return SessionEnd::Closed {
                code: Some(ABNORMAL_CLOSE),
                reason: err.to_string(),
            };
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::VecDeque,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use futures::future::BoxFuture;
    use reqwest::Url;
    use tokio::sync::mpsc;

    use super::{Connection, Connector, Frame};
    use crate::error::TransportError;

    /// Scripted outcome of one connect call.
    pub enum Script {
        Fail,
        /// Open a connection whose inbound frames are fed by the returned sender.
        Open(mpsc::UnboundedReceiver<Frame>),
    }

    /// Connector replaying scripted outcomes; fails once the script runs out.
    #[derive(Clone, Default)]
    pub struct MockConnector {
        scripts: Arc<Mutex<VecDeque<Script>>>,
        pub calls: Arc<AtomicUsize>,
        pub urls: Arc<Mutex<Vec<String>>>,
        pub sent: Arc<Mutex<Vec<String>>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a connection that opens; returns the feed for its inbound frames.
        pub fn push_open(&self) -> mpsc::UnboundedSender<Frame> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.scripts.lock().unwrap().push_back(Script::Open(rx));
            tx
        }

        pub fn push_fail(&self) {
            self.scripts.lock().unwrap().push_back(Script::Fail);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Connector for MockConnector {
        fn connect(
            &self,
            url: Url,
        ) -> BoxFuture<'static, Result<Box<dyn Connection>, TransportError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            let script = self.scripts.lock().unwrap().pop_front();
            let sent = self.sent.clone();
            Box::pin(async move {
                match script {
                    Some(Script::Open(inbound)) => {
                        Ok(Box::new(MockConnection { inbound, sent }) as Box<dyn Connection>)
                    }
                    Some(Script::Fail) | None => Err(TransportError::Connect {
                        url: url.to_string(),
                        message: "connection refused".into(),
                    }),
                }
            })
        }
    }

    struct MockConnection {
        inbound: mpsc::UnboundedReceiver<Frame>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl Connection for MockConnection {
        fn send(&mut self, text: String) -> BoxFuture<'_, Result<(), TransportError>> {
            self.sent.lock().unwrap().push(text);
            Box::pin(async { Ok(()) })
        }

        fn recv(&mut self) -> BoxFuture<'_, Option<Result<Frame, TransportError>>> {
            Box::pin(async move { self.inbound.recv().await.map(Ok) })
        }

        fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async { Ok(()) })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{testing::MockConnector, *};

    const ENDPOINT: &str = "ws://localhost:9001/ws";

    fn transport(connector: &MockConnector, config: TransportConfig) -> DuplexTransport {
        DuplexTransport::new(config, Arc::new(connector.clone()))
    }

    fn params() -> ConnectParams {
        ConnectParams {
            token: Some("tok".into()),
            activity_id: Some("42".into()),
        }
    }

    async fn wait_connected(transport: &DuplexTransport) {
        transport
            .watch_status()
            .wait_for(|status| *status == ConnectionStatus::Connected)
            .await
            .unwrap();
    }

    fn text(value: serde_json::Value) -> Frame {
        Frame::Text(value.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn typed_handlers_run_in_order_before_wildcard() {
        let connector = MockConnector::new();
        let feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();

        for (kind, label) in [
            (EventKind::Message, "wildcard"),
            (EventKind::GameStart, "first"),
            (EventKind::GameStart, "second"),
        ] {
            let tx = tx.clone();
            transport.subscribe(kind, move |_| {
                let _ = tx.send(label);
            });
        }

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        feed.send(text(json!({
            "type": "game_start",
            "payload": { "round": { "ID": 9, "status": 1, "endTimeMs": 30_000 } }
        })))
        .unwrap();

        assert_eq!(rx.recv().await, Some("first"));
        assert_eq!(rx.recv().await, Some("second"));
        assert_eq!(rx.recv().await, Some("wildcard"));

        let url = connector.urls.lock().unwrap()[0].clone();
        assert!(url.contains("token=tok"));
        assert!(url.contains("activityId=42"));
    }

    #[tokio::test(start_paused = true)]
    async fn pong_and_malformed_frames_never_reach_subscribers() {
        let connector = MockConnector::new();
        let feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        transport.subscribe(EventKind::Message, move |event| {
            if let TransportEvent::Message(envelope) = event {
                let _ = tx.send(envelope.kind.clone());
            }
        });

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        feed.send(text(json!({ "type": "pong" }))).unwrap();
        feed.send(Frame::Text("not json".into())).unwrap();
        feed.send(text(json!({ "type": "game_start", "payload": { "round": 5 } })))
            .unwrap();
        feed.send(text(json!({ "type": "danmaku", "payload": { "content": "hi" } })))
            .unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("danmaku"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn game_stop_without_payload_is_typed() {
        let connector = MockConnector::new();
        let feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(EventKind::GameStop, move |event| {
            let _ = tx.send(event.clone());
        });

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        feed.send(text(json!({ "type": "game_stop" }))).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::GameStop(GameStopPayload::default()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_an_open_connection() {
        let connector = MockConnector::new();
        let _feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());

        assert!(!transport.send(ws::JOIN_ROOM, json!({ "activityId": "42" })));

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        assert!(transport.send(ws::JOIN_ROOM, json!({ "activityId": "42" })));

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            connector.sent(),
            vec![r#"{"type":"join_room","payload":{"activityId":"42"}}"#.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_on_interval() {
        let connector = MockConnector::new();
        let _feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;

        time::sleep(Duration::from_secs(29)).await;
        assert!(connector.sent().is_empty());

        time::sleep(Duration::from_secs(32)).await;
        assert_eq!(
            connector.sent(),
            vec![r#"{"type":"ping","payload":{}}"#.to_string(); 2]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_stop_after_the_configured_bound() {
        let connector = MockConnector::new();
        let transport = transport(
            &connector,
            TransportConfig {
                max_reconnect_attempts: 3,
                ..TransportConfig::default()
            },
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(EventKind::ReconnectFailed, move |event| {
            let _ = tx.send(event.clone());
        });

        transport.connect(ENDPOINT, &params()).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::ReconnectFailed { failures: 3 })
        );
        assert_eq!(connector.calls(), 3);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls(), 3);
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn open_resets_the_failure_counter() {
        let connector = MockConnector::new();
        connector.push_fail();
        connector.push_fail();
        let _feed = connector.push_open();
        let transport = transport(
            &connector,
            TransportConfig {
                max_reconnect_attempts: 3,
                ..TransportConfig::default()
            },
        );

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        assert_eq!(transport.consecutive_failures(), 0);
        assert_eq!(connector.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_reports_an_error_then_an_abnormal_close() {
        let connector = MockConnector::new();
        connector.push_fail();
        let _feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        for kind in [EventKind::Error, EventKind::Close] {
            let tx = tx.clone();
            transport.subscribe(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        transport.connect(ENDPOINT, &params()).unwrap();

        match rx.recv().await {
            Some(TransportEvent::Error { message }) => {
                assert!(message.contains("connection refused"), "{message}");
            }
            other => panic!("expected an error event, got {other:?}"),
        }
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Close {
                code: Some(ABNORMAL_CLOSE),
                ..
            })
        ));
        assert_eq!(transport.consecutive_failures(), 1);

        wait_connected(&transport).await;
        assert_eq!(connector.calls(), 2);
        assert_eq!(transport.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn normal_close_does_not_reconnect() {
        let connector = MockConnector::new();
        let feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(EventKind::Close, move |event| {
            let _ = tx.send(event.clone());
        });

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        feed.send(Frame::Closed {
            code: Some(NORMAL_CLOSE),
            reason: "bye".into(),
        })
        .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Close {
                code: Some(NORMAL_CLOSE),
                reason: "bye".into()
            })
        );
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_cancels_pending_reconnect() {
        let connector = MockConnector::new();
        let feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(EventKind::Close, move |event| {
            let _ = tx.send(event.clone());
        });

        transport.connect(ENDPOINT, &params()).unwrap();
        wait_connected(&transport).await;
        feed.send(Frame::Closed {
            code: Some(ABNORMAL_CLOSE),
            reason: "network lost".into(),
        })
        .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(TransportEvent::Close {
                code: Some(ABNORMAL_CLOSE),
                ..
            })
        ));

        transport.close();
        transport.close();
        time::sleep(Duration::from_secs(30)).await;

        assert_eq!(connector.calls(), 1);
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        assert!(!transport.send(ws::PING, Value::Null));
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_handlers_are_skipped() {
        let connector = MockConnector::new();
        let _feed = connector.push_open();
        let transport = transport(&connector, TransportConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();

        let dropped = {
            let tx = tx.clone();
            transport.subscribe(EventKind::Open, move |_| {
                let _ = tx.send("dropped");
            })
        };
        transport.subscribe(EventKind::Open, move |_| {
            let _ = tx.send("kept");
        });
        assert!(transport.unsubscribe(EventKind::Open, dropped));
        assert!(!transport.unsubscribe(EventKind::Open, dropped));

        transport.connect(ENDPOINT, &params()).unwrap();
        assert_eq!(rx.recv().await, Some("kept"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let connector = MockConnector::new();
        let transport = transport(&connector, TransportConfig::default());
        assert!(matches!(
            transport.connect("not a url", &ConnectParams::default()),
            Err(TransportError::InvalidEndpoint { .. })
        ));
    }
}
