//! C11: the public facade. Owns every other component and exposes the
//! operations spec §6 lists ("Public operations").
//!
//! Grounded on `calimero-client/src/client.rs` (a facade owning connection
//! state plus storage/auth, exposing `async` methods that hide a request/
//! response round trip) generalized from that crate's one-shot HTTP calls to
//! a long-lived, single-threaded engine task per spec §5 ("the core runs on
//! one event loop thread... no internal locking"). `Context` itself is just
//! a cheap, `Clone`-able handle to an `mpsc` channel; all mutable state
//! (cache, registries, connection machine) lives inside the `Engine` task
//! spawned by `Context::new`, so two clones of the same `Context` never race
//! on the tree — every operation is a message the engine processes one at a
//! time, in the order it arrives, which is what gives spec §5's ordering
//! guarantee (i) ("outbound request order matches call order") for free.

use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::cache::Cache;
use crate::codec::{self, Action, Msg, ResponseStatus};
use crate::config::ContextConfig;
use crate::connection::{Command, ConnectionEvent, ConnectionMachine, ConnectionState};
use crate::dispatch::Dispatcher;
use crate::error::WebcomError;
use crate::path::Path;
use crate::pushid::PushIdGenerator;
use crate::reactor::{Reactor, TimerHandle, TokioReactor};
use crate::registry::listen::{ListenCommand, ListenRegistry};
use crate::registry::on::{Callback, EventKind, OnRegistry, SubscriptionId};
use crate::registry::request::{Completion, RequestRegistry};
use crate::transport::{Transport, WebcomTransport};
use crate::tree::Node;

/// A handle to a running datasync engine. Cheap to clone; every clone talks
/// to the same background task.
#[derive(Clone)]
pub struct Context {
    cmd_tx: mpsc::UnboundedSender<EngineCommand>,
}

impl Context {
    /// Creates a context and immediately starts connecting, using the
    /// default `tokio-tungstenite` transport and `tokio::time` reactor.
    pub fn new(config: ContextConfig) -> Self {
        Self::with_transport(config, Box::new(WebcomTransport::new()), Box::new(TokioReactor))
    }

    /// Creates a context over a caller-supplied `Transport`/`Reactor` pair —
    /// the seam spec §9 asks for so tests can drive the engine without a
    /// real socket.
    pub fn with_transport(
        config: ContextConfig,
        transport: Box<dyn Transport>,
        reactor: Box<dyn Reactor>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let engine = Engine::new(config, transport, reactor, cmd_rx);
        tokio::spawn(engine.run());
        Self { cmd_tx }
    }

    pub async fn put(&self, path: &str, data: Json) -> Result<(), WebcomError> {
        let path = Path::parse(path)?;
        self.send(EngineCommand::Put {
            path,
            data,
            completion: None,
        })
    }

    /// As [`Context::put`], but resolves once the server has acknowledged
    /// the write (spec's `on_complete` callback, modeled as a future here).
    pub async fn put_and_confirm(&self, path: &str, data: Json) -> Result<Option<Json>, WebcomError> {
        let path = Path::parse(path)?;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Put {
            path,
            data,
            completion: Some(reply_completion(tx)),
        })?;
        await_completion(rx).await
    }

    pub async fn merge(&self, path: &str, data: Json) -> Result<(), WebcomError> {
        let path = Path::parse(path)?;
        self.send(EngineCommand::Merge {
            path,
            data,
            completion: None,
        })
    }

    pub async fn merge_and_confirm(&self, path: &str, data: Json) -> Result<Option<Json>, WebcomError> {
        let path = Path::parse(path)?;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Merge {
            path,
            data,
            completion: Some(reply_completion(tx)),
        })?;
        await_completion(rx).await
    }

    /// Mints a push key under `path` and writes `data` there. Returns the
    /// 20-char key (spec §6: `datasync_push(path, json) -> push_id`).
    pub async fn push(&self, path: &str, data: Json) -> Result<String, WebcomError> {
        let path = Path::parse(path)?;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Push {
            path,
            data,
            completion: None,
            reply: tx,
        })?;
        rx.await.map_err(|_| WebcomError::ContextClosed)
    }

    /// Mints a push key without writing anything (spec §6: `get_push_id()`).
    pub async fn push_id(&self) -> Result<String, WebcomError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::PushId { reply: tx })?;
        rx.await.map_err(|_| WebcomError::ContextClosed)
    }

    pub async fn on_value(
        &self,
        path: &str,
        callback: impl FnMut(Json) + Send + 'static,
    ) -> Result<SubscriptionId, WebcomError> {
        self.on(path, Callback::Value(Box::new(callback))).await
    }

    pub async fn on_child_added(
        &self,
        path: &str,
        callback: impl FnMut(Json, Option<String>) + Send + 'static,
    ) -> Result<SubscriptionId, WebcomError> {
        self.on(path, Callback::ChildAdded(Box::new(callback))).await
    }

    pub async fn on_child_changed(
        &self,
        path: &str,
        callback: impl FnMut(Json, String) + Send + 'static,
    ) -> Result<SubscriptionId, WebcomError> {
        self.on(path, Callback::ChildChanged(Box::new(callback))).await
    }

    pub async fn on_child_removed(
        &self,
        path: &str,
        callback: impl FnMut(Json, String) + Send + 'static,
    ) -> Result<SubscriptionId, WebcomError> {
        self.on(path, Callback::ChildRemoved(Box::new(callback))).await
    }

    async fn on(&self, path: &str, callback: Callback) -> Result<SubscriptionId, WebcomError> {
        let path = Path::parse(path)?;
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::On {
            path,
            callback,
            reply: tx,
        })?;
        rx.await.map_err(|_| WebcomError::ContextClosed)
    }

    /// Removes every subscription at `path` (spec §6: `off_path`).
    pub async fn off_path(&self, path: &str) -> Result<(), WebcomError> {
        self.off(path, None, None)
    }

    /// Removes subscriptions at `path` matching `event` (spec §6: `off_path_type`).
    pub async fn off_path_type(&self, path: &str, event: EventKind) -> Result<(), WebcomError> {
        self.off(path, Some(event), None)
    }

    /// Removes exactly the one subscription `id` at `path` (spec §6: `off_path_type_cb`).
    pub async fn off_path_type_cb(
        &self,
        path: &str,
        event: EventKind,
        id: SubscriptionId,
    ) -> Result<(), WebcomError> {
        self.off(path, Some(event), Some(id))
    }

    fn off(&self, path: &str, event: Option<EventKind>, id: Option<SubscriptionId>) -> Result<(), WebcomError> {
        let path = Path::parse(path)?;
        self.send(EngineCommand::Off { path, event, id })
    }

    /// Forces a reconnect attempt (spec §6: `context_reconnect()`). A no-op
    /// if the engine is already connecting or ready.
    pub async fn reconnect(&self) -> Result<(), WebcomError> {
        self.send(EngineCommand::Reconnect)
    }

    /// Estimated server time (spec §4.10: `local_time + offset`).
    pub async fn server_time(&self) -> Result<i64, WebcomError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::ServerTime { reply: tx })?;
        rx.await.map_err(|_| WebcomError::ContextClosed)
    }

    /// Closes the context: cancels timers, fails every pending request with
    /// `ContextClosed`, and stops the engine task (spec §6: `context_close()`).
    pub async fn close(&self) -> Result<(), WebcomError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::Close { reply: tx })?;
        let _ = rx.await;
        Ok(())
    }

    fn send(&self, cmd: EngineCommand) -> Result<(), WebcomError> {
        self.cmd_tx.send(cmd).map_err(|_| WebcomError::ContextClosed)
    }
}

fn reply_completion(tx: oneshot::Sender<Result<Option<Json>, WebcomError>>) -> Completion {
    Box::new(move |result| {
        let _ = tx.send(result);
    })
}

async fn await_completion(
    rx: oneshot::Receiver<Result<Option<Json>, WebcomError>>,
) -> Result<Option<Json>, WebcomError> {
    rx.await.map_err(|_| WebcomError::ContextClosed)?
}

/// Commands the facade forwards to the engine task. Kept separate from
/// `connection::Command` — those are the connection machine's internal
/// effects; these are what a user of the library asked for.
enum EngineCommand {
    Put {
        path: Path,
        data: Json,
        completion: Option<Completion>,
    },
    Merge {
        path: Path,
        data: Json,
        completion: Option<Completion>,
    },
    Push {
        path: Path,
        data: Json,
        completion: Option<Completion>,
        reply: oneshot::Sender<String>,
    },
    PushId {
        reply: oneshot::Sender<String>,
    },
    On {
        path: Path,
        callback: Callback,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Off {
        path: Path,
        event: Option<EventKind>,
        id: Option<SubscriptionId>,
    },
    Reconnect,
    ServerTime {
        reply: oneshot::Sender<i64>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

enum TimerKind {
    Keepalive,
    Backoff,
}

/// The single-threaded engine (spec §5). Everything here runs on one task;
/// no field is ever accessed from anywhere else.
struct Engine {
    config: ContextConfig,
    cache: Cache,
    on: OnRegistry,
    listens: ListenRegistry,
    requests: RequestRegistry,
    dispatcher: Dispatcher,
    pushid: PushIdGenerator,
    conn: ConnectionMachine,
    transport: Box<dyn Transport>,
    reactor: Box<dyn Reactor>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    /// Request ids sent as `listen`, not yet acknowledged — tracked
    /// separately from `RequestRegistry` because these have no user
    /// completion, only a `ListenRegistry::mark_active` side effect.
    pending_listens: HashMap<u64, Path>,
    /// Outbound frames built while not `Ready`, flushed in order on the
    /// next handshake.
    queued_frames: VecDeque<String>,
    server_offset_ms: i64,
    timer: Option<(TimerKind, Box<dyn TimerHandle>)>,
    rng: rand::rngs::StdRng,
    closed: bool,
}

impl Engine {
    fn new(
        config: ContextConfig,
        transport: Box<dyn Transport>,
        reactor: Box<dyn Reactor>,
        cmd_rx: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Self {
        use rand::SeedableRng;
        Self {
            conn: ConnectionMachine::new(config.backoff),
            config,
            cache: Cache::new(),
            on: OnRegistry::new(),
            listens: ListenRegistry::new(),
            requests: RequestRegistry::new(),
            dispatcher: Dispatcher::new(),
            pushid: PushIdGenerator::new(),
            transport,
            reactor,
            cmd_rx,
            pending_listens: HashMap::new(),
            queued_frames: VecDeque::new(),
            server_offset_ms: 0,
            timer: None,
            rng: rand::rngs::StdRng::from_rng(rand::thread_rng()).expect("system rng"),
            closed: false,
        }
    }

    #[instrument(skip(self), fields(host = %self.config.host, application = %self.config.application))]
    async fn run(mut self) {
        info!("datasync engine starting");
        let initial = self.conn.on_event(ConnectionEvent::Open, &mut self.rng);
        self.drain(initial).await;

        while !self.closed {
            let recv_active = matches!(
                self.conn.state(),
                ConnectionState::Connecting | ConnectionState::Handshaking | ConnectionState::Ready
            );

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_user_command(c).await,
                        None => break,
                    }
                }
                frame = recv_or_pending(self.transport.as_mut(), recv_active) => {
                    self.handle_incoming(frame).await;
                }
                fired = wait_timer(&mut self.timer) => {
                    if let Some(kind) = fired {
                        let event = match kind {
                            TimerKind::Keepalive => ConnectionEvent::KeepaliveTimerFired,
                            TimerKind::Backoff => ConnectionEvent::BackoffTimerFired,
                        };
                        self.feed(event).await;
                    }
                }
            }
        }
        info!("datasync engine stopped");
    }

    async fn feed(&mut self, event: ConnectionEvent) {
        let cmds = self.conn.on_event(event, &mut self.rng);
        self.drain(cmds).await;
    }

    async fn drain(&mut self, cmds: Vec<Command>) {
        let mut queue: VecDeque<Command> = cmds.into();
        while let Some(cmd) = queue.pop_front() {
            if let Some(event) = self.execute(cmd).await {
                queue.extend(self.conn.on_event(event, &mut self.rng));
            }
        }
    }

    async fn execute(&mut self, cmd: Command) -> Option<ConnectionEvent> {
        match cmd {
            Command::OpenSocket => {
                let url = self.config.endpoint_url();
                match self.transport.connect(&url).await {
                    Ok(()) => Some(ConnectionEvent::SocketUp),
                    Err(e) => {
                        warn!(error = %e, "transport connect failed");
                        Some(ConnectionEvent::SocketError(e.to_string()))
                    }
                }
            }
            Command::SendFrame(frame) => {
                if let Err(e) = self.transport.send(frame).await {
                    return Some(ConnectionEvent::SocketError(e.to_string()));
                }
                None
            }
            Command::StartKeepaliveTimer => {
                self.timer = Some((TimerKind::Keepalive, self.reactor.set_timer(self.config.keepalive)));
                None
            }
            Command::StartBackoffTimer(delay) => {
                self.timer = Some((TimerKind::Backoff, self.reactor.set_timer(delay)));
                None
            }
            Command::CancelTimers => {
                self.timer = None;
                None
            }
            Command::CloseSocket => {
                self.transport.close().await;
                None
            }
            Command::ReplayListensAndFlushQueue => {
                let relisten = self.listens.rebuild_on_reconnect();
                for cmd in relisten {
                    self.send_listen_command(cmd).await;
                }
                let queued: Vec<String> = self.queued_frames.drain(..).collect();
                for frame in queued {
                    if let Err(e) = self.transport.send(frame).await {
                        return Some(ConnectionEvent::SocketError(e.to_string()));
                    }
                }
                None
            }
            Command::FailAllPending(reason) => {
                self.requests.fail_all(WebcomError::Transport(reason));
                self.pending_listens.clear();
                None
            }
            Command::RecordServerOffset { server_time_ms } => {
                self.server_offset_ms = server_time_ms - local_now_ms();
                None
            }
            Command::Reconnect { host } => {
                self.config.host = host;
                let url = self.config.endpoint_url();
                match self.transport.connect(&url).await {
                    Ok(()) => Some(ConnectionEvent::SocketUp),
                    Err(e) => Some(ConnectionEvent::SocketError(e.to_string())),
                }
            }
        }
    }

    async fn send_listen_command(&mut self, cmd: ListenCommand) {
        match cmd {
            ListenCommand::SendListen(path) => {
                let id = self.requests.allocate();
                self.pending_listens.insert(id, path.clone());
                let frame = encode_request(id, Action::Listen, &path, None);
                self.send_or_queue(frame).await;
            }
            ListenCommand::SendUnlisten(path) => {
                let id = self.requests.allocate();
                let frame = encode_request(id, Action::Unlisten, &path, None);
                self.send_or_queue(frame).await;
            }
        }
    }

    async fn send_or_queue(&mut self, frame: String) {
        if self.conn.state() == ConnectionState::Ready {
            if let Err(e) = self.transport.send(frame).await {
                self.feed(ConnectionEvent::SocketError(e.to_string())).await;
            }
        } else {
            self.queued_frames.push_back(frame);
        }
    }

    async fn handle_incoming(&mut self, frame: Result<Option<String>, WebcomError>) {
        match frame {
            Ok(Some(text)) => match codec::decode(&text) {
                Ok(msg) => self.handle_msg(msg).await,
                Err(e) => {
                    warn!(error = %e, "dropping malformed frame, resetting connection");
                    self.feed(ConnectionEvent::SocketError(e.to_string())).await;
                }
            },
            Ok(None) => self.feed(ConnectionEvent::SocketClosed).await,
            Err(e) => self.feed(ConnectionEvent::SocketError(e.to_string())).await,
        }
    }

    async fn handle_msg(&mut self, msg: Msg) {
        match msg {
            Msg::Control(_) => self.feed(ConnectionEvent::FrameReceived(msg)).await,
            Msg::Response { r, status, data } => {
                if let Some(path) = self.pending_listens.remove(&r) {
                    if status == ResponseStatus::Ok {
                        self.listens.mark_active(&path);
                    }
                } else if !self.requests.complete(r, status, data) {
                    warn!(request_id = r, "response for unknown request id, dropped");
                }
            }
            Msg::Notify { action, path, data } => {
                let node = Node::from_json(&data);
                let mutations = match action {
                    Action::Merge => self.cache.merge(&path, node),
                    _ => self.cache.set(&path, node),
                };
                self.dispatcher.dispatch(&mut self.on, &self.cache, mutations);
            }
            Msg::Request { .. } => {
                warn!("ignoring server-originated request-shaped frame");
            }
        }
    }

    async fn handle_user_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Put {
                path,
                data,
                completion,
            } => self.send_write(Action::Put, path, data, completion).await,
            EngineCommand::Merge {
                path,
                data,
                completion,
            } => self.send_write(Action::Merge, path, data, completion).await,
            EngineCommand::Push {
                path,
                data,
                completion,
                reply,
            } => {
                let now = (local_now_ms() + self.server_offset_ms).max(0) as u64;
                let key = self.pushid.next(now);
                let _ = reply.send(key.clone());
                let full_path = path.child(key);
                self.send_write(Action::Push, full_path, data, completion).await;
            }
            EngineCommand::PushId { reply } => {
                let now = (local_now_ms() + self.server_offset_ms).max(0) as u64;
                let _ = reply.send(self.pushid.next(now));
            }
            EngineCommand::On {
                path,
                callback,
                reply,
            } => {
                let (id, listen_cmd) = self.on.add(&mut self.listens, &self.cache, path, callback);
                if let Some(cmd) = listen_cmd {
                    self.send_listen_command(cmd).await;
                }
                let _ = reply.send(id);
            }
            EngineCommand::Off { path, event, id } => {
                let (_removed, unlisten_cmd) = self.on.remove(&mut self.listens, &path, event, id);
                if let Some(cmd) = unlisten_cmd {
                    self.send_listen_command(cmd).await;
                }
            }
            EngineCommand::Reconnect => match self.conn.state() {
                ConnectionState::Backoff => {
                    self.timer = None;
                    self.feed(ConnectionEvent::BackoffTimerFired).await;
                }
                ConnectionState::Idle => self.feed(ConnectionEvent::Open).await,
                _ => {}
            },
            EngineCommand::ServerTime { reply } => {
                let _ = reply.send(local_now_ms() + self.server_offset_ms);
            }
            EngineCommand::Close { reply } => {
                self.feed(ConnectionEvent::UserClose).await;
                self.closed = true;
                let _ = reply.send(());
            }
        }
    }

    async fn send_write(&mut self, action: Action, path: Path, data: Json, completion: Option<Completion>) {
        let id = self.requests.allocate();
        if let Some(c) = completion {
            self.requests.register(id, c);
        }
        let frame = encode_request(id, action, &path, Some(&data));
        self.send_or_queue(frame).await;
    }
}

fn encode_request(id: u64, action: Action, path: &Path, data: Option<&Json>) -> String {
    codec::encode(&Msg::Request {
        r: id,
        action,
        path: path.clone(),
        data: data.cloned(),
    })
    .unwrap_or_default()
}

fn local_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

async fn recv_or_pending(
    transport: &mut dyn Transport,
    active: bool,
) -> Result<Option<String>, WebcomError> {
    if active {
        transport.recv().await
    } else {
        std::future::pending().await
    }
}

async fn wait_timer(timer: &mut Option<(TimerKind, Box<dyn TimerHandle>)>) -> Option<TimerKind> {
    match timer.take() {
        Some((kind, handle)) => {
            handle.wait().await;
            Some(kind)
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::TokioReactor;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc as tmpsc;

    /// A fake transport: `connect` always succeeds, inbound frames are fed
    /// in from a channel, outbound frames are recorded for assertions.
    struct MockTransport {
        inbound: tmpsc::UnboundedReceiver<String>,
        outbound: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, _url: &str) -> Result<(), WebcomError> {
            Ok(())
        }
        async fn send(&mut self, text: String) -> Result<(), WebcomError> {
            self.outbound.lock().unwrap().push(text);
            Ok(())
        }
        async fn recv(&mut self) -> Result<Option<String>, WebcomError> {
            Ok(self.inbound.recv().await)
        }
        async fn close(&mut self) {}
    }

    fn handshake_frame() -> String {
        codec::encode(&Msg::Control(crate::codec::ControlMsg::Handshake {
            server_time_ms: 1_700_000_000_000,
            host: "h".into(),
            session: "s".into(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn value_subscription_fires_after_a_matching_notify_arrives() {
        let (inbound_tx, inbound_rx) = tmpsc::unbounded_channel();
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            inbound: inbound_rx,
            outbound: outbound.clone(),
        };
        let ctx = Context::with_transport(
            ContextConfig::new("h", 443, "app"),
            Box::new(transport),
            Box::new(TokioReactor),
        );

        inbound_tx.send(handshake_frame()).unwrap();
        // give the engine a turn to process the handshake
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        ctx.on_value("/x", move |v| seen2.lock().unwrap().push(v))
            .await
            .unwrap();

        let notify = codec::encode(&Msg::Notify {
            action: Action::Data,
            path: Path::parse("/x").unwrap(),
            data: serde_json::json!("hi"),
        })
        .unwrap();
        inbound_tx.send(notify).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![serde_json::json!("hi")]);
    }

    #[tokio::test]
    async fn close_fails_a_pending_put_confirmation() {
        let (_inbound_tx, inbound_rx) = tmpsc::unbounded_channel();
        let outbound = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            inbound: inbound_rx,
            outbound,
        };
        let ctx = Context::with_transport(
            ContextConfig::new("h", 443, "app"),
            Box::new(transport),
            Box::new(TokioReactor),
        );

        let ctx2 = ctx.clone();
        let put = tokio::spawn(async move { ctx2.put_and_confirm("/x", serde_json::json!(1)).await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        ctx.close().await.unwrap();

        let result = put.await.unwrap();
        assert!(matches!(result, Err(WebcomError::ContextClosed) | Err(WebcomError::Transport(_))));
    }
}
