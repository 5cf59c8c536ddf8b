use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use dashmap::DashMap;
use futures::{future::BoxFuture, StreamExt};
use pagescope_core_types::TargetId;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::TransportError;
use crate::metrics;
use crate::util::extract_ws_url;

/// One asynchronous protocol event as it arrives off the wire.
#[derive(Clone, Debug)]
pub struct ProtocolEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is routed: the browser-level connection or one flat
/// per-target session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Handle returned by [`DebugTransport::on`]; used to unregister.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(pub u64);

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Command/event channel to inspected pages.
///
/// Attach and detach are idempotent. Events are delivered only to listeners
/// registered for the target the event originated from. When the host ends a
/// session from the outside (devtools opened, tab closed), the transport
/// drops all bookkeeping for that target and announces it on
/// [`DebugTransport::detach_events`] so attachment state never drifts.
#[async_trait]
pub trait DebugTransport: Send + Sync {
    async fn attach(&self, target: &TargetId) -> Result<(), TransportError>;
    async fn detach(&self, target: &TargetId) -> Result<(), TransportError>;
    fn is_attached(&self, target: &TargetId) -> bool;
    async fn send(
        &self,
        target: &TargetId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError>;
    /// Issue a command on the browser-level connection (no session).
    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, TransportError>;
    fn on(&self, target: &TargetId, event: &str, handler: EventHandler) -> ListenerId;
    fn off(&self, target: &TargetId, listener: ListenerId);
    /// Announces targets whose session ended outside this module's control.
    fn detach_events(&self) -> broadcast::Receiver<TargetId>;
}

struct Listener {
    id: ListenerId,
    event: String,
    handler: EventHandler,
}

/// Session/listener bookkeeping shared between callers and the event pump.
struct Shared {
    attached: DashMap<TargetId, String>,
    sessions: DashMap<String, TargetId>,
    listeners: DashMap<TargetId, Vec<Listener>>,
    next_listener: AtomicU64,
    detach_tx: broadcast::Sender<TargetId>,
}

impl Shared {
    fn new() -> Self {
        let (detach_tx, _) = broadcast::channel(32);
        Self {
            attached: DashMap::new(),
            sessions: DashMap::new(),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            detach_tx,
        }
    }

    fn route_event(&self, event: ProtocolEvent) {
        if event.method == "Target.detachedFromTarget" {
            if let Some(session_id) = event
                .params
                .get("sessionId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
            {
                if let Some(target) = self.drop_session(&session_id) {
                    warn!(
                        target: "cdp-bridge",
                        target_id = %target,
                        "debug session ended by host"
                    );
                    let _ = self.detach_tx.send(target);
                }
            }
            return;
        }

        let Some(session_id) = event.session_id.as_deref() else {
            debug!(target: "cdp-bridge", method = %event.method, "unrouted browser-level event");
            return;
        };
        let Some(target) = self.sessions.get(session_id).map(|e| e.value().clone()) else {
            return;
        };
        if let Some(listeners) = self.listeners.get(&target) {
            for listener in listeners.iter().filter(|l| l.event == event.method) {
                (listener.handler)(&event.params);
                metrics::record_event_routed();
            }
        }
    }

    /// Remove all per-target state for one session id. Returns the target it
    /// belonged to, if any.
    fn drop_session(&self, session_id: &str) -> Option<TargetId> {
        let (_, target) = self.sessions.remove(session_id)?;
        self.attached.remove(&target);
        self.listeners.remove(&target);
        Some(target)
    }

    /// The connection died underneath us: every session died with it.
    fn reset_all(&self) {
        let targets: Vec<TargetId> = self.attached.iter().map(|e| e.key().clone()).collect();
        self.attached.clear();
        self.sessions.clear();
        self.listeners.clear();
        for target in targets {
            let _ = self.detach_tx.send(target);
        }
    }
}

type RuntimeFactory = Arc<
    dyn Fn(BridgeConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, TransportError>>
        + Send
        + Sync,
>;

/// Transport over one browser-level DevTools websocket, with flat sessions
/// created per attached target.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: BridgeConfig,
    state: Arc<OnceCell<Mutex<Option<Arc<RuntimeState>>>>>,
    factory: RuntimeFactory,
    shared: Arc<Shared>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl ChromiumTransport {
    pub fn new(cfg: BridgeConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: BridgeConfig| {
            Box::pin(async move {
                let state = RuntimeState::start(cfg).await?;
                Ok(Arc::new(state))
            })
        });

        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
            shared: Arc::new(Shared::new()),
            pump: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Establish the browser connection and start routing incoming events.
    pub async fn start(&self) -> Result<(), TransportError> {
        self.runtime().await?;

        let mut pump = self.pump.lock().await;
        if pump.is_some() {
            return Ok(());
        }

        let this = self.clone();
        *pump = Some(tokio::spawn(async move {
            this.pump_events().await;
        }));
        Ok(())
    }

    /// Stop the event pump and tear down the connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        if let Some(cell) = self.state.get() {
            cell.lock().await.take();
        }
        self.shared.reset_all();
    }

    async fn pump_events(&self) {
        loop {
            let runtime = match self.runtime().await {
                Ok(rt) => rt,
                Err(err) => {
                    warn!(target: "cdp-bridge", ?err, "event pump stopping: transport not ready");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    event = runtime.next_event() => match event {
                        Some(event) => self.shared.route_event(event),
                        None => break,
                    },
                }
            }

            // Connection ended; drop every session with it and let the next
            // runtime() call reconnect.
            self.shared.reset_all();
            if self.shutdown.is_cancelled() {
                return;
            }
        }
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, TransportError> {
        let cell = self.state.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
        }

        let runtime = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(runtime.clone());
        Ok(runtime)
    }

    #[cfg(test)]
    fn with_factory(cfg: BridgeConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
            shared: Arc::new(Shared::new()),
            pump: Arc::new(Mutex::new(None)),
            shutdown: CancellationToken::new(),
        }
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let runtime = self.runtime().await?;
        let deadline = Duration::from_millis(self.cfg.default_deadline_ms);
        metrics::record_command();
        match runtime.send_internal(target, method, params, deadline).await {
            Ok(value) => Ok(value),
            Err(err) => {
                metrics::record_command_error();
                Err(err)
            }
        }
    }
}

#[async_trait]
impl DebugTransport for ChromiumTransport {
    async fn attach(&self, target: &TargetId) -> Result<(), TransportError> {
        if self.shared.attached.contains_key(target) {
            return Ok(());
        }

        let result = self
            .send_browser(
                "Target.attachToTarget",
                json!({ "targetId": target.0, "flatten": true }),
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TransportError::protocol("Target.attachToTarget missing sessionId"))?
            .to_string();

        self.shared
            .attached
            .insert(target.clone(), session_id.clone());
        self.shared.sessions.insert(session_id, target.clone());
        metrics::record_attach();
        info!(target: "cdp-bridge", target_id = %target, "debug session attached");
        Ok(())
    }

    async fn detach(&self, target: &TargetId) -> Result<(), TransportError> {
        let Some((_, session_id)) = self.shared.attached.remove(target) else {
            return Ok(());
        };
        self.shared.sessions.remove(&session_id);

        let result = self
            .send_browser(
                "Target.detachFromTarget",
                json!({ "sessionId": session_id }),
            )
            .await;
        match result {
            Ok(_) => {}
            Err(err) if err.is_not_attached() => {}
            Err(err) => return Err(err),
        }
        metrics::record_detach();
        info!(target: "cdp-bridge", target_id = %target, "debug session detached");
        Ok(())
    }

    fn is_attached(&self, target: &TargetId) -> bool {
        self.shared.attached.contains_key(target)
    }

    async fn send(
        &self,
        target: &TargetId,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let session_id = self
            .shared
            .attached
            .get(target)
            .map(|e| e.value().clone())
            .ok_or_else(|| TransportError::NotAttached(target.0.clone()))?;
        self.send_internal(CommandTarget::Session(session_id), method, params)
            .await
    }

    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.send_internal(CommandTarget::Browser, method, params)
            .await
    }

    fn on(&self, target: &TargetId, event: &str, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        self.shared
            .listeners
            .entry(target.clone())
            .or_default()
            .push(Listener {
                id,
                event: event.to_string(),
                handler,
            });
        id
    }

    fn off(&self, target: &TargetId, listener: ListenerId) {
        if let Some(mut entry) = self.shared.listeners.get_mut(target) {
            entry.retain(|l| l.id != listener);
        }
    }

    fn detach_events(&self) -> broadcast::Receiver<TargetId> {
        self.shared.detach_tx.subscribe()
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, TransportError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<ProtocolEvent>>,
    loop_task: JoinHandle<()>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: BridgeConfig) -> Result<Self, TransportError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            Self::launch_browser(browser_cfg).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| TransportError::io(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-bridge", ?err, "transport loop terminated with error");
            }
        });

        info!(target: "cdp-bridge", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let loop_task = tokio::spawn(async move {
            futures::future::pending::<()>().await;
            loop_alive.store(false, Ordering::Relaxed);
        });

        (
            Arc::new(Self {
                command_tx,
                events_rx: Mutex::new(events_rx),
                loop_task,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, TransportError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|_| TransportError::ChannelClosed)?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => Err(TransportError::Timeout {
                method: method.to_string(),
            }),
        }
    }

    async fn next_event(&self) -> Option<ProtocolEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn browser_config(cfg: &BridgeConfig) -> Result<BrowserConfig, TransportError> {
        if cfg.websocket_url.is_some() {
            return Err(TransportError::Launch(
                "browser_config requested while websocket_url present".into(),
            ));
        }

        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(TransportError::Launch(format!(
                "chrome executable not found at {} (set PAGESCOPE_CHROME to the full path)",
                cfg.executable.display()
            )));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                TransportError::Launch(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?;
            cwd.join(&cfg.user_data_dir)
        };

        fs::create_dir_all(&profile_dir).map_err(|err| {
            TransportError::Launch(format!("failed to ensure user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_secs(20));

        if !cfg.headless {
            builder = builder.with_head();
        }

        if std::env::var("PAGESCOPE_DISABLE_SANDBOX")
            .map(|v| v != "0" && v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-prompt-on-repost",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| TransportError::Launch(format!("browser config error: {err}")))
    }

    async fn launch_browser(
        config: BrowserConfig,
    ) -> Result<(Option<Child>, String), TransportError> {
        let mut child = config
            .launch()
            .map_err(|err| TransportError::Launch(format!("failed to launch chromium: {err}")))?;

        let ws_url = extract_ws_url(&mut child)
            .await
            .map_err(|err| TransportError::Launch(err.to_string()))?;

        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        mut event_tx: mpsc::Sender<ProtocolEvent>,
    ) -> Result<(), TransportError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, TransportError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &mut event_tx).await {
                                warn!(target: "cdp-bridge", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let mapped = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(mapped.clone()));
                            }
                            return Err(mapped);
                        }
                        None => {
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(TransportError::ChannelClosed));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, TransportError>>>,
    ) -> Result<(), TransportError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let mapped = TransportError::io(err.to_string());
                let _ = cmd.responder.send(Err(mapped.clone()));
                Err(mapped)
            }
        }
    }

    fn handle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, TransportError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mut mpsc::Sender<ProtocolEvent>,
    ) -> Result<(), TransportError> {
        let raw: CdpJsonEventMessage = event
            .try_into()
            .map_err(|err| TransportError::io(format!("failed to decode cdp event: {err}")))?;

        let payload = ProtocolEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| TransportError::io(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, TransportError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(TransportError::Protocol {
                message: format!("cdp error {}: {}", error.code, error.message),
            })
        } else {
            Err(TransportError::protocol("empty cdp response"))
        }
    }

    fn map_cdp_error(err: CdpError) -> TransportError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => TransportError::Timeout { method: hint },
            _ => TransportError::io(hint),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-bridge", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-bridge", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}
