//! The composition root of the control plane.
//!
//! [`ServiceController`] owns the session registry, request history, process
//! registry, scheduler, shell bridge, and status queue, and wires them to the
//! transport and security collaborators supplied by the host. Registry mutex
//! acquisition order is session, then process, then history; no code path
//! holds two registries at once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt as _;
use futures::future::BoxFuture;
use serde_json::Value;
use svc_control_core::{
    ClientRequest, ControlError, ServiceResponse, SessionId, SettingsStore, StatusConsumer,
    StatusLog, StatusQueue, StatusSink, UpdateKind,
    traits::{ClientHello, ClientPayload, Enableable, SecurityProvider, Transport},
};
use svc_control_process::{JobFn, ProcessRegistry, ProcessStateChanged, ScheduleSet, Scheduler};
use svc_control_session::{ClientSession, RequestHistory, RequestRecord, SessionRegistry};
use svc_control_shell::{ShellBridge, resolve_interpreter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands;
use crate::config::ControlConfig;

/// Dispatch context handed to a command handler.
#[derive(Clone)]
pub struct RequestContext {
    /// Snapshot of the originating session.
    pub sender: ClientSession,
    /// The parsed request.
    pub request: ClientRequest,
}

/// A command handler body: an async function over the controller and the
/// dispatch context.
pub type CommandFn = Arc<
    dyn Fn(Arc<ServiceController>, RequestContext) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// A registered command.
pub struct CommandHandler {
    pub name: String,
    pub description: String,
    /// Whether `Help` lists the command without `-advanced`.
    pub advertised: bool,
    pub(crate) run: CommandFn,
}

/// An operating-system process launched through `Start -system`.
pub(crate) struct SystemProcess {
    pub name: String,
    pub child: tokio::process::Child,
    pub started_at: DateTime<Utc>,
}

/// The embedded control plane.
///
/// Constructed once per hosting service; handed to the transport as an `Arc`.
pub struct ServiceController {
    pub(crate) config: ControlConfig,
    pub(crate) sessions: SessionRegistry,
    pub(crate) history: RequestHistory,
    pub(crate) processes: Arc<ProcessRegistry>,
    pub(crate) schedules: Arc<ScheduleSet>,
    scheduler: Arc<Scheduler>,
    pub(crate) bridge: ShellBridge,
    pub(crate) status: StatusQueue,
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) security: Arc<dyn SecurityProvider>,
    pub(crate) transport: Arc<dyn Transport>,
    handlers: Mutex<HashMap<String, Arc<CommandHandler>>>,
    system_processes: Mutex<Vec<SystemProcess>>,
    consumer: Mutex<Option<StatusConsumer>>,
    process_events: Mutex<Option<mpsc::UnboundedReceiver<ProcessStateChanged>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    enabled: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    pause_snapshot: Mutex<Option<Vec<bool>>>,
}

impl ServiceController {
    /// Assemble the control plane from its collaborators. The controller is
    /// inert until [`start`](Self::start) is called.
    #[must_use]
    pub fn new(
        config: ControlConfig,
        transport: Arc<dyn Transport>,
        security: Arc<dyn SecurityProvider>,
        settings: Arc<dyn SettingsStore>,
    ) -> Arc<Self> {
        let (status, consumer) = StatusQueue::new(
            config.max_status_updates_frequency,
            config.max_status_updates_length,
        );
        let (processes, process_events) = ProcessRegistry::new();
        let schedules = Arc::new(ScheduleSet::new());
        let scheduler = Scheduler::new(Arc::clone(&schedules), Arc::clone(&processes));
        let bridge = ShellBridge::new(
            resolve_interpreter(config.shell_program.as_deref()),
            config.telnet_session_password.clone(),
            status.clone(),
        );

        Arc::new(Self {
            sessions: SessionRegistry::new(),
            history: RequestHistory::new(config.request_history_limit),
            processes,
            schedules,
            scheduler,
            bridge,
            status,
            settings,
            security,
            transport,
            handlers: Mutex::new(HashMap::new()),
            system_processes: Mutex::new(Vec::new()),
            consumer: Mutex::new(Some(consumer)),
            process_events: Mutex::new(Some(process_events)),
            tasks: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(false),
            started_at: Mutex::new(None),
            pause_snapshot: Mutex::new(None),
            config,
        })
    }

    /// The hosting service's display name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Time since [`start`](Self::start), if started.
    #[must_use]
    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.started_at.lock().unwrap().map(|t| Utc::now() - t)
    }

    // ---- command registration ----------------------------------------------

    /// Register a command handler. Names are case-insensitive; a later
    /// registration replaces an earlier one with the same name.
    pub fn register_command(
        &self,
        name: &str,
        description: &str,
        run: CommandFn,
        advertised: bool,
    ) {
        self.handlers.lock().unwrap().insert(
            name.to_lowercase(),
            Arc::new(CommandHandler {
                name: name.to_string(),
                description: description.to_string(),
                advertised,
                run,
            }),
        );
    }

    pub(crate) fn find_handler(&self, command: &str) -> Option<Arc<CommandHandler>> {
        self.handlers
            .lock()
            .unwrap()
            .get(&command.to_lowercase())
            .cloned()
    }

    /// Name-ordered snapshot of the registered handlers.
    pub(crate) fn handlers_snapshot(&self) -> Vec<Arc<CommandHandler>> {
        let mut handlers: Vec<Arc<CommandHandler>> =
            self.handlers.lock().unwrap().values().cloned().collect();
        handlers.sort_by(|a, b| a.name.cmp(&b.name));
        handlers
    }

    // ---- process definition -------------------------------------------------

    /// Define a process. Returns false when the name is already taken.
    pub fn add_process(&self, name: &str, job: JobFn, args: Vec<String>) -> bool {
        self.processes.add(name, job, args)
    }

    /// Define a process and bind a schedule rule to it in one step. The
    /// definition is rolled back when the rule does not parse.
    ///
    /// # Errors
    /// Returns the rule parse error.
    pub fn add_scheduled_process(
        &self,
        name: &str,
        job: JobFn,
        args: Vec<String>,
        rule: &str,
    ) -> anyhow::Result<bool> {
        if !self.processes.add(name, job, args) {
            return Ok(false);
        }
        if let Err(e) = self.schedules.schedule(name, rule, true) {
            self.processes.remove(name);
            return Err(e.into());
        }
        Ok(true)
    }

    /// Remove a process definition along with any schedule binding.
    pub fn remove_process(&self, name: &str) -> bool {
        self.schedules.unschedule(name);
        self.processes.remove(name)
    }

    // ---- outbound -----------------------------------------------------------

    /// Queue a status update for one session, or for broadcast.
    pub fn update_status(
        &self,
        target: Option<SessionId>,
        kind: UpdateKind,
        message: impl Into<String>,
    ) {
        self.status.enqueue(target, kind, message);
    }

    /// Send a response record to one session. Delivery failures are logged,
    /// not surfaced; a vanished client is not a caller error.
    pub async fn send_response(&self, id: SessionId, response: &ServiceResponse) {
        if let Err(e) = self.transport.send_to(id, response).await {
            tracing::debug!(%id, "response not delivered: {e}");
        }
    }

    /// Send a response record without waiting on the transport.
    pub fn send_response_detached(&self, id: SessionId, response: ServiceResponse) {
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send_to(id, &response).await {
                tracing::debug!(%id, "response not delivered: {e}");
            }
        });
    }

    /// Send a response record to every registered session.
    pub async fn broadcast_response(&self, response: &ServiceResponse) {
        for session in self.sessions.list() {
            self.send_response(session.id, response).await;
        }
    }

    /// Report a command outcome: status text always, plus a machine-readable
    /// `{Command}:Success`/`{Command}:Failure` record when the request carried
    /// `-actionable`.
    pub(crate) async fn report_outcome(
        &self,
        ctx: &RequestContext,
        command: &str,
        success: bool,
        attachment: Option<Value>,
        status_text: impl Into<String>,
    ) {
        if ctx.request.arguments().exists("actionable") {
            let response = ServiceResponse::actionable(command, success, attachment);
            self.send_response(ctx.sender.id, &response).await;
        }
        let kind = if success {
            UpdateKind::Information
        } else {
            UpdateKind::Alarm
        };
        self.update_status(Some(ctx.sender.id), kind, status_text);
    }

    // ---- system processes ---------------------------------------------------

    /// Spawn an operating-system process. Arguments are split shell-style.
    pub(crate) fn start_system_process(&self, name: &str, args: &str) -> anyhow::Result<()> {
        let argv =
            shlex::split(args).context("Process arguments could not be parsed")?;
        let child = tokio::process::Command::new(name).args(&argv).spawn()?;
        self.system_processes.lock().unwrap().push(SystemProcess {
            name: name.to_string(),
            child,
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Kill a tracked operating-system process by name. Returns false when no
    /// process with the name is tracked.
    pub(crate) fn abort_system_process(&self, name: &str) -> bool {
        let mut procs = self.system_processes.lock().unwrap();
        if let Some(index) = procs.iter().position(|p| p.name.eq_ignore_ascii_case(name)) {
            let mut proc = procs.swap_remove(index);
            let _ = proc.child.start_kill();
            true
        } else {
            false
        }
    }

    /// Snapshot of tracked operating-system processes, pruning exited ones.
    pub(crate) fn system_process_list(&self) -> Vec<(String, Option<u32>, DateTime<Utc>)> {
        let mut procs = self.system_processes.lock().unwrap();
        procs.retain_mut(|p| matches!(p.child.try_wait(), Ok(None)));
        procs
            .iter()
            .map(|p| (p.name.clone(), p.child.id(), p.started_at))
            .collect()
    }

    // ---- lifecycle ----------------------------------------------------------

    /// Bring the control plane online: register the built-in commands, open
    /// the status log, and start the status consumer, the process event pump,
    /// and the scheduler. Idempotent.
    ///
    /// # Errors
    /// Fails when the status log cannot be opened.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let Some(mut consumer) = self.consumer.lock().unwrap().take() else {
            return Ok(());
        };
        commands::register_builtins(self);

        if self.config.log_status_updates {
            if let Some(path) = &self.config.status_log_path {
                let log = StatusLog::open(path)
                    .await
                    .with_context(|| format!("Failed to open status log {}", path.display()))?;
                consumer.set_log(log);
            }
        }

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(
            consumer.run(Arc::clone(self) as Arc<dyn StatusSink>),
        ));
        if let Some(events) = self.process_events.lock().unwrap().take() {
            tasks.push(tokio::spawn(Self::pump_process_events(
                Arc::clone(self),
                events,
            )));
        }
        tasks.push(tokio::spawn(Arc::clone(&self.scheduler).run()));
        drop(tasks);

        *self.started_at.lock().unwrap() = Some(Utc::now());
        self.enabled.store(true, Ordering::Relaxed);
        tracing::info!(service = self.config.service_name, "control plane started");
        Ok(())
    }

    async fn pump_process_events(
        controller: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ProcessStateChanged>,
    ) {
        while let Some(event) = events.recv().await {
            controller.update_status(
                None,
                UpdateKind::Information,
                format!("Process \"{}\" is now {}.", event.name, event.state),
            );
            let response = ServiceResponse::process_state_changed(&event.name, event.state.label());
            controller.broadcast_response(&response).await;
        }
    }

    /// Take the control plane offline: abort running processes, tear down any
    /// shell bridge, stop the background tasks, and suppress further status
    /// delivery.
    pub async fn stop(&self) {
        let aborted = self.processes.abort_all();
        self.bridge.disconnect().await;
        self.enabled.store(false, Ordering::Relaxed);
        self.status.set_enabled(false);
        self.scheduler.set_enabled(false);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        tracing::info!(
            service = self.config.service_name,
            aborted,
            "control plane stopped"
        );
    }

    /// Notify every session that the hosting service is shutting down, then
    /// stop.
    pub async fn shutdown(&self) {
        let response =
            ServiceResponse::service_state_changed(&self.config.service_name, "Shutdown");
        self.broadcast_response(&response).await;
        self.stop().await;
    }

    fn managed_components(&self) -> [&dyn Enableable; 2] {
        [&self.status, self.scheduler.as_ref()]
    }

    /// Suspend the managed components, snapshotting their enabled states so a
    /// component disabled before the pause stays disabled after resume.
    pub fn pause(&self) {
        let components = self.managed_components();
        let snapshot: Vec<bool> = components.iter().map(|c| c.is_enabled()).collect();
        *self.pause_snapshot.lock().unwrap() = Some(snapshot);
        for component in components {
            component.set_enabled(false);
        }
        tracing::info!(service = self.config.service_name, "control plane paused");
    }

    /// Restore the enabled states captured by the last [`pause`](Self::pause).
    pub fn resume(&self) {
        let components = self.managed_components();
        match self.pause_snapshot.lock().unwrap().take() {
            Some(snapshot) => {
                for (component, was_enabled) in components.into_iter().zip(snapshot) {
                    component.set_enabled(was_enabled);
                }
            }
            None => {
                for component in components {
                    component.set_enabled(true);
                }
            }
        }
        tracing::info!(service = self.config.service_name, "control plane resumed");
    }

    // ---- transport callbacks ------------------------------------------------

    /// A connection was opened. The session itself is established by the
    /// first payload.
    pub fn on_client_connected(&self, id: SessionId) {
        self.sessions.on_connected(id);
    }

    /// A payload arrived on a connection.
    pub async fn on_client_data(self: &Arc<Self>, id: SessionId, payload: ClientPayload) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        match (self.sessions.find(id), payload) {
            (None, ClientPayload::Hello(hello)) => self.handle_handshake(id, hello).await,
            (None, ClientPayload::Command(_)) => {
                // A command before the handshake closes the connection.
                self.send_response(id, &ServiceResponse::authentication_failure())
                    .await;
                self.transport.disconnect(id).await;
                tracing::warn!(%id, "command received before handshake, connection closed");
            }
            (Some(sender), ClientPayload::Command(text)) => self.dispatch(sender, &text).await,
            (Some(_), ClientPayload::Hello(_)) => {
                self.update_status(
                    Some(id),
                    UpdateKind::Alarm,
                    "Failed to process request - Session is already established.",
                );
            }
        }
    }

    async fn handle_handshake(&self, id: SessionId, hello: ClientHello) {
        match self.sessions.handshake(
            id,
            hello,
            self.security.as_ref(),
            self.config.secure_remote_interactions,
        ) {
            Ok(session) => {
                self.send_response(id, &ServiceResponse::authentication_success())
                    .await;
                self.update_status(
                    None,
                    UpdateKind::Information,
                    format!(
                        "Remote client connected - {} from {}.",
                        session.principal.name, session.machine_name
                    ),
                );
            }
            Err(e) => {
                self.send_response(id, &ServiceResponse::authentication_failure())
                    .await;
                self.transport.disconnect(id).await;
                self.update_status(
                    None,
                    UpdateKind::Warning,
                    format!("Remote client connection rejected - {e}."),
                );
            }
        }
    }

    /// A connection closed.
    pub async fn on_client_disconnected(&self, id: SessionId) {
        if self.bridge.owner() == Some(id) {
            // Bridge teardown on owner loss must not fail the disconnect path.
            self.bridge.disconnect().await;
            self.update_status(
                None,
                UpdateKind::Information,
                "Remote command session terminated - status updates are resumed.",
            );
        }
        if let Some(session) = self.sessions.remove(id) {
            self.update_status(
                None,
                UpdateKind::Information,
                format!(
                    "Remote client disconnected - {} from {}.",
                    session.principal.name, session.machine_name
                ),
            );
        }
    }

    // ---- dispatch -----------------------------------------------------------

    /// Dispatch one request line from a registered session.
    pub async fn dispatch(self: &Arc<Self>, sender: ClientSession, text: &str) {
        let sender_id = sender.id;
        let Some(request) = ClientRequest::parse(text) else {
            self.update_status(
                Some(sender_id),
                UpdateKind::Alarm,
                format!(
                    "Failed to process request - {}.",
                    ControlError::MalformedRequest
                ),
            );
            return;
        };
        let command = request.command().to_string();
        self.history
            .push(RequestRecord::new(request.clone(), sender.clone()));

        // While a shell bridge is active, the owner's lines belong to the
        // interpreter and everyone else is locked out.
        if let Some(owner) = self.bridge.owner() {
            if sender_id == owner {
                let ctx = RequestContext { sender, request };
                if let Err(e) = self.telnet_session(&ctx).await {
                    self.update_status(
                        Some(sender_id),
                        UpdateKind::Alarm,
                        format!("Failed to process request \"{command}\" - {e:#}."),
                    );
                }
            } else {
                self.update_status(
                    Some(sender_id),
                    UpdateKind::Alarm,
                    format!(
                        "Failed to process request \"{command}\" - {}.",
                        ControlError::ExclusivityConflict
                    ),
                );
            }
            return;
        }

        if self.config.secure_remote_interactions
            && self.security.is_resource_securable(&command)
            && !self
                .security
                .is_resource_accessible(&sender.principal, &command)
        {
            self.update_status(
                Some(sender_id),
                UpdateKind::Alarm,
                format!(
                    "Failed to process request \"{command}\" - {}.",
                    ControlError::AuthorizationDenied(command.clone())
                ),
            );
            return;
        }

        let Some(handler) = self.find_handler(&command) else {
            self.update_status(
                Some(sender_id),
                UpdateKind::Alarm,
                format!(
                    "Failed to process request \"{command}\" - {}.",
                    ControlError::UnsupportedCommand
                ),
            );
            return;
        };

        let ctx = RequestContext { sender, request };
        // A handler failure, panic included, is confined to an alarm for the
        // sender; it must never take down the dispatching task.
        let outcome = AssertUnwindSafe((handler.run)(Arc::clone(self), ctx))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(panic_reason(panic.as_ref())),
        };
        if let Some(reason) = failure {
            tracing::error!(command, "command handler failed: {reason}");
            self.update_status(
                Some(sender_id),
                UpdateKind::Alarm,
                format!("Failed to process request \"{command}\" - {reason}."),
            );
        }
    }

    /// The `Telnet` interaction: establish, forward to, or tear down the
    /// exclusive shell bridge.
    pub(crate) async fn telnet_session(&self, ctx: &RequestContext) -> anyhow::Result<()> {
        let args = ctx.request.arguments();
        let sender_id = ctx.sender.id;

        match self.bridge.owner() {
            None => {
                let password = args.value("connect").filter(|p| !p.is_empty());
                let Some(password) = password.filter(|_| !args.contains_help_request()) else {
                    self.update_status(
                        Some(sender_id),
                        UpdateKind::Information,
                        commands::telnet_usage(),
                    );
                    return Ok(());
                };
                match self.bridge.try_connect(sender_id, password) {
                    Ok(()) => {
                        self.send_response(sender_id, &ServiceResponse::telnet_session(true))
                            .await;
                        // Broadcast delivery is suppressed while the bridge is
                        // active, so the other sessions hear about it directly.
                        let notice = ServiceResponse::client_status(
                            UpdateKind::Information,
                            "Remote command session established - status updates are suspended.",
                        );
                        self.broadcast_response(&notice).await;
                    }
                    Err(e) => {
                        self.update_status(
                            Some(sender_id),
                            UpdateKind::Alarm,
                            format!("Failed to establish remote command session - {e}."),
                        );
                    }
                }
            }
            Some(owner) if owner == sender_id => {
                if ctx.request.command().eq_ignore_ascii_case("telnet")
                    && args.exists("disconnect")
                {
                    self.bridge.disconnect().await;
                    self.send_response(sender_id, &ServiceResponse::telnet_session(false))
                        .await;
                    self.update_status(
                        None,
                        UpdateKind::Information,
                        "Remote command session terminated - status updates are resumed.",
                    );
                } else {
                    self.bridge.forward(sender_id, ctx.request.to_command_line())?;
                }
            }
            Some(_) => anyhow::bail!(ControlError::ExclusivityConflict),
        }
        Ok(())
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Handler panicked".to_string())
}

#[async_trait]
impl StatusSink for ServiceController {
    async fn deliver(&self, target: Option<SessionId>, kind: UpdateKind, text: &str) {
        let response = ServiceResponse::client_status(kind, text);
        match target {
            Some(id) => self.send_response(id, &response).await,
            None => {
                // Broadcast delivery pauses while the shell bridge is active;
                // targeted delivery (including interpreter output) does not.
                if self.bridge.owner().is_some() {
                    return;
                }
                self.broadcast_response(&response).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use svc_control_core::MemorySettings;
    use svc_control_core::traits::{Credentials, Principal};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(SessionId, ServiceResponse)>>,
        closed: Mutex<Vec<SessionId>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_to(
            &self,
            id: SessionId,
            response: &ServiceResponse,
        ) -> Result<(), ControlError> {
            self.sent.lock().unwrap().push((id, response.clone()));
            Ok(())
        }

        async fn disconnect(&self, id: SessionId) {
            self.closed.lock().unwrap().push(id);
        }
    }

    impl RecordingTransport {
        fn messages_for(&self, id: SessionId) -> Vec<ServiceResponse> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(to, _)| *to == id)
                .map(|(_, r)| r.clone())
                .collect()
        }

        async fn wait_for(
            &self,
            id: SessionId,
            pred: impl Fn(&ServiceResponse) -> bool,
        ) -> ServiceResponse {
            for _ in 0..500 {
                if let Some(found) = self.messages_for(id).into_iter().find(|r| pred(r)) {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("expected response never arrived");
        }
    }

    struct OpenSecurity;

    impl SecurityProvider for OpenSecurity {
        fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Principal> {
            credentials.map(|c| Principal {
                name: c.username.clone(),
                authenticated: true,
            })
        }

        fn is_resource_securable(&self, _command: &str) -> bool {
            false
        }

        fn is_resource_accessible(&self, _principal: &Principal, _command: &str) -> bool {
            true
        }
    }

    /// Authenticates anyone presenting credentials, marks every command
    /// securable, and denies access to `Abort` only.
    struct RestrictedSecurity;

    impl SecurityProvider for RestrictedSecurity {
        fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Principal> {
            credentials.map(|c| Principal {
                name: c.username.clone(),
                authenticated: true,
            })
        }

        fn is_resource_securable(&self, _command: &str) -> bool {
            true
        }

        fn is_resource_accessible(&self, _principal: &Principal, command: &str) -> bool {
            !command.eq_ignore_ascii_case("abort")
        }
    }

    struct Harness {
        controller: Arc<ServiceController>,
        transport: Arc<RecordingTransport>,
    }

    async fn started(config: ControlConfig) -> Harness {
        started_with(config, Arc::new(OpenSecurity)).await
    }

    async fn started_with(config: ControlConfig, security: Arc<dyn SecurityProvider>) -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let controller = ServiceController::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            security,
            Arc::new(MemorySettings::new()),
        );
        controller.start().await.unwrap();
        Harness {
            controller,
            transport,
        }
    }

    async fn connected(h: &Harness) -> SessionId {
        let id = Uuid::new_v4();
        h.controller.on_client_connected(id);
        h.controller
            .on_client_data(
                id,
                ClientPayload::Hello(ClientHello {
                    client_name: "console".to_string(),
                    machine_name: "ops-1".to_string(),
                    credentials: None,
                }),
            )
            .await;
        id
    }

    async fn send_command(h: &Harness, id: SessionId, line: &str) {
        h.controller
            .on_client_data(id, ClientPayload::Command(line.to_string()))
            .await;
    }

    fn instant_job() -> JobFn {
        Arc::new(|_ctx| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn handshake_is_acknowledged_and_session_registered() {
        let h = started(ControlConfig::default()).await;
        let id = connected(&h).await;

        let messages = h.transport.messages_for(id);
        assert!(messages.iter().any(|r| r.kind == "AuthenticationSuccess"));
        assert!(h.controller.sessions.find(id).is_some());
    }

    #[tokio::test]
    async fn command_before_handshake_closes_the_connection() {
        let h = started(ControlConfig::default()).await;
        let id = Uuid::new_v4();
        h.controller.on_client_connected(id);
        send_command(&h, id, "Clients").await;

        let messages = h.transport.messages_for(id);
        assert!(messages.iter().any(|r| r.kind == "AuthenticationFailure"));
        assert!(h.transport.closed.lock().unwrap().contains(&id));
        assert!(h.controller.sessions.find(id).is_none());
    }

    #[tokio::test]
    async fn unsupported_command_reports_alarm_to_sender_only() {
        let h = started(ControlConfig::default()).await;
        let id = connected(&h).await;
        send_command(&h, id, "NoSuchCommand").await;

        let alarm = h
            .transport
            .wait_for(id, |r| r.kind == "UPDATECLIENTSTATUS-ALARM")
            .await;
        assert_eq!(
            alarm.message,
            "Failed to process request \"NoSuchCommand\" - Request is not supported."
        );
    }

    #[tokio::test]
    async fn start_command_runs_process_and_reports_state_changes() {
        let h = started(ControlConfig::default()).await;
        h.controller.add_process("Backup", instant_job(), vec![]);
        let id = connected(&h).await;

        send_command(&h, id, "Start \"Backup\" -args=\"full verify\"").await;

        h.transport
            .wait_for(id, |r| {
                r.message == "Attempting to start service process \"Backup\"..."
            })
            .await;
        h.transport
            .wait_for(id, |r| {
                r.message == "Successfully started service process \"Backup\"."
            })
            .await;
        // State transitions fan out to every session as typed records.
        h.transport
            .wait_for(id, |r| {
                r.kind == "PROCESSSTATECHANGED"
                    && r.attachments[0]["state"] == serde_json::json!("Idle")
            })
            .await;
    }

    #[tokio::test]
    async fn actionable_version_returns_success_record() {
        let h = started(ControlConfig::default()).await;
        let id = connected(&h).await;
        send_command(&h, id, "Version -actionable").await;

        let record = h
            .transport
            .wait_for(id, |r| r.kind == "Version:Success")
            .await;
        assert!(!record.attachments.is_empty());
    }

    #[tokio::test]
    async fn shell_bridge_locks_out_other_sessions() {
        let config = ControlConfig {
            support_telnet_sessions: true,
            shell_program: Some("cat".to_string()),
            ..ControlConfig::default()
        };
        let h = started(config).await;
        let owner = connected(&h).await;
        let other = connected(&h).await;

        send_command(&h, owner, "Telnet -connect=s3cur3").await;
        h.transport
            .wait_for(owner, |r| {
                r.kind == "TelnetSession" && r.message == "Established"
            })
            .await;

        // Any other session is rejected while the bridge holds exclusivity.
        send_command(&h, other, "Clients").await;
        let alarm = h
            .transport
            .wait_for(other, |r| r.kind == "UPDATECLIENTSTATUS-ALARM")
            .await;
        assert_eq!(
            alarm.message,
            "Failed to process request \"Clients\" - Remote telnet session is in progress."
        );

        // The owner's lines go to the interpreter and its output comes back
        // targeted at the owner only.
        send_command(&h, owner, "echo through cat").await;
        h.transport
            .wait_for(owner, |r| r.message == "echo through cat")
            .await;

        send_command(&h, owner, "Telnet -disconnect").await;
        h.transport
            .wait_for(owner, |r| {
                r.kind == "TelnetSession" && r.message == "Terminated"
            })
            .await;
        assert!(h.controller.bridge.owner().is_none());

        // Dispatch works again for everyone.
        send_command(&h, other, "Time").await;
        h.transport
            .wait_for(other, |r| {
                r.kind == "UPDATECLIENTSTATUS-INFORMATION"
                    && r.message.starts_with("Current system time")
            })
            .await;
    }

    #[tokio::test]
    async fn owner_disconnect_tears_down_the_bridge() {
        let config = ControlConfig {
            support_telnet_sessions: true,
            shell_program: Some("cat".to_string()),
            ..ControlConfig::default()
        };
        let h = started(config).await;
        let owner = connected(&h).await;

        send_command(&h, owner, "Telnet -connect=s3cur3").await;
        h.transport
            .wait_for(owner, |r| r.kind == "TelnetSession")
            .await;

        h.controller.on_client_disconnected(owner).await;
        assert!(h.controller.bridge.owner().is_none());
        assert!(h.controller.sessions.find(owner).is_none());
    }

    #[tokio::test]
    async fn history_is_bounded_by_the_configured_limit() {
        let config = ControlConfig {
            request_history_limit: 2,
            ..ControlConfig::default()
        };
        let h = started(config).await;
        let id = connected(&h).await;

        for line in ["Time", "Version", "Clients"] {
            send_command(&h, id, line).await;
        }
        let commands: Vec<String> = h
            .controller
            .history
            .snapshot()
            .iter()
            .map(|r| r.request.command().to_string())
            .collect();
        assert_eq!(commands, vec!["Version", "Clients"]);
    }

    #[tokio::test]
    async fn pause_snapshot_preserves_pre_pause_disabled_state() {
        let h = started(ControlConfig::default()).await;

        h.controller.status.set_enabled(false);
        h.controller.pause();
        h.controller.resume();
        // The queue was disabled before the pause, so resume leaves it off.
        assert!(!h.controller.status.is_enabled());

        h.controller.status.set_enabled(true);
        h.controller.pause();
        assert!(!h.controller.status.is_enabled());
        h.controller.resume();
        assert!(h.controller.status.is_enabled());
    }

    #[tokio::test]
    async fn panicking_handler_leaves_other_sessions_dispatching() {
        let h = started(ControlConfig::default()).await;
        let boom: CommandFn =
            Arc::new(|_controller, _ctx| Box::pin(async { panic!("handler bug") }));
        h.controller
            .register_command("Boom", "Always fails", boom, false);
        let first = connected(&h).await;
        let second = connected(&h).await;

        send_command(&h, first, "Boom").await;
        let alarm = h
            .transport
            .wait_for(first, |r| r.kind == "UPDATECLIENTSTATUS-ALARM")
            .await;
        assert_eq!(
            alarm.message,
            "Failed to process request \"Boom\" - handler bug."
        );

        // The failure stays with the sender; dispatch keeps serving everyone.
        send_command(&h, second, "Time").await;
        h.transport
            .wait_for(second, |r| r.message.starts_with("Current system time"))
            .await;
    }

    #[tokio::test]
    async fn removing_a_scheduled_process_clears_definition_and_binding() {
        let h = started(ControlConfig::default()).await;

        assert!(
            h.controller
                .add_scheduled_process("Cleanup", instant_job(), vec![], "0 0 * * *")
                .unwrap()
        );
        assert!(h.controller.processes.find("Cleanup").is_some());
        assert!(h.controller.schedules.find("Cleanup").is_some());

        assert!(h.controller.remove_process("Cleanup"));
        assert!(h.controller.processes.find("Cleanup").is_none());
        assert!(h.controller.schedules.find("Cleanup").is_none());

        // A rule that does not parse rolls the definition back too.
        assert!(
            h.controller
                .add_scheduled_process("Broken", instant_job(), vec![], "not a rule")
                .is_err()
        );
        assert!(h.controller.processes.find("Broken").is_none());
        assert!(h.controller.schedules.find("Broken").is_none());
    }

    #[tokio::test]
    async fn secure_mode_denies_inaccessible_commands_at_dispatch() {
        let config = ControlConfig {
            secure_remote_interactions: true,
            ..ControlConfig::default()
        };
        let h = started_with(config, Arc::new(RestrictedSecurity)).await;
        let id = Uuid::new_v4();
        h.controller.on_client_connected(id);
        h.controller
            .on_client_data(
                id,
                ClientPayload::Hello(ClientHello {
                    client_name: "console".to_string(),
                    machine_name: "ops-1".to_string(),
                    credentials: Credentials::parse("admin:hunter2"),
                }),
            )
            .await;
        h.transport
            .wait_for(id, |r| r.kind == "AuthenticationSuccess")
            .await;

        send_command(&h, id, "Abort \"Backup\"").await;
        let alarm = h
            .transport
            .wait_for(id, |r| r.kind == "UPDATECLIENTSTATUS-ALARM")
            .await;
        assert_eq!(
            alarm.message,
            "Failed to process request \"Abort\" - Access to 'Abort' is denied."
        );

        // The same principal still reaches the commands it is allowed.
        send_command(&h, id, "Time").await;
        h.transport
            .wait_for(id, |r| r.message.starts_with("Current system time"))
            .await;
    }

    #[tokio::test]
    async fn stop_aborts_processes_and_suppresses_status() {
        let h = started(ControlConfig::default()).await;
        let id = connected(&h).await;

        h.controller.stop().await;
        let before = h.transport.messages_for(id).len();
        h.controller
            .update_status(Some(id), UpdateKind::Information, "after stop");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.messages_for(id).len(), before);
    }
}
