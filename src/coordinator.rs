//! Lifecycle coordinator: the state machine that drives bring-up,
//! registration, connection, synchronization, steady state, and recovery.
//!
//! The host calls [`Coordinator::tick`] once per game-loop iteration. The
//! tick drains both fan-in queues (IPC messages, server events), evaluates
//! the current state's timeout, and persists the session heartbeat while
//! active. All state mutation happens on the tick thread; the current
//! state is mirrored into an atomic for unsynchronized readers.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::capabilities::Capabilities;
use crate::config::{LoadOutcome, Options, RetryOptions};
use crate::error::Error;
use crate::ipc::{IpcEvent, IpcMessage, IpcServer, IpcServerConfig, TARGET_BROADCAST, kind};
use crate::paths::FrameworkPaths;
use crate::registry::{ModRegistry, classify};
use crate::remote::{
    FrameworkEvent, LifecycleSignal, PollingWorker, RandomizerSocket, ServerAdapter, ServerHandle,
    lock as lock_server, shared,
};
use crate::router::{MessageRouter, OutboundIpc, action_result_from_payload};
use crate::session::SessionStore;
use crate::types::{ErrorCode, LifecycleState, ModClass, PendingAction, SlotInfo, SlotStatus};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const FALLBACK_GAME_NAME: &str = "APFramework";

struct StateCell {
    inner: Mutex<(LifecycleState, Instant)>,
    mirror: AtomicU8,
}

impl StateCell {
    fn new() -> Self {
        Self {
            inner: Mutex::new((LifecycleState::Uninitialized, Instant::now())),
            mirror: AtomicU8::new(LifecycleState::Uninitialized as u8),
        }
    }

    fn set(&self, state: LifecycleState) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = (state, Instant::now());
        self.mirror.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.mirror.load(Ordering::Acquire))
    }

    fn elapsed(&self) -> Duration {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .1
            .elapsed()
    }
}

pub struct Coordinator {
    options: Options,
    paths: FrameworkPaths,
    game_name: String,
    registry: Arc<ModRegistry>,
    capabilities: Arc<Capabilities>,
    session: Arc<SessionStore>,
    ipc: IpcServer,
    ipc_out: Arc<dyn OutboundIpc>,
    router: MessageRouter,
    server: ServerHandle,
    poller: Option<PollingWorker>,
    state: StateCell,
    load_outcome: LoadOutcome,
    session_loaded: bool,
    resync_attempts: u32,
    next_reconnect_at: Instant,
    pending_actions: Vec<PendingAction>,
    pending_slot_info: Option<SlotInfo>,
    last_heartbeat: Instant,
}

impl Coordinator {
    /// Bind the IPC server and assemble the component graph. The machine
    /// stays in UNINITIALIZED until [`init`](Self::init) runs.
    pub fn new(
        options: Options,
        load_outcome: LoadOutcome,
        paths: FrameworkPaths,
        socket: Box<dyn RandomizerSocket>,
    ) -> Result<Self, Error> {
        let game_name = if options.game_name.is_empty() {
            FALLBACK_GAME_NAME.to_string()
        } else {
            options.game_name.clone()
        };

        let ipc = IpcServer::start(
            &paths.ipc_socket_path(&game_name),
            IpcServerConfig {
                poll_interval: Duration::from_millis(options.threading.ipc_poll_interval_ms),
                queue_max: options.threading.queue_max_size,
                write_deadline: Duration::from_millis(options.timeouts.ipc_message_ms),
            },
        )?;

        let registry = Arc::new(ModRegistry::new());
        let capabilities = Arc::new(Capabilities::new());
        let session = Arc::new(SessionStore::new());
        let server = shared(ServerAdapter::new(socket));
        let ipc_out: Arc<dyn OutboundIpc> = Arc::new(ipc.sender());
        let router = MessageRouter::new(
            Arc::clone(&capabilities),
            Arc::clone(&session),
            Arc::clone(&ipc_out),
            Arc::clone(&server),
        );

        Ok(Self {
            options,
            paths,
            game_name,
            registry,
            capabilities,
            session,
            ipc,
            ipc_out,
            router,
            server,
            poller: None,
            state: StateCell::new(),
            load_outcome,
            session_loaded: false,
            resync_attempts: 0,
            next_reconnect_at: Instant::now(),
            pending_actions: Vec::new(),
            pending_slot_info: None,
            last_heartbeat: Instant::now(),
        })
    }

    /// Run bring-up: INITIALIZATION through the first registration state,
    /// or ERROR_STATE when validation finds conflicts.
    pub fn init(&mut self) {
        self.transition(LifecycleState::Initialization, "starting framework");

        if self.load_outcome == LoadOutcome::Invalid {
            self.router.broadcast_error(
                ErrorCode::ConfigInvalid,
                "options file malformed, defaults in effect",
                "",
            );
        }

        self.run_bringup();
    }

    /// Discovery through registration. Also re-entered by `cmd_restart`.
    fn run_bringup(&mut self) {
        self.transition(LifecycleState::Discovery, "scanning for mods");
        self.continue_bringup();
    }

    fn continue_bringup(&mut self) {
        self.registry.clear();
        self.capabilities.clear();
        self.registry.discover(&self.paths.mods_dir());
        for manifest in self.registry.enabled_manifests() {
            self.capabilities.add(manifest);
        }

        self.transition(LifecycleState::Validation, "validating capabilities");
        let report = self.capabilities.validate();
        for warning in &report.warnings {
            tracing::warn!("{warning}");
        }
        if !report.ok {
            let details: Vec<String> =
                report.conflicts.iter().map(|c| c.description.clone()).collect();
            for description in &details {
                tracing::error!(conflict = %description, "capability conflict");
            }
            self.transition(LifecycleState::ErrorState, "capability conflicts detected");
            self.router.broadcast_error(
                ErrorCode::ConflictDetected,
                "capability conflicts detected",
                &details.join("; "),
            );
            return;
        }

        self.transition(LifecycleState::Generation, "generating capabilities");
        self.capabilities.assign_ids(self.options.id_base);

        let slot_name = self.options.ap_server.slot_name.clone();
        let checksum = self.capabilities.checksum(&self.game_name, &slot_name);
        self.session.set_checksum(&checksum);
        self.session.set_identity(&self.game_name, &slot_name);

        if !slot_name.is_empty() {
            if let Err(e) = self
                .capabilities
                .write_config(&self.paths, &slot_name, &self.game_name)
            {
                tracing::error!("failed to write capabilities config: {e}");
            }
        }

        self.transition(
            LifecycleState::PriorityRegistration,
            "waiting for priority clients",
        );
        if self.registry.priority_mods().is_empty() {
            self.transition(LifecycleState::Registration, "no priority clients");
        }
    }

    /// One main-loop iteration: drain queues, evaluate timeouts, heartbeat.
    pub fn tick(&mut self) {
        for event in self.ipc.drain() {
            self.handle_ipc_event(event);
        }

        let server_events = match &self.poller {
            Some(poller) => poller.drain(),
            None => Vec::new(),
        };
        for event in server_events {
            self.handle_framework_event(event);
        }

        self.report_queue_drops();
        self.evaluate_state();
        self.sweep_pending_actions();
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state.get(),
            LifecycleState::Active | LifecycleState::Resyncing
        )
    }

    pub fn is_error(&self) -> bool {
        self.state.get() == LifecycleState::ErrorState
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ModRegistry> {
        &self.registry
    }

    pub fn capabilities(&self) -> &Arc<Capabilities> {
        &self.capabilities
    }

    /// Stop the workers, close the server connection, release the socket,
    /// and persist the session as the final act.
    pub fn shutdown(&mut self) {
        tracing::info!("framework shutting down");

        if let Some(mut poller) = self.poller.take() {
            poller.stop(Duration::from_millis(self.options.threading.shutdown_timeout_ms));
        }
        lock_server(&self.server).disconnect();
        self.ipc.stop();

        self.session.touch();
        self.persist_session();
        tracing::info!("framework shutdown complete");
    }

    // ------------------------------------------------------------------
    // IPC events
    // ------------------------------------------------------------------

    fn handle_ipc_event(&mut self, event: IpcEvent) {
        match event {
            IpcEvent::Connected(client_id) => {
                tracing::debug!(client = %client_id, "client connected");
            }
            IpcEvent::Disconnected(client_id) => {
                tracing::debug!(client = %client_id, "client disconnected");
            }
            IpcEvent::Message(client_id, msg) => self.handle_ipc_message(&client_id, msg),
        }
    }

    fn handle_ipc_message(&mut self, client_id: &str, msg: IpcMessage) {
        tracing::debug!(client = %client_id, kind = %msg.kind, "IPC message");
        match msg.kind.as_str() {
            kind::REGISTER => {
                let version = {
                    let v = msg.payload_str("version");
                    if v.is_empty() { "1.0.0" } else { v }.to_string()
                };
                self.handle_register(client_id, &version);
            }
            kind::LOCATION_CHECK => {
                let location = msg.payload_str("location").to_string();
                let instance = msg.payload_i64("instance").max(1) as u32;
                self.router.route_check(client_id, &location, instance);
            }
            kind::LOCATION_SCOUT => {
                let names: Vec<String> = msg
                    .payload
                    .get("locations")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                self.router.route_scouts(client_id, &names, false);
            }
            kind::ACTION_RESULT => {
                let result = action_result_from_payload(client_id, &msg.payload);
                self.pending_actions
                    .retain(|p| !(p.mod_id == result.mod_id && p.item_id == result.item_id));
                self.router.handle_action_result(&result);
            }
            kind::LOG => {
                self.relay_client_log(client_id, &msg);
            }
            kind::CMD_RESTART => {
                if self.require_priority(client_id, kind::CMD_RESTART) {
                    self.cmd_restart();
                }
            }
            kind::CMD_RESYNC => {
                if self.require_priority(client_id, kind::CMD_RESYNC) {
                    self.cmd_resync();
                }
            }
            kind::CMD_RECONNECT => {
                if self.require_priority(client_id, kind::CMD_RECONNECT) {
                    self.cmd_reconnect();
                }
            }
            kind::CALLBACK_ERROR => {
                let error_type = msg.payload_str("error_type").to_string();
                let details = msg.payload_str("details").to_string();
                tracing::error!(client = %client_id, error_type, details, "client callback error");
                self.router
                    .broadcast_error(ErrorCode::PropertyFailed, &error_type, &details);
            }
            kind::GET_MODS => {
                if self.require_priority(client_id, kind::GET_MODS) {
                    self.send_mod_roster(client_id);
                }
            }
            kind::SEND_MESSAGE => {
                if self.require_priority(client_id, kind::SEND_MESSAGE) {
                    let text = msg.payload_str("message");
                    if !text.is_empty() {
                        lock_server(&self.server).send_say(text);
                    }
                }
            }
            kind::BROADCAST => {
                // Relay a client's payload to every other connected client.
                let relay =
                    IpcMessage::new(kind::BROADCAST, client_id, TARGET_BROADCAST, msg.payload.clone());
                self.ipc_out.broadcast_except(&relay, client_id);
            }
            other => {
                tracing::warn!(client = %client_id, kind = other, "unknown IPC message type");
            }
        }
    }

    fn handle_register(&mut self, mod_id: &str, version: &str) {
        let state = self.state.get();
        if !state.accepts_registration() {
            tracing::warn!(mod_id, state = state.as_str(), "registration outside window");
            self.respond_registration(mod_id, false, Some("registration is not open"));
            return;
        }

        if classify(mod_id) == ModClass::Regular && state == LifecycleState::PriorityRegistration {
            tracing::warn!(mod_id, "regular mod attempted priority-phase registration");
            self.respond_registration(mod_id, false, Some("registration not open for regular mods"));
            return;
        }

        if !self.registry.mark_registered(mod_id) {
            tracing::warn!(mod_id, "registration from unknown mod");
            self.respond_registration(mod_id, false, Some("unknown mod_id"));
            return;
        }

        tracing::info!(mod_id, version, "mod registered");
        self.respond_registration(mod_id, true, None);
    }

    fn respond_registration(&self, mod_id: &str, success: bool, reason: Option<&str>) {
        let response = IpcMessage::registration_response(mod_id, success, reason);
        if let Err(e) = self.ipc_out.send(mod_id, &response) {
            tracing::debug!(mod_id, "registration response not delivered: {e}");
        }
    }

    fn relay_client_log(&self, client_id: &str, msg: &IpcMessage) {
        let message = msg.payload_str("message");
        match msg.payload_str("level") {
            "trace" => tracing::trace!(client = %client_id, "{message}"),
            "debug" => tracing::debug!(client = %client_id, "{message}"),
            "warn" => tracing::warn!(client = %client_id, "{message}"),
            "error" | "fatal" => tracing::error!(client = %client_id, "{message}"),
            _ => tracing::info!(client = %client_id, "{message}"),
        }
    }

    fn send_mod_roster(&self, client_id: &str) {
        let mods: Vec<Value> = self
            .registry
            .mod_infos()
            .into_iter()
            .map(|m| {
                json!({
                    "mod_id": m.mod_id,
                    "name": m.display_name,
                    "version": m.version,
                    "type": m.class.as_str(),
                    "registered": m.registered,
                })
            })
            .collect();
        let response = IpcMessage::new(
            kind::GET_MODS_RESPONSE,
            crate::ipc::TARGET_FRAMEWORK,
            client_id,
            json!({ "mods": mods }),
        );
        if let Err(e) = self.ipc_out.send(client_id, &response) {
            tracing::debug!(client = %client_id, "mod roster not delivered: {e}");
        }
    }

    fn require_priority(&self, client_id: &str, command: &str) -> bool {
        if classify(client_id) == ModClass::Priority {
            return true;
        }
        tracing::warn!(client = %client_id, command, "command from non-priority mod ignored");
        false
    }

    // ------------------------------------------------------------------
    // Server events
    // ------------------------------------------------------------------

    fn handle_framework_event(&mut self, event: FrameworkEvent) {
        match event {
            FrameworkEvent::ItemReceived(item) => {
                if let Some(pending) =
                    self.router
                        .route_item_receipt(item.item_id, &item.item_name, &item.player_name)
                {
                    self.pending_actions.push(pending);
                }
                self.session.increment_received_item_index();
                self.persist_session();
            }
            FrameworkEvent::LocationScout(results) => {
                self.router.deliver_scout_results(&results);
            }
            FrameworkEvent::Lifecycle(LifecycleSignal::SlotConnected(info)) => {
                self.on_slot_connected(info);
            }
            FrameworkEvent::Lifecycle(LifecycleSignal::Disconnected) => {
                if self.state.get() == LifecycleState::Active {
                    self.begin_resync();
                    self.transition(LifecycleState::Resyncing, "server connection lost");
                }
            }
            FrameworkEvent::Error {
                code,
                message,
                details,
            } => {
                self.router.broadcast_error(code, &message, &details);
            }
            FrameworkEvent::ApMessage { kind, message } => {
                self.router.broadcast_ap_message(&kind, &message);
            }
        }
    }

    fn on_slot_connected(&mut self, info: SlotInfo) {
        self.pending_slot_info = Some(info);
        match self.state.get() {
            LifecycleState::Connecting => {
                self.transition(LifecycleState::Syncing, "connected to server");
            }
            LifecycleState::Resyncing => {
                self.apply_authoritative_checked_set();
                self.transition(LifecycleState::Active, "reconnected");
            }
            other => {
                tracing::debug!(state = other.as_str(), "slot connected outside connect flow");
            }
        }
    }

    fn apply_authoritative_checked_set(&mut self) {
        if let Some(info) = self.pending_slot_info.take() {
            let set: BTreeSet<i64> = info.checked_locations.iter().copied().collect();
            tracing::info!(count = set.len(), "applying server checked-location set");
            self.session.set_checked_locations(set);
        }
    }

    // ------------------------------------------------------------------
    // State evaluation
    // ------------------------------------------------------------------

    fn evaluate_state(&mut self) {
        let elapsed = self.state.elapsed();
        match self.state.get() {
            LifecycleState::PriorityRegistration => self.evaluate_priority_registration(elapsed),
            LifecycleState::Registration => self.evaluate_registration(elapsed),
            LifecycleState::Connecting => self.evaluate_connecting(elapsed),
            LifecycleState::Syncing => self.evaluate_syncing(),
            LifecycleState::Active => self.evaluate_active(),
            LifecycleState::Resyncing => self.evaluate_resyncing(elapsed),
            LifecycleState::Discovery => {
                // Re-entered via cmd_restart; run the full pass again.
                self.continue_bringup();
            }
            _ => {}
        }
    }

    fn evaluate_priority_registration(&mut self, elapsed: Duration) {
        if self.registry.all_priority_registered() {
            self.transition(LifecycleState::Registration, "all priority clients registered");
            return;
        }
        if elapsed >= Duration::from_millis(self.options.timeouts.priority_registration_ms) {
            tracing::warn!("priority registration timeout, continuing");
            self.router.broadcast_error(
                ErrorCode::RegistrationTimeout,
                "priority registration timed out",
                "",
            );
            self.transition(LifecycleState::Registration, "priority timeout");
        }
    }

    fn evaluate_registration(&mut self, elapsed: Duration) {
        if self.registry.all_registered() {
            self.transition(LifecycleState::Connecting, "all mods registered");
            self.start_connection();
            return;
        }
        if elapsed >= Duration::from_millis(self.options.timeouts.registration_ms) {
            let pending = self.registry.pending();
            tracing::warn!(pending = pending.len(), "registration timeout");
            self.router.broadcast_error(
                ErrorCode::RegistrationTimeout,
                "registration timed out",
                &pending.join(", "),
            );
            self.transition(LifecycleState::Connecting, "registration timeout");
            self.start_connection();
        }
    }

    fn evaluate_connecting(&mut self, elapsed: Duration) {
        if elapsed >= Duration::from_millis(self.options.timeouts.connection_ms) {
            self.transition(LifecycleState::ErrorState, "connection timeout");
            self.router.broadcast_error(
                ErrorCode::ConnectionFailed,
                "failed to connect to server",
                "connection timed out",
            );
        }
    }

    fn evaluate_syncing(&mut self) {
        if !self.session_loaded {
            match self.session.load(&self.paths.session_state_path()) {
                Ok(loaded) => {
                    if loaded {
                        tracing::info!("resumed previous session state");
                    }
                }
                Err(e) => tracing::error!("session state load failed, starting fresh: {e}"),
            }
            self.session_loaded = true;
        }

        let current = self
            .capabilities
            .checksum(&self.game_name, &self.options.ap_server.slot_name);
        if !self.session.validate_checksum(&current) {
            self.transition(LifecycleState::ErrorState, "checksum mismatch");
            self.router.broadcast_error(
                ErrorCode::ChecksumMismatch,
                "mod ecosystem changed since generation",
                "regenerate the multiworld data",
            );
            return;
        }
        if self.session.checksum().is_empty() {
            self.session.set_checksum(&current);
        }

        self.apply_authoritative_checked_set();
        self.session.set_identity(&self.game_name, &self.options.ap_server.slot_name);

        self.transition(LifecycleState::Active, "sync complete");
        lock_server(&self.server).send_status(SlotStatus::Playing);
        self.session.touch();
        self.persist_session();
        self.last_heartbeat = Instant::now();
    }

    fn evaluate_active(&mut self) {
        if self.last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            self.session.touch();
            self.persist_session();
            self.last_heartbeat = Instant::now();
        }
    }

    fn evaluate_resyncing(&mut self, elapsed: Duration) {
        if elapsed >= Duration::from_millis(self.options.timeouts.connection_ms) * 2 {
            self.transition(LifecycleState::ErrorState, "reconnection failed");
            self.router.broadcast_error(
                ErrorCode::ConnectionFailed,
                "failed to reconnect to server",
                "resync timed out",
            );
            return;
        }

        // Reconnection attempts follow the configured backoff schedule.
        if self.options.ap_server.auto_reconnect
            && self.resync_attempts < self.options.retry.max_retries
            && Instant::now() >= self.next_reconnect_at
        {
            let delay = backoff_delay(&self.options.retry, self.resync_attempts);
            self.resync_attempts += 1;
            self.next_reconnect_at = Instant::now() + delay;
            tracing::info!(attempt = self.resync_attempts, "reconnection attempt");
            self.start_connection();
        }
    }

    fn begin_resync(&mut self) {
        self.resync_attempts = 0;
        self.next_reconnect_at = Instant::now();
    }

    // ------------------------------------------------------------------
    // Commands (priority clients only; gated by the caller)
    // ------------------------------------------------------------------

    fn cmd_restart(&mut self) {
        if self.state.get() != LifecycleState::ErrorState {
            tracing::warn!(
                state = self.state.get().as_str(),
                "restart ignored outside ERROR_STATE"
            );
            return;
        }
        tracing::info!("restart command received");
        self.registry.reset_registrations();
        self.transition(LifecycleState::Discovery, "restarting");
    }

    fn cmd_resync(&mut self) {
        if self.state.get() != LifecycleState::Active {
            tracing::warn!(state = self.state.get().as_str(), "resync ignored outside ACTIVE");
            return;
        }
        tracing::info!("resync command received");
        lock_server(&self.server).disconnect();
        self.begin_resync();
        self.transition(LifecycleState::Resyncing, "manual resync requested");
    }

    fn cmd_reconnect(&mut self) {
        tracing::info!("reconnect command received");
        lock_server(&self.server).disconnect();
        self.transition(LifecycleState::Connecting, "reconnecting to server");
        self.start_connection();
    }

    // ------------------------------------------------------------------
    // Connection plumbing
    // ------------------------------------------------------------------

    fn start_connection(&mut self) {
        let ap = self.options.ap_server.clone();
        let uuid = format!("APFramework_{}", uuid::Uuid::new_v4());

        self.session.set_server_info(&ap.server, ap.port);
        if let Err(e) = lock_server(&self.server).connect(
            &ap.server,
            ap.port,
            &self.game_name,
            &uuid,
            &ap.slot_name,
            &ap.password,
        ) {
            tracing::error!("server connection attempt failed: {e}");
        }

        if self.poller.is_none() {
            self.poller = Some(PollingWorker::start(
                Arc::clone(&self.server),
                Duration::from_millis(self.options.threading.polling_interval_ms),
                self.options.threading.queue_max_size,
            ));
        }
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    fn report_queue_drops(&mut self) {
        let mut dropped = self.ipc.take_dropped();
        if let Some(poller) = &self.poller {
            dropped += poller.take_dropped();
        }
        if dropped > 0 {
            self.router.broadcast_error(
                ErrorCode::MessageDropped,
                &format!("{dropped} queued messages dropped"),
                "queue overflow",
            );
        }
    }

    fn sweep_pending_actions(&mut self) {
        let deadline = Duration::from_millis(self.options.timeouts.action_execution_ms);
        let mut expired = Vec::new();
        self.pending_actions.retain(|pending| {
            if pending.started_at.elapsed() >= deadline {
                expired.push((pending.mod_id.clone(), pending.item_name.clone()));
                false
            } else {
                true
            }
        });
        for (mod_id, item_name) in expired {
            tracing::warn!(mod_id = %mod_id, item_name = %item_name, "action timed out");
            self.router.broadcast_error(
                ErrorCode::ActionTimeout,
                &format!("no action_result from {mod_id} for {item_name}"),
                "",
            );
        }
    }

    fn persist_session(&self) {
        if let Err(e) = self.session.save(&self.paths.session_state_path()) {
            tracing::error!("failed to persist session state: {e}");
        }
    }

    fn transition(&mut self, state: LifecycleState, message: &str) {
        let old = self.state.get();
        self.state.set(state);
        tracing::info!(from = old.as_str(), to = state.as_str(), "state transition: {message}");
        self.router.broadcast_lifecycle(state, message);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop(Duration::from_millis(100));
        }
    }
}

/// Delay before reconnection attempt `attempt` (zero-based), capped at the
/// configured maximum.
fn backoff_delay(retry: &RetryOptions, attempt: u32) -> Duration {
    let factor = retry.backoff_multiplier.max(1.0).powi(attempt as i32);
    let ms = (retry.initial_delay_ms as f64 * factor).min(retry.max_delay_ms as f64);
    Duration::from_millis(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::test_support::{ScriptedSocket, ScriptedState};
    use crate::remote::SocketEvent;
    use crate::router::test_support::RecordingIpc;
    use crate::types::ReceivedItem;

    struct Fixture {
        coordinator: Coordinator,
        ipc: Arc<RecordingIpc>,
        socket_state: Arc<Mutex<ScriptedState>>,
        _dir: tempfile::TempDir,
    }

    fn write_manifest(root: &std::path::Path, mod_id: &str, body: &str) {
        let dir = root.join("mods").join(mod_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("manifest.json"), body).unwrap();
    }

    fn fixture_with(options: Options, manifests: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (mod_id, body) in manifests {
            write_manifest(dir.path(), mod_id, body);
        }

        let (socket, socket_state) = ScriptedSocket::new();
        let mut coordinator = Coordinator::new(
            options,
            LoadOutcome::Defaults,
            FrameworkPaths::new(dir.path()),
            Box::new(socket),
        )
        .unwrap();

        // Swap the recording outbound in for broadcast observation.
        let ipc = Arc::new(RecordingIpc::default());
        coordinator.ipc_out = ipc.clone();
        coordinator.router = MessageRouter::new(
            Arc::clone(&coordinator.capabilities),
            Arc::clone(&coordinator.session),
            ipc.clone() as Arc<dyn OutboundIpc>,
            Arc::clone(&coordinator.server),
        );

        Fixture {
            coordinator,
            ipc,
            socket_state,
            _dir: dir,
        }
    }

    fn short_timeouts() -> Options {
        let mut options = Options::default();
        options.game_name = "game".into();
        options.ap_server.slot_name = "Bob".into();
        options.timeouts.priority_registration_ms = 30;
        options.timeouts.registration_ms = 30;
        options.timeouts.connection_ms = 150;
        options.timeouts.action_execution_ms = 30;
        options.threading.polling_interval_ms = 1;
        options
    }

    fn register_msg(mod_id: &str) -> IpcMessage {
        IpcMessage::new(
            kind::REGISTER,
            mod_id,
            "framework",
            serde_json::json!({"mod_id": mod_id, "version": "1.0.0"}),
        )
    }

    fn tick_until(fx: &mut Fixture, target: LifecycleState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while fx.coordinator.state() != target {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {target}, stuck in {}",
                fx.coordinator.state()
            );
            fx.coordinator.tick();
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    const PRIORITY_MOD: &str = r#"{"mod_id": "archipelago.game.core", "version": "1.0.0"}"#;
    const REGULAR_MOD: &str = r#"{"mod_id": "fancy.hats", "version": "1.0.0"}"#;

    #[test]
    fn bringup_reaches_priority_registration() {
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD), ("fancy.hats", REGULAR_MOD)],
        );
        fx.coordinator.init();
        assert_eq!(fx.coordinator.state(), LifecycleState::PriorityRegistration);
        assert_eq!(fx.coordinator.registry().count(), 2);
        assert!(fx.coordinator.capabilities().base_id() == 6_942_067);

        // Every transition so far was broadcast.
        let states: Vec<String> = fx
            .ipc
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == kind::LIFECYCLE)
            .map(|m| m.payload_str("state").to_string())
            .collect();
        assert_eq!(
            states,
            vec![
                "INITIALIZATION",
                "DISCOVERY",
                "VALIDATION",
                "GENERATION",
                "PRIORITY_REGISTRATION"
            ]
        );
    }

    #[test]
    fn bringup_skips_priority_phase_without_priority_mods() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        assert_eq!(fx.coordinator.state(), LifecycleState::Registration);
    }

    #[test]
    fn registration_timeouts_walk_to_connecting() {
        // Nobody ever registers; both phases elapse.
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD), ("fancy.hats", REGULAR_MOD)],
        );
        fx.coordinator.init();
        tick_until(&mut fx, LifecycleState::Registration);
        tick_until(&mut fx, LifecycleState::Connecting);

        let states: Vec<String> = fx
            .ipc
            .broadcasts
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.kind == kind::LIFECYCLE)
            .map(|m| m.payload_str("state").to_string())
            .collect();
        assert!(states.contains(&"REGISTRATION".to_string()));
        assert!(states.contains(&"CONNECTING".to_string()));

        // Connection attempt was made with the configured coordinates.
        let socket = fx.socket_state.lock().unwrap();
        assert_eq!(socket.connects.len(), 1);
        assert_eq!(socket.connects[0].0, "localhost");
        assert_eq!(socket.connects[0].1, 38281);
    }

    #[test]
    fn conflict_goes_to_error_state() {
        // Duplicate item across two mods.
        let a = r#"{"mod_id": "a", "items": [{"name": "Boots"}]}"#;
        let b = r#"{"mod_id": "b", "items": [{"name": "Boots"}]}"#;
        let mut fx = fixture_with(short_timeouts(), &[("a", a), ("b", b)]);
        fx.coordinator.init();
        assert_eq!(fx.coordinator.state(), LifecycleState::ErrorState);

        let broadcasts = fx.ipc.broadcasts.lock().unwrap();
        let error = broadcasts.iter().find(|m| m.kind == kind::ERROR).unwrap();
        assert_eq!(error.payload_str("code"), "CONFLICT_DETECTED");
    }

    #[test]
    fn registration_gating() {
        // Registering outside the window is rejected and does not mutate
        // the set; regular mods cannot register in the priority phase.
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD), ("fancy.hats", REGULAR_MOD)],
        );

        // Before init: UNINITIALIZED rejects.
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        assert!(!fx.coordinator.registry().is_registered("fancy.hats"));

        fx.coordinator.init();
        assert_eq!(fx.coordinator.state(), LifecycleState::PriorityRegistration);

        // Regular mod in the priority phase: rejected.
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        assert!(!fx.coordinator.registry().is_registered("fancy.hats"));
        let rejection = fx.ipc.sent_to("fancy.hats").pop().unwrap();
        assert!(!rejection.payload_bool("success"));

        // Priority mod registers in the priority phase.
        fx.coordinator.handle_ipc_event(IpcEvent::Message(
            "archipelago.game.core".into(),
            register_msg("archipelago.game.core"),
        ));
        assert!(fx.coordinator.registry().is_registered("archipelago.game.core"));
        let accepted = fx.ipc.sent_to("archipelago.game.core").pop().unwrap();
        assert!(accepted.payload_bool("success"));

        // All priority registered: next tick enters REGISTRATION, where the
        // regular mod now succeeds.
        fx.coordinator.tick();
        assert_eq!(fx.coordinator.state(), LifecycleState::Registration);
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        assert!(fx.coordinator.registry().is_registered("fancy.hats"));

        // Unknown mods are rejected even inside the window.
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("ghost".into(), register_msg("ghost")));
        let rejection = fx.ipc.sent_to("ghost").pop().unwrap();
        assert!(!rejection.payload_bool("success"));
        assert_eq!(rejection.payload_str("reason"), "unknown mod_id");
    }

    #[test]
    fn priority_commands_ignored_from_regular_mods() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        let before = fx.coordinator.state();

        let restart = IpcMessage::new(kind::CMD_RESTART, "fancy.hats", "framework", Value::Null);
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), restart));
        assert_eq!(fx.coordinator.state(), before);
    }

    #[test]
    fn cmd_restart_reruns_bringup_from_error_state() {
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD)],
        );
        fx.coordinator.init();

        let restart = IpcMessage::new(
            kind::CMD_RESTART,
            "archipelago.game.core",
            "framework",
            Value::Null,
        );

        // Only honored in ERROR_STATE: ignored during registration.
        fx.coordinator.handle_ipc_event(IpcEvent::Message(
            "archipelago.game.core".into(),
            restart.clone(),
        ));
        assert_eq!(fx.coordinator.state(), LifecycleState::PriorityRegistration);

        fx.coordinator.handle_ipc_event(IpcEvent::Message(
            "archipelago.game.core".into(),
            register_msg("archipelago.game.core"),
        ));
        assert!(fx.coordinator.registry().is_registered("archipelago.game.core"));
        tick_until(&mut fx, LifecycleState::Connecting);
        // The server never answers; the connection timeout is fatal.
        tick_until(&mut fx, LifecycleState::ErrorState);

        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("archipelago.game.core".into(), restart));
        assert_eq!(fx.coordinator.state(), LifecycleState::Discovery);

        // The next tick re-runs discovery and lands back in the priority
        // window with registrations cleared.
        fx.coordinator.tick();
        assert_eq!(fx.coordinator.state(), LifecycleState::PriorityRegistration);
        assert!(!fx.coordinator.registry().is_registered("archipelago.game.core"));
        assert_eq!(fx.coordinator.registry().count(), 1);
    }

    #[test]
    fn connect_flow_reaches_active_and_applies_server_state() {
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD)],
        );
        fx.coordinator.init();
        fx.coordinator.handle_ipc_event(IpcEvent::Message(
            "archipelago.game.core".into(),
            register_msg("archipelago.game.core"),
        ));
        tick_until(&mut fx, LifecycleState::Connecting);

        // Server answers: room info, then the slot connects with an
        // authoritative checked set.
        fx.socket_state.lock().unwrap().batches.push_back(vec![
            SocketEvent::RoomInfo,
            SocketEvent::SlotConnected(SlotInfo {
                slot_id: 1,
                slot_name: "Bob".into(),
                checked_locations: vec![11, 12],
                missing_locations: vec![],
            }),
        ]);

        tick_until(&mut fx, LifecycleState::Active);
        assert!(fx.coordinator.session().is_location_checked(11));
        assert!(fx.coordinator.session().is_location_checked(12));

        // Slot authentication used the configured credentials and Playing
        // was reported after sync.
        let socket = fx.socket_state.lock().unwrap();
        assert_eq!(socket.slot_connects[0].0, "Bob");
        assert_eq!(socket.statuses, vec![SlotStatus::Playing]);
    }

    #[test]
    fn connecting_timeout_is_fatal() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        tick_until(&mut fx, LifecycleState::Connecting);
        tick_until(&mut fx, LifecycleState::ErrorState);

        let broadcasts = fx.ipc.broadcasts.lock().unwrap();
        assert!(
            broadcasts
                .iter()
                .any(|m| m.kind == kind::ERROR && m.payload_str("code") == "CONNECTION_FAILED")
        );
    }

    #[test]
    fn checksum_mismatch_blocks_active() {
        // A stored checksum from a different ecosystem refuses to sync.
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "fancy.hats", REGULAR_MOD);
        let stale = crate::types::SessionState {
            checksum: "X".into(),
            ..Default::default()
        };
        std::fs::write(
            dir.path().join("session_state.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        let (socket, socket_state) = ScriptedSocket::new();
        let mut coordinator = Coordinator::new(
            short_timeouts(),
            LoadOutcome::Defaults,
            FrameworkPaths::new(dir.path()),
            Box::new(socket),
        )
        .unwrap();
        let ipc = Arc::new(RecordingIpc::default());
        coordinator.ipc_out = ipc.clone();
        coordinator.router = MessageRouter::new(
            Arc::clone(&coordinator.capabilities),
            Arc::clone(&coordinator.session),
            ipc.clone() as Arc<dyn OutboundIpc>,
            Arc::clone(&coordinator.server),
        );
        let mut fx = Fixture {
            coordinator,
            ipc,
            socket_state,
            _dir: dir,
        };

        fx.coordinator.init();
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        tick_until(&mut fx, LifecycleState::Connecting);
        fx.socket_state.lock().unwrap().batches.push_back(vec![
            SocketEvent::RoomInfo,
            SocketEvent::SlotConnected(SlotInfo::default()),
        ]);
        tick_until(&mut fx, LifecycleState::ErrorState);

        let broadcasts = fx.ipc.broadcasts.lock().unwrap();
        assert!(
            broadcasts
                .iter()
                .any(|m| m.kind == kind::ERROR && m.payload_str("code") == "CHECKSUM_MISMATCH")
        );
        // No Playing status was ever sent.
        assert!(fx.socket_state.lock().unwrap().statuses.is_empty());
    }

    #[test]
    fn item_receipt_counts_and_persists() {
        // Receipt end-to-end through the coordinator: dispatch, count, persist.
        let manifest = r#"{
            "mod_id": "a",
            "items": [{
                "name": "Potion",
                "amount": -1,
                "action": "Inv.Add",
                "args": [
                    {"name": "id", "type": "number", "value": "<GET_ITEM_ID>"},
                    {"name": "n", "type": "number", "value": "<GET_PROGRESSION_COUNT>"}
                ]
            }]
        }"#;
        let mut fx = fixture_with(short_timeouts(), &[("a", manifest)]);
        fx.coordinator.init();
        let item_id = fx
            .coordinator
            .capabilities()
            .lookup_item_id("a", "Potion")
            .unwrap();
        fx.coordinator.session().set_item_progression_count(item_id, 2);

        fx.coordinator
            .handle_framework_event(FrameworkEvent::ItemReceived(ReceivedItem {
                item_id,
                location_id: 0,
                item_name: "Potion".into(),
                player_name: "Bob".into(),
                index: 0,
            }));

        assert_eq!(fx.coordinator.session().received_item_index(), 1);
        let sent = fx.ipc.sent_to("a");
        assert_eq!(sent[0].kind, kind::EXECUTE_ACTION);
        let args = sent[0].payload["args"].as_array().unwrap();
        assert_eq!(args[0]["value"], item_id);
        assert_eq!(args[1]["value"], 2);

        // The receipt persisted the state.
        let restored = SessionStore::new();
        assert!(
            restored
                .load(&fx.coordinator.paths.session_state_path())
                .unwrap()
        );
        assert_eq!(restored.received_item_index(), 1);
    }

    #[test]
    fn disconnect_in_active_resyncs_then_fails() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        tick_until(&mut fx, LifecycleState::Connecting);
        fx.socket_state.lock().unwrap().batches.push_back(vec![
            SocketEvent::RoomInfo,
            SocketEvent::SlotConnected(SlotInfo::default()),
        ]);
        tick_until(&mut fx, LifecycleState::Active);

        fx.coordinator
            .handle_framework_event(FrameworkEvent::Lifecycle(LifecycleSignal::Disconnected));
        assert_eq!(fx.coordinator.state(), LifecycleState::Resyncing);

        // No reconnection succeeds; after 2x the connection timeout the
        // machine gives up.
        tick_until(&mut fx, LifecycleState::ErrorState);
    }

    #[test]
    fn resync_recovers_on_slot_connected() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), register_msg("fancy.hats")));
        tick_until(&mut fx, LifecycleState::Connecting);
        fx.socket_state.lock().unwrap().batches.push_back(vec![
            SocketEvent::RoomInfo,
            SocketEvent::SlotConnected(SlotInfo::default()),
        ]);
        tick_until(&mut fx, LifecycleState::Active);

        fx.coordinator
            .handle_framework_event(FrameworkEvent::Lifecycle(LifecycleSignal::Disconnected));
        assert_eq!(fx.coordinator.state(), LifecycleState::Resyncing);

        fx.coordinator
            .handle_framework_event(FrameworkEvent::Lifecycle(LifecycleSignal::SlotConnected(
                SlotInfo::default(),
            )));
        assert_eq!(fx.coordinator.state(), LifecycleState::Active);
    }

    #[test]
    fn action_timeout_sweeps_and_broadcasts() {
        let manifest = r#"{
            "mod_id": "a",
            "items": [{"name": "Potion", "action": "Inv.Add"}]
        }"#;
        let mut fx = fixture_with(short_timeouts(), &[("a", manifest)]);
        fx.coordinator.init();
        let item_id = fx
            .coordinator
            .capabilities()
            .lookup_item_id("a", "Potion")
            .unwrap();

        fx.coordinator
            .handle_framework_event(FrameworkEvent::ItemReceived(ReceivedItem {
                item_id,
                location_id: 0,
                item_name: "Potion".into(),
                player_name: "Bob".into(),
                index: 0,
            }));
        assert_eq!(fx.coordinator.pending_actions.len(), 1);

        std::thread::sleep(Duration::from_millis(40));
        fx.coordinator.sweep_pending_actions();
        assert!(fx.coordinator.pending_actions.is_empty());
        let broadcasts = fx.ipc.broadcasts.lock().unwrap();
        assert!(
            broadcasts
                .iter()
                .any(|m| m.kind == kind::ERROR && m.payload_str("code") == "ACTION_TIMEOUT")
        );
    }

    #[test]
    fn action_result_clears_pending() {
        let manifest = r#"{
            "mod_id": "a",
            "items": [{"name": "Potion", "action": "Inv.Add"}]
        }"#;
        let mut fx = fixture_with(short_timeouts(), &[("a", manifest)]);
        fx.coordinator.init();
        let item_id = fx
            .coordinator
            .capabilities()
            .lookup_item_id("a", "Potion")
            .unwrap();
        fx.coordinator
            .handle_framework_event(FrameworkEvent::ItemReceived(ReceivedItem {
                item_id,
                location_id: 0,
                item_name: "Potion".into(),
                player_name: "Bob".into(),
                index: 0,
            }));

        let result = IpcMessage::new(
            kind::ACTION_RESULT,
            "a",
            "framework",
            serde_json::json!({
                "item_id": item_id,
                "item_name": "Potion",
                "success": true,
                "error": ""
            }),
        );
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("a".into(), result));
        assert!(fx.coordinator.pending_actions.is_empty());
        assert_eq!(fx.coordinator.session().item_progression_count(item_id), 1);
    }

    #[test]
    fn get_mods_returns_roster_to_priority_client() {
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD), ("fancy.hats", REGULAR_MOD)],
        );
        fx.coordinator.init();
        fx.coordinator.handle_ipc_event(IpcEvent::Message(
            "archipelago.game.core".into(),
            register_msg("archipelago.game.core"),
        ));

        let query = IpcMessage::new(
            kind::GET_MODS,
            "archipelago.game.core",
            "framework",
            Value::Null,
        );
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("archipelago.game.core".into(), query));

        let roster = fx
            .ipc
            .sent_to("archipelago.game.core")
            .into_iter()
            .find(|m| m.kind == kind::GET_MODS_RESPONSE)
            .unwrap();
        let mods = roster.payload["mods"].as_array().unwrap();
        assert_eq!(mods.len(), 2);
        let core = mods
            .iter()
            .find(|m| m["mod_id"] == "archipelago.game.core")
            .unwrap();
        assert_eq!(core["type"], "priority");
        assert_eq!(core["registered"], true);
        let hats = mods.iter().find(|m| m["mod_id"] == "fancy.hats").unwrap();
        assert_eq!(hats["type"], "regular");
        assert_eq!(hats["registered"], false);

        // Regular mods get nothing back.
        let query = IpcMessage::new(kind::GET_MODS, "fancy.hats", "framework", Value::Null);
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), query));
        assert!(
            !fx.ipc
                .sent_to("fancy.hats")
                .iter()
                .any(|m| m.kind == kind::GET_MODS_RESPONSE)
        );
    }

    #[test]
    fn send_message_relays_to_server_chat() {
        let mut fx = fixture_with(
            short_timeouts(),
            &[("archipelago.game.core", PRIORITY_MOD)],
        );
        fx.coordinator.init();

        let say = IpcMessage::new(
            kind::SEND_MESSAGE,
            "archipelago.game.core",
            "framework",
            serde_json::json!({"message": "hello world"}),
        );
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("archipelago.game.core".into(), say));
        assert_eq!(
            fx.socket_state.lock().unwrap().says,
            vec!["hello world".to_string()]
        );

        // Not honored from regular mods.
        let say = IpcMessage::new(
            kind::SEND_MESSAGE,
            "someone.else",
            "framework",
            serde_json::json!({"message": "spoofed"}),
        );
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("someone.else".into(), say));
        assert_eq!(fx.socket_state.lock().unwrap().says.len(), 1);
    }

    #[test]
    fn client_broadcast_relays_to_other_clients() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();

        let msg = IpcMessage::new(
            kind::BROADCAST,
            "fancy.hats",
            "broadcast",
            serde_json::json!({"custom": "payload"}),
        );
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), msg));

        let relayed = fx.ipc.relayed.lock().unwrap();
        assert_eq!(relayed.len(), 1);
        assert_eq!(relayed[0].0, "fancy.hats");
        assert_eq!(relayed[0].1.kind, kind::BROADCAST);
        assert_eq!(relayed[0].1.source, "fancy.hats");
        assert_eq!(relayed[0].1.payload["custom"], "payload");
    }

    #[test]
    fn reconnect_backoff_grows_and_caps() {
        let retry = RetryOptions {
            max_retries: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 350,
        };
        assert_eq!(backoff_delay(&retry, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&retry, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&retry, 2), Duration::from_millis(350));
        assert_eq!(backoff_delay(&retry, 3), Duration::from_millis(350));
    }

    #[test]
    fn unknown_message_type_is_dropped() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        let before = fx.coordinator.state();
        let odd = IpcMessage::new("telepathy", "fancy.hats", "framework", Value::Null);
        fx.coordinator
            .handle_ipc_event(IpcEvent::Message("fancy.hats".into(), odd));
        assert_eq!(fx.coordinator.state(), before);
    }

    #[test]
    fn shutdown_persists_session_last() {
        let mut fx = fixture_with(short_timeouts(), &[("fancy.hats", REGULAR_MOD)]);
        fx.coordinator.init();
        fx.coordinator.session().add_checked_location(42);
        let path = fx.coordinator.paths.session_state_path();
        fx.coordinator.shutdown();

        let restored = SessionStore::new();
        assert!(restored.load(&path).unwrap());
        assert!(restored.is_location_checked(42));
        assert!(restored.snapshot().last_active > 0);
    }
}
