//! Message routing between clients, the session store, and the server.
//!
//! Translates item/location ids to mod-local names and back, resolves
//! action-argument placeholders, dispatches EXECUTE_ACTION to the owning
//! client, and forwards checks and scouts upstream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{Value, json};

use crate::capabilities::Capabilities;
use crate::ipc::{IpcError, IpcMessage, IpcSender};
use crate::remote::{ServerHandle, lock as lock_server};
use crate::session::SessionStore;
use crate::types::{
    ActionArg, ActionResult, ErrorCode, ItemOwnership, LifecycleState, PendingAction, ScoutResult,
};

const GET_ITEM_ID: &str = "<GET_ITEM_ID>";
const GET_ITEM_NAME: &str = "<GET_ITEM_NAME>";
const GET_PROGRESSION_COUNT: &str = "<GET_PROGRESSION_COUNT>";

/// Outbound IPC seam; implemented by [`IpcSender`], recorded in tests.
pub trait OutboundIpc: Send + Sync {
    fn send(&self, client_id: &str, msg: &IpcMessage) -> Result<(), IpcError>;
    fn broadcast(&self, msg: &IpcMessage);
    fn broadcast_except(&self, msg: &IpcMessage, except: &str);
}

impl OutboundIpc for IpcSender {
    fn send(&self, client_id: &str, msg: &IpcMessage) -> Result<(), IpcError> {
        IpcSender::send(self, client_id, msg)
    }

    fn broadcast(&self, msg: &IpcMessage) {
        IpcSender::broadcast(self, msg)
    }

    fn broadcast_except(&self, msg: &IpcMessage, except: &str) {
        IpcSender::broadcast_except(self, msg, except)
    }
}

pub struct MessageRouter {
    capabilities: Arc<Capabilities>,
    session: Arc<SessionStore>,
    ipc: Arc<dyn OutboundIpc>,
    server: ServerHandle,
    /// location_id → every mod that scouted it and still awaits results.
    pending_scouts: Mutex<HashMap<i64, Vec<String>>>,
}

impl MessageRouter {
    pub fn new(
        capabilities: Arc<Capabilities>,
        session: Arc<SessionStore>,
        ipc: Arc<dyn OutboundIpc>,
        server: ServerHandle,
    ) -> Self {
        Self {
            capabilities,
            session,
            ipc,
            server,
            pending_scouts: Mutex::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Inbound items
    // ------------------------------------------------------------------

    /// Route a received item to its owning mod. Returns the pending
    /// dispatch, or `None` when the item is unknown or carries no action
    /// (the receipt is still counted by the coordinator either way).
    pub fn route_item_receipt(
        &self,
        item_id: i64,
        item_name: &str,
        sender: &str,
    ) -> Option<PendingAction> {
        let Some(item) = self.capabilities.owner_of_item(item_id) else {
            tracing::warn!(item_id, "unknown item id, dropping receipt");
            return None;
        };

        if item.action.is_empty() {
            tracing::debug!(item_name, "item has no action");
            return None;
        }

        let args = self.resolve_args(&item, item_name);
        let msg =
            IpcMessage::execute_action(&item.mod_id, item_id, item_name, &item.action, &args, sender);
        if let Err(e) = self.ipc.send(&item.mod_id, &msg) {
            tracing::warn!(mod_id = %item.mod_id, "execute_action delivery failed: {e}");
            self.broadcast_error(
                ErrorCode::IpcFailed,
                "execute_action delivery failed",
                &item.mod_id,
            );
        }

        tracing::debug!(
            mod_id = %item.mod_id,
            item_name,
            action = %item.action,
            "routed item receipt"
        );

        Some(PendingAction {
            mod_id: item.mod_id,
            item_id,
            item_name: item_name.to_string(),
            action: item.action,
            started_at: Instant::now(),
        })
    }

    /// Substitute placeholder values. Only an exact full-string match on a
    /// string value is a placeholder; everything else, `property` paths
    /// included, passes through untouched.
    fn resolve_args(&self, item: &ItemOwnership, item_name: &str) -> Vec<ActionArg> {
        item.args
            .iter()
            .map(|arg| {
                let value = match arg.value.as_str() {
                    Some(GET_ITEM_ID) => json!(item.item_id),
                    Some(GET_ITEM_NAME) => json!(item_name),
                    Some(GET_PROGRESSION_COUNT) => {
                        json!(self.session.item_progression_count(item.item_id))
                    }
                    _ => arg.value.clone(),
                };
                ActionArg {
                    name: arg.name.clone(),
                    arg_type: arg.arg_type,
                    value,
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Location checks
    // ------------------------------------------------------------------

    /// Resolve and forward one check. Returns the location id, or 0 when
    /// the location is unknown or already checked.
    pub fn route_check(&self, mod_id: &str, location_name: &str, instance: u32) -> i64 {
        let Some(location_id) = self
            .capabilities
            .lookup_location_id(mod_id, location_name, instance)
        else {
            tracing::warn!(mod_id, location_name, instance, "unknown location");
            return 0;
        };

        if self.session.is_location_checked(location_id) {
            tracing::debug!(location_name, "location already checked");
            return 0;
        }

        self.session.add_checked_location(location_id);
        lock_server(&self.server).send_location_checks(&[location_id]);
        tracing::info!(location_name, location_id, "location checked");
        location_id
    }

    /// Bulk variant over already-resolved ids; forwards only the ids not
    /// yet in the checked set.
    pub fn route_checks(&self, location_ids: &[i64]) -> Vec<i64> {
        let mut fresh = Vec::new();
        for &id in location_ids {
            if !self.session.is_location_checked(id) {
                self.session.add_checked_location(id);
                fresh.push(id);
            }
        }
        if !fresh.is_empty() {
            lock_server(&self.server).send_location_checks(&fresh);
        }
        fresh
    }

    // ------------------------------------------------------------------
    // Scouts
    // ------------------------------------------------------------------

    /// Resolve scout names (unknowns silently dropped), remember the
    /// requester per id, and forward the batch.
    pub fn route_scouts(&self, mod_id: &str, location_names: &[String], as_hint: bool) -> Vec<i64> {
        let mut ids = Vec::new();
        for name in location_names {
            if let Some(id) = self.capabilities.lookup_location_id(mod_id, name, 1) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return ids;
        }

        {
            let mut pending = self.lock_scouts();
            for &id in &ids {
                let requesters = pending.entry(id).or_default();
                if !requesters.iter().any(|r| r == mod_id) {
                    requesters.push(mod_id.to_string());
                }
            }
        }

        lock_server(&self.server).send_location_scouts(&ids, as_hint);
        ids
    }

    /// Deliver scout results, one `scout_results` message per requesting
    /// mod, consuming the pending entries.
    pub fn deliver_scout_results(&self, results: &[ScoutResult]) {
        let mut per_mod: HashMap<String, Vec<ScoutResult>> = HashMap::new();
        {
            let mut pending = self.lock_scouts();
            for result in results {
                let Some(requesters) = pending.remove(&result.location_id) else {
                    continue;
                };
                for requester in requesters {
                    per_mod.entry(requester).or_default().push(result.clone());
                }
            }
        }

        for (mod_id, rows) in per_mod {
            let msg = IpcMessage::scout_results(&mod_id, &rows);
            if let Err(e) = self.ipc.send(&mod_id, &msg) {
                tracing::warn!(mod_id = %mod_id, "scout_results delivery failed: {e}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Action results
    // ------------------------------------------------------------------

    pub fn handle_action_result(&self, result: &ActionResult) {
        if result.success {
            tracing::debug!(
                mod_id = %result.mod_id,
                item_name = %result.item_name,
                "action succeeded"
            );
            if result.item_id != 0 {
                self.session.increment_item_progression_count(result.item_id);
            }
        } else {
            tracing::warn!(
                mod_id = %result.mod_id,
                item_name = %result.item_name,
                error = %result.error,
                "action failed"
            );
            self.broadcast_error(
                ErrorCode::ActionFailed,
                &format!("action failed for {}", result.item_name),
                &result.error,
            );
        }
    }

    // ------------------------------------------------------------------
    // Broadcast helpers
    // ------------------------------------------------------------------

    pub fn broadcast_lifecycle(&self, state: LifecycleState, message: &str) {
        self.ipc.broadcast(&IpcMessage::lifecycle(state, message));
        tracing::info!(state = state.as_str(), "lifecycle broadcast: {message}");
    }

    pub fn broadcast_error(&self, code: ErrorCode, message: &str, details: &str) {
        self.ipc
            .broadcast(&IpcMessage::error(code, message, details));
        tracing::error!(code = code.as_str(), details, "error broadcast: {message}");
    }

    pub fn broadcast_ap_message(&self, kind: &str, message: &str) {
        self.ipc.broadcast(&IpcMessage::ap_message(kind, message));
    }

    fn lock_scouts(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Vec<String>>> {
        self.pending_scouts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Parse an `action_result` payload into its record form.
pub fn action_result_from_payload(mod_id: &str, payload: &Value) -> ActionResult {
    ActionResult {
        mod_id: mod_id.to_string(),
        item_id: payload.get("item_id").and_then(Value::as_i64).unwrap_or(0),
        item_name: payload
            .get("item_name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        success: payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        error: payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    }
}
