//! IPC wire message and the message-type vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{ActionArg, ErrorCode, LifecycleState, ScoutResult};

pub const TARGET_FRAMEWORK: &str = "framework";
pub const TARGET_BROADCAST: &str = "broadcast";

/// Message types on the client→framework and framework→client wire.
/// Unknown types are logged and dropped by the coordinator.
pub mod kind {
    pub const REGISTER: &str = "register";
    pub const REGISTRATION_RESPONSE: &str = "registration_response";
    pub const LOCATION_CHECK: &str = "location_check";
    pub const LOCATION_SCOUT: &str = "location_scout";
    pub const SCOUT_RESULTS: &str = "scout_results";
    pub const EXECUTE_ACTION: &str = "execute_action";
    pub const ACTION_RESULT: &str = "action_result";
    pub const LIFECYCLE: &str = "lifecycle";
    pub const ERROR: &str = "error";
    pub const AP_MESSAGE: &str = "ap_message";
    pub const LOG: &str = "log";
    pub const CMD_RESTART: &str = "cmd_restart";
    pub const CMD_RESYNC: &str = "cmd_resync";
    pub const CMD_RECONNECT: &str = "cmd_reconnect";
    pub const CALLBACK_ERROR: &str = "callback_error";
    pub const GET_MODS: &str = "get_mods";
    pub const GET_MODS_RESPONSE: &str = "get_mods_response";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const BROADCAST: &str = "broadcast";
}

/// One framed IPC message: `{type, source, target, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IpcMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub target: String,
    pub payload: Value,
}

impl IpcMessage {
    pub fn new(kind: &str, source: &str, target: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            payload,
        }
    }

    fn from_framework(kind: &str, target: &str, payload: Value) -> Self {
        Self::new(kind, TARGET_FRAMEWORK, target, payload)
    }

    pub fn registration_response(mod_id: &str, success: bool, reason: Option<&str>) -> Self {
        let mut payload = json!({ "success": success, "mod_id": mod_id });
        if let Some(reason) = reason {
            payload["reason"] = json!(reason);
        }
        Self::from_framework(kind::REGISTRATION_RESPONSE, mod_id, payload)
    }

    pub fn execute_action(
        mod_id: &str,
        item_id: i64,
        item_name: &str,
        action: &str,
        args: &[ActionArg],
        sender: &str,
    ) -> Self {
        Self::from_framework(
            kind::EXECUTE_ACTION,
            mod_id,
            json!({
                "item_id": item_id,
                "item_name": item_name,
                "action": action,
                "args": args,
                "sender": sender,
            }),
        )
    }

    pub fn scout_results(mod_id: &str, results: &[ScoutResult]) -> Self {
        let rows: Vec<Value> = results
            .iter()
            .map(|r| {
                json!({
                    "location_id": r.location_id,
                    "item_id": r.item_id,
                    "item_name": r.item_name,
                    "player_name": r.player_name,
                })
            })
            .collect();
        Self::from_framework(kind::SCOUT_RESULTS, mod_id, json!({ "results": rows }))
    }

    pub fn lifecycle(state: LifecycleState, message: &str) -> Self {
        Self::from_framework(
            kind::LIFECYCLE,
            TARGET_BROADCAST,
            json!({ "state": state.as_str(), "message": message }),
        )
    }

    pub fn error(code: ErrorCode, message: &str, details: &str) -> Self {
        Self::from_framework(
            kind::ERROR,
            TARGET_BROADCAST,
            json!({ "code": code.as_str(), "message": message, "details": details }),
        )
    }

    pub fn ap_message(message_type: &str, message: &str) -> Self {
        Self::from_framework(
            kind::AP_MESSAGE,
            TARGET_BROADCAST,
            json!({ "type": message_type, "message": message }),
        )
    }

    /// String payload field accessor with the wire's missing-key default.
    pub fn payload_str(&self, key: &str) -> &str {
        self.payload.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn payload_i64(&self, key: &str) -> i64 {
        self.payload.get(key).and_then(Value::as_i64).unwrap_or(0)
    }

    pub fn payload_bool(&self, key: &str) -> bool {
        self.payload
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
