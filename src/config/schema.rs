use serde::{Deserialize, Serialize};

/// Framework options, read from `options.json` under the framework root.
/// Every field has a default; a missing file or missing keys simply use
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub game_name: String,
    pub id_base: i64,
    pub log_level: String,
    pub log_file: String,
    pub log_to_console: bool,
    pub timeouts: TimeoutOptions,
    pub retry: RetryOptions,
    pub threading: ThreadingOptions,
    pub ap_server: ApServerOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            game_name: String::new(),
            id_base: crate::capabilities::DEFAULT_ID_BASE,
            log_level: "info".to_string(),
            log_file: "ap_framework.log".to_string(),
            log_to_console: true,
            timeouts: TimeoutOptions::default(),
            retry: RetryOptions::default(),
            threading: ThreadingOptions::default(),
            ap_server: ApServerOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutOptions {
    pub priority_registration_ms: u64,
    pub registration_ms: u64,
    pub connection_ms: u64,
    pub ipc_message_ms: u64,
    pub action_execution_ms: u64,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            priority_registration_ms: 30_000,
            registration_ms: 60_000,
            connection_ms: 30_000,
            ipc_message_ms: 5_000,
            action_execution_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingOptions {
    pub polling_interval_ms: u64,
    pub ipc_poll_interval_ms: u64,
    pub queue_max_size: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for ThreadingOptions {
    fn default() -> Self {
        Self {
            polling_interval_ms: 16,
            ipc_poll_interval_ms: 10,
            queue_max_size: 1_000,
            shutdown_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApServerOptions {
    pub server: String,
    pub port: u16,
    pub slot_name: String,
    pub password: String,
    pub auto_reconnect: bool,
}

impl Default for ApServerOptions {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 38281,
            slot_name: String::new(),
            password: String::new(),
            auto_reconnect: true,
        }
    }
}
