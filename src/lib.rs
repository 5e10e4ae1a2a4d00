#![forbid(unsafe_code)]

//! Coordination core for an Archipelago multi-world mod framework.
//!
//! A host process embeds the [`Coordinator`] and drives it once per game
//! loop iteration. Mod plugins connect over a local IPC socket, declare
//! their capabilities through manifests, and receive item actions as the
//! remote randomizer server grants them.

pub mod capabilities;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ipc;
pub mod manifest;
mod paths;
pub mod registry;
pub mod remote;
pub mod router;
pub mod session;
pub mod telemetry;
pub mod types;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the main surface at the crate root for convenience.
pub use crate::capabilities::{Capabilities, DEFAULT_ID_BASE};
pub use crate::config::{LoadOutcome, Options};
pub use crate::coordinator::Coordinator;
pub use crate::ipc::{IpcMessage, IpcServer, IpcServerConfig};
pub use crate::manifest::{ManifestError, parse_manifest};
pub use crate::paths::FrameworkPaths;
pub use crate::registry::{ModRegistry, classify};
pub use crate::remote::{
    AdapterError, FrameworkEvent, LifecycleSignal, PollingWorker, RandomizerSocket, ServerAdapter,
    SocketEvent,
};
pub use crate::router::MessageRouter;
pub use crate::session::SessionStore;
pub use crate::types::{
    ActionArg, ArgType, Conflict, ConflictKind, ErrorCode, ItemOwnership, ItemType,
    LifecycleState, LocationOwnership, Manifest, ModClass, ReceivedItem, ScoutResult, SessionState,
    SlotInfo, SlotStatus, ValidationReport,
};
