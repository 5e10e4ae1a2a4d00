//! Local IPC: wire message, length-prefixed framing, and the socket server.

pub mod frame;
pub mod message;
mod server;

pub use frame::{FrameDecoder, FrameError, MAX_FRAME_BYTES, encode_frame};
pub use message::{IpcMessage, TARGET_BROADCAST, TARGET_FRAMEWORK, kind};
pub use server::{IpcError, IpcEvent, IpcSender, IpcServer, IpcServerConfig};
