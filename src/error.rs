use thiserror::Error;

use crate::ipc::IpcError;
use crate::manifest::ManifestError;
use crate::remote::AdapterError;
use crate::session::SessionError;

/// Crate-level convenience error: a thin wrapper over the component errors,
/// not a god type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
