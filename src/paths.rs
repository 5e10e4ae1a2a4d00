//! Framework folder layout.
//!
//! All on-disk artifacts live under one root directory supplied by the
//! host. Nothing here is global; the value is constructed once at startup
//! and handed to the components that persist files.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FrameworkPaths {
    root: PathBuf,
}

impl FrameworkPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory scanned for `<mod>/manifest.json` files.
    pub fn mods_dir(&self) -> PathBuf {
        self.root.join("mods")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn options_path(&self) -> PathBuf {
        self.root.join("options.json")
    }

    pub fn session_state_path(&self) -> PathBuf {
        self.root.join("session_state.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn capabilities_config_path(&self, slot: &str) -> PathBuf {
        self.output_dir().join(format!("AP_Capabilities_{slot}.json"))
    }

    /// Path of the IPC socket for a game. Lives under the root so multiple
    /// games on one machine never collide.
    pub fn ipc_socket_path(&self, game: &str) -> PathBuf {
        self.root.join(format!("APFramework_{game}.sock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted() {
        let paths = FrameworkPaths::new("/srv/apf");
        assert_eq!(paths.mods_dir(), PathBuf::from("/srv/apf/mods"));
        assert_eq!(
            paths.session_state_path(),
            PathBuf::from("/srv/apf/session_state.json")
        );
        assert_eq!(
            paths.capabilities_config_path("Bob"),
            PathBuf::from("/srv/apf/output/AP_Capabilities_Bob.json")
        );
        assert_eq!(
            paths.ipc_socket_path("Hollow Knight"),
            PathBuf::from("/srv/apf/APFramework_Hollow Knight.sock")
        );
    }
}
