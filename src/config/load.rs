use std::path::Path;

use crate::session::atomic_write;

use super::Options;

/// Outcome of an options load. `Invalid` means the file existed but did not
/// parse; the framework runs on defaults and broadcasts `CONFIG_INVALID`
/// once IPC is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Defaults,
    Invalid,
}

/// Load options from `path`. Never fails: a missing file or a malformed
/// document falls back entirely to defaults.
pub fn load_or_default(path: &Path) -> (Options, LoadOutcome) {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return (Options::default(), LoadOutcome::Defaults),
    };
    match serde_json::from_str::<Options>(&content) {
        Ok(options) => (options, LoadOutcome::Loaded),
        Err(e) => {
            tracing::warn!(path = %path.display(), "options file malformed, using defaults: {e}");
            (Options::default(), LoadOutcome::Invalid)
        }
    }
}

/// Persist options, pretty-printed, via temp-file-and-rename.
pub fn save(path: &Path, options: &Options) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(options)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    atomic_write(path, content.as_bytes())
}
