//! Session state persistence.
//!
//! One [`SessionState`] per slot, guarded by a single mutex: mutators are
//! called from the main loop and the IPC worker, saves happen while the
//! lock is held. Saves are infrequent (material changes plus a 30 s
//! heartbeat), so holding the lock across the write is fine.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::types::SessionState;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session state parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub struct SessionStore {
    inner: Mutex<StoreState>,
}

struct StoreState {
    state: SessionState,
    loaded: bool,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreState {
                state: SessionState::default(),
                loaded: false,
            }),
        }
    }

    /// Load state from disk. Returns `Ok(false)` when no file exists yet
    /// (first run); a present-but-corrupt file is an error.
    pub fn load(&self, path: &Path) -> Result<bool, SessionError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no session state file");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let state: SessionState = serde_json::from_str(&content)?;

        let mut guard = self.lock();
        tracing::info!(
            path = %path.display(),
            item_index = state.received_item_index,
            locations = state.checked_locations.len(),
            "loaded session state"
        );
        guard.state = state;
        guard.loaded = true;
        Ok(true)
    }

    /// Persist the current state via temp-file-and-rename.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let guard = self.lock();
        let content = serde_json::to_string_pretty(&guard.state)?;
        atomic_write(path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "saved session state");
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().loaded
    }

    pub fn clear(&self) {
        let mut guard = self.lock();
        guard.state = SessionState::default();
        guard.loaded = false;
    }

    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn restore(&self, state: SessionState) {
        let mut guard = self.lock();
        guard.state = state;
        guard.loaded = true;
    }

    // ------------------------------------------------------------------
    // Received item index
    // ------------------------------------------------------------------

    pub fn received_item_index(&self) -> i64 {
        self.lock().state.received_item_index
    }

    pub fn set_received_item_index(&self, index: i64) {
        self.lock().state.received_item_index = index;
    }

    pub fn increment_received_item_index(&self) -> i64 {
        let mut guard = self.lock();
        guard.state.received_item_index += 1;
        guard.state.received_item_index
    }

    // ------------------------------------------------------------------
    // Checked locations
    // ------------------------------------------------------------------

    pub fn add_checked_location(&self, location_id: i64) {
        self.lock().state.checked_locations.insert(location_id);
    }

    pub fn is_location_checked(&self, location_id: i64) -> bool {
        self.lock().state.checked_locations.contains(&location_id)
    }

    /// Bulk overwrite with the server's authoritative set on slot connect.
    pub fn set_checked_locations(&self, locations: BTreeSet<i64>) {
        self.lock().state.checked_locations = locations;
    }

    pub fn checked_locations(&self) -> BTreeSet<i64> {
        self.lock().state.checked_locations.clone()
    }

    pub fn checked_location_count(&self) -> usize {
        self.lock().state.checked_locations.len()
    }

    // ------------------------------------------------------------------
    // Progression counts
    // ------------------------------------------------------------------

    pub fn item_progression_count(&self, item_id: i64) -> i64 {
        self.lock()
            .state
            .item_progression_counts
            .get(&item_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_item_progression_count(&self, item_id: i64, count: i64) {
        self.lock()
            .state
            .item_progression_counts
            .insert(item_id, count);
    }

    pub fn increment_item_progression_count(&self, item_id: i64) -> i64 {
        let mut guard = self.lock();
        let count = guard
            .state
            .item_progression_counts
            .entry(item_id)
            .or_insert(0);
        *count += 1;
        *count
    }

    // ------------------------------------------------------------------
    // Identity and checksum
    // ------------------------------------------------------------------

    pub fn checksum(&self) -> String {
        self.lock().state.checksum.clone()
    }

    pub fn set_checksum(&self, checksum: &str) {
        self.lock().state.checksum = checksum.to_string();
    }

    /// True when the stored checksum is empty (first run) or equal to
    /// `current`.
    pub fn validate_checksum(&self, current: &str) -> bool {
        let guard = self.lock();
        if guard.state.checksum.is_empty() {
            return true;
        }
        let matches = guard.state.checksum == current;
        if !matches {
            tracing::error!(
                stored = %guard.state.checksum,
                current,
                "session checksum mismatch"
            );
        }
        matches
    }

    pub fn set_identity(&self, game: &str, slot: &str) {
        let mut guard = self.lock();
        guard.state.game_name = game.to_string();
        guard.state.slot_name = slot.to_string();
    }

    pub fn set_server_info(&self, host: &str, port: u16) {
        let mut guard = self.lock();
        guard.state.ap_server = host.to_string();
        guard.state.ap_port = port;
    }

    pub fn touch(&self) {
        self.lock().state.last_active = unix_now();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write `data` to `path` via a temp file in the same directory and an
/// atomic rename, creating parent directories as needed.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
    std::fs::create_dir_all(dir)?;
    let temp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), data)?;
    temp.persist(path)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}
