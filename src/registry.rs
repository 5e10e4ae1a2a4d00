//! Mod registry: discovered manifests and per-mod registration status.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use crate::manifest::parse_manifest;
use crate::types::{Manifest, ModClass, ModInfo};

/// Holds every discovered manifest and tracks which mods have registered
/// over IPC. The registration set is written from the IPC worker while the
/// main loop reads, so all state sits behind one mutex.
pub struct ModRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    manifests: BTreeMap<String, Manifest>,
    registered: BTreeSet<String>,
}

impl ModRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
        }
    }

    /// Scan `mods_dir` for `<child>/manifest.json` files. Parse failures are
    /// logged and skipped; a duplicate `mod_id` keeps the first manifest.
    /// Returns the number of manifests added.
    pub fn discover(&self, mods_dir: &Path) -> usize {
        let entries = match std::fs::read_dir(mods_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %mods_dir.display(), "mods folder not readable: {e}");
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let manifest_path = path.join("manifest.json");
            let content = match std::fs::read_to_string(&manifest_path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            let manifest = match parse_manifest(&content) {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(
                        path = %manifest_path.display(),
                        code = e.code(),
                        "failed to parse manifest: {e}"
                    );
                    continue;
                }
            };

            let mut state = self.lock();
            if state.manifests.contains_key(&manifest.mod_id) {
                tracing::warn!(mod_id = %manifest.mod_id, "duplicate mod_id, keeping first");
                continue;
            }
            tracing::debug!(
                mod_id = %manifest.mod_id,
                version = %manifest.version,
                enabled = manifest.enabled,
                "discovered mod"
            );
            state.manifests.insert(manifest.mod_id.clone(), manifest);
            count += 1;
        }

        tracing::info!(count, "mod discovery complete");
        count
    }

    /// Insert a manifest directly. Returns false on duplicate `mod_id`.
    pub fn add_manifest(&self, manifest: Manifest) -> bool {
        let mut state = self.lock();
        if state.manifests.contains_key(&manifest.mod_id) {
            return false;
        }
        state.manifests.insert(manifest.mod_id.clone(), manifest);
        true
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.manifests.clear();
        state.registered.clear();
    }

    /// Flip registration for a known mod. Returns false for unknown ids.
    pub fn mark_registered(&self, mod_id: &str) -> bool {
        let mut state = self.lock();
        if !state.manifests.contains_key(mod_id) {
            return false;
        }
        state.registered.insert(mod_id.to_string());
        true
    }

    pub fn is_registered(&self, mod_id: &str) -> bool {
        self.lock().registered.contains(mod_id)
    }

    /// True when every enabled manifest has registered.
    pub fn all_registered(&self) -> bool {
        let state = self.lock();
        state
            .manifests
            .values()
            .filter(|m| m.enabled)
            .all(|m| state.registered.contains(&m.mod_id))
    }

    /// Enabled mods that have not yet registered.
    pub fn pending(&self) -> Vec<String> {
        let state = self.lock();
        state
            .manifests
            .values()
            .filter(|m| m.enabled && !state.registered.contains(&m.mod_id))
            .map(|m| m.mod_id.clone())
            .collect()
    }

    pub fn reset_registrations(&self) {
        self.lock().registered.clear();
    }

    pub fn manifest(&self, mod_id: &str) -> Option<Manifest> {
        self.lock().manifests.get(mod_id).cloned()
    }

    pub fn enabled_manifests(&self) -> Vec<Manifest> {
        self.lock()
            .manifests
            .values()
            .filter(|m| m.enabled)
            .cloned()
            .collect()
    }

    /// Enabled priority-classified mod ids.
    pub fn priority_mods(&self) -> Vec<String> {
        self.lock()
            .manifests
            .values()
            .filter(|m| m.enabled && classify(&m.mod_id) == ModClass::Priority)
            .map(|m| m.mod_id.clone())
            .collect()
    }

    /// True when every enabled priority mod has registered.
    pub fn all_priority_registered(&self) -> bool {
        let state = self.lock();
        state
            .manifests
            .values()
            .filter(|m| m.enabled && classify(&m.mod_id) == ModClass::Priority)
            .all(|m| state.registered.contains(&m.mod_id))
    }

    pub fn mod_infos(&self) -> Vec<ModInfo> {
        let state = self.lock();
        state
            .manifests
            .values()
            .map(|m| ModInfo {
                mod_id: m.mod_id.clone(),
                display_name: m.display_name.clone(),
                version: m.version.clone(),
                class: classify(&m.mod_id),
                registered: state.registered.contains(&m.mod_id),
            })
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().manifests.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ModRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a mod id. Priority clients match `archipelago.<game>.<tail>`:
/// two non-empty leading segments before the tail, case-sensitive. The
/// tail may be empty, so `archipelago.game.` still classifies as priority.
pub fn classify(mod_id: &str) -> ModClass {
    let mut parts = mod_id.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("archipelago"), Some(game), Some(_)) if !game.is_empty() => ModClass::Priority,
        _ => ModClass::Regular,
    }
}
