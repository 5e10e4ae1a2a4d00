//! Capability aggregation: ownership tables, conflict validation,
//! deterministic id assignment, and the ecosystem checksum.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use sha1::{Digest, Sha1};

use crate::paths::FrameworkPaths;
use crate::session::atomic_write;
use crate::types::{
    CapabilitiesConfig, CapabilitiesConfigItem, CapabilitiesConfigLocation, CapabilitiesConfigMod,
    Conflict, ConflictKind, ItemOwnership, LocationOwnership, Manifest, ValidationReport,
};

pub const DEFAULT_ID_BASE: i64 = 6_942_067;

const CONFIG_VERSION: &str = "1.0.0";

/// Aggregated capability tables. Mutated only during discovery/generation
/// on the main thread, read-only afterwards; the lock exists for uniformity
/// with the components that genuinely share state across threads.
pub struct Capabilities {
    inner: RwLock<CapabilityTables>,
}

#[derive(Default)]
struct CapabilityTables {
    manifests: BTreeMap<String, Manifest>,
    locations: Vec<LocationOwnership>,
    items: Vec<ItemOwnership>,
    base_id: i64,
}

impl Capabilities {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CapabilityTables::default()),
        }
    }

    /// Add a manifest, expanding each location into `amount` instance rows
    /// and each item into one ownership row. Ids are assigned later.
    pub fn add(&self, manifest: Manifest) {
        let mut tables = self.write();

        for loc in &manifest.locations {
            for instance in 1..=loc.amount {
                tables.locations.push(LocationOwnership {
                    mod_id: manifest.mod_id.clone(),
                    location_name: loc.name.clone(),
                    instance,
                    location_id: 0,
                });
            }
        }

        for item in &manifest.items {
            tables.items.push(ItemOwnership {
                mod_id: manifest.mod_id.clone(),
                item_name: item.name.clone(),
                item_id: 0,
                item_type: item.item_type,
                action: item.action.clone(),
                args: item.args.clone(),
                max_count: if item.amount < 0 { -1 } else { item.amount },
            });
        }

        tables.manifests.insert(manifest.mod_id.clone(), manifest);
    }

    pub fn clear(&self) {
        *self.write() = CapabilityTables::default();
    }

    /// Detect cross-mod conflicts: declared incompatibilities that match a
    /// loaded version, duplicate `(location, instance)` pairs, and duplicate
    /// item names.
    pub fn validate(&self) -> ValidationReport {
        let tables = self.read();
        let mut report = ValidationReport {
            ok: true,
            ..Default::default()
        };

        for (mod_id, manifest) in &tables.manifests {
            for rule in &manifest.incompatibilities {
                let Some(other) = tables.manifests.get(&rule.mod_id) else {
                    continue;
                };
                let matches = rule.versions.is_empty()
                    || rule
                        .versions
                        .iter()
                        .any(|v| v == "*" || *v == other.version);
                if matches {
                    report.ok = false;
                    report.conflicts.push(Conflict {
                        kind: ConflictKind::ModIncompatibility,
                        first_mod: mod_id.clone(),
                        second_mod: rule.mod_id.clone(),
                        description: format!("{mod_id} is incompatible with {}", rule.mod_id),
                    });
                }
            }

            for loc in &manifest.locations {
                if loc.unique && loc.amount > 1 {
                    report.warnings.push(format!(
                        "{mod_id}: unique location {} declared with amount {}",
                        loc.name, loc.amount
                    ));
                }
            }
        }

        let mut location_owners: HashMap<(&str, u32), &str> = HashMap::new();
        for loc in &tables.locations {
            let key = (loc.location_name.as_str(), loc.instance);
            match location_owners.get(&key).copied() {
                Some(owner) if owner != loc.mod_id.as_str() => {
                    report.ok = false;
                    report.conflicts.push(Conflict {
                        kind: ConflictKind::LocationConflict,
                        first_mod: owner.to_string(),
                        second_mod: loc.mod_id.clone(),
                        description: format!("duplicate location: {}", loc.location_name),
                    });
                }
                Some(_) => {}
                None => {
                    location_owners.insert(key, &loc.mod_id);
                }
            }
        }

        let mut item_owners: HashMap<&str, &str> = HashMap::new();
        for item in &tables.items {
            match item_owners.get(item.item_name.as_str()).copied() {
                Some(owner) if owner != item.mod_id.as_str() => {
                    report.ok = false;
                    report.conflicts.push(Conflict {
                        kind: ConflictKind::ItemConflict,
                        first_mod: owner.to_string(),
                        second_mod: item.mod_id.clone(),
                        description: format!("duplicate item: {}", item.item_name),
                    });
                }
                Some(_) => {}
                None => {
                    item_owners.insert(&item.item_name, &item.mod_id);
                }
            }
        }

        report
    }

    /// Assign ids starting from `base`: locations first in
    /// `(mod_id asc, manifest order, instance asc)` order, then items in
    /// `(mod_id asc, manifest order)` order. Deterministic for a fixed
    /// manifest set regardless of `add` order.
    pub fn assign_ids(&self, base: i64) {
        let mut tables = self.write();
        tables.base_id = base;

        // Rows were pushed in manifest order per mod; a stable sort by
        // mod_id yields the required cross-mod order without disturbing
        // the per-mod declaration order.
        tables.locations.sort_by(|a, b| a.mod_id.cmp(&b.mod_id));
        tables.items.sort_by(|a, b| a.mod_id.cmp(&b.mod_id));

        let mut next = base;
        for loc in &mut tables.locations {
            loc.location_id = next;
            next += 1;
        }
        for item in &mut tables.items {
            item.item_id = next;
            next += 1;
        }

        tracing::info!(
            locations = tables.locations.len(),
            items = tables.items.len(),
            base,
            "assigned capability ids"
        );
    }

    /// SHA-1 fingerprint of the capability ecosystem: game, slot, then each
    /// mod in lexicographic order with its version and declared locations
    /// and items. Used to detect mod changes across runs; stability of the
    /// wire contract is the point, not security.
    pub fn checksum(&self, game: &str, slot: &str) -> String {
        let tables = self.read();
        checksum_of(&tables, game, slot)
    }

    pub fn lookup_location_id(&self, mod_id: &str, name: &str, instance: u32) -> Option<i64> {
        self.read()
            .locations
            .iter()
            .find(|l| l.mod_id == mod_id && l.location_name == name && l.instance == instance)
            .map(|l| l.location_id)
    }

    pub fn lookup_item_id(&self, mod_id: &str, name: &str) -> Option<i64> {
        self.read()
            .items
            .iter()
            .find(|i| i.mod_id == mod_id && i.item_name == name)
            .map(|i| i.item_id)
    }

    pub fn owner_of_location(&self, location_id: i64) -> Option<LocationOwnership> {
        self.read()
            .locations
            .iter()
            .find(|l| l.location_id == location_id)
            .cloned()
    }

    pub fn owner_of_item(&self, item_id: i64) -> Option<ItemOwnership> {
        self.read()
            .items
            .iter()
            .find(|i| i.item_id == item_id)
            .cloned()
    }

    pub fn locations_for_mod(&self, mod_id: &str) -> Vec<LocationOwnership> {
        self.read()
            .locations
            .iter()
            .filter(|l| l.mod_id == mod_id)
            .cloned()
            .collect()
    }

    pub fn items_for_mod(&self, mod_id: &str) -> Vec<ItemOwnership> {
        self.read()
            .items
            .iter()
            .filter(|i| i.mod_id == mod_id)
            .cloned()
            .collect()
    }

    pub fn all_locations(&self) -> Vec<LocationOwnership> {
        self.read().locations.clone()
    }

    pub fn all_items(&self) -> Vec<ItemOwnership> {
        self.read().items.clone()
    }

    pub fn location_count(&self) -> usize {
        self.read().locations.len()
    }

    pub fn item_count(&self) -> usize {
        self.read().items.len()
    }

    pub fn base_id(&self) -> i64 {
        self.read().base_id
    }

    /// Build the capabilities document for `output/AP_Capabilities_<slot>.json`.
    pub fn emit_config(&self, slot: &str, game: &str) -> CapabilitiesConfig {
        let tables = self.read();
        let generated_at = time::OffsetDateTime::now_utc()
            .replace_millisecond(0)
            .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();

        CapabilitiesConfig {
            version: CONFIG_VERSION.to_string(),
            game: game.to_string(),
            slot_name: slot.to_string(),
            checksum: checksum_of(&tables, game, slot),
            id_base: tables.base_id,
            generated_at,
            mods: tables
                .manifests
                .values()
                .map(|m| CapabilitiesConfigMod {
                    mod_id: m.mod_id.clone(),
                    name: m.display_name.clone(),
                    version: m.version.clone(),
                })
                .collect(),
            locations: tables
                .locations
                .iter()
                .map(|l| CapabilitiesConfigLocation {
                    id: l.location_id,
                    name: l.location_name.clone(),
                    mod_id: l.mod_id.clone(),
                    instance: l.instance,
                })
                .collect(),
            items: tables
                .items
                .iter()
                .map(|i| CapabilitiesConfigItem {
                    id: i.item_id,
                    name: i.item_name.clone(),
                    item_type: i.item_type,
                    mod_id: i.mod_id.clone(),
                    count: i.max_count,
                })
                .collect(),
        }
    }

    /// Persist the capabilities document atomically, 2-space indented.
    pub fn write_config(
        &self,
        paths: &FrameworkPaths,
        slot: &str,
        game: &str,
    ) -> std::io::Result<std::path::PathBuf> {
        let config = self.emit_config(slot, game);
        let path = paths.capabilities_config_path(slot);
        write_config_to(&path, &config)?;
        tracing::info!(path = %path.display(), "wrote capabilities config");
        Ok(path)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CapabilityTables> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CapabilityTables> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

fn checksum_of(tables: &CapabilityTables, game: &str, slot: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(game.as_bytes());
    sha.update(slot.as_bytes());

    for (mod_id, manifest) in &tables.manifests {
        sha.update(mod_id.as_bytes());
        sha.update(manifest.version.as_bytes());
        for loc in &manifest.locations {
            sha.update(loc.name.as_bytes());
            sha.update(loc.amount.to_string().as_bytes());
        }
        for item in &manifest.items {
            sha.update(item.name.as_bytes());
            sha.update(item.item_type.as_str().as_bytes());
            sha.update(item.amount.to_string().as_bytes());
        }
    }

    hex::encode(sha.finalize())
}

fn write_config_to(path: &Path, config: &CapabilitiesConfig) -> std::io::Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    atomic_write(path, content.as_bytes())
}
