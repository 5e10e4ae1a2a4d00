//! Shared domain types: lifecycle states, capability records, wire enums.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Lifecycle
// =============================================================================

/// Framework lifecycle state.
///
/// The coordinator walks these in bring-up order and may fall back to
/// `ErrorState` from any of them. The discriminant values are stable so the
/// current state can be published through an atomic for lock-free reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initialization = 1,
    Discovery = 2,
    Validation = 3,
    Generation = 4,
    PriorityRegistration = 5,
    Registration = 6,
    Connecting = 7,
    Syncing = 8,
    Active = 9,
    Resyncing = 10,
    ErrorState = 11,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Initialization => "INITIALIZATION",
            LifecycleState::Discovery => "DISCOVERY",
            LifecycleState::Validation => "VALIDATION",
            LifecycleState::Generation => "GENERATION",
            LifecycleState::PriorityRegistration => "PRIORITY_REGISTRATION",
            LifecycleState::Registration => "REGISTRATION",
            LifecycleState::Connecting => "CONNECTING",
            LifecycleState::Syncing => "SYNCING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Resyncing => "RESYNCING",
            LifecycleState::ErrorState => "ERROR_STATE",
        }
    }

    pub fn from_u8(value: u8) -> LifecycleState {
        match value {
            1 => LifecycleState::Initialization,
            2 => LifecycleState::Discovery,
            3 => LifecycleState::Validation,
            4 => LifecycleState::Generation,
            5 => LifecycleState::PriorityRegistration,
            6 => LifecycleState::Registration,
            7 => LifecycleState::Connecting,
            8 => LifecycleState::Syncing,
            9 => LifecycleState::Active,
            10 => LifecycleState::Resyncing,
            11 => LifecycleState::ErrorState,
            _ => LifecycleState::Uninitialized,
        }
    }

    /// States in which `register` messages are accepted.
    pub fn accepts_registration(self) -> bool {
        matches!(
            self,
            LifecycleState::PriorityRegistration | LifecycleState::Registration
        )
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error codes broadcast over IPC
// =============================================================================

/// Stable error codes carried by `error` broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ConfigInvalid,
    ConflictDetected,
    RegistrationTimeout,
    ConnectionFailed,
    ChecksumMismatch,
    ActionFailed,
    ActionTimeout,
    IpcFailed,
    MessageDropped,
    PropertyFailed,
    SyncFailed,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::ConflictDetected => "CONFLICT_DETECTED",
            ErrorCode::RegistrationTimeout => "REGISTRATION_TIMEOUT",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorCode::ActionFailed => "ACTION_FAILED",
            ErrorCode::ActionTimeout => "ACTION_TIMEOUT",
            ErrorCode::IpcFailed => "IPC_FAILED",
            ErrorCode::MessageDropped => "MESSAGE_DROPPED",
            ErrorCode::PropertyFailed => "PROPERTY_FAILED",
            ErrorCode::SyncFailed => "SYNC_FAILED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Manifest records
// =============================================================================

/// Item classification used by the randomizer when placing items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Progression,
    Useful,
    #[default]
    Filler,
    Trap,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Progression => "progression",
            ItemType::Useful => "useful",
            ItemType::Filler => "filler",
            ItemType::Trap => "trap",
        }
    }

    pub fn parse(s: &str) -> Option<ItemType> {
        match s {
            "progression" => Some(ItemType::Progression),
            "useful" => Some(ItemType::Useful),
            "filler" => Some(ItemType::Filler),
            "trap" => Some(ItemType::Trap),
            _ => None,
        }
    }
}

/// Action argument type. A `property` value is an opaque host-side path the
/// owning client evaluates against its own runtime; the framework never
/// interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    #[default]
    String,
    Number,
    Boolean,
    Property,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Boolean => "boolean",
            ArgType::Property => "property",
        }
    }

    pub fn parse(s: &str) -> Option<ArgType> {
        match s {
            "string" => Some(ArgType::String),
            "number" => Some(ArgType::Number),
            "boolean" => Some(ArgType::Boolean),
            "property" => Some(ArgType::Property),
            _ => None,
        }
    }
}

/// One argument of an item action, carried verbatim to the owning client
/// after placeholder resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionArg {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    pub value: serde_json::Value,
}

/// A location declaration from a manifest. `amount` instances are expanded
/// into separate ownership rows during generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationDef {
    pub name: String,
    pub amount: u32,
    pub unique: bool,
}

/// An item declaration from a manifest. `amount == -1` means unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDef {
    pub name: String,
    pub item_type: ItemType,
    pub amount: i64,
    pub action: String,
    pub args: Vec<ActionArg>,
}

/// A declared incompatibility with another mod. An empty version list or a
/// `*` entry matches any loaded version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompatibilityRule {
    pub mod_id: String,
    pub versions: Vec<String>,
}

/// A parsed client manifest. Immutable once discovered.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub mod_id: String,
    pub display_name: String,
    pub version: String,
    pub enabled: bool,
    pub incompatibilities: Vec<IncompatibilityRule>,
    pub locations: Vec<LocationDef>,
    pub items: Vec<ItemDef>,
}

/// Priority clients match `archipelago.<game>.<tail>` and may issue control
/// commands; everything else is regular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModClass {
    Priority,
    Regular,
}

impl ModClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ModClass::Priority => "priority",
            ModClass::Regular => "regular",
        }
    }
}

/// Registry snapshot row used by the capabilities config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModInfo {
    pub mod_id: String,
    pub display_name: String,
    pub version: String,
    pub class: ModClass,
    pub registered: bool,
}

// =============================================================================
// Ownership records (produced during generation, immutable for the run)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationOwnership {
    pub mod_id: String,
    pub location_name: String,
    pub instance: u32,
    pub location_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemOwnership {
    pub mod_id: String,
    pub item_name: String,
    pub item_id: i64,
    pub item_type: ItemType,
    pub action: String,
    pub args: Vec<ActionArg>,
    /// -1 means the count is ignored (no cap).
    pub max_count: i64,
}

/// One conflict found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub first_mod: String,
    pub second_mod: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ModIncompatibility,
    LocationConflict,
    ItemConflict,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictKind::ModIncompatibility => "mod_incompatibility",
            ConflictKind::LocationConflict => "location_conflict",
            ConflictKind::ItemConflict => "item_conflict",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub ok: bool,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<String>,
}

// =============================================================================
// Remote server records
// =============================================================================

/// Slot status reported to the remote server. Values are fixed by the
/// randomizer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SlotStatus {
    Unknown = 0,
    Connected = 5,
    Ready = 10,
    Playing = 20,
    Goal = 30,
}

/// An item the server granted to this slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedItem {
    pub item_id: i64,
    pub location_id: i64,
    pub item_name: String,
    pub player_name: String,
    pub index: i64,
}

/// One row of a scout reply: what lives at a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoutResult {
    pub location_id: i64,
    pub item_id: i64,
    pub item_name: String,
    pub player_name: String,
}

/// Slot-connection result from the server. `checked_locations` is
/// authoritative and overwrites the local checked set on connect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SlotInfo {
    pub slot_id: i64,
    pub slot_name: String,
    pub checked_locations: Vec<i64>,
    pub missing_locations: Vec<i64>,
}

// =============================================================================
// Action dispatch records
// =============================================================================

/// An EXECUTE_ACTION dispatch awaiting its `action_result`.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub mod_id: String,
    pub item_id: i64,
    pub item_name: String,
    pub action: String,
    pub started_at: std::time::Instant,
}

/// A client's report on an executed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    pub mod_id: String,
    pub item_id: i64,
    pub item_name: String,
    pub success: bool,
    pub error: String,
}

// =============================================================================
// Capabilities config document
// =============================================================================

/// The generated capabilities document persisted to
/// `output/AP_Capabilities_<slot>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfig {
    pub version: String,
    pub game: String,
    pub slot_name: String,
    pub checksum: String,
    pub id_base: i64,
    pub generated_at: String,
    pub mods: Vec<CapabilitiesConfigMod>,
    pub locations: Vec<CapabilitiesConfigLocation>,
    pub items: Vec<CapabilitiesConfigItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfigMod {
    pub mod_id: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfigLocation {
    pub id: i64,
    pub name: String,
    pub mod_id: String,
    pub instance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesConfigItem {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub mod_id: String,
    pub count: i64,
}

// =============================================================================
// Session state document
// =============================================================================

/// Per-slot progress persisted across runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub version: String,
    pub checksum: String,
    pub slot_name: String,
    pub game_name: String,
    pub received_item_index: i64,
    pub checked_locations: std::collections::BTreeSet<i64>,
    pub item_progression_counts: BTreeMap<i64, i64>,
    pub ap_server: String,
    pub ap_port: u16,
    /// Unix seconds of the last activity stamp.
    pub last_active: u64,
}
