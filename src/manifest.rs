//! Manifest parsing.
//!
//! A manifest is the capability declaration a client mod ships as
//! `manifest.json`. Parsing is a pure function from text to [`Manifest`];
//! field-level failures name the offending field so discovery can report
//! exactly what a mod author got wrong.

use serde_json::Value;
use thiserror::Error;

use crate::types::{
    ActionArg, ArgType, IncompatibilityRule, ItemDef, ItemType, LocationDef, Manifest,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("field `{field}` has the wrong type (expected {expected})")]
    BadType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("mod_id must not be empty")]
    EmptyModId,
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            ManifestError::Json(_) | ManifestError::BadType { .. } => "bad_type",
            ManifestError::MissingField { .. } => "missing_field",
            ManifestError::EmptyModId => "empty_mod_id",
        }
    }
}

/// Parse one manifest document. Unknown top-level keys are ignored.
pub fn parse_manifest(content: &str) -> Result<Manifest, ManifestError> {
    let doc: Value = serde_json::from_str(content)?;
    let Some(obj) = doc.as_object() else {
        return Err(ManifestError::BadType {
            field: "manifest",
            expected: "object",
        });
    };

    let mod_id = match obj.get("mod_id") {
        None => return Err(ManifestError::MissingField { field: "mod_id" }),
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(ManifestError::BadType {
                field: "mod_id",
                expected: "string",
            });
        }
    };
    if mod_id.is_empty() {
        return Err(ManifestError::EmptyModId);
    }

    let display_name = opt_string(obj.get("display_name"), "display_name")?
        .unwrap_or_else(|| mod_id.clone());
    let version =
        opt_string(obj.get("version"), "version")?.unwrap_or_else(|| "1.0.0".to_string());
    let enabled = opt_bool(obj.get("enabled"), "enabled")?.unwrap_or(true);

    let mut incompatibilities = Vec::new();
    if let Some(value) = obj.get("incompatibilities") {
        let entries = value.as_array().ok_or(ManifestError::BadType {
            field: "incompatibilities",
            expected: "array",
        })?;
        for entry in entries {
            let Some(rule) = entry.as_object() else {
                continue;
            };
            let id = rule
                .get("mod_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                continue;
            }
            let versions = rule
                .get("versions")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            incompatibilities.push(IncompatibilityRule {
                mod_id: id,
                versions,
            });
        }
    }

    let mut locations = Vec::new();
    if let Some(value) = obj.get("locations") {
        let entries = value.as_array().ok_or(ManifestError::BadType {
            field: "locations",
            expected: "array",
        })?;
        for entry in entries {
            let Some(loc) = entry.as_object() else {
                continue;
            };
            let name = loc
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            let amount = loc
                .get("amount")
                .and_then(Value::as_u64)
                .unwrap_or(1)
                .max(1) as u32;
            let unique = loc.get("unique").and_then(Value::as_bool).unwrap_or(false);
            locations.push(LocationDef {
                name,
                amount,
                unique,
            });
        }
    }

    let mut items = Vec::new();
    if let Some(value) = obj.get("items") {
        let entries = value.as_array().ok_or(ManifestError::BadType {
            field: "items",
            expected: "array",
        })?;
        for entry in entries {
            let Some(item) = entry.as_object() else {
                continue;
            };
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if name.is_empty() {
                continue;
            }
            let item_type = item
                .get("type")
                .and_then(Value::as_str)
                .and_then(ItemType::parse)
                .unwrap_or_default();
            let amount = item.get("amount").and_then(Value::as_i64).unwrap_or(1);
            let action = item
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let args = item
                .get("args")
                .and_then(Value::as_array)
                .map(|list| list.iter().filter_map(parse_arg).collect())
                .unwrap_or_default();
            items.push(ItemDef {
                name,
                item_type,
                amount,
                action,
                args,
            });
        }
    }

    Ok(Manifest {
        mod_id,
        display_name,
        version,
        enabled,
        incompatibilities,
        locations,
        items,
    })
}

fn parse_arg(value: &Value) -> Option<ActionArg> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.to_string();
    let arg_type = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(ArgType::parse)
        .unwrap_or_default();
    let value = obj.get("value").cloned().unwrap_or(Value::Null);
    Some(ActionArg {
        name,
        arg_type,
        value,
    })
}

fn opt_string(value: Option<&Value>, field: &'static str) -> Result<Option<String>, ManifestError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ManifestError::BadType {
            field,
            expected: "string",
        }),
    }
}

fn opt_bool(value: Option<&Value>, field: &'static str) -> Result<Option<bool>, ManifestError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ManifestError::BadType {
            field,
            expected: "boolean",
        }),
    }
}
