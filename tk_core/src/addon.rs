//! Add-on packages: capability tags, registry records and manifest validation.
//!
//! An add-on ships as a package whose `package.json` carries a `twokeys`
//! block declaring the capabilities it provides and, for each one, the entry
//! point file implementing it:
//!
//! ```json
//! {
//!   "name": "executor-ahk",
//!   "version": "1.0.0",
//!   "description": "AutoHotkey executor",
//!   "twokeys": {
//!     "types": ["executor"],
//!     "entry": { "executor": "./lib/index.js" },
//!     "displayName": "AutoHotkey"
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability an add-on can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonType {
    /// Executes macros when a hotkey fires.
    Executor,
    /// Detector controller: manages the detector VM.
    Detector,
    Pack,
    Library,
    Extension,
}

impl AddonType {
    pub const ALL: [AddonType; 5] = [
        AddonType::Executor,
        AddonType::Detector,
        AddonType::Pack,
        AddonType::Library,
        AddonType::Extension,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AddonType::Executor => "executor",
            AddonType::Detector => "detector",
            AddonType::Pack => "pack",
            AddonType::Library => "library",
            AddonType::Extension => "extension",
        }
    }
}

impl fmt::Display for AddonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AddonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AddonType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown add-on type '{s}'"))
    }
}

/// Metadata about a package, taken from its manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub version: String,
    pub description: String,
    /// Size of the installed package, when known.
    pub size: Option<u64>,
    #[serde(rename = "iconURL", default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// An installed add-on as recorded in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Assigned on insertion.
    pub id: Option<String>,
    pub name: String,
    pub types: Vec<AddonType>,
    pub info: PackageInfo,
    /// Entry point file, relative to the package directory, per capability.
    pub entry: BTreeMap<AddonType, String>,
}

impl Package {
    pub fn provides(&self, addon_type: AddonType) -> bool {
        self.types.contains(&addon_type)
    }

    pub fn entry_for(&self, addon_type: AddonType) -> Option<&str> {
        if !self.provides(addon_type) {
            return None;
        }
        self.entry.get(&addon_type).map(String::as_str)
    }

    /// Build a package record from a manifest that passed [`validate_manifest`].
    ///
    /// Unrecognised types are dropped, as are entry points for them.
    pub fn from_manifest(manifest: &Value) -> Option<Package> {
        let twokeys = manifest.get("twokeys")?;
        let name = manifest.get("name")?.as_str()?.to_string();

        let types: Vec<AddonType> = twokeys
            .get("types")?
            .as_array()?
            .iter()
            .filter_map(|t| t.as_str())
            .filter_map(|t| t.parse().ok())
            .collect();

        let mut entry = BTreeMap::new();
        if let Some(entries) = twokeys.get("entry").and_then(Value::as_object) {
            for (key, value) in entries {
                if let (Ok(addon_type), Some(path)) = (key.parse::<AddonType>(), value.as_str()) {
                    entry.insert(addon_type, path.to_string());
                }
            }
        }

        let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);

        Some(Package {
            id: None,
            name,
            types,
            info: PackageInfo {
                version: text(manifest.get("version")).unwrap_or_default(),
                description: text(manifest.get("description")).unwrap_or_default(),
                size: None,
                icon_url: text(twokeys.get("iconURL")),
                display_name: text(twokeys.get("displayName")),
            },
            entry,
        })
    }

    /// Check a record read back from storage still satisfies the registry's
    /// invariants.
    pub fn check_consistency(&self) -> Validation {
        if self.info.version.is_empty() || self.info.description.is_empty() {
            return Validation::Invalid(
                "Either the version or description field was missing from info.".to_string(),
            );
        }
        for addon_type in &self.types {
            match self.entry.get(addon_type) {
                Some(path) if !path.is_empty() => {}
                _ => {
                    return Validation::Invalid(format!(
                        "Type {addon_type} did not have an entry point!"
                    ));
                }
            }
        }
        Validation::Valid
    }
}

/// Result of a check that can reject without being an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(String),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Validation::Valid => None,
            Validation::Invalid(message) => Some(message),
        }
    }
}

/// Validate the `twokeys` block of an add-on manifest.
///
/// Requires the block, at least one recognised type, and a non-empty string
/// entry point for every recognised type. Unrecognised types are ignored.
pub fn validate_manifest(manifest: &Value) -> Validation {
    let Some(twokeys) = manifest.get("twokeys") else {
        return Validation::Invalid("Package does not contain 2Keys metadata!".to_string());
    };

    let declared: Vec<&str> = twokeys
        .get("types")
        .and_then(Value::as_array)
        .map(|types| types.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let recognised: Vec<AddonType> = declared.iter().filter_map(|t| t.parse().ok()).collect();
    if recognised.is_empty() {
        return Validation::Invalid("No valid type was listed in the package.json!".to_string());
    }

    let entries = twokeys.get("entry").and_then(Value::as_object);
    for addon_type in recognised {
        let has_entry = entries
            .and_then(|e| e.get(addon_type.as_str()))
            .and_then(Value::as_str)
            .is_some_and(|path| !path.is_empty());
        if !has_entry {
            return Validation::Invalid(format!(
                "Entry point was not found for add-on type {addon_type}"
            ));
        }
    }

    Validation::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executor_manifest() -> Value {
        json!({
            "name": "executor-ahk",
            "version": "1.0.0",
            "description": "AutoHotkey executor",
            "twokeys": {
                "types": ["executor"],
                "entry": { "executor": "./lib/index.js" },
                "displayName": "AutoHotkey",
                "iconURL": "file:///icon.png"
            }
        })
    }

    #[test]
    fn accepts_well_formed_manifest() {
        assert_eq!(validate_manifest(&executor_manifest()), Validation::Valid);
    }

    #[test]
    fn rejects_manifest_without_twokeys_block() {
        let manifest = json!({ "name": "plain", "version": "1.0.0" });
        let result = validate_manifest(&manifest);
        assert!(!result.is_valid());
        assert!(result.message().unwrap().contains("2Keys metadata"));
    }

    #[test]
    fn rejects_manifest_with_only_unknown_types() {
        let manifest = json!({
            "name": "odd",
            "twokeys": { "types": ["toaster"], "entry": { "toaster": "./t.js" } }
        });
        let result = validate_manifest(&manifest);
        assert!(result.message().unwrap().contains("No valid type"));
    }

    #[test]
    fn rejects_missing_or_non_string_entry() {
        let missing = json!({
            "name": "half",
            "twokeys": { "types": ["executor", "detector"], "entry": { "executor": "./e.js" } }
        });
        assert!(validate_manifest(&missing).message().unwrap().contains("detector"));

        let numeric = json!({
            "name": "numeric",
            "twokeys": { "types": ["executor"], "entry": { "executor": 42 } }
        });
        assert!(!validate_manifest(&numeric).is_valid());

        let empty = json!({
            "name": "empty",
            "twokeys": { "types": ["executor"], "entry": { "executor": "" } }
        });
        assert!(!validate_manifest(&empty).is_valid());
    }

    #[test]
    fn unknown_types_are_ignored_alongside_known_ones() {
        let manifest = json!({
            "name": "mixed",
            "version": "0.1.0",
            "description": "mixed bag",
            "twokeys": {
                "types": ["executor", "toaster"],
                "entry": { "executor": "./e.js" }
            }
        });
        assert!(validate_manifest(&manifest).is_valid());

        let package = Package::from_manifest(&manifest).unwrap();
        assert_eq!(package.types, vec![AddonType::Executor]);
    }

    #[test]
    fn from_manifest_copies_optional_metadata() {
        let package = Package::from_manifest(&executor_manifest()).unwrap();
        assert_eq!(package.name, "executor-ahk");
        assert_eq!(package.info.version, "1.0.0");
        assert_eq!(package.info.display_name.as_deref(), Some("AutoHotkey"));
        assert_eq!(package.info.icon_url.as_deref(), Some("file:///icon.png"));
        assert_eq!(package.info.size, None);
        assert_eq!(package.entry_for(AddonType::Executor), Some("./lib/index.js"));
        assert_eq!(package.entry_for(AddonType::Detector), None);
    }

    #[test]
    fn info_serializes_with_manifest_key_names() {
        let package = Package::from_manifest(&executor_manifest()).unwrap();
        let info = serde_json::to_value(&package.info).unwrap();
        assert_eq!(info["iconURL"], "file:///icon.png");
        assert_eq!(info["displayName"], "AutoHotkey");
        assert!(info["size"].is_null());
    }

    #[test]
    fn consistency_check_requires_version_and_description() {
        let mut package = Package::from_manifest(&executor_manifest()).unwrap();
        assert!(package.check_consistency().is_valid());

        package.info.description.clear();
        assert!(!package.check_consistency().is_valid());
    }

    #[test]
    fn addon_type_round_trips_through_str() {
        for addon_type in AddonType::ALL {
            assert_eq!(addon_type.as_str().parse::<AddonType>().unwrap(), addon_type);
        }
        assert!("toaster".parse::<AddonType>().is_err());
    }
}
