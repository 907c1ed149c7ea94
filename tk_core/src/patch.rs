//! Field patches for partial software updates.
//!
//! Every field is optional; only the ones that are `Some` are written.

use serde::{Deserialize, Serialize};

use crate::software::{Arch, DownloadType};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoftwarePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_type: Option<DownloadType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_auto_install: Option<bool>,
    /// Executables to insert or update, matched by name.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub executables: Vec<ExecutablePatch>,
}

impl SoftwarePatch {
    pub fn is_empty(&self) -> bool {
        !self.has_record_fields() && self.executables.is_empty()
    }

    /// True when at least one column of the software row changes.
    pub fn has_record_fields(&self) -> bool {
        self.name.is_some()
            || self.url.is_some()
            || self.homepage.is_some()
            || self.download_type.is_some()
            || self.filename.is_some()
            || self.no_auto_install.is_some()
    }

    /// The new name, if the patch renames the software away from `current`.
    pub fn renames_from(&self, current: &str) -> Option<&str> {
        self.name.as_deref().filter(|new| *new != current)
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn executable(mut self, patch: ExecutablePatch) -> Self {
        self.executables.push(patch);
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutablePatch {
    /// Key used to find the executable; never changed by the patch.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Arch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_installed: Option<bool>,
}

impl ExecutablePatch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn arch(mut self, arch: Arch) -> Self {
        self.arch = Some(arch);
        self
    }

    pub fn has_fields(&self) -> bool {
        self.path.is_some()
            || self.arch.is_some()
            || self.os.is_some()
            || self.user_installed.is_some()
    }
}
