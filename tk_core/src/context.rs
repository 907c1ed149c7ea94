//! Registry layout and configuration.

use std::path::PathBuf;

use serde_json::{Value, json};

pub const REGISTRY_FILE_NAME: &str = "twokeys-registry.db";
pub const ROOT_MANIFEST: &str = "package.json";
pub const MODULES_DIR: &str = "node_modules";
pub const SOFTWARE_DIR: &str = "software";
pub const ROOT_PACKAGE_NAME: &str = "twokeys-local-registry";

/// Shown while downloading when the server omits `Content-Length`.
pub const ASSUMED_DOWNLOAD_SIZE: u64 = 6_403_580;

/// Every location of a registry, derived from its root directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub root: PathBuf,
    pub db_file: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let db_file = root.join(REGISTRY_FILE_NAME);
        Self { root, db_file }
    }

    /// Use a database file outside the registry root.
    pub fn with_db_file(mut self, db_file: impl Into<PathBuf>) -> Self {
        self.db_file = db_file.into();
        self
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join(ROOT_MANIFEST)
    }

    pub fn modules_dir(&self) -> PathBuf {
        self.root.join(MODULES_DIR)
    }

    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.modules_dir().join(name)
    }

    pub fn package_manifest(&self, name: &str) -> PathBuf {
        self.package_dir(name).join(ROOT_MANIFEST)
    }

    pub fn software_dir(&self) -> PathBuf {
        self.root.join(SOFTWARE_DIR)
    }

    pub fn owner_folder(&self, owner: &str) -> PathBuf {
        self.software_dir().join(owner)
    }

    pub fn software_folder(&self, owner: &str, name: &str) -> PathBuf {
        self.owner_folder(owner).join(name)
    }
}

/// Contents written to a fresh registry's root `package.json`.
pub fn default_root_manifest() -> Value {
    json!({
        "DO_NOT_MODIFY": true,
        "name": ROOT_PACKAGE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "private": true,
        "dependencies": {}
    })
}

/// Tunables shared by the registry and the downloader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Program used to fetch and remove add-ons.
    pub package_manager: String,
    pub user_agent: String,
    pub assumed_download_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_manager: "npm".to_string(),
            user_agent: format!("twokeys/{}", env!("CARGO_PKG_VERSION")),
            assumed_download_size: ASSUMED_DOWNLOAD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_derived_from_root() {
        let paths = Paths::new("/opt/twokeys");
        assert_eq!(paths.db_file, PathBuf::from("/opt/twokeys/twokeys-registry.db"));
        assert_eq!(paths.manifest_file(), PathBuf::from("/opt/twokeys/package.json"));
        assert_eq!(
            paths.package_manifest("executor-ahk"),
            PathBuf::from("/opt/twokeys/node_modules/executor-ahk/package.json")
        );
        assert_eq!(
            paths.software_folder("executor-ahk", "ahk"),
            PathBuf::from("/opt/twokeys/software/executor-ahk/ahk")
        );
    }

    #[test]
    fn db_file_can_be_overridden() {
        let paths = Paths::new("/opt/twokeys").with_db_file("/tmp/other.db");
        assert_eq!(paths.db_file, PathBuf::from("/tmp/other.db"));
        assert_eq!(paths.root, PathBuf::from("/opt/twokeys"));
    }

    #[test]
    fn root_manifest_is_marked_private() {
        let manifest = default_root_manifest();
        assert_eq!(manifest["DO_NOT_MODIFY"], true);
        assert_eq!(manifest["private"], true);
        assert!(manifest["dependencies"].as_object().unwrap().is_empty());
    }

    #[test]
    fn scoped_package_names_nest_under_modules() {
        let paths = Paths::new("/r");
        assert_eq!(
            paths.package_dir("@twokeys/detector-desktop"),
            PathBuf::from("/r/node_modules/@twokeys/detector-desktop")
        );
    }
}
