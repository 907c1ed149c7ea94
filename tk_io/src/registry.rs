//! Registry of installed add-on packages.
//!
//! Add-ons are fetched into `<root>/node_modules` by an npm-compatible
//! package manager and recorded in the `packages` table once their manifest
//! validates. The root `package.json` lists every installed add-on as a
//! dependency, which is what [`PackageRegistry::reindex`] rebuilds from.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use tk_core::context::default_root_manifest;
use tk_core::{AddonType, Error, Package, PackageInfo, Paths, Validation, validate_manifest};

use crate::db::{Database, PackageFilter, PackageRow};
use crate::traits::{PackageManager, install_args, remove_args};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Replace an existing registry entry with the same name.
    pub force: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallOptions {
    /// `name` is a path to a package on disk.
    pub local: bool,
    pub force: bool,
    pub version: Option<String>,
}

/// Outcome of [`PackageRegistry::reindex`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub added: Vec<String>,
    /// Packages left out, with the reason.
    pub skipped: Vec<(String, String)>,
}

pub struct PackageRegistry {
    paths: Paths,
    db: Database,
    package_manager: Box<dyn PackageManager>,
}

impl PackageRegistry {
    /// Create the registry layout under `paths.root`.
    ///
    /// The root `package.json` is only written when absent. An existing
    /// schema is reported as [`Validation::Invalid`] and left untouched.
    pub async fn create_new_registry(paths: &Paths) -> Result<Validation, Error> {
        info!(root = %paths.root.display(), "creating registry");
        fs::create_dir_all(&paths.root)
            .await
            .map_err(|e| Error::io(&paths.root, e))?;

        let manifest = paths.manifest_file();
        match fs::metadata(&manifest).await {
            Ok(_) => debug!(path = %manifest.display(), "root package.json already present"),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let contents = serde_json::to_string_pretty(&default_root_manifest()).map_err(
                    |e| Error::StoreCorruption {
                        message: format!("failed to encode root package.json: {e}"),
                    },
                )?;
                fs::write(&manifest, contents)
                    .await
                    .map_err(|e| Error::io(&manifest, e))?;
            }
            Err(e) => return Err(Error::io(&manifest, e)),
        }

        let software_dir = paths.software_dir();
        fs::create_dir_all(&software_dir)
            .await
            .map_err(|e| Error::io(&software_dir, e))?;

        if let Some(parent) = paths.db_file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        let db = Database::open(&paths.db_file)?;
        if db.has_schema()? {
            warn!(db = %paths.db_file.display(), "registry table already exists");
            return Ok(Validation::Invalid("registry table already exists".to_string()));
        }
        db.create_schema()?;

        info!(root = %paths.root.display(), "registry created");
        Ok(Validation::Valid)
    }

    /// Open an existing registry created by [`PackageRegistry::create_new_registry`].
    pub fn open(paths: Paths, package_manager: Box<dyn PackageManager>) -> Result<Self, Error> {
        std::fs::metadata(&paths.db_file).map_err(|e| Error::io(&paths.db_file, e))?;
        let db = Database::open(&paths.db_file)?;
        Ok(Self {
            paths,
            db,
            package_manager,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Validate an add-on already present in the dependency cache and record
    /// it in the registry.
    pub async fn add_package(&self, name: &str, options: AddOptions) -> Result<Validation, Error> {
        info!(package = name, "adding package to registry");
        let manifest = self.read_package_manifest(name).await?;

        let validation = validate_manifest(&manifest);
        if let Validation::Invalid(message) = &validation {
            warn!(package = name, %message, "package.json failed validation, package not added");
            return Ok(validation);
        }

        let Some(package) = Package::from_manifest(&manifest) else {
            return Ok(Validation::Invalid(
                "package.json has no name field".to_string(),
            ));
        };

        if self.db.package_exists(&package.name)? {
            if !options.force {
                warn!(package = %package.name, "package already in registry; pass force to overwrite");
                return Ok(Validation::Invalid("Package already in registry.".to_string()));
            }
            warn!(package = %package.name, "replacing existing registry entry");
            self.db.delete_package(&package.name)?;
        }

        let id = self.db.insert_package(&package)?;
        info!(package = %package.name, %id, types = ?package.types, "package added");
        Ok(Validation::Valid)
    }

    async fn read_package_manifest(&self, name: &str) -> Result<Value, Error> {
        let path = self.paths.package_manifest(name);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::PackageNotInstalled {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(Error::io(&path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| Error::InvalidManifest {
            package: name.to_string(),
            message: format!("package.json is not valid JSON: {e}"),
        })
    }

    /// Fetch an add-on with the package manager, then add it to the registry.
    pub async fn install(&self, name: &str, options: InstallOptions) -> Result<Validation, Error> {
        let spec = match (&options.version, options.local) {
            (Some(version), false) => format!("{name}@{version}"),
            (_, true) => {
                let path = fs::canonicalize(name)
                    .await
                    .map_err(|e| Error::io(name, e))?;
                path.to_string_lossy().into_owned()
            }
            (None, false) => name.to_string(),
        };
        info!(package = %spec, "installing package");
        self.package_manager
            .run(&install_args(&spec), &self.paths.root)
            .await?;

        let registry_name = if options.local {
            local_package_name(Path::new(&spec)).await?
        } else {
            name.to_string()
        };

        self.add_package(
            &registry_name,
            AddOptions {
                force: options.force,
            },
        )
        .await
    }

    /// Remove an add-on from the dependency cache and the registry.
    pub async fn uninstall(&self, name: &str) -> Result<(), Error> {
        info!(package = name, "uninstalling package");
        let dir = self.paths.package_dir(name);
        match fs::metadata(&dir).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    package = name,
                    root = %self.paths.root.display(),
                    "package not installed; if this is wrong run the package manager's remove in the registry root"
                );
                return Err(Error::PackageNotInstalled {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(Error::io(&dir, e)),
        }

        self.package_manager
            .run(&remove_args(name), &self.paths.root)
            .await?;

        let removed = self.db.delete_package(name)?;
        if removed == 0 {
            warn!(package = name, "package was not in the registry");
        }
        Ok(())
    }

    /// Install `name@version` and re-add it, replacing the old entry.
    pub async fn update(&self, name: &str, version: &str) -> Result<Validation, Error> {
        info!(package = name, version, "updating package");
        self.package_manager
            .run(&install_args(&format!("{name}@{version}")), &self.paths.root)
            .await?;
        self.add_package(name, AddOptions { force: true }).await
    }

    /// Wipe the package table and re-add every dependency of the root
    /// `package.json`. Packages that fail to add are logged and skipped.
    pub async fn reindex(&self) -> Result<ReindexReport, Error> {
        warn!("wiping package registry");
        let manifest_path = self.paths.manifest_file();
        let raw = fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| Error::io(&manifest_path, e))?;
        let manifest: Value = serde_json::from_str(&raw).map_err(|e| Error::InvalidManifest {
            package: tk_core::context::ROOT_PACKAGE_NAME.to_string(),
            message: e.to_string(),
        })?;

        self.db.clear_packages()?;

        let dependencies: Vec<String> = manifest
            .get("dependencies")
            .and_then(Value::as_object)
            .map(|deps| deps.keys().cloned().collect())
            .unwrap_or_default();

        let mut report = ReindexReport::default();
        for dependency in dependencies {
            debug!(package = %dependency, "reindexing");
            let outcome = self.add_package(&dependency, AddOptions::default()).await;
            let reason = match outcome {
                Ok(Validation::Valid) => {
                    report.added.push(dependency);
                    continue;
                }
                Ok(Validation::Invalid(message)) => message,
                Err(e @ (Error::PackageNotInstalled { .. } | Error::InvalidManifest { .. })) => {
                    e.to_string()
                }
                Err(e) => return Err(e),
            };
            warn!(package = %dependency, %reason, "could not add package; ignored");
            report.skipped.push((dependency, reason));
        }

        info!(added = report.added.len(), skipped = report.skipped.len(), "packages reindexed");
        Ok(report)
    }

    /// Every registry row named `name`.
    pub fn get_packages(&self, name: &str) -> Result<Vec<Package>, Error> {
        self.db
            .package_rows(PackageFilter::Name(name))?
            .into_iter()
            .map(parse_row)
            .collect()
    }

    pub fn get_package(&self, name: &str) -> Result<Package, Error> {
        self.get_packages(name)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::PackageNotFound {
                name: name.to_string(),
            })
    }

    pub fn list_packages(&self) -> Result<Vec<Package>, Error> {
        self.db
            .package_rows(PackageFilter::All)?
            .into_iter()
            .map(parse_row)
            .collect()
    }

    pub fn packages_of_type(&self, addon_type: AddonType) -> Result<Vec<Package>, Error> {
        self.db
            .package_rows(PackageFilter::Type(addon_type))?
            .into_iter()
            .map(parse_row)
            .collect::<Result<Vec<_>, _>>()
            .map(|packages| {
                packages
                    .into_iter()
                    .filter(|p| p.provides(addon_type))
                    .collect()
            })
    }

    /// Absolute path of the file implementing `addon_type` for `name`.
    pub fn entry_point(&self, name: &str, addon_type: AddonType) -> Result<PathBuf, Error> {
        let package = self.get_package(name)?;
        let entry = package
            .entry_for(addon_type)
            .ok_or_else(|| Error::EntryPointNotBound {
                package: name.to_string(),
                addon_type,
            })?;
        Ok(self
            .paths
            .package_dir(name)
            .join(entry.trim_start_matches("./")))
    }
}

async fn local_package_name(dir: &Path) -> Result<String, Error> {
    let path = dir.join(tk_core::context::ROOT_MANIFEST);
    let raw = fs::read_to_string(&path)
        .await
        .map_err(|e| Error::io(&path, e))?;
    let manifest: Value = serde_json::from_str(&raw).map_err(|e| Error::InvalidManifest {
        package: dir.display().to_string(),
        message: e.to_string(),
    })?;
    manifest
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidManifest {
            package: dir.display().to_string(),
            message: "package.json has no name field".to_string(),
        })
}

/// Decode a stored row, re-checking the invariants a valid add-on has.
fn parse_row(row: PackageRow) -> Result<Package, Error> {
    let corrupt = |what: &str, e: serde_json::Error| Error::StoreCorruption {
        message: format!("package {} has an unreadable {what} column: {e}", row.name),
    };
    let types: Vec<AddonType> = serde_json::from_str(&row.types).map_err(|e| corrupt("types", e))?;
    let info: PackageInfo = serde_json::from_str(&row.info).map_err(|e| corrupt("info", e))?;
    let entry: BTreeMap<AddonType, String> =
        serde_json::from_str(&row.entry).map_err(|e| corrupt("entry", e))?;

    let package = Package {
        id: Some(row.id.clone()),
        name: row.name.clone(),
        types,
        info,
        entry,
    };
    if let Validation::Invalid(message) = package.check_consistency() {
        return Err(Error::StoreCorruption {
            message: format!("package {}: {message}", row.name),
        });
    }
    Ok(package)
}
