use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::addon::AddonType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidManifest {
        package: String,
        message: String,
    },
    PackageNotInstalled {
        name: String,
    },
    PackageNotFound {
        name: String,
    },
    EntryPointNotBound {
        package: String,
        addon_type: AddonType,
    },
    HandlerFailed {
        package: String,
        addon_type: AddonType,
        message: String,
    },
    SoftwareNotFound {
        name: String,
        owner: String,
    },
    ExecutableNotFound {
        software: String,
        name: String,
        owner: String,
    },
    SoftwareNameTaken {
        name: String,
        owner: String,
    },
    ExecutableNameTaken {
        software: String,
        name: String,
    },
    MissingExecutablePath {
        software: String,
        executable: String,
    },
    AlreadyDownloaded {
        name: String,
        path: PathBuf,
    },
    NetworkFailure {
        message: String,
    },
    ExtractionFailed {
        path: PathBuf,
        message: String,
    },
    PackageManagerFailed {
        command: String,
        message: String,
    },
    StoreCorruption {
        message: String,
    },
    Io {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
}

impl Error {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl AsRef<Path>, err: io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// True for every "does not exist" condition, whether it came from the
    /// filesystem or from a registry lookup.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::PackageNotInstalled { .. }
            | Error::PackageNotFound { .. }
            | Error::EntryPointNotBound { .. }
            | Error::SoftwareNotFound { .. }
            | Error::ExecutableNotFound { .. } => true,
            Error::Io { kind, .. } => *kind == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidManifest { package, message } => {
                write!(f, "invalid add-on manifest for '{}': {}", package, message)
            }
            Error::PackageNotInstalled { name } => {
                write!(
                    f,
                    "package (add-on) '{}' not installed, or package.json does not exist\n  hint: the registry may be corrupt; try 'tk install {}' again",
                    name, name
                )
            }
            Error::PackageNotFound { name } => {
                write!(
                    f,
                    "no package named '{}' in the registry\n  hint: run 'tk list' to see installed add-ons",
                    name
                )
            }
            Error::EntryPointNotBound {
                package,
                addon_type,
            } => {
                write!(
                    f,
                    "add-on '{}' has no {} entry point bound",
                    package, addon_type
                )
            }
            Error::HandlerFailed {
                package,
                addon_type,
                message,
            } => {
                write!(
                    f,
                    "{} handler of add-on '{}' failed: {}",
                    addon_type, package, message
                )
            }
            Error::SoftwareNotFound { name, owner } => {
                write!(
                    f,
                    "software '{}' is not registered for add-on '{}'",
                    name, owner
                )
            }
            Error::ExecutableNotFound {
                software,
                name,
                owner,
            } => {
                write!(
                    f,
                    "executable '{}' of software '{}' is not registered for add-on '{}'",
                    name, software, owner
                )
            }
            Error::SoftwareNameTaken { name, owner } => {
                write!(
                    f,
                    "software name '{}' already used by add-on '{}'\n  hint: uninstall the existing software or pick a different name",
                    name, owner
                )
            }
            Error::ExecutableNameTaken { software, name } => {
                write!(
                    f,
                    "executable name '{}' used more than once in software '{}'",
                    name, software
                )
            }
            Error::MissingExecutablePath {
                software,
                executable,
            } => {
                write!(
                    f,
                    "new executable '{}' of software '{}' needs a path",
                    executable, software
                )
            }
            Error::AlreadyDownloaded { name, path } => {
                write!(
                    f,
                    "{} already downloaded to '{}'\n  hint: delete the downloaded file if you need to redownload it",
                    name,
                    path.display()
                )
            }
            Error::NetworkFailure { message } => {
                write!(
                    f,
                    "network error: {}\n  hint: check your internet connection and try again",
                    message
                )
            }
            Error::ExtractionFailed { path, message } => {
                write!(f, "failed to extract '{}': {}", path.display(), message)
            }
            Error::PackageManagerFailed { command, message } => {
                write!(f, "'{}' failed: {}", command, message)
            }
            Error::StoreCorruption { message } => {
                write!(
                    f,
                    "registry database error: {}\n  hint: run 'tk reindex' to rebuild the package table",
                    message
                )
            }
            Error::Io {
                path,
                kind,
                message,
            } => {
                write!(f, "{}: {}", path.display(), message)?;
                if *kind == io::ErrorKind::NotFound {
                    write!(
                        f,
                        "\n  hint: the registry is likely incomplete; run 'tk init' to recreate it"
                    )?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_covers_registry_and_filesystem() {
        let missing = Error::SoftwareNotFound {
            name: "ahk".to_string(),
            owner: "executor-ahk".to_string(),
        };
        assert!(missing.is_not_found());

        let enoent = Error::io(
            "/tmp/nowhere",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(enoent.is_not_found());

        let denied = Error::io(
            "/tmp/locked",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(!denied.is_not_found());
    }

    #[test]
    fn software_name_taken_names_owner() {
        let err = Error::SoftwareNameTaken {
            name: "ahk".to_string(),
            owner: "executor-ahk".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("ahk"));
        assert!(msg.contains("executor-ahk"));
        assert!(msg.contains("hint:"));
    }

    #[test]
    fn already_downloaded_includes_path() {
        let err = Error::AlreadyDownloaded {
            name: "ahk".to_string(),
            path: PathBuf::from("/opt/twokeys/software/x/ahk/ahk.zip"),
        };

        let msg = err.to_string();
        assert!(msg.contains("ahk.zip"));
        assert!(msg.contains("already downloaded"));
    }

    #[test]
    fn io_not_found_suggests_init() {
        let err = Error::io(
            "/opt/twokeys/twokeys-registry.db",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );

        assert!(err.to_string().contains("tk init"));
    }
}
