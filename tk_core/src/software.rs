//! Third-party software that add-ons depend on, and the executables it ships.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Processor architecture of an executable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X32,
    X64,
    Arm,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::X32 => "x32",
            Arch::X64 => "x64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
        }
    }

    /// Architecture of the running process.
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86" => Arch::X32,
            "arm" => Arch::Arm,
            "aarch64" => Arch::Arm64,
            _ => Arch::X64,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x32" => Ok(Arch::X32),
            "x64" => Ok(Arch::X64),
            "arm" => Ok(Arch::Arm),
            "arm64" => Ok(Arch::Arm64),
            other => Err(format!("unknown architecture '{other}'")),
        }
    }
}

/// How the software artifact is retrieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadType {
    /// Nothing to download; the user provides the software (usually on PATH).
    NoDownload,
    /// The download is the executable itself.
    Standalone,
    /// The download is an archive that must be extracted.
    Archive,
}

impl DownloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadType::NoDownload => "no-download",
            DownloadType::Standalone => "standalone",
            DownloadType::Archive => "archive",
        }
    }
}

impl fmt::Display for DownloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-download" => Ok(DownloadType::NoDownload),
            "standalone" => Ok(DownloadType::Standalone),
            "archive" => Ok(DownloadType::Archive),
            other => Err(format!("unknown download type '{other}'")),
        }
    }
}

/// Name of the platform this process runs on, used as the default `os` of
/// executables.
pub fn current_os() -> &'static str {
    std::env::consts::OS
}

/// An executable as declared by an add-on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Executable {
    pub name: String,
    /// Path relative to the software folder, or a bare command name when
    /// `user_installed` is set.
    pub path: String,
    pub arch: Arch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    /// Treat `path` as something already on the user's PATH.
    #[serde(default)]
    pub user_installed: bool,
}

impl Executable {
    pub fn new(name: impl Into<String>, path: impl Into<String>, arch: Arch) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            arch,
            os: None,
            user_installed: false,
        }
    }

    pub fn user_installed(mut self) -> Self {
        self.user_installed = true;
        self
    }
}

/// Software as declared by an add-on before installation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Software {
    /// Must be usable as a directory name on every supported OS.
    pub name: String,
    pub url: String,
    pub homepage: String,
    pub download_type: DownloadType,
    /// File name to save the download as; defaults to the URL basename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Register only; never download or extract automatically.
    #[serde(default)]
    pub no_auto_install: bool,
    pub executables: Vec<Executable>,
}

impl Software {
    /// File name the artifact is saved under inside the software folder.
    pub fn download_file_name(&self) -> String {
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        url_basename(&self.url).unwrap_or_else(|| self.name.clone())
    }
}

/// An executable row as stored in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledExecutable {
    pub id: String,
    pub name: String,
    /// Absolute path, or the verbatim command name for user-installed ones.
    pub path: String,
    pub arch: Arch,
    pub os: String,
    pub user_installed: bool,
    pub software_id: String,
}

/// A software row, with its executables, as stored in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledSoftware {
    pub id: String,
    pub name: String,
    pub owner_name: String,
    pub url: String,
    pub homepage: String,
    pub download_type: DownloadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub installed: bool,
    pub no_auto_install: bool,
    pub executables: Vec<InstalledExecutable>,
}

impl InstalledSoftware {
    pub fn executable(&self, name: &str) -> Option<&InstalledExecutable> {
        self.executables.iter().find(|e| e.name == name)
    }

    /// Rebuild the declaration this row was installed from, for re-running
    /// downloads. Executables are left out.
    pub fn as_declared(&self) -> Software {
        Software {
            name: self.name.clone(),
            url: self.url.clone(),
            homepage: self.homepage.clone(),
            download_type: self.download_type,
            filename: self.filename.clone(),
            no_auto_install: self.no_auto_install,
            executables: Vec::new(),
        }
    }
}

/// Resolve an executable path declared relative to the software folder.
///
/// User-installed executables keep their path verbatim.
pub fn resolve_executable_path(software_folder: &Path, path: &str, user_installed: bool) -> String {
    if user_installed {
        return path.to_string();
    }
    let relative = path.trim_start_matches("./");
    if relative.is_empty() || relative == "." {
        return software_folder.to_string_lossy().into_owned();
    }
    software_folder.join(relative).to_string_lossy().into_owned()
}

/// Last non-empty path segment of a URL, without query string or fragment.
pub fn url_basename(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);
    let mut segments = after_scheme.split('/');
    // First segment is the host.
    segments.next();
    segments
        .filter(|s| !s.is_empty())
        .last()
        .map(str::to_string)
}
