pub mod addon;
pub mod context;
pub mod errors;
pub mod patch;
pub mod software;

pub use addon::{AddonType, Package, PackageInfo, Validation, validate_manifest};
pub use context::{Config, Paths};
pub use errors::Error;
pub use patch::{ExecutablePatch, SoftwarePatch};
pub use software::{
    Arch, DownloadType, Executable, InstalledExecutable, InstalledSoftware, Software,
};
