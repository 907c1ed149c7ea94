pub mod copy;
pub mod db;
pub mod dispatch;
pub mod download;
pub mod extract;
pub mod progress;
pub mod registry;
pub mod software;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use copy::{ContentCopier, FileTreeNode, generate_file_tree};
pub use db::Database;
pub use dispatch::{AddonHandler, DispatchTable, ProcessHandler};
pub use download::{ArchiveDownloader, DownloadRequest, Downloader};
pub use extract::{ArchiveFormat, extract_archive};
pub use progress::{InstallProgress, ProgressCallback};
pub use registry::{AddOptions, InstallOptions, PackageRegistry, ReindexReport};
pub use software::{SoftwareQuery, SoftwareRegistry};
pub use traits::{NpmPackageManager, PackageManager};
