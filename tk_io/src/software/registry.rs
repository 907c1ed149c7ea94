use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tracing::{debug, info, warn};

use tk_core::software::{current_os, resolve_executable_path};
use tk_core::{
    Arch, Config, DownloadType, Error, ExecutablePatch, InstalledExecutable, InstalledSoftware,
    Paths, Software, SoftwarePatch,
};

use crate::copy::ContentCopier;
use crate::download::{ArchiveDownloader, DownloadRequest, Downloader};
use crate::progress::{InstallProgress, ProgressCallback, report};

use super::SoftwareQuery;

/// Write access to the software of one add-on.
///
/// Every operation is scoped to `owner`; another add-on's software can be
/// read through [`SoftwareRegistry::query`] but never changed.
pub struct SoftwareRegistry {
    owner: String,
    query: SoftwareQuery,
    downloader: Downloader,
    progress: Option<Arc<ProgressCallback>>,
}

async fn remove_folder(folder: &Path) -> Result<(), Error> {
    match fs::remove_dir_all(folder).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(folder, e)),
    }
}

impl SoftwareRegistry {
    pub fn open(paths: Paths, owner: impl Into<String>, config: &Config) -> Result<Self, Error> {
        let query = SoftwareQuery::open(paths)?;
        Ok(Self::new(query, owner, Downloader::new(config)?))
    }

    pub fn new(query: SoftwareQuery, owner: impl Into<String>, downloader: Downloader) -> Self {
        Self {
            owner: owner.into(),
            query,
            downloader,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<Arc<ProgressCallback>>) -> Self {
        self.progress = progress;
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn query(&self) -> &SoftwareQuery {
        &self.query
    }

    pub fn software_folder(&self, name: &str) -> PathBuf {
        self.query.software_folder(&self.owner, name)
    }

    fn not_found(&self, name: &str) -> Error {
        Error::SoftwareNotFound {
            name: name.to_string(),
            owner: self.owner.clone(),
        }
    }

    /// Register `software` and its executables, then download it unless it
    /// opts out of automatic installation.
    ///
    /// If an executable cannot be inserted the software row is removed again
    /// so no executable-less entry is left behind.
    pub async fn install_software(&self, software: &Software) -> Result<InstalledSoftware, Error> {
        info!(owner = %self.owner, software = %software.name, "installing software");
        let db = self.query.db();
        let id = uuid::Uuid::new_v4().to_string();
        db.insert_software(&id, &self.owner, software)?;

        let folder = self.software_folder(&software.name);
        for executable in &software.executables {
            let row = InstalledExecutable {
                id: uuid::Uuid::new_v4().to_string(),
                name: executable.name.clone(),
                path: resolve_executable_path(&folder, &executable.path, executable.user_installed),
                arch: executable.arch,
                os: executable
                    .os
                    .clone()
                    .unwrap_or_else(|| current_os().to_string()),
                user_installed: executable.user_installed,
                software_id: id.clone(),
            };
            if let Err(e) = db.insert_executable(&software.name, &row) {
                warn!(
                    owner = %self.owner,
                    software = %software.name,
                    executable = %executable.name,
                    error = %e,
                    "executable insert failed, removing software row"
                );
                db.delete_executables_of(&id)?;
                db.delete_software(&id)?;
                return Err(e);
            }
        }

        self.run_install(software).await?;
        self.get_software(&software.name)
    }

    /// Download (and extract, for archives) the artifact of registered
    /// software, then mark it installed.
    ///
    /// Returns `false` without touching disk when the software opts out of
    /// automatic installation or has nothing to download.
    pub async fn run_install(&self, software: &Software) -> Result<bool, Error> {
        if software.no_auto_install {
            warn!(
                owner = %self.owner,
                software = %software.name,
                "software has noAutoInstall set; not installing automatically"
            );
            return Ok(false);
        }
        self.download_software(software).await
    }

    /// Install software even if it is marked `noAutoInstall`.
    pub async fn force_install(&self, name: &str) -> Result<bool, Error> {
        let record = self.get_software(name)?;
        let folder = self.software_folder(name);
        remove_folder(&folder).await?;
        self.download_software(&record.as_declared()).await
    }

    async fn download_software(&self, software: &Software) -> Result<bool, Error> {
        let folder = self.software_folder(&software.name);
        let request = DownloadRequest {
            name: software.name.clone(),
            url: software.url.clone(),
            dest: folder.join(software.download_file_name()),
        };

        match software.download_type {
            DownloadType::NoDownload => {
                warn!(
                    owner = %self.owner,
                    software = %software.name,
                    "software has download type no-download; nothing to install"
                );
                return Ok(false);
            }
            DownloadType::Standalone => {
                info!(software = %software.name, url = %software.url, "downloading standalone executable");
                self.downloader
                    .download(&request, false, self.progress.clone())
                    .await?;
            }
            DownloadType::Archive => {
                info!(software = %software.name, url = %software.url, "downloading archive");
                ArchiveDownloader::new(self.downloader.clone(), &folder)
                    .download_and_extract(&request, false, self.progress.clone())
                    .await?;
            }
        }

        let id = self
            .query
            .db()
            .software_id(&software.name, &self.owner)?
            .ok_or_else(|| self.not_found(&software.name))?;
        self.query.db().set_installed(&id, true)?;
        report(
            &self.progress,
            InstallProgress::InstallCompleted {
                name: software.name.clone(),
            },
        );
        info!(owner = %self.owner, software = %software.name, "software installed");
        Ok(true)
    }

    /// Apply `patch` to `name`, moving its folder when renamed, and
    /// optionally reinstall it.
    pub async fn update_software(
        &self,
        name: &str,
        patch: &SoftwarePatch,
        reinstall: bool,
    ) -> Result<(), Error> {
        if patch.is_empty() {
            warn!(owner = %self.owner, software = name, "empty update; nothing to do");
            return Ok(());
        }

        info!(owner = %self.owner, software = name, "updating software");
        self.update_software_record(name, patch)?;

        let current = patch.renames_from(name).unwrap_or(name);
        if current != name {
            let old_folder = self.software_folder(name);
            let new_folder = self.software_folder(current);
            if fs::metadata(&old_folder).await.is_ok() {
                debug!(from = %old_folder.display(), to = %new_folder.display(), "moving software folder");
                ContentCopier::new(current, &old_folder, &new_folder)
                    .with_progress(self.progress.clone())
                    .copy_contents()
                    .await?;
                remove_folder(&old_folder).await?;
            } else {
                debug!(folder = %old_folder.display(), "no software folder to move");
            }
        }

        if reinstall {
            let record = self.get_software(current)?;
            if record.no_auto_install {
                warn!(
                    owner = %self.owner,
                    software = current,
                    "software has noAutoInstall set; skipping reinstall"
                );
                return Ok(());
            }
            info!(owner = %self.owner, software = current, "reinstalling software");
            remove_folder(&self.software_folder(current)).await?;
            self.run_install(&record.as_declared()).await?;
        }

        Ok(())
    }

    /// Write the fields present in `patch` to the database.
    ///
    /// Executables in the patch are matched by name: unknown names are
    /// inserted (and need a path), known ones are partially updated. When
    /// the software is renamed, stored executable paths under the old folder
    /// are moved to the new one.
    pub fn update_software_record(&self, name: &str, patch: &SoftwarePatch) -> Result<(), Error> {
        let db = self.query.db();
        let record = self.get_software(name)?;

        if patch.has_record_fields() {
            db.update_software(&record.id, &self.owner, patch)?;
        }

        let current = patch.renames_from(name).unwrap_or(name);
        let folder = self.software_folder(current);
        if current != name {
            self.rebase_executable_paths(&record, &self.software_folder(name), &folder)?;
        }

        for executable in &patch.executables {
            match record.executable(&executable.name) {
                None => {
                    let path =
                        executable
                            .path
                            .as_deref()
                            .ok_or_else(|| Error::MissingExecutablePath {
                                software: current.to_string(),
                                executable: executable.name.clone(),
                            })?;
                    let user_installed = executable.user_installed.unwrap_or(false);
                    let row = InstalledExecutable {
                        id: uuid::Uuid::new_v4().to_string(),
                        name: executable.name.clone(),
                        path: resolve_executable_path(&folder, path, user_installed),
                        arch: executable.arch.unwrap_or_else(Arch::current),
                        os: executable
                            .os
                            .clone()
                            .unwrap_or_else(|| current_os().to_string()),
                        user_installed,
                        software_id: record.id.clone(),
                    };
                    debug!(software = current, executable = %row.name, "adding executable");
                    db.insert_executable(current, &row)?;
                }
                Some(existing) => {
                    if !executable.has_fields() {
                        continue;
                    }
                    let user_installed =
                        executable.user_installed.unwrap_or(existing.user_installed);
                    let path = executable
                        .path
                        .as_deref()
                        .map(|p| resolve_executable_path(&folder, p, user_installed));
                    debug!(software = current, executable = %existing.name, "updating executable");
                    db.update_executable(&existing.id, executable, path.as_deref())?;
                }
            }
        }

        Ok(())
    }

    fn rebase_executable_paths(
        &self,
        record: &InstalledSoftware,
        old_folder: &Path,
        new_folder: &Path,
    ) -> Result<(), Error> {
        for executable in record.executables.iter().filter(|e| !e.user_installed) {
            let Ok(relative) = Path::new(&executable.path).strip_prefix(old_folder) else {
                continue;
            };
            let moved = new_folder.join(relative).to_string_lossy().into_owned();
            self.query.db().update_executable(
                &executable.id,
                &ExecutablePatch::new(executable.name.clone()),
                Some(&moved),
            )?;
        }
        Ok(())
    }

    pub fn rename_executable(&self, software: &str, old_name: &str, new_name: &str) -> Result<(), Error> {
        let db = self.query.db();
        let id = db
            .software_id(software, &self.owner)?
            .ok_or_else(|| self.not_found(software))?;
        if db.rename_executable(&id, software, old_name, new_name)? == 0 {
            return Err(Error::ExecutableNotFound {
                software: software.to_string(),
                name: old_name.to_string(),
                owner: self.owner.clone(),
            });
        }
        Ok(())
    }

    pub fn delete_executable(&self, software: &str, name: &str) -> Result<(), Error> {
        let db = self.query.db();
        let id = db
            .software_id(software, &self.owner)?
            .ok_or_else(|| self.not_found(software))?;
        if db.delete_executable(&id, name)? == 0 {
            return Err(Error::ExecutableNotFound {
                software: software.to_string(),
                name: name.to_string(),
                owner: self.owner.clone(),
            });
        }
        Ok(())
    }

    /// Delete the software folder and rows. Returns the number of rows
    /// removed; uninstalling unknown software removes nothing and succeeds.
    pub async fn uninstall_software(&self, name: &str) -> Result<usize, Error> {
        info!(owner = %self.owner, software = name, "uninstalling software");
        remove_folder(&self.software_folder(name)).await?;

        let changed = self.query.remove_records(name, &self.owner)?;
        if changed == 0 {
            warn!(owner = %self.owner, software = name, "no software was uninstalled");
        }
        Ok(changed)
    }

    pub fn get_software(&self, name: &str) -> Result<InstalledSoftware, Error> {
        self.query
            .get_softwares(Some(name), Some(&self.owner))?
            .into_iter()
            .next()
            .ok_or_else(|| self.not_found(name))
    }

    pub fn get_executables(&self, software: &str) -> Result<Vec<InstalledExecutable>, Error> {
        self.query.get_executables(software, None, &self.owner)
    }

    pub fn get_executable(&self, software: &str, name: &str) -> Result<InstalledExecutable, Error> {
        self.query
            .get_executables(software, Some(name), &self.owner)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ExecutableNotFound {
                software: software.to_string(),
                name: name.to_string(),
                owner: self.owner.clone(),
            })
    }

    pub fn get_executable_path(&self, software: &str, name: &str) -> Result<String, Error> {
        self.get_executable(software, name).map(|e| e.path)
    }
}
