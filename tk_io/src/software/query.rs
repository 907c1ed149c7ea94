use std::path::PathBuf;

use tracing::{debug, warn};

use tk_core::{Error, InstalledExecutable, InstalledSoftware, Paths};

use crate::db::Database;

/// Read access to every add-on's software.
pub struct SoftwareQuery {
    paths: Paths,
    db: Database,
}

impl SoftwareQuery {
    pub fn open(paths: Paths) -> Result<Self, Error> {
        std::fs::metadata(&paths.db_file).map_err(|e| Error::io(&paths.db_file, e))?;
        let db = Database::open(&paths.db_file)?;
        Ok(Self::from_parts(paths, db))
    }

    pub fn from_parts(paths: Paths, db: Database) -> Self {
        Self { paths, db }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub fn owner_folder(&self, owner: &str) -> PathBuf {
        self.paths.owner_folder(owner)
    }

    pub fn software_folder(&self, owner: &str, name: &str) -> PathBuf {
        self.paths.software_folder(owner, name)
    }

    /// Software filtered by name and owner, `None` matching anything, each
    /// with its executables.
    pub fn get_softwares(
        &self,
        name: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<InstalledSoftware>, Error> {
        debug!(
            software = name.unwrap_or("*"),
            owner = owner.unwrap_or("*"),
            "retrieving software"
        );
        let mut softwares = self.db.software_rows(name, owner)?;
        for software in &mut softwares {
            software.executables = self.db.executable_rows(&software.id, None)?;
        }
        Ok(softwares)
    }

    /// One executable (`name`) or all of them for `(software, owner)`.
    pub fn get_executables(
        &self,
        software: &str,
        name: Option<&str>,
        owner: &str,
    ) -> Result<Vec<InstalledExecutable>, Error> {
        debug!(
            software,
            executable = name.unwrap_or("*"),
            owner,
            "retrieving executables"
        );
        let id = self
            .db
            .software_id(software, owner)?
            .ok_or_else(|| Error::SoftwareNotFound {
                name: software.to_string(),
                owner: owner.to_string(),
            })?;
        self.db.executable_rows(&id, name)
    }

    /// Delete the rows of `(name, owner)`, executables first. Returns the
    /// number of rows removed.
    pub fn remove_records(&self, name: &str, owner: &str) -> Result<usize, Error> {
        let Some(id) = self.db.software_id(name, owner)? else {
            warn!(software = name, owner, "no software rows to delete");
            return Ok(0);
        };
        let executables = self.db.delete_executables_of(&id)?;
        let software = self.db.delete_software(&id)?;
        debug!(software = name, owner, executables, "deleted software rows");
        Ok(executables + software)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tk_core::{Arch, DownloadType, Software};

    fn query() -> SoftwareQuery {
        SoftwareQuery::from_parts(Paths::new("/reg"), Database::in_memory().unwrap())
    }

    fn seed(query: &SoftwareQuery, id: &str, name: &str, owner: &str, executables: &[&str]) {
        let software = Software {
            name: name.to_string(),
            url: "https://example.com/x".to_string(),
            homepage: "https://example.com".to_string(),
            download_type: DownloadType::NoDownload,
            filename: None,
            no_auto_install: false,
            executables: vec![],
        };
        query.db().insert_software(id, owner, &software).unwrap();
        for exe in executables {
            query
                .db()
                .insert_executable(
                    name,
                    &InstalledExecutable {
                        id: format!("{id}-{exe}"),
                        name: exe.to_string(),
                        path: exe.to_string(),
                        arch: Arch::X64,
                        os: "linux".to_string(),
                        user_installed: true,
                        software_id: id.to_string(),
                    },
                )
                .unwrap();
        }
    }

    #[test]
    fn get_softwares_attaches_executables() {
        let query = query();
        seed(&query, "a", "python", "executor-py", &["python3", "pip"]);
        seed(&query, "b", "python", "detector-x", &["python3"]);
        seed(&query, "c", "ahk", "executor-ahk", &[]);

        let all = query.get_softwares(None, None).unwrap();
        assert_eq!(all.len(), 3);

        let pythons = query.get_softwares(Some("python"), None).unwrap();
        assert_eq!(pythons.len(), 2);

        let owned = query.get_softwares(None, Some("executor-py")).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].executables.len(), 2);

        let pair = query
            .get_softwares(Some("python"), Some("detector-x"))
            .unwrap();
        assert_eq!(pair[0].executables[0].name, "python3");
    }

    #[test]
    fn get_executables_for_missing_software_is_not_found() {
        let query = query();
        let err = query
            .get_executables("ahk", None, "executor-ahk")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn get_single_executable() {
        let query = query();
        seed(&query, "a", "python", "executor-py", &["python3", "pip"]);

        let pip = query
            .get_executables("python", Some("pip"), "executor-py")
            .unwrap();
        assert_eq!(pip.len(), 1);
        assert_eq!(pip[0].name, "pip");
        assert!(pip[0].user_installed);
    }

    #[test]
    fn remove_records_deletes_executables_too() {
        let query = query();
        seed(&query, "a", "python", "executor-py", &["python3", "pip"]);

        assert_eq!(query.remove_records("python", "executor-py").unwrap(), 3);
        assert!(query.db().executable_rows("a", None).unwrap().is_empty());
        assert_eq!(query.remove_records("python", "executor-py").unwrap(), 0);
    }

    #[test]
    fn folders_are_scoped_by_owner() {
        let query = query();
        assert_eq!(
            query.software_folder("executor-ahk", "ahk"),
            PathBuf::from("/reg/software/executor-ahk/ahk")
        );
        assert_eq!(
            query.owner_folder("executor-ahk"),
            PathBuf::from("/reg/software/executor-ahk")
        );
    }
}
