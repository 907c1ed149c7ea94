use std::path::Path;
use std::str::FromStr;

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, OptionalExtension, ffi, params, params_from_iter};

use tk_core::{
    AddonType, Error, ExecutablePatch, InstalledExecutable, InstalledSoftware, Package, Software,
    SoftwarePatch,
};

// The FOREIGN KEY clauses describe the relations only. Enforcement is
// switched off on every connection and deletes cascade in application code,
// so software rows outlive the package row of their owner.
const SCHEMA: &str = "
    CREATE TABLE packages (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        types TEXT NOT NULL,
        info TEXT NOT NULL,
        entry TEXT NOT NULL
    );

    CREATE TABLE software (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT NOT NULL,
        homepage TEXT NOT NULL,
        ownerName TEXT NOT NULL,
        installed BOOLEAN NOT NULL DEFAULT 0 CHECK (installed IN (0, 1)),
        downloadType TEXT NOT NULL,
        filename TEXT,
        noAutoInstall BOOLEAN NOT NULL DEFAULT 0 CHECK (noAutoInstall IN (0, 1)),
        UNIQUE (name, ownerName),
        FOREIGN KEY (ownerName) REFERENCES packages (name)
    );

    CREATE TABLE executables (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        path TEXT NOT NULL,
        arch TEXT NOT NULL,
        os TEXT NOT NULL,
        userInstalled BOOLEAN NOT NULL DEFAULT 0 CHECK (userInstalled IN (0, 1)),
        softwareId TEXT NOT NULL,
        UNIQUE (name, softwareId),
        FOREIGN KEY (softwareId) REFERENCES software (id)
    );
";

const SOFTWARE_COLUMNS: &str =
    "id, name, ownerName, url, homepage, downloadType, filename, installed, noAutoInstall";
const EXECUTABLE_COLUMNS: &str = "id, name, path, arch, os, userInstalled, softwareId";

pub struct Database {
    conn: Connection,
}

/// A package row as stored, with its JSON columns still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRow {
    pub id: String,
    pub name: String,
    pub types: String,
    pub info: String,
    pub entry: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFilter<'a> {
    All,
    Name(&'a str),
    Type(AddonType),
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY
/// constraint.
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

fn store_err(context: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::StoreCorruption {
        message: format!("{context}: {e}"),
    }
}

fn parse_column<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn software_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstalledSoftware> {
    Ok(InstalledSoftware {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_name: row.get(2)?,
        url: row.get(3)?,
        homepage: row.get(4)?,
        download_type: parse_column(row, 5)?,
        filename: row.get(6)?,
        installed: row.get::<_, i64>(7)? != 0,
        no_auto_install: row.get::<_, i64>(8)? != 0,
        executables: Vec::new(),
    })
}

fn executable_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstalledExecutable> {
    Ok(InstalledExecutable {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        arch: parse_column(row, 3)?,
        os: row.get(4)?,
        user_installed: row.get::<_, i64>(5)? != 0,
        software_id: row.get(6)?,
    })
}

fn flag(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

impl Database {
    /// Open an existing registry database. The schema is not created; see
    /// [`Database::create_schema`].
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path).map_err(|e| Error::StoreCorruption {
            message: format!("failed to open database: {e}"),
        })?;

        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().map_err(|e| Error::StoreCorruption {
            message: format!("failed to open in-memory database: {e}"),
        })?;

        let db = Self::configure(conn)?;
        db.create_schema()?;
        Ok(db)
    }

    fn configure(conn: Connection) -> Result<Self, Error> {
        conn.pragma_update(None, "foreign_keys", false)
            .map_err(store_err("failed to configure database"))?;
        Ok(Self { conn })
    }

    pub fn foreign_keys_enforced(&self) -> Result<bool, Error> {
        self.conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .map_err(store_err("failed to inspect foreign key setting"))
    }

    pub fn has_schema(&self) -> Result<bool, Error> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'packages'",
                [],
                |row| row.get(0),
            )
            .map_err(store_err("failed to inspect schema"))
    }

    /// Create the three registry tables. Fails if any of them exists.
    pub fn create_schema(&self) -> Result<(), Error> {
        self.conn
            .execute_batch(SCHEMA)
            .map_err(store_err("failed to initialize schema"))
    }

    // Packages

    pub fn insert_package(&self, package: &Package) -> Result<String, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let encode = |e: serde_json::Error| Error::StoreCorruption {
            message: format!("failed to encode package {}: {e}", package.name),
        };
        let types = serde_json::to_string(&package.types).map_err(encode)?;
        let info = serde_json::to_string(&package.info).map_err(encode)?;
        let entry = serde_json::to_string(&package.entry).map_err(encode)?;

        self.conn
            .execute(
                "INSERT INTO packages (id, name, types, info, entry) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, package.name, types, info, entry],
            )
            .map_err(store_err("failed to insert package"))?;

        Ok(id)
    }

    pub fn package_exists(&self, name: &str) -> Result<bool, Error> {
        self.conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM packages WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(store_err("failed to look up package"))
    }

    pub fn delete_package(&self, name: &str) -> Result<usize, Error> {
        self.conn
            .execute("DELETE FROM packages WHERE name = ?1", params![name])
            .map_err(store_err("failed to delete package"))
    }

    pub fn clear_packages(&self) -> Result<usize, Error> {
        self.conn
            .execute("DELETE FROM packages", [])
            .map_err(store_err("failed to clear packages"))
    }

    pub fn package_rows(&self, filter: PackageFilter<'_>) -> Result<Vec<PackageRow>, Error> {
        let (sql, arg) = match filter {
            PackageFilter::All => ("SELECT id, name, types, info, entry FROM packages ORDER BY name", None),
            PackageFilter::Name(name) => (
                "SELECT id, name, types, info, entry FROM packages WHERE name = ?1",
                Some(name.to_string()),
            ),
            PackageFilter::Type(addon_type) => (
                "SELECT id, name, types, info, entry FROM packages WHERE types LIKE ?1 ORDER BY name",
                Some(format!("%\"{addon_type}\"%")),
            ),
        };

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(store_err("failed to prepare statement"))?;

        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<PackageRow> {
            Ok(PackageRow {
                id: row.get(0)?,
                name: row.get(1)?,
                types: row.get(2)?,
                info: row.get(3)?,
                entry: row.get(4)?,
            })
        };
        let rows = match arg {
            Some(arg) => stmt.query_map(params![arg], map),
            None => stmt.query_map([], map),
        }
        .map_err(store_err("failed to query packages"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err("failed to collect results"))?;

        Ok(rows)
    }

    // Software

    pub fn insert_software(&self, id: &str, owner: &str, software: &Software) -> Result<(), Error> {
        self.conn
            .execute(
                "INSERT INTO software (id, name, url, homepage, ownerName, installed, downloadType, filename, noAutoInstall)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
                params![
                    id,
                    software.name,
                    software.url,
                    software.homepage,
                    owner,
                    software.download_type.as_str(),
                    software.filename,
                    flag(software.no_auto_install),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::SoftwareNameTaken {
                        name: software.name.clone(),
                        owner: owner.to_string(),
                    }
                } else {
                    store_err("failed to insert software")(e)
                }
            })?;

        Ok(())
    }

    /// All software matching the optional name and owner filters, without
    /// their executables.
    pub fn software_rows(
        &self,
        name: Option<&str>,
        owner: Option<&str>,
    ) -> Result<Vec<InstalledSoftware>, Error> {
        let (filter, args): (&str, Vec<&str>) = match (name, owner) {
            (None, None) => ("", vec![]),
            (Some(name), None) => ("WHERE name = ?1", vec![name]),
            (None, Some(owner)) => ("WHERE ownerName = ?1", vec![owner]),
            (Some(name), Some(owner)) => ("WHERE name = ?1 AND ownerName = ?2", vec![name, owner]),
        };
        let sql = format!("SELECT {SOFTWARE_COLUMNS} FROM software {filter} ORDER BY ownerName, name");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(store_err("failed to prepare statement"))?;

        let rows = stmt
            .query_map(params_from_iter(args), software_from_row)
            .map_err(store_err("failed to query software"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err("failed to collect results"))?;

        Ok(rows)
    }

    pub fn software_id(&self, name: &str, owner: &str) -> Result<Option<String>, Error> {
        self.conn
            .query_row(
                "SELECT id FROM software WHERE name = ?1 AND ownerName = ?2",
                params![name, owner],
                |row| row.get(0),
            )
            .optional()
            .map_err(store_err("failed to look up software"))
    }

    pub fn set_installed(&self, id: &str, installed: bool) -> Result<usize, Error> {
        self.conn
            .execute(
                "UPDATE software SET installed = ?1 WHERE id = ?2",
                params![flag(installed), id],
            )
            .map_err(store_err("failed to update installed flag"))
    }

    /// Write the record fields present in `patch` in a single statement.
    pub fn update_software(
        &self,
        id: &str,
        owner: &str,
        patch: &SoftwarePatch,
    ) -> Result<usize, Error> {
        let mut columns: Vec<(&'static str, Value)> = Vec::new();
        if let Some(name) = &patch.name {
            columns.push(("name", Value::Text(name.clone())));
        }
        if let Some(url) = &patch.url {
            columns.push(("url", Value::Text(url.clone())));
        }
        if let Some(homepage) = &patch.homepage {
            columns.push(("homepage", Value::Text(homepage.clone())));
        }
        if let Some(download_type) = patch.download_type {
            columns.push(("downloadType", Value::Text(download_type.as_str().to_string())));
        }
        if let Some(filename) = &patch.filename {
            columns.push(("filename", Value::Text(filename.clone())));
        }
        if let Some(no_auto_install) = patch.no_auto_install {
            columns.push(("noAutoInstall", Value::Integer(flag(no_auto_install))));
        }

        self.update_columns("software", id, columns).map_err(|e| {
            if is_unique_violation(&e) {
                Error::SoftwareNameTaken {
                    name: patch.name.clone().unwrap_or_default(),
                    owner: owner.to_string(),
                }
            } else {
                store_err("failed to update software")(e)
            }
        })
    }

    fn update_columns(
        &self,
        table: &str,
        id: &str,
        columns: Vec<(&'static str, Value)>,
    ) -> rusqlite::Result<usize> {
        if columns.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, (column, _))| format!("\"{column}\" = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {table} SET {} WHERE id = ?{}",
            assignments.join(", "),
            columns.len() + 1
        );

        let mut values: Vec<Value> = columns.into_iter().map(|(_, value)| value).collect();
        values.push(Value::Text(id.to_string()));
        self.conn.execute(&sql, params_from_iter(values))
    }

    pub fn delete_software(&self, id: &str) -> Result<usize, Error> {
        self.conn
            .execute("DELETE FROM software WHERE id = ?1", params![id])
            .map_err(store_err("failed to delete software"))
    }

    // Executables

    pub fn insert_executable(
        &self,
        software_name: &str,
        executable: &InstalledExecutable,
    ) -> Result<(), Error> {
        self.conn
            .execute(
                "INSERT INTO executables (id, name, path, arch, os, userInstalled, softwareId)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    executable.id,
                    executable.name,
                    executable.path,
                    executable.arch.as_str(),
                    executable.os,
                    flag(executable.user_installed),
                    executable.software_id,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::ExecutableNameTaken {
                        software: software_name.to_string(),
                        name: executable.name.clone(),
                    }
                } else {
                    store_err("failed to insert executable")(e)
                }
            })?;

        Ok(())
    }

    pub fn executable_rows(
        &self,
        software_id: &str,
        name: Option<&str>,
    ) -> Result<Vec<InstalledExecutable>, Error> {
        let mut sql = format!("SELECT {EXECUTABLE_COLUMNS} FROM executables WHERE softwareId = ?1");
        let mut args = vec![software_id];
        if let Some(name) = name {
            sql.push_str(" AND name = ?2");
            args.push(name);
        }
        sql.push_str(" ORDER BY name");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(store_err("failed to prepare statement"))?;

        let rows = stmt
            .query_map(params_from_iter(args), executable_from_row)
            .map_err(store_err("failed to query executables"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(store_err("failed to collect results"))?;

        Ok(rows)
    }

    /// Apply the non-key fields of `patch`; `resolved_path` replaces the
    /// patch's raw path.
    pub fn update_executable(
        &self,
        id: &str,
        patch: &ExecutablePatch,
        resolved_path: Option<&str>,
    ) -> Result<usize, Error> {
        let mut columns: Vec<(&'static str, Value)> = Vec::new();
        if let Some(path) = resolved_path {
            columns.push(("path", Value::Text(path.to_string())));
        }
        if let Some(arch) = patch.arch {
            columns.push(("arch", Value::Text(arch.as_str().to_string())));
        }
        if let Some(os) = &patch.os {
            columns.push(("os", Value::Text(os.clone())));
        }
        if let Some(user_installed) = patch.user_installed {
            columns.push(("userInstalled", Value::Integer(flag(user_installed))));
        }

        self.update_columns("executables", id, columns)
            .map_err(store_err("failed to update executable"))
    }

    pub fn rename_executable(
        &self,
        software_id: &str,
        software_name: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<usize, Error> {
        self.conn
            .execute(
                "UPDATE executables SET name = ?1 WHERE softwareId = ?2 AND name = ?3",
                params![new_name, software_id, old_name],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::ExecutableNameTaken {
                        software: software_name.to_string(),
                        name: new_name.to_string(),
                    }
                } else {
                    store_err("failed to rename executable")(e)
                }
            })
    }

    pub fn delete_executable(&self, software_id: &str, name: &str) -> Result<usize, Error> {
        self.conn
            .execute(
                "DELETE FROM executables WHERE softwareId = ?1 AND name = ?2",
                params![software_id, name],
            )
            .map_err(store_err("failed to delete executable"))
    }

    pub fn delete_executables_of(&self, software_id: &str) -> Result<usize, Error> {
        self.conn
            .execute(
                "DELETE FROM executables WHERE softwareId = ?1",
                params![software_id],
            )
            .map_err(store_err("failed to delete executables"))
    }
}
