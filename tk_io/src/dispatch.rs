//! Entry-point dispatch.
//!
//! Add-ons declare one entry file per capability. A [`DispatchTable`] maps
//! `(package, AddonType)` to a handler, refusing bindings the manifest does
//! not declare, so callers never reach an add-on through an undeclared type.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use tk_core::{AddonType, Error, Package};

use crate::registry::PackageRegistry;

/// One capability of one add-on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AddonHandler: Send + Sync {
    async fn call(&self, request: Value) -> Result<Value, Error>;
}

#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<(String, AddonType), Arc<dyn AddonHandler>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `addon_type` of `package`.
    ///
    /// The package must list the type and declare an entry point for it.
    pub fn bind(
        &mut self,
        package: &Package,
        addon_type: AddonType,
        handler: Arc<dyn AddonHandler>,
    ) -> Result<(), Error> {
        if package.entry_for(addon_type).is_none() {
            return Err(Error::InvalidManifest {
                package: package.name.clone(),
                message: format!("no entry point declared for add-on type {addon_type}"),
            });
        }
        debug!(package = %package.name, %addon_type, "binding entry point");
        self.handlers
            .insert((package.name.clone(), addon_type), handler);
        Ok(())
    }

    /// Bind a [`ProcessHandler`] for every declared entry point of every
    /// registered package. Returns the number of bindings made.
    pub fn bind_processes(
        &mut self,
        registry: &PackageRegistry,
        interpreter: &str,
    ) -> Result<usize, Error> {
        let mut bound = 0;
        for package in registry.list_packages()? {
            for addon_type in package.types.clone() {
                if package.entry_for(addon_type).is_none() {
                    continue;
                }
                let entry = registry.entry_point(&package.name, addon_type)?;
                let handler = ProcessHandler::new(&package.name, addon_type, interpreter, entry);
                self.bind(&package, addon_type, Arc::new(handler))?;
                bound += 1;
            }
        }
        info!(bound, "entry points bound");
        Ok(bound)
    }

    pub fn is_bound(&self, package: &str, addon_type: AddonType) -> bool {
        self.handlers
            .contains_key(&(package.to_string(), addon_type))
    }

    pub fn unbind(&mut self, package: &str) -> usize {
        let before = self.handlers.len();
        self.handlers.retain(|(name, _), _| name != package);
        before - self.handlers.len()
    }

    /// Invoke the handler bound to `addon_type` of `package`.
    pub async fn call(
        &self,
        package: &str,
        addon_type: AddonType,
        request: Value,
    ) -> Result<Value, Error> {
        let handler = self
            .handlers
            .get(&(package.to_string(), addon_type))
            .ok_or_else(|| Error::EntryPointNotBound {
                package: package.to_string(),
                addon_type,
            })?;
        debug!(package, %addon_type, "dispatching");
        handler.call(request).await
    }
}

/// Runs an entry file out of process as `<interpreter> <entry>`.
///
/// The request is written to stdin as JSON and the first JSON document on
/// stdout is the response.
pub struct ProcessHandler {
    package: String,
    addon_type: AddonType,
    interpreter: String,
    entry: PathBuf,
}

impl ProcessHandler {
    pub fn new(
        package: impl Into<String>,
        addon_type: AddonType,
        interpreter: impl Into<String>,
        entry: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package: package.into(),
            addon_type,
            interpreter: interpreter.into(),
            entry: entry.into(),
        }
    }

    fn failed(&self, message: impl Into<String>) -> Error {
        Error::HandlerFailed {
            package: self.package.clone(),
            addon_type: self.addon_type,
            message: message.into(),
        }
    }
}

#[async_trait]
impl AddonHandler for ProcessHandler {
    async fn call(&self, request: Value) -> Result<Value, Error> {
        let payload =
            serde_json::to_vec(&request).map_err(|e| self.failed(format!("bad request: {e}")))?;

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.entry)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = self.entry.parent() {
            command.current_dir(dir);
        }

        debug!(
            package = %self.package,
            addon_type = %self.addon_type,
            entry = %self.entry.display(),
            "spawning handler"
        );
        let mut child = command
            .spawn()
            .map_err(|e| self.failed(format!("failed to start {}: {e}", self.interpreter)))?;

        // The request is written while stdout and stderr are drained, so a
        // handler may answer before it has read everything.
        let stdin = child.stdin.take();
        let write = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| self.failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(package = %self.package, status = %output.status, "handler exited with failure");
            return Err(self.failed(format!("{} ({})", stderr.trim(), output.status)));
        }
        match written {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!(package = %self.package, "handler exited before reading the whole request");
            }
            Err(e) => return Err(self.failed(format!("failed to write request: {e}"))),
            Ok(()) => {}
        }

        serde_json::Deserializer::from_slice(&output.stdout)
            .into_iter::<Value>()
            .next()
            .ok_or_else(|| self.failed("handler wrote no response"))?
            .map_err(|e| self.failed(format!("invalid response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tk_core::PackageInfo;

    fn package(name: &str, types: &[AddonType]) -> Package {
        Package {
            id: None,
            name: name.to_string(),
            types: types.to_vec(),
            info: PackageInfo {
                version: "1.0.0".to_string(),
                description: "test".to_string(),
                size: None,
                icon_url: None,
                display_name: None,
            },
            entry: types
                .iter()
                .map(|t| (*t, format!("./{t}.js")))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn call_reaches_bound_handler() {
        let mut mock = MockAddonHandler::new();
        mock.expect_call()
            .withf(|request| request["hotkey"] == "^A")
            .times(1)
            .returning(|_| Ok(json!({ "ok": true })));

        let mut table = DispatchTable::new();
        table
            .bind(
                &package("executor-ahk", &[AddonType::Executor]),
                AddonType::Executor,
                Arc::new(mock),
            )
            .unwrap();

        let response = table
            .call("executor-ahk", AddonType::Executor, json!({ "hotkey": "^A" }))
            .await
            .unwrap();
        assert_eq!(response, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn unbound_type_is_not_found() {
        let mut table = DispatchTable::new();
        table
            .bind(
                &package("executor-ahk", &[AddonType::Executor]),
                AddonType::Executor,
                Arc::new(MockAddonHandler::new()),
            )
            .unwrap();

        let err = table
            .call("executor-ahk", AddonType::Detector, json!({}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::EntryPointNotBound {
                package: "executor-ahk".to_string(),
                addon_type: AddonType::Detector,
            }
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn undeclared_type_cannot_be_bound() {
        let mut table = DispatchTable::new();
        let err = table
            .bind(
                &package("executor-ahk", &[AddonType::Executor]),
                AddonType::Detector,
                Arc::new(MockAddonHandler::new()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidManifest { .. }));
        assert!(!table.is_bound("executor-ahk", AddonType::Detector));
    }

    #[test]
    fn unbind_removes_every_type_of_a_package() {
        let mut table = DispatchTable::new();
        let desktop = package("detector-desktop", &[AddonType::Detector, AddonType::Executor]);
        for t in [AddonType::Detector, AddonType::Executor] {
            table
                .bind(&desktop, t, Arc::new(MockAddonHandler::new()))
                .unwrap();
        }

        assert_eq!(table.unbind("detector-desktop"), 2);
        assert!(!table.is_bound("detector-desktop", AddonType::Executor));
    }

    #[tokio::test]
    async fn bind_processes_covers_registered_entry_points() {
        use crate::registry::AddOptions;
        use crate::test_utils::{TestContext, addon_manifest, write_addon};
        use crate::traits::MockPackageManager;

        let ctx = TestContext::new().await;
        write_addon(ctx.paths(), &addon_manifest("executor-ahk", &["executor"]));
        write_addon(
            ctx.paths(),
            &addon_manifest("detector-desktop", &["detector", "executor"]),
        );
        let registry = ctx.package_registry(Box::new(MockPackageManager::new()));
        for name in ["executor-ahk", "detector-desktop"] {
            registry.add_package(name, AddOptions::default()).await.unwrap();
        }

        let mut table = DispatchTable::new();
        assert_eq!(table.bind_processes(&registry, "node").unwrap(), 3);
        assert!(table.is_bound("detector-desktop", AddonType::Detector));
        assert!(table.is_bound("executor-ahk", AddonType::Executor));
        assert!(!table.is_bound("executor-ahk", AddonType::Detector));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_round_trips_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let entry = tmp.path().join("executor.sh");
        std::fs::write(&entry, "cat\n").unwrap();

        let handler = ProcessHandler::new("executor-ahk", AddonType::Executor, "sh", &entry);
        let request = json!({ "hotkey": "^A", "func": "RunNotepad" });
        assert_eq!(handler.call(request.clone()).await.unwrap(), request);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_streams_large_payloads_both_ways() {
        let tmp = tempfile::TempDir::new().unwrap();
        let entry = tmp.path().join("executor.sh");
        // Fill the stdout pipe before reading any of the request.
        std::fs::write(&entry, "head -c 200000 /dev/zero | tr '\\0' ' '\ncat\n").unwrap();

        let handler = ProcessHandler::new("executor-ahk", AddonType::Executor, "sh", &entry);
        let request = json!({ "script": "x".repeat(300_000) });
        let response = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            handler.call(request.clone()),
        )
        .await
        .expect("handler deadlocked")
        .unwrap();
        assert_eq!(response, request);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_reports_exit_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let entry = tmp.path().join("executor.sh");
        std::fs::write(&entry, "cat > /dev/null\necho broken >&2\nexit 3\n").unwrap();

        let handler = ProcessHandler::new("executor-ahk", AddonType::Executor, "sh", &entry);
        match handler.call(json!({})).await.unwrap_err() {
            Error::HandlerFailed { message, .. } => assert!(message.contains("broken")),
            other => panic!("expected HandlerFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_handler_without_output_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let entry = tmp.path().join("executor.sh");
        std::fs::write(&entry, "cat > /dev/null\n").unwrap();

        let handler = ProcessHandler::new("executor-ahk", AddonType::Executor, "sh", &entry);
        let err = handler.call(json!({})).await.unwrap_err();
        assert!(matches!(err, Error::HandlerFailed { .. }));
    }
}
