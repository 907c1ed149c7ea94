//! Trait abstractions for external processes, so tests can stand in for
//! the real package manager.

use std::path::Path;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use tk_core::Error;

/// Fetches and removes add-on packages in a registry's dependency cache.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Run the package manager with `args`, using `cwd` as its working
    /// directory.
    async fn run(&self, args: &[String], cwd: &Path) -> Result<(), Error>;
}

pub fn install_args(spec: &str) -> Vec<String> {
    vec!["install".to_string(), "--save".to_string(), spec.to_string()]
}

pub fn remove_args(name: &str) -> Vec<String> {
    vec!["remove".to_string(), "--save".to_string(), name.to_string()]
}

/// Runs an npm-compatible command line program.
pub struct NpmPackageManager {
    program: String,
}

impl NpmPackageManager {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NpmPackageManager {
    fn default() -> Self {
        Self::new("npm")
    }
}

#[async_trait]
impl PackageManager for NpmPackageManager {
    async fn run(&self, args: &[String], cwd: &Path) -> Result<(), Error> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, cwd = %cwd.display(), "running package manager");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| Error::PackageManagerFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::PackageManagerFailed {
                command,
                message: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn mock_receives_working_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();

        let mut mock = MockPackageManager::new();
        let expected = root.clone();
        mock.expect_run()
            .withf(move |args, cwd| args[0] == "install" && cwd.to_path_buf() == expected)
            .times(1)
            .returning(|_, _| Ok(()));

        mock.run(&install_args("executor-ahk"), &root).await.unwrap();
    }

    #[test]
    fn mock_package_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockPackageManager>();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_in_given_directory_without_touching_process_cwd() {
        let tmp = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();

        let pm = NpmPackageManager::new("touch");
        pm.run(&["marker".to_string()], tmp.path()).await.unwrap();

        assert!(tmp.path().join("marker").exists());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_reports_package_manager_failure() {
        let tmp = TempDir::new().unwrap();
        let pm = NpmPackageManager::new("false");

        let err = pm.run(&install_args("x"), tmp.path()).await.unwrap_err();
        match err {
            Error::PackageManagerFailed { command, .. } => {
                assert!(command.starts_with("false install"));
            }
            other => panic!("expected PackageManagerFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_package_manager_failure() {
        let tmp = TempDir::new().unwrap();
        let pm = NpmPackageManager::new("definitely-not-a-real-package-manager");

        let err = pm.run(&install_args("x"), tmp.path()).await.unwrap_err();
        assert!(matches!(err, Error::PackageManagerFailed { .. }));
    }
}
