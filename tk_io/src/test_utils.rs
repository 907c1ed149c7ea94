//! Test utilities for registry tests.
//!
//! - `TestContext` wraps a TempDir, a MockServer and a freshly created registry
//! - Add-on fixtures write package manifests into the dependency cache
//! - Archive fixtures build zip and gzipped tar payloads for download mocks
//!
//! # Example
//!
//! ```ignore
//! use tk_io::test_utils::{TestContext, mock_zip};
//!
//! #[tokio::test]
//! async fn installs_archive() {
//!     let ctx = TestContext::new().await;
//!     ctx.mount_download("/ahk.zip", mock_zip(&[("x64/a.dll", b"dll")])).await;
//!
//!     let registry = ctx.software_registry("executor-ahk");
//!     // ...
//! }
//! ```

use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tempfile::TempDir;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tk_core::{Config, Paths};

use crate::download::Downloader;
use crate::registry::PackageRegistry;
use crate::software::{SoftwareQuery, SoftwareRegistry};
use crate::traits::PackageManager;

// ============================================================================
// Add-on fixtures
// ============================================================================

/// Manifest of an add-on named `name` providing `types`, each bound to
/// `./<type>.js`.
pub fn addon_manifest(name: &str, types: &[&str]) -> Value {
    let entry: Map<String, Value> = types
        .iter()
        .map(|t| (t.to_string(), Value::String(format!("./{t}.js"))))
        .collect();

    json!({
        "name": name,
        "version": "1.0.0",
        "description": format!("Test add-on {name}"),
        "twokeys": {
            "types": types,
            "entry": entry,
        }
    })
}

/// Write `manifest` to `node_modules/<name>/package.json`, taking the name
/// from the manifest.
pub fn write_addon(paths: &Paths, manifest: &Value) -> PathBuf {
    let name = manifest["name"]
        .as_str()
        .expect("add-on manifest must have a name");
    let file = paths.package_manifest(name);
    fs::create_dir_all(file.parent().expect("manifest has a parent"))
        .expect("failed to create package directory");
    fs::write(
        &file,
        serde_json::to_string_pretty(manifest).expect("failed to encode manifest"),
    )
    .expect("failed to write manifest");
    file
}

// ============================================================================
// Archive fixtures
// ============================================================================

/// Zip archive holding `files` as `(relative_path, content)`.
pub fn mock_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in files {
        writer
            .start_file(*name, options)
            .expect("failed to start zip entry");
        writer.write_all(content).expect("failed to write zip entry");
    }
    writer
        .finish()
        .expect("failed to finish zip")
        .into_inner()
}

/// Gzipped tarball holding `files` as `(relative_path, content, mode)`.
pub fn mock_tarball(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tar::Builder;

    let mut builder = Builder::new(Vec::new());
    for (rel_path, content, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(rel_path).expect("invalid tar path");
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append(&header, *content).expect("failed to append");
    }
    let tar_data = builder.into_inner().expect("failed to finish tar");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data).expect("failed to compress");
    encoder.finish().expect("failed to finish gzip")
}

// ============================================================================
// TestContext
// ============================================================================

/// A registry created under a temporary directory, plus a mock server for
/// software downloads.
///
/// The registry root is `<tmp>/registry`; the rest of the temporary
/// directory is free for scratch files.
pub struct TestContext {
    pub tmp: TempDir,
    pub mock_server: MockServer,
    paths: Paths,
}

impl TestContext {
    pub async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let tmp = TempDir::new().expect("failed to create temp dir");
        let paths = Paths::new(tmp.path().join("registry"));
        let created = PackageRegistry::create_new_registry(&paths)
            .await
            .expect("failed to create registry");
        assert!(created.is_valid(), "fresh registry reported {created:?}");

        Self {
            tmp,
            mock_server,
            paths,
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Scratch space outside the registry root.
    pub fn temp_dir(&self) -> &Path {
        self.tmp.path()
    }

    pub fn server(&self) -> &MockServer {
        &self.mock_server
    }

    /// Serve `body` for `GET <url_path>`.
    pub async fn mount_download(&self, url_path: &str, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(url_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.mock_server)
            .await;
    }

    /// Fail the test if anything hits the mock server.
    pub async fn expect_no_requests(&self) {
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&self.mock_server)
            .await;
    }

    pub fn package_registry(&self, package_manager: Box<dyn PackageManager>) -> PackageRegistry {
        PackageRegistry::open(self.paths.clone(), package_manager)
            .expect("failed to open package registry")
    }

    pub fn software_query(&self) -> SoftwareQuery {
        SoftwareQuery::open(self.paths.clone()).expect("failed to open software query")
    }

    /// Software registry for `owner`, downloading through the mock server.
    pub fn software_registry(&self, owner: &str) -> SoftwareRegistry {
        SoftwareRegistry::new(
            self.software_query(),
            owner,
            Downloader::new(&Config::default()).expect("failed to build downloader"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tk_core::validate_manifest;

    #[test]
    fn addon_manifest_validates() {
        let manifest = addon_manifest("detector-desktop", &["detector", "executor"]);
        assert!(validate_manifest(&manifest).is_valid());
        assert_eq!(manifest["twokeys"]["entry"]["detector"], "./detector.js");
    }

    #[test]
    fn mock_tarball_is_gzip() {
        let tarball = mock_tarball(&[("bin/tool", b"#!/bin/sh\n", 0o755)]);
        assert_eq!(&tarball[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn mock_zip_starts_with_local_header() {
        let zip = mock_zip(&[("a.txt", b"a")]);
        assert_eq!(&zip[..4], b"PK\x03\x04");
    }

    #[tokio::test]
    async fn context_creates_registry_layout() {
        let ctx = TestContext::new().await;
        assert!(ctx.paths().db_file.exists());
        assert!(ctx.paths().manifest_file().exists());
        assert!(ctx.paths().software_dir().is_dir());
        assert!(!ctx.paths().root.starts_with(ctx.temp_dir().join("checkout")));
    }

    #[tokio::test]
    async fn write_addon_places_manifest_in_dependency_cache() {
        let ctx = TestContext::new().await;
        let file = write_addon(
            ctx.paths(),
            &addon_manifest("@twokeys/executor-ahk", &["executor"]),
        );
        assert_eq!(file, ctx.paths().package_manifest("@twokeys/executor-ahk"));
        assert!(file.exists());
    }
}
