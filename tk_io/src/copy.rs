//! Recursive directory copy used to move software folders.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use tk_core::Error;

use crate::progress::{InstallProgress, ProgressCallback, report};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileTreeNode {
    File {
        path: PathBuf,
    },
    /// A symbolic link, recorded without following it.
    Symlink {
        path: PathBuf,
        target: PathBuf,
    },
    Dir {
        path: PathBuf,
        contents: Vec<FileTreeNode>,
    },
}

impl FileTreeNode {
    pub fn path(&self) -> &Path {
        match self {
            FileTreeNode::File { path }
            | FileTreeNode::Symlink { path, .. }
            | FileTreeNode::Dir { path, .. } => path,
        }
    }
}

/// Walk `root`, reading sibling entries concurrently. Symbolic links are
/// not followed.
///
/// Children are ordered by path so the tree is stable between runs.
pub fn generate_file_tree(root: PathBuf) -> BoxFuture<'static, Result<FileTreeNode, Error>> {
    async move {
        let metadata = fs::symlink_metadata(&root)
            .await
            .map_err(|e| Error::io(&root, e))?;
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&root).await.map_err(|e| Error::io(&root, e))?;
            return Ok(FileTreeNode::Symlink { path: root, target });
        }
        if !metadata.is_dir() {
            return Ok(FileTreeNode::File { path: root });
        }

        let mut entries = fs::read_dir(&root).await.map_err(|e| Error::io(&root, e))?;
        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| Error::io(&root, e))? {
            children.push(entry.path());
        }
        children.sort();

        let contents = try_join_all(children.into_iter().map(generate_file_tree)).await?;
        Ok(FileTreeNode::Dir {
            path: root,
            contents,
        })
    }
    .boxed()
}

/// Every directory in the tree, parents before their children.
pub fn dirs_from_tree(tree: &FileTreeNode) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    collect(tree, &mut dirs, true);
    dirs
}

/// Every regular file in the tree, depth first.
pub fn files_from_tree(tree: &FileTreeNode) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect(tree, &mut files, false);
    files
}

/// Every symbolic link in the tree with its target, depth first.
pub fn links_from_tree(tree: &FileTreeNode) -> Vec<(PathBuf, PathBuf)> {
    match tree {
        FileTreeNode::Symlink { path, target } => vec![(path.clone(), target.clone())],
        FileTreeNode::File { .. } => Vec::new(),
        FileTreeNode::Dir { contents, .. } => contents.iter().flat_map(links_from_tree).collect(),
    }
}

fn collect(node: &FileTreeNode, out: &mut Vec<PathBuf>, dirs: bool) {
    match node {
        FileTreeNode::File { path } => {
            if !dirs {
                out.push(path.clone());
            }
        }
        FileTreeNode::Symlink { .. } => {}
        FileTreeNode::Dir { path, contents } => {
            if dirs {
                out.push(path.clone());
            }
            for child in contents {
                collect(child, out, dirs);
            }
        }
    }
}

/// Copies the contents of one directory into another.
pub struct ContentCopier {
    name: String,
    source: PathBuf,
    dest: PathBuf,
    progress: Option<Arc<ProgressCallback>>,
}

impl ContentCopier {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            dest: dest.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<Arc<ProgressCallback>>) -> Self {
        self.progress = progress;
        self
    }

    fn target_for(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.source) {
            Ok(relative) => self.dest.join(relative),
            Err(_) => self.dest.clone(),
        }
    }

    /// Recreate the source tree under the destination, returning the number
    /// of files and links copied.
    ///
    /// Directories are created concurrently; files are copied one at a time.
    /// Links are recreated as links. Absolute link targets inside the source
    /// are moved to the destination; other targets are kept verbatim, even
    /// when they do not exist.
    pub async fn copy_contents(&self) -> Result<usize, Error> {
        let tree = generate_file_tree(self.source.clone()).await?;
        if !matches!(tree, FileTreeNode::Dir { .. }) {
            return Err(Error::io(
                tree.path(),
                std::io::Error::new(std::io::ErrorKind::NotADirectory, "not a directory"),
            ));
        }

        let dirs: Vec<PathBuf> = dirs_from_tree(&tree)
            .iter()
            .map(|dir| self.target_for(dir))
            .collect();
        try_join_all(dirs.iter().map(|dir| async move {
            fs::create_dir_all(dir).await.map_err(|e| Error::io(dir, e))
        }))
        .await?;

        let files = files_from_tree(&tree);
        let links = links_from_tree(&tree);
        let total_files = files.len() + links.len();
        report(
            &self.progress,
            InstallProgress::CopyStarted {
                name: self.name.clone(),
                total_files,
            },
        );

        for (index, file) in files.iter().enumerate() {
            let target = self.target_for(file);
            copy_file(file, &target).await?;
            report(
                &self.progress,
                InstallProgress::CopyProgress {
                    name: self.name.clone(),
                    copied: index + 1,
                    total_files,
                },
            );
        }

        for (index, (link, target)) in links.iter().enumerate() {
            let target = if target.is_absolute() && target.starts_with(&self.source) {
                self.target_for(target)
            } else {
                target.clone()
            };
            copy_symlink(&target, &self.target_for(link)).await?;
            report(
                &self.progress,
                InstallProgress::CopyProgress {
                    name: self.name.clone(),
                    copied: files.len() + index + 1,
                    total_files,
                },
            );
        }

        debug!(
            source = %self.source.display(),
            dest = %self.dest.display(),
            files = total_files,
            "copied directory contents"
        );
        report(
            &self.progress,
            InstallProgress::CopyCompleted {
                name: self.name.clone(),
            },
        );
        Ok(total_files)
    }
}

#[cfg(unix)]
async fn copy_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    fs::symlink(target, link).await.map_err(|e| Error::io(link, e))
}

#[cfg(windows)]
async fn copy_symlink(target: &Path, link: &Path) -> Result<(), Error> {
    let resolved = match link.parent() {
        Some(parent) => parent.join(target),
        None => target.to_path_buf(),
    };
    // Dangling links are recreated as file links.
    let is_dir = fs::metadata(&resolved)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    let result = if is_dir {
        fs::symlink_dir(target, link).await
    } else {
        fs::symlink_file(target, link).await
    };
    result.map_err(|e| Error::io(link, e))
}

async fn copy_file(source: &Path, target: &Path) -> Result<(), Error> {
    let mut reader = fs::File::open(source)
        .await
        .map_err(|e| Error::io(source, e))?;
    let mut writer = fs::File::create(target)
        .await
        .map_err(|e| Error::io(target, e))?;

    tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|e| Error::io(target, e))?;
    writer.flush().await.map_err(|e| Error::io(target, e))?;
    writer.shutdown().await.map_err(|e| Error::io(target, e))?;

    let permissions = reader
        .metadata()
        .await
        .map_err(|e| Error::io(source, e))?
        .permissions();
    drop(reader);
    fs::set_permissions(target, permissions)
        .await
        .map_err(|e| Error::io(target, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::recording_callback;
    use tempfile::TempDir;

    fn populate(root: &Path) {
        std::fs::create_dir_all(root.join("x64/nested")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("readme.txt"), b"readme").unwrap();
        std::fs::write(root.join("x64/a.dll"), b"dll").unwrap();
        std::fs::write(root.join("x64/nested/deep.bin"), b"deep").unwrap();
    }

    #[tokio::test]
    async fn tree_lists_dirs_before_their_children() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("src");
        populate(&root);

        let tree = generate_file_tree(root.clone()).await.unwrap();
        let dirs = dirs_from_tree(&tree);
        assert_eq!(
            dirs,
            vec![
                root.clone(),
                root.join("empty"),
                root.join("x64"),
                root.join("x64/nested"),
            ]
        );

        let files = files_from_tree(&tree);
        assert_eq!(
            files,
            vec![
                root.join("readme.txt"),
                root.join("x64/a.dll"),
                root.join("x64/nested/deep.bin"),
            ]
        );
    }

    #[tokio::test]
    async fn copy_recreates_tree_including_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        let dest = tmp.path().join("dest");
        populate(&source);

        let (callback, events) = recording_callback();
        let copied = ContentCopier::new("ahk", &source, &dest)
            .with_progress(Some(callback))
            .copy_contents()
            .await
            .unwrap();

        assert_eq!(copied, 3);
        assert_eq!(std::fs::read(dest.join("x64/a.dll")).unwrap(), b"dll");
        assert_eq!(std::fs::read(dest.join("x64/nested/deep.bin")).unwrap(), b"deep");
        assert!(dest.join("empty").is_dir());
        assert!(source.join("readme.txt").exists());

        let events = events.lock().unwrap();
        assert!(events.contains(&InstallProgress::CopyProgress {
            name: "ahk".to_string(),
            copied: 3,
            total_files: 3,
        }));
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = ContentCopier::new("ahk", tmp.path().join("nope"), tmp.path().join("dest"))
            .copy_contents()
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copy_keeps_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let tool = source.join("tool");
        std::fs::write(&tool, b"#!/bin/sh").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let dest = tmp.path().join("dest");
        ContentCopier::new("tool", &source, &dest)
            .copy_contents()
            .await
            .unwrap();

        let mode = std::fs::metadata(dest.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_recreated_not_followed() {
        use std::os::unix::fs::symlink;

        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(source.join("bin")).unwrap();
        std::fs::write(source.join("bin/tool-1.2"), b"tool").unwrap();
        symlink("tool-1.2", source.join("bin/tool")).unwrap();
        symlink("missing", source.join("dangling")).unwrap();
        symlink(source.join("bin/tool-1.2"), source.join("absolute")).unwrap();

        let tree = generate_file_tree(source.clone()).await.unwrap();
        assert_eq!(files_from_tree(&tree), vec![source.join("bin/tool-1.2")]);
        assert_eq!(links_from_tree(&tree).len(), 3);

        let dest = tmp.path().join("dest");
        let copied = ContentCopier::new("tool", &source, &dest)
            .copy_contents()
            .await
            .unwrap();
        assert_eq!(copied, 4);

        let link = dest.join("bin/tool");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("tool-1.2"));
        assert_eq!(std::fs::read(&link).unwrap(), b"tool");

        assert_eq!(
            std::fs::read_link(dest.join("dangling")).unwrap(),
            PathBuf::from("missing")
        );
        assert_eq!(
            std::fs::read_link(dest.join("absolute")).unwrap(),
            dest.join("bin/tool-1.2")
        );
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(16))]

        #[test]
        fn copy_reproduces_every_file(
            files in proptest::collection::btree_map(
                "[a-z]{1,6}(/[a-z]{1,6}){0,2}\\.bin",
                proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64),
                1..8,
            )
        ) {
            let tmp = TempDir::new().unwrap();
            let source = tmp.path().join("src");
            let dest = tmp.path().join("dest");
            for (relative, content) in &files {
                let path = source.join(relative);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, content).unwrap();
            }

            let runtime = tokio::runtime::Runtime::new().unwrap();
            let copied = runtime
                .block_on(ContentCopier::new("prop", &source, &dest).copy_contents())
                .unwrap();

            proptest::prop_assert_eq!(copied, files.len());
            for (relative, content) in &files {
                proptest::prop_assert_eq!(&std::fs::read(dest.join(relative)).unwrap(), content);
            }
        }
    }
}
