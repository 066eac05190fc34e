//! Content stores
//!
//! Every operation has a synchronous form and a callback-completing one.
//! The async forms run the synchronous operation on the rayon pool, so both
//! succeed and fail identically.

use crate::error::ContentError;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Callback receiving the outcome of an async operation.
pub type Completion<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    File,
    Directory,
    SymbolicLink,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::File => "File",
            ItemKind::Directory => "Directory",
            ItemKind::SymbolicLink => "SymbolicLink",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub path: String,
    /// Platforms without birth times report the modification time.
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub size: u64,
    pub kind: ItemKind,
}

pub trait ContentStore: Send + Sync + 'static {
    fn exists(&self, path: &str) -> bool;

    fn stat(&self, path: &str) -> Result<Metadata>;

    fn read_content(&self, path: &str) -> Result<Vec<u8>>;

    /// Entry names, sorted.
    fn read_dir(&self, path: &str) -> Result<Vec<String>>;

    fn write_content(&self, path: &str, content: &[u8]) -> Result<()>;

    fn exists_async(self: Arc<Self>, path: String, done: Box<dyn FnOnce(bool) + Send>) {
        rayon::spawn(move || done(self.exists(&path)));
    }

    fn stat_async(self: Arc<Self>, path: String, done: Completion<Metadata>) {
        rayon::spawn(move || done(self.stat(&path)));
    }

    fn read_content_async(self: Arc<Self>, path: String, done: Completion<Vec<u8>>) {
        rayon::spawn(move || done(self.read_content(&path)));
    }

    fn read_dir_async(self: Arc<Self>, path: String, done: Completion<Vec<String>>) {
        rayon::spawn(move || done(self.read_dir(&path)));
    }

    fn write_content_async(self: Arc<Self>, path: String, content: Vec<u8>, done: Completion<()>) {
        rayon::spawn(move || done(self.write_content(&path, &content)));
    }
}

/// Store over the local filesystem.
///
/// With a root, paths resolve below it: leading separators are dropped and
/// `..` components are refused.
#[derive(Debug, Clone, Default)]
pub struct FileContentStore {
    root: Option<PathBuf>,
}

impl FileContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };
        let mut resolved = root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(ContentError::NotFound { path: path.into() });
                }
            }
        }
        Ok(resolved)
    }
}

impl ContentStore for FileContentStore {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path)
            .map(|resolved| fs::symlink_metadata(resolved).is_ok())
            .unwrap_or(false)
    }

    fn stat(&self, path: &str) -> Result<Metadata> {
        let resolved = self.resolve(path)?;
        let meta = fs::symlink_metadata(&resolved)
            .map_err(|err| ContentError::from_io(&resolved, err))?;

        let kind = if meta.file_type().is_symlink() {
            ItemKind::SymbolicLink
        } else if meta.is_dir() {
            ItemKind::Directory
        } else {
            ItemKind::File
        };
        let modified_at: DateTime<Utc> = meta
            .modified()
            .map_err(|err| ContentError::from_io(&resolved, err))?
            .into();
        let created_at = meta.created().map(DateTime::from).unwrap_or(modified_at);

        Ok(Metadata {
            path: path.to_owned(),
            created_at,
            modified_at,
            size: meta.len(),
            kind,
        })
    }

    fn read_content(&self, path: &str) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        fs::read(&resolved).map_err(|err| ContentError::from_io(&resolved, err))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let resolved = self.resolve(path)?;
        let entries = fs::read_dir(&resolved).map_err(|err| ContentError::from_io(&resolved, err))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| ContentError::from_io(&resolved, err))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Replaces the file atomically: readers see the old or the new
    /// content, never a partial write.
    fn write_content(&self, path: &str, content: &[u8]) -> Result<()> {
        let resolved = self.resolve(path)?;
        let dir = match resolved.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|err| ContentError::from_io(&dir, err))?;
        staged
            .write_all(content)
            .map_err(|err| ContentError::from_io(staged.path(), err))?;
        staged
            .persist(&resolved)
            .map_err(|err| ContentError::from_io(&resolved, err.error))?;
        debug!(path = %resolved.display(), bytes = content.len(), "content written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> (tempfile::TempDir, Arc<FileContentStore>) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("b.js"), "b").unwrap();
        fs::write(dir.path().join("nested").join("a.js"), "a").unwrap();
        let store = Arc::new(FileContentStore::rooted(dir.path()));
        (dir, store)
    }

    #[test]
    fn stat_reports_kind_and_size() {
        let (_dir, store) = store();
        let file = store.stat("hello.txt").unwrap();
        assert_eq!(file.kind, ItemKind::File);
        assert_eq!(file.size, 5);
        assert_eq!(file.path, "hello.txt");
        assert!(file.created_at <= Utc::now());

        assert_eq!(store.stat("nested").unwrap().kind, ItemKind::Directory);
        assert!(store.stat("missing").unwrap_err().is_not_found());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_reported_as_links() {
        let (dir, store) = store();
        std::os::unix::fs::symlink(dir.path().join("hello.txt"), dir.path().join("link")).unwrap();
        assert_eq!(store.stat("link").unwrap().kind, ItemKind::SymbolicLink);
    }

    #[test]
    fn reads_content_and_sorted_directories() {
        let (_dir, store) = store();
        assert_eq!(store.read_content("hello.txt").unwrap(), b"hello");
        assert_eq!(store.read_dir("nested").unwrap(), vec!["a.js", "b.js"]);
        assert!(store.read_content("nope.txt").unwrap_err().is_not_found());
    }

    #[test]
    fn rooted_paths_stay_below_the_root() {
        let (_dir, store) = store();
        assert!(store.exists("/hello.txt"));
        assert!(store.exists("./nested/a.js"));
        assert!(!store.exists("../hello.txt"));
        assert!(store.stat("nested/../../etc").unwrap_err().is_not_found());
    }

    #[test]
    fn writes_replace_content() {
        let (dir, store) = store();
        store.write_content("hello.txt", b"bye").unwrap();
        store.write_content("nested/new.txt", b"new").unwrap();
        assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"bye");
        assert_eq!(fs::read(dir.path().join("nested/new.txt")).unwrap(), b"new");
        assert!(store.write_content("absent/x.txt", b"x").is_err());
    }

    #[test]
    fn async_forms_complete_like_sync_ones() {
        let (_dir, store) = store();
        let (tx, rx) = crossbeam_channel::unbounded();

        let sender = tx.clone();
        store.clone().stat_async(
            "hello.txt".into(),
            Box::new(move |result| sender.send(result.map(|m| m.size)).unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), 5);

        let sender = tx.clone();
        store.clone().read_content_async(
            "missing".into(),
            Box::new(move |result| sender.send(result.map(|c| c.len() as u64)).unwrap()),
        );
        let missing = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(missing.unwrap_err().is_not_found());

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        store
            .clone()
            .exists_async("nested".into(), Box::new(move |found| done_tx.send(found).unwrap()));
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
