// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { mode: u32 },
    Dir(Vec<String>), // List of child names
}

/// In-memory filesystem for resolver tests.
///
/// Paths listed via [`MockFileSystem::deny_chmod`] reject `set_mode`, which
/// simulates a binary that cannot be made executable.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, MockEntry>>>,
    locked: Arc<Mutex<HashSet<PathBuf>>>,
    chmod_calls: Arc<Mutex<Vec<(PathBuf, u32)>>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, path: impl AsRef<Path>, mode: u32) {
        let path = path.as_ref().to_path_buf();
        let mut files = lock(&self.files);
        files.insert(path.clone(), MockEntry::File { mode });

        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(&mut files, parent);
            Self::link_child(&mut files, parent, &path);
        }
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut files = lock(&self.files);
        Self::ensure_dir_entry(&mut files, path.as_ref());
    }

    /// Make every later `set_mode` on `path` fail.
    pub fn deny_chmod(&self, path: impl AsRef<Path>) {
        lock(&self.locked).insert(path.as_ref().to_path_buf());
    }

    /// Current mode of a file, if it exists.
    pub fn mode_of(&self, path: impl AsRef<Path>) -> Option<u32> {
        match lock(&self.files).get(path.as_ref()) {
            Some(MockEntry::File { mode }) => Some(*mode),
            _ => None,
        }
    }

    pub fn chmod_calls(&self) -> Vec<(PathBuf, u32)> {
        lock(&self.chmod_calls).clone()
    }

    fn ensure_dir_entry(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if path.as_os_str().is_empty() || files.contains_key(path) {
            return;
        }
        files.insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = path.parent() {
            if parent != path {
                Self::ensure_dir_entry(files, parent);
                Self::link_child(files, parent, path);
            }
        }
    }

    fn link_child(files: &mut HashMap<PathBuf, MockEntry>, parent: &Path, child: &Path) {
        if let Some(MockEntry::Dir(children)) = files.get_mut(parent) {
            if let Some(name) = child.file_name().and_then(|n| n.to_str()) {
                if !children.iter().any(|c| c == name) {
                    children.push(name.to_string());
                }
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        lock(&self.files).contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(lock(&self.files).get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(lock(&self.files).get(path), Some(MockEntry::Dir(_)))
    }

    fn is_executable(&self, path: &Path) -> bool {
        matches!(lock(&self.files).get(path), Some(MockEntry::File { mode }) if mode & 0o111 != 0)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> {
        lock(&self.chmod_calls).push((path.to_path_buf(), mode));
        if lock(&self.locked).contains(path) {
            return Err(anyhow!("Operation not permitted: {:?}", path));
        }
        match lock(&self.files).get_mut(path) {
            Some(MockEntry::File { mode: current }) => {
                *current = mode;
                Ok(())
            }
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match lock(&self.files).get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }
}
