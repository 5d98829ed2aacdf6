//! Projects tree nodes onto the filesystem under one sync root.
//!
//! Owns the guid <-> path mapping (file for scripts, directory for
//! containers). The class of a projected script is encoded in its file name
//! marker so a later scan can recover it: `.server` for Script, `.client`
//! for LocalScript, `.module` for ModuleScript.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tether_protocol::ClassName;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::tree::InstanceNode;

/// Writes, renames, and deletes projected files; keeps the mapping current.
#[derive(Debug)]
pub struct FileProjector {
    base_dir: PathBuf,
    extension: String,
    by_guid: HashMap<String, PathBuf>,
    by_path: HashMap<PathBuf, String>,
}

impl FileProjector {
    pub fn new(base_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            extension: extension.into(),
            by_guid: HashMap::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The guid -> path mapping, for sourcemap generation.
    pub fn mappings(&self) -> &HashMap<String, PathBuf> {
        &self.by_guid
    }

    /// Derive the filesystem path a node projects to. Deterministic and
    /// independent of the mapping: directory for containers, marker-suffixed
    /// file for scripts.
    pub fn file_path(&self, node: &InstanceNode) -> PathBuf {
        let mut path = self.base_dir.clone();
        if node.is_script() {
            for segment in &node.path[..node.path.len().saturating_sub(1)] {
                path.push(segment);
            }
            path.push(self.file_name(node));
        } else {
            for segment in &node.path {
                path.push(segment);
            }
        }
        path
    }

    fn file_name(&self, node: &InstanceNode) -> String {
        let marker = match node.class_name {
            ClassName::Script => ".server",
            ClassName::LocalScript => ".client",
            ClassName::ModuleScript => ".module",
            _ => "",
        };
        format!("{}{}.{}", node.name, marker, self.extension)
    }

    /// Reverse lookup: which guid does this file belong to?
    pub fn guid_by_path(&self, path: &Path) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Where is this guid currently projected?
    pub fn path_by_guid(&self, guid: &str) -> Option<&Path> {
        self.by_guid.get(guid).map(PathBuf::as_path)
    }

    /// Project a full snapshot: every container becomes a directory, every
    /// script's source lands in its derived file. The mapping is rebuilt
    /// from scratch. Returns the number of scripts written.
    pub fn write_tree(&mut self, nodes: &[&InstanceNode]) -> Result<usize, SyncError> {
        self.by_guid.clear();
        self.by_path.clear();

        let mut written = 0;
        for node in nodes {
            if node.is_script() {
                self.write_script(node)?;
                written += 1;
            } else {
                self.ensure_container(node)?;
            }
        }
        Ok(written)
    }

    /// Write one script node, relocating its projection first when the
    /// derived path moved. The caller must register watcher suppression for
    /// the target path before calling this.
    pub fn write_script(&mut self, node: &InstanceNode) -> Result<PathBuf, SyncError> {
        let target = self.file_path(node);

        // A rename/move leaves a file behind at the previously mapped path.
        if let Some(old) = self.by_guid.get(&node.guid).cloned() {
            if old != target {
                if let Err(err) = fs::remove_file(&old) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %old.display(), %err, "failed to remove relocated script");
                    }
                }
                self.by_path.remove(&old);
            }
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::fs(parent, e))?;
        }
        fs::write(&target, node.source.as_deref().unwrap_or(""))
            .map_err(|e| SyncError::fs(&target, e))?;

        self.by_guid.insert(node.guid.clone(), target.clone());
        self.by_path.insert(target.clone(), node.guid.clone());
        debug!(path = %target.display(), "wrote script");
        Ok(target)
    }

    /// Make sure a container node's directory exists and is mapped.
    pub fn ensure_container(&mut self, node: &InstanceNode) -> Result<PathBuf, SyncError> {
        let target = self.file_path(node);
        fs::create_dir_all(&target).map_err(|e| SyncError::fs(&target, e))?;

        if let Some(old) = self.by_guid.get(&node.guid).cloned() {
            if old != target {
                self.by_path.remove(&old);
            }
        }
        self.by_guid.insert(node.guid.clone(), target.clone());
        self.by_path.insert(target.clone(), node.guid.clone());
        Ok(target)
    }

    /// Remove the projection for `guid`. Directories are removed with their
    /// contents (the tree has already dropped the descendants). Returns
    /// false when the guid has no mapping.
    pub fn delete_script(&mut self, guid: &str) -> Result<bool, SyncError> {
        let Some(path) = self.by_guid.remove(guid) else {
            return Ok(false);
        };
        self.remove_path(&path)?;
        Ok(true)
    }

    /// Fallback delete by path, for when the mapping was already lost.
    pub fn delete_file_path(&mut self, path: &Path) -> Result<(), SyncError> {
        if let Some(guid) = self.by_path.get(path).cloned() {
            self.by_guid.remove(&guid);
        }
        self.remove_path(path)
    }

    fn remove_path(&mut self, path: &Path) -> Result<(), SyncError> {
        self.by_path.remove(path);
        // Purge mapping entries shadowed by a directory removal.
        let stale: Vec<PathBuf> = self
            .by_path
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in stale {
            if let Some(guid) = self.by_path.remove(&p) {
                self.by_guid.remove(&guid);
            }
        }
        self.by_guid.retain(|_, p| !p.starts_with(path) && p != path);

        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed projection");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SyncError::fs(path, err)),
        }
    }

    /// Recursively remove directories under the sync root left empty by
    /// deletions and renames. The root itself survives, and any directory
    /// holding files (tracked or not) is left alone. Returns how many
    /// directories were removed.
    pub fn cleanup_empty_directories(&mut self) -> Result<usize, SyncError> {
        let mut removed = 0;
        let base = self.base_dir.clone();
        self.prune_dir(&base, true, &mut removed)?;
        Ok(removed)
    }

    fn prune_dir(&mut self, dir: &Path, is_root: bool, removed: &mut usize) -> Result<bool, SyncError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(SyncError::fs(dir, err)),
        };

        let mut empty = true;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::fs(dir, e))?;
            let path = entry.path();
            if path.is_dir() {
                if !self.prune_dir(&path, false, removed)? {
                    empty = false;
                }
            } else {
                empty = false;
            }
        }

        if empty && !is_root {
            fs::remove_dir(dir).map_err(|e| SyncError::fs(dir, e))?;
            self.by_path.remove(dir);
            self.by_guid.retain(|_, p| p != dir);
            *removed += 1;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete script files under the sync root that no tracked node accounts
    /// for. Only files carrying the scripting extension are candidates;
    /// anything else a user dropped into the tree is out of bounds.
    pub fn remove_orphans(&mut self) -> Result<usize, SyncError> {
        let mut removed = 0;
        for entry in walkdir::WalkDir::new(&self.base_dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !entry.file_type().is_file() {
                continue;
            }
            let is_script_file = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == self.extension);
            if is_script_file && !self.by_path.contains_key(path) {
                if let Err(err) = fs::remove_file(path) {
                    warn!(path = %path.display(), %err, "failed to remove orphan script");
                } else {
                    debug!(path = %path.display(), "removed orphan script");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
