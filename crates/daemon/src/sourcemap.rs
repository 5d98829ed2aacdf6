//! Persisted sourcemap document for external tooling (luau-lsp et al).
//!
//! The document mirrors the instance tree as nested
//! `{name, className, filePaths, children}` entries rooted at a DataModel.
//! Edits are incremental: one subtree is rebuilt from tree state and spliced
//! in at its path, rather than regenerating the whole document on every
//! change. Children always serialize sorted by name, so an unchanged tree
//! regenerates byte-identically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::tree::InstanceNode;

/// One entry in the persisted sourcemap document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcemapEntry {
    pub name: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SourcemapEntry>,
}

impl SourcemapEntry {
    fn root() -> Self {
        Self {
            name: "game".into(),
            class_name: "DataModel".into(),
            file_paths: Vec::new(),
            children: Vec::new(),
        }
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut SourcemapEntry> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    fn sort_children(&mut self) {
        self.children.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

/// Builds and incrementally maintains the sourcemap document.
#[derive(Debug)]
pub struct SourcemapGenerator {
    base_dir: PathBuf,
}

impl SourcemapGenerator {
    /// `base_dir` is the sync root; recorded file paths are relative to it.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Full rebuild from tree state, written atomically to `out_path`.
    pub fn generate_and_write(
        &self,
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
        out_path: &Path,
    ) -> Result<(), SyncError> {
        let doc = self.generate(nodes, mappings);
        self.write_atomic(&doc, out_path)
    }

    /// Build the whole document in memory.
    pub fn generate(
        &self,
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
    ) -> SourcemapEntry {
        let mut root = SourcemapEntry::root();
        root.children = self.build_children(&[], nodes, mappings);
        root
    }

    /// Recompute the entry for `node`'s subtree and splice it in at the
    /// node's current path. When `prev_path` names a different location, the
    /// stale entry there is removed first. Falls back to a full rebuild if
    /// the persisted document cannot be loaded.
    pub fn upsert_subtree(
        &self,
        node: &InstanceNode,
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
        out_path: &Path,
        prev_path: Option<&[String]>,
    ) -> Result<(), SyncError> {
        let Some(mut doc) = self.load(out_path) else {
            return self.generate_and_write(nodes, mappings, out_path);
        };

        if let Some(prev) = prev_path {
            if prev != node.path.as_slice() {
                remove_at(&mut doc, prev);
            }
        }

        let entry = self.build_entry(node, nodes, mappings);
        self.splice(&mut doc, node, nodes, entry);
        self.write_atomic(&doc, out_path)
    }

    /// Remove the entry at `segments` without a rebuild. Falls back to a
    /// full rebuild if the persisted document cannot be loaded.
    pub fn prune_path(
        &self,
        segments: &[String],
        out_path: &Path,
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
    ) -> Result<(), SyncError> {
        let Some(mut doc) = self.load(out_path) else {
            return self.generate_and_write(nodes, mappings, out_path);
        };
        remove_at(&mut doc, segments);
        self.write_atomic(&doc, out_path)
    }

    // --- internals ---

    fn build_children(
        &self,
        prefix: &[String],
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
    ) -> Vec<SourcemapEntry> {
        let mut children: Vec<SourcemapEntry> = nodes
            .iter()
            .filter(|n| n.path.len() == prefix.len() + 1 && n.path[..prefix.len()] == *prefix)
            .map(|n| self.build_entry(n, nodes, mappings))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    fn build_entry(
        &self,
        node: &InstanceNode,
        nodes: &[&InstanceNode],
        mappings: &HashMap<String, PathBuf>,
    ) -> SourcemapEntry {
        let mut file_paths = Vec::new();
        if node.is_script() {
            if let Some(path) = mappings.get(&node.guid) {
                file_paths.push(self.relative(path));
            }
        }
        SourcemapEntry {
            name: node.name.clone(),
            class_name: node.class_name.to_string(),
            file_paths,
            children: self.build_children(&node.path, nodes, mappings),
        }
    }

    /// Walk to the parent of `node.path`, materializing ancestors from tree
    /// state as needed, and replace-or-insert the rebuilt entry there.
    fn splice(
        &self,
        doc: &mut SourcemapEntry,
        node: &InstanceNode,
        nodes: &[&InstanceNode],
        entry: SourcemapEntry,
    ) {
        let mut cursor = doc;
        for len in 1..node.path.len() {
            let segment = &node.path[len - 1];
            if cursor.child_mut(segment).is_none() {
                let class_name = nodes
                    .iter()
                    .find(|n| n.path == node.path[..len])
                    .map(|n| n.class_name.to_string())
                    .unwrap_or_else(|| "Folder".into());
                cursor.children.push(SourcemapEntry {
                    name: segment.clone(),
                    class_name,
                    file_paths: Vec::new(),
                    children: Vec::new(),
                });
                cursor.sort_children();
            }
            cursor = match cursor.child_mut(segment) {
                Some(child) => child,
                None => return,
            };
        }

        cursor.children.retain(|c| c.name != entry.name);
        cursor.children.push(entry);
        cursor.sort_children();
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.base_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn load(&self, out_path: &Path) -> Option<SourcemapEntry> {
        let content = fs::read_to_string(out_path).ok()?;
        match serde_json::from_str(&content) {
            Ok(doc) => Some(doc),
            Err(err) => {
                warn!(path = %out_path.display(), %err, "sourcemap unreadable, rebuilding");
                None
            }
        }
    }

    fn write_atomic(&self, doc: &SourcemapEntry, out_path: &Path) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| SyncError::MalformedMessage(e.to_string()))?;
        if let Some(parent) = out_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SyncError::fs(parent, e))?;
            }
        }
        let tmp = out_path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| SyncError::fs(&tmp, e))?;
        fs::rename(&tmp, out_path).map_err(|e| SyncError::fs(out_path, e))?;
        debug!(path = %out_path.display(), "sourcemap written");
        Ok(())
    }
}

fn remove_at(doc: &mut SourcemapEntry, segments: &[String]) {
    let Some((leaf, ancestors)) = segments.split_last() else {
        return;
    };
    let mut cursor = doc;
    for segment in ancestors {
        match cursor.child_mut(segment) {
            Some(child) => cursor = child,
            None => return,
        }
    }
    cursor.children.retain(|c| &c.name != leaf);
}
