//! Authoritative in-memory model of the Studio instance tree.
//!
//! Nodes live in an arena with two secondary indices (guid -> slot,
//! path -> guid) that only the mutation methods below touch. The filesystem
//! is never read or written here; that is the projector's job.

use std::collections::HashMap;

use tether_protocol::{ClassName, InstanceRecord};
use tracing::debug;

/// One mirrored Studio instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceNode {
    pub guid: String,
    pub class_name: ClassName,
    /// Final path segment; always equals `path.last()`.
    pub name: String,
    /// Segments from the logical root down to this node.
    pub path: Vec<String>,
    /// Present only for script classes.
    pub source: Option<String>,
}

impl InstanceNode {
    pub fn is_script(&self) -> bool {
        self.class_name.is_script()
    }

    fn from_record(record: InstanceRecord) -> Self {
        Self {
            guid: record.guid,
            class_name: record.class_name,
            name: record.name,
            path: record.path,
            source: record.source,
        }
    }
}

/// Result of [`TreeManager::update_instance`].
#[derive(Debug, Clone)]
pub struct InstanceUpdate {
    pub node: InstanceNode,
    pub path_changed: bool,
    pub name_changed: bool,
    /// The node's path before this update, when it already existed.
    pub prev_path: Option<Vec<String>>,
}

/// Operator-facing tree counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub script_nodes: usize,
    pub total_nodes: usize,
}

/// Arena-backed tree of [`InstanceNode`]s keyed by guid and indexed by path.
#[derive(Debug, Default)]
pub struct TreeManager {
    arena: Vec<Option<InstanceNode>>,
    by_guid: HashMap<String, usize>,
    by_path: HashMap<Vec<String>, String>,
}

impl TreeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire tree with a snapshot.
    ///
    /// Ancestor Folders implied by any record's path but absent from the
    /// snapshot are materialized, so the path-prefix invariant holds no
    /// matter what order (or how sparsely) the plugin serialized the tree.
    pub fn apply_full_snapshot(&mut self, records: Vec<InstanceRecord>) {
        self.arena.clear();
        self.by_guid.clear();
        self.by_path.clear();

        for record in records {
            self.ensure_ancestors(&record.path);
            self.insert(InstanceNode::from_record(record));
        }
    }

    /// In-place source update. Unknown guids are a no-op; the caller decides
    /// whether to create the node first.
    pub fn update_script_source(&mut self, guid: &str, source: &str) {
        if let Some(node) = self.node_mut(guid) {
            node.source = Some(source.to_string());
        }
    }

    /// Create the node if the guid is unknown, otherwise apply name, path,
    /// and class changes. Moving or renaming a container reparents every
    /// descendant's stored path; descendant guids and sources are untouched.
    pub fn update_instance(&mut self, record: InstanceRecord) -> InstanceUpdate {
        self.ensure_ancestors(&record.path);

        let Some(&slot) = self.by_guid.get(&record.guid) else {
            let node = InstanceNode::from_record(record);
            self.insert(node.clone());
            return InstanceUpdate {
                node,
                path_changed: false,
                name_changed: false,
                prev_path: None,
            };
        };

        let prev = self.arena[slot].clone().unwrap_or_else(|| unreachable!());
        let path_changed = prev.path != record.path;
        let name_changed = prev.name != record.name;

        if path_changed {
            // Last message wins: a resident node at the target path is stale.
            self.supersede(&record.path, &record.guid);
            self.by_path.remove(&prev.path);
            self.by_path.insert(record.path.clone(), record.guid.clone());
            self.reparent_descendants(&prev.path, &record.path);
        }

        let node = {
            let stored = self.arena[slot].as_mut().unwrap_or_else(|| unreachable!());
            stored.name = record.name;
            stored.path = record.path;
            stored.class_name = record.class_name;
            stored.clone()
        };

        InstanceUpdate {
            node,
            path_changed,
            name_changed,
            prev_path: Some(prev.path),
        }
    }

    /// Remove the node and, transitively, every path-prefix descendant.
    /// Returns the removed nodes (deepest last is not guaranteed).
    pub fn delete_instance(&mut self, guid: &str) -> Vec<InstanceNode> {
        let Some(node) = self.get_node(guid).cloned() else {
            return Vec::new();
        };

        let mut removed = vec![node.clone()];
        let descendant_guids: Vec<String> = self
            .nodes()
            .filter(|n| is_proper_descendant(&n.path, &node.path))
            .map(|n| n.guid.clone())
            .collect();

        for child_guid in descendant_guids {
            if let Some(child) = self.remove(&child_guid) {
                removed.push(child);
            }
        }
        self.remove(guid);

        debug!(guid, count = removed.len(), "deleted subtree");
        removed
    }

    pub fn get_node(&self, guid: &str) -> Option<&InstanceNode> {
        self.by_guid.get(guid).and_then(|&slot| self.arena[slot].as_ref())
    }

    pub fn guid_at_path(&self, path: &[String]) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Iterate over all live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &InstanceNode> {
        self.arena.iter().filter_map(Option::as_ref)
    }

    pub fn all_nodes(&self) -> Vec<&InstanceNode> {
        self.nodes().collect()
    }

    /// Script-class nodes strictly below `guid`.
    pub fn descendant_scripts(&self, guid: &str) -> Vec<&InstanceNode> {
        let Some(root) = self.get_node(guid) else {
            return Vec::new();
        };
        let prefix = root.path.clone();
        self.nodes()
            .filter(|n| n.is_script() && is_proper_descendant(&n.path, &prefix))
            .collect()
    }

    pub fn stats(&self) -> TreeStats {
        let total_nodes = self.nodes().count();
        let script_nodes = self.nodes().filter(|n| n.is_script()).count();
        TreeStats {
            script_nodes,
            total_nodes,
        }
    }

    // --- internals ---

    fn node_mut(&mut self, guid: &str) -> Option<&mut InstanceNode> {
        let slot = *self.by_guid.get(guid)?;
        self.arena[slot].as_mut()
    }

    /// Materialize missing Folder nodes for every proper prefix of `path`.
    fn ensure_ancestors(&mut self, path: &[String]) {
        for len in 1..path.len() {
            let prefix = path[..len].to_vec();
            if self.by_path.contains_key(&prefix) {
                continue;
            }
            let name = prefix[len - 1].clone();
            self.insert(InstanceNode {
                guid: tether_protocol::new_guid(),
                class_name: ClassName::Folder,
                name,
                path: prefix,
                source: None,
            });
        }
    }

    fn insert(&mut self, node: InstanceNode) {
        self.supersede(&node.path, &node.guid);
        if let Some(&slot) = self.by_guid.get(&node.guid) {
            // Same guid re-sent: replace in place, fixing the path index.
            if let Some(old) = self.arena[slot].take() {
                self.by_path.remove(&old.path);
            }
            self.by_path.insert(node.path.clone(), node.guid.clone());
            self.arena[slot] = Some(node);
            return;
        }
        self.by_guid.insert(node.guid.clone(), self.arena.len());
        self.by_path.insert(node.path.clone(), node.guid.clone());
        self.arena.push(Some(node));
    }

    fn remove(&mut self, guid: &str) -> Option<InstanceNode> {
        let slot = self.by_guid.remove(guid)?;
        let node = self.arena[slot].take()?;
        self.by_path.remove(&node.path);
        Some(node)
    }

    /// Drop whatever node currently holds `path`, unless it is `keep_guid`.
    fn supersede(&mut self, path: &[String], keep_guid: &str) {
        if let Some(resident) = self.by_path.get(path).cloned() {
            if resident != keep_guid {
                debug!(path = ?path, stale = %resident, "path reclaimed by newer instance");
                self.remove(&resident);
            }
        }
    }

    /// Rewrite the stored path of every proper descendant of `old_prefix`.
    fn reparent_descendants(&mut self, old_prefix: &[String], new_prefix: &[String]) {
        let slots: Vec<usize> = self
            .arena
            .iter()
            .enumerate()
            .filter_map(|(i, n)| {
                n.as_ref()
                    .filter(|n| is_proper_descendant(&n.path, old_prefix))
                    .map(|_| i)
            })
            .collect();

        for slot in slots {
            if let Some(node) = self.arena[slot].as_mut() {
                self.by_path.remove(&node.path);
                let suffix = node.path[old_prefix.len()..].to_vec();
                let mut path = new_prefix.to_vec();
                path.extend(suffix);
                node.path = path.clone();
                self.by_path.insert(path, node.guid.clone());
            }
        }
    }
}

fn is_proper_descendant(path: &[String], prefix: &[String]) -> bool {
    path.len() > prefix.len() && path[..prefix.len()] == *prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        guid: &str,
        class: ClassName,
        path: &[&str],
        source: Option<&str>,
    ) -> InstanceRecord {
        InstanceRecord {
            guid: guid.into(),
            class_name: class,
            name: path.last().map(|s| s.to_string()).unwrap_or_default(),
            path: path.iter().map(|s| s.to_string()).collect(),
            source: source.map(Into::into),
        }
    }

    fn segs(path: &[&str]) -> Vec<String> {
        path.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn snapshot_materializes_missing_ancestors() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![record(
            "s1",
            ClassName::ModuleScript,
            &["Shared", "Net", "Codec"],
            Some("return {}"),
        )]);

        // Every proper prefix must resolve to a node.
        assert!(tree.guid_at_path(&segs(&["Shared"])).is_some());
        assert!(tree.guid_at_path(&segs(&["Shared", "Net"])).is_some());
        assert_eq!(tree.stats().total_nodes, 3);
        assert_eq!(tree.stats().script_nodes, 1);
    }

    #[test]
    fn path_invariant_holds_across_mutations() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![
            record("f1", ClassName::Folder, &["Shared"], None),
            record("s1", ClassName::ModuleScript, &["Shared", "Util"], Some("return 1")),
        ]);
        tree.update_instance(record(
            "s2",
            ClassName::Script,
            &["Server", "Boot", "Main"],
            Some("print(1)"),
        ));
        tree.delete_instance("f1");

        for node in tree.nodes() {
            for len in 1..node.path.len() {
                assert!(
                    tree.guid_at_path(&node.path[..len].to_vec()).is_some(),
                    "missing ancestor {:?} of {:?}",
                    &node.path[..len],
                    node.path
                );
            }
        }
    }

    #[test]
    fn unknown_source_update_is_noop() {
        let mut tree = TreeManager::new();
        tree.update_script_source("ghost", "return nil");
        assert_eq!(tree.stats().total_nodes, 0);
    }

    #[test]
    fn rename_reparents_descendants_without_touching_them() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![
            record("f1", ClassName::Folder, &["Shared"], None),
            record("s1", ClassName::ModuleScript, &["Shared", "Util"], Some("return 1")),
            record("s2", ClassName::ModuleScript, &["Shared", "Deep", "Math"], Some("return 2")),
        ]);

        let update = tree.update_instance(record("f1", ClassName::Folder, &["Common"], None));
        assert!(update.path_changed);
        assert!(update.name_changed);
        assert_eq!(update.prev_path, Some(segs(&["Shared"])));

        let util = tree.get_node("s1").expect("s1 survives rename");
        assert_eq!(util.path, segs(&["Common", "Util"]));
        assert_eq!(util.source.as_deref(), Some("return 1"));

        let math = tree.get_node("s2").expect("s2 survives rename");
        assert_eq!(math.path, segs(&["Common", "Deep", "Math"]));

        assert!(tree.guid_at_path(&segs(&["Shared", "Util"])).is_none());
    }

    #[test]
    fn descendant_scripts_excludes_folders_and_self() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![
            record("f1", ClassName::Folder, &["Shared"], None),
            record("f2", ClassName::Folder, &["Shared", "Deep"], None),
            record("s1", ClassName::ModuleScript, &["Shared", "Util"], Some("return 1")),
            record("s2", ClassName::LocalScript, &["Shared", "Deep", "Input"], Some("")),
        ]);

        let scripts = tree.descendant_scripts("f1");
        let mut guids: Vec<&str> = scripts.iter().map(|n| n.guid.as_str()).collect();
        guids.sort_unstable();
        assert_eq!(guids, ["s1", "s2"]);
    }

    #[test]
    fn delete_removes_subtree_transitively() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![
            record("f1", ClassName::Folder, &["Shared"], None),
            record("s1", ClassName::ModuleScript, &["Shared", "Util"], Some("return 1")),
            record("s2", ClassName::Script, &["Boot"], Some("print(1)")),
        ]);

        let removed = tree.delete_instance("f1");
        assert_eq!(removed.len(), 2);
        assert!(tree.get_node("s1").is_none());
        assert!(tree.get_node("s2").is_some());
        assert_eq!(tree.stats().total_nodes, 1);
    }

    #[test]
    fn path_collision_supersedes_resident_node() {
        let mut tree = TreeManager::new();
        tree.apply_full_snapshot(vec![record(
            "old",
            ClassName::ModuleScript,
            &["Shared", "Util"],
            Some("return 1"),
        )]);

        tree.update_instance(record(
            "new",
            ClassName::ModuleScript,
            &["Shared", "Util"],
            Some("return 2"),
        ));

        assert!(tree.get_node("old").is_none());
        assert_eq!(tree.guid_at_path(&segs(&["Shared", "Util"])), Some("new"));
    }

    #[test]
    fn create_via_update_instance_reports_no_prev_path() {
        let mut tree = TreeManager::new();
        let update = tree.update_instance(record(
            "s1",
            ClassName::Script,
            &["Server", "Main"],
            Some("print(1)"),
        ));
        assert!(!update.path_changed);
        assert!(!update.name_changed);
        assert!(update.prev_path.is_none());
        assert!(tree.get_node("s1").is_some());
    }
}
