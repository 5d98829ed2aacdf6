//! Scans a directory tree into instance records, the inverse of the
//! projector: directories become Folders, marker-suffixed files become
//! script classes. Used by the one-shot `build` and `push` commands.

use std::path::Path;

use tether_protocol::{new_guid, ClassName, InstanceRecord};
use walkdir::WalkDir;

use crate::error::SyncError;

/// Scan `base_dir` recursively into records, sorted shallow-to-deep so the
/// receiver can create parents before children. Files without the scripting
/// extension are skipped; their directories still scan as Folders.
pub fn scan_directory(base_dir: &Path, extension: &str) -> Result<Vec<InstanceRecord>, SyncError> {
    let mut records = Vec::new();

    for entry in WalkDir::new(base_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
    {
        let path = entry.path();
        let Ok(relative) = path.strip_prefix(base_dir) else {
            continue;
        };
        let segments: Vec<String> = relative
            .iter()
            .map(|s| s.to_string_lossy().into_owned())
            .collect();

        if entry.file_type().is_dir() {
            records.push(InstanceRecord {
                guid: new_guid(),
                class_name: ClassName::Folder,
                name: segments.last().cloned().unwrap_or_default(),
                path: segments,
                source: None,
            });
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((class_name, name)) = classify(file_name, extension) else {
            continue;
        };

        let source = std::fs::read_to_string(path).map_err(|e| SyncError::fs(path, e))?;
        let mut instance_path = segments[..segments.len() - 1].to_vec();
        instance_path.push(name.clone());
        records.push(InstanceRecord {
            guid: new_guid(),
            class_name,
            name,
            path: instance_path,
            source: Some(source),
        });
    }

    records.sort_by_key(|r| r.path.len());
    Ok(records)
}

/// Prepend `destination` segments (dot- or slash-separated, e.g.
/// `ReplicatedStorage.Shared`) to every record, adding Folder records for
/// the destination levels themselves.
pub fn reroot(records: Vec<InstanceRecord>, destination: &str) -> Vec<InstanceRecord> {
    let prefix: Vec<String> = destination
        .split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if prefix.is_empty() {
        return records;
    }

    let mut rerooted: Vec<InstanceRecord> = (1..=prefix.len())
        .map(|len| InstanceRecord {
            guid: new_guid(),
            class_name: ClassName::Folder,
            name: prefix[len - 1].clone(),
            path: prefix[..len].to_vec(),
            source: None,
        })
        .collect();

    for mut record in records {
        let mut path = prefix.clone();
        path.append(&mut record.path);
        record.path = path;
        rerooted.push(record);
    }

    rerooted.sort_by_key(|r| r.path.len());
    rerooted
}

/// Recover the instance class and name from a projected file name.
fn classify(file_name: &str, extension: &str) -> Option<(ClassName, String)> {
    let stem = file_name.strip_suffix(&format!(".{extension}"))?;
    if let Some(name) = stem.strip_suffix(".server") {
        return Some((ClassName::Script, name.to_string()));
    }
    if let Some(name) = stem.strip_suffix(".client") {
        return Some((ClassName::LocalScript, name.to_string()));
    }
    let name = stem.strip_suffix(".module").unwrap_or(stem);
    Some((ClassName::ModuleScript, name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn markers_recover_script_classes() {
        let cases = [
            ("Boot.server.luau", ClassName::Script, "Boot"),
            ("Input.client.luau", ClassName::LocalScript, "Input"),
            ("Util.module.luau", ClassName::ModuleScript, "Util"),
            ("Util.luau", ClassName::ModuleScript, "Util"),
        ];
        for (file_name, class, name) in cases {
            let (got_class, got_name) = classify(file_name, "luau").expect("classified");
            assert_eq!(got_class, class, "{file_name}");
            assert_eq!(got_name, name, "{file_name}");
        }
        assert!(classify("notes.txt", "luau").is_none());
    }

    #[test]
    fn scan_produces_shallow_to_deep_records() {
        let temp = tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("Shared/Deep")).expect("mkdir");
        std::fs::write(temp.path().join("Shared/Util.module.luau"), "return 1").expect("write");
        std::fs::write(temp.path().join("Shared/Deep/Math.luau"), "return 2").expect("write");
        std::fs::write(temp.path().join("Shared/notes.txt"), "ignored").expect("write");

        let records = scan_directory(temp.path(), "luau").expect("scan");

        assert_eq!(records.len(), 4);
        for pair in records.windows(2) {
            assert!(pair[0].path.len() <= pair[1].path.len());
        }

        let util = records
            .iter()
            .find(|r| r.name == "Util")
            .expect("Util scanned");
        assert_eq!(util.class_name, ClassName::ModuleScript);
        assert_eq!(util.path, ["Shared", "Util"]);
        assert_eq!(util.source.as_deref(), Some("return 1"));

        let math = records.iter().find(|r| r.name == "Math").expect("Math");
        assert_eq!(math.path, ["Shared", "Deep", "Math"]);

        assert!(!records.iter().any(|r| r.name == "notes"));
    }

    #[test]
    fn scanned_guids_are_unique() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join("A.luau"), "").expect("write");
        std::fs::write(temp.path().join("B.luau"), "").expect("write");

        let records = scan_directory(temp.path(), "luau").expect("scan");
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].guid, records[1].guid);
    }

    #[test]
    fn reroot_prepends_destination_folders() {
        let records = vec![InstanceRecord {
            guid: new_guid(),
            class_name: ClassName::ModuleScript,
            name: "Util".into(),
            path: vec!["Util".into()],
            source: Some("return 1".into()),
        }];

        let rerooted = reroot(records, "ReplicatedStorage.Shared");

        assert_eq!(rerooted.len(), 3);
        assert_eq!(rerooted[0].path, ["ReplicatedStorage"]);
        assert_eq!(rerooted[0].class_name, ClassName::Folder);
        assert_eq!(rerooted[1].path, ["ReplicatedStorage", "Shared"]);
        assert_eq!(
            rerooted[2].path,
            ["ReplicatedStorage", "Shared", "Util"]
        );
    }

    #[test]
    fn reroot_accepts_slash_separators() {
        let rerooted = reroot(Vec::new(), "Workspace/Scripts");
        assert_eq!(rerooted.len(), 2);
        assert_eq!(rerooted[1].path, ["Workspace", "Scripts"]);
    }
}
