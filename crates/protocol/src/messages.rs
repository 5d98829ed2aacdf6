//! Message envelopes for the tether sync protocol.

use serde::{Deserialize, Serialize};

/// Studio instance class, as reported by the plugin.
///
/// Only the three script classes carry source text; everything else is a
/// container as far as the daemon is concerned. Unknown class strings
/// round-trip through [`ClassName::Other`] untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClassName {
    Folder,
    Script,
    LocalScript,
    ModuleScript,
    Other(String),
}

impl ClassName {
    /// True for classes whose `source` payload is meaningful.
    pub fn is_script(&self) -> bool {
        matches!(
            self,
            ClassName::Script | ClassName::LocalScript | ClassName::ModuleScript
        )
    }

    /// The Studio class string.
    pub fn as_str(&self) -> &str {
        match self {
            ClassName::Folder => "Folder",
            ClassName::Script => "Script",
            ClassName::LocalScript => "LocalScript",
            ClassName::ModuleScript => "ModuleScript",
            ClassName::Other(name) => name,
        }
    }
}

impl From<String> for ClassName {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Folder" => ClassName::Folder,
            "Script" => ClassName::Script,
            "LocalScript" => ClassName::LocalScript,
            "ModuleScript" => ClassName::ModuleScript,
            _ => ClassName::Other(value),
        }
    }
}

impl From<ClassName> for String {
    fn from(value: ClassName) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for ClassName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of one Studio instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub guid: String,
    pub class_name: ClassName,
    pub name: String,
    /// Segments from the logical root down to this instance.
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Messages the plugin sends to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StudioMessage {
    /// Complete tree snapshot, sent once after connecting.
    FullSnapshot { data: Vec<InstanceRecord> },
    /// One script's source changed inside Studio.
    #[serde(rename_all = "camelCase")]
    ScriptChanged {
        guid: String,
        source: String,
        path: Vec<String>,
        class_name: ClassName,
    },
    /// An instance was created, renamed, or moved.
    InstanceUpdated { data: InstanceRecord },
    /// An instance (and its descendants) was removed.
    Deleted { guid: String },
    /// Heartbeat.
    Ping,
    /// Studio asked to close the session.
    ClientDisconnect,
}

/// Messages the daemon sends to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DaemonMessage {
    /// Heartbeat reply.
    Pong,
    /// Apply an externally-edited script source in Studio.
    PatchScript { guid: String, source: String },
    /// One-shot snapshot pushed from the filesystem (build/push commands).
    BuildSnapshot { data: Vec<InstanceRecord> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_name_roundtrip() {
        for name in ["Folder", "Script", "LocalScript", "ModuleScript", "Model"] {
            let class = ClassName::from(name.to_string());
            assert_eq!(class.as_str(), name);
        }
        assert!(ClassName::ModuleScript.is_script());
        assert!(!ClassName::Other("Model".into()).is_script());
    }

    #[test]
    fn studio_message_tagged_wire_shape() {
        let msg = StudioMessage::ScriptChanged {
            guid: "abc".into(),
            source: "return 1".into(),
            path: vec!["Shared".into(), "Util".into()],
            class_name: ClassName::ModuleScript,
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"scriptChanged\""));
        assert!(json.contains("\"className\":\"ModuleScript\""));
    }

    #[test]
    fn snapshot_parses_optional_source() {
        let json = r#"{
            "type": "fullSnapshot",
            "data": [
                {"guid": "a", "className": "Folder", "name": "Shared", "path": ["Shared"]},
                {"guid": "b", "className": "ModuleScript", "name": "Util",
                 "path": ["Shared", "Util"], "source": "return 1"}
            ]
        }"#;
        let msg: StudioMessage = serde_json::from_str(json).expect("deserialize");
        match msg {
            StudioMessage::FullSnapshot { data } => {
                assert_eq!(data.len(), 2);
                assert!(data[0].source.is_none());
                assert_eq!(data[1].source.as_deref(), Some("return 1"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let json = r#"{"type": "teleport", "guid": "a"}"#;
        assert!(serde_json::from_str::<StudioMessage>(json).is_err());
    }

    #[test]
    fn daemon_message_wire_shape() {
        let msg = DaemonMessage::PatchScript {
            guid: "abc".into(),
            source: "print(1)".into(),
        };
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"type\":\"patchScript\""));
    }

    #[test]
    fn guid_format() {
        let guid = crate::new_guid();
        assert_eq!(guid.len(), 32);
        assert!(!guid.contains('-'));
    }
}
