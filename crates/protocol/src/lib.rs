//! # Tether Protocol
//!
//! Typed message catalogue exchanged between the tether daemon and the
//! Studio plugin. Pure data contract: every envelope is a closed tagged
//! union validated at the transport boundary, so nothing `serde_json`
//! cannot parse ever reaches the orchestrator.

pub mod messages;

pub use messages::{ClassName, DaemonMessage, InstanceRecord, StudioMessage};

/// Generate a fresh instance GUID in the plugin's format (hyphen-less v4).
pub fn new_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
