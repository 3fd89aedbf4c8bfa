//! Debug tag filter.
//!
//! DEBUG-level output is grouped under short tags (`DEVICE`, `MQTT`,
//! `PROV`, `REG`). A component only emits its `debug!` lines when its tag
//! is listed in the configured CSV string.

/// Orchestrator and feature bookkeeping.
pub const TAG_DEVICE: &str = "DEVICE";
/// Session layer and transport events.
pub const TAG_MQTT: &str = "MQTT";
/// Provisioning attribute writes and status refresh.
pub const TAG_PROV: &str = "PROV";
/// Discovery and registration handshake.
pub const TAG_REG: &str = "REG";

/// Parsed copy of the configured tag list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugTags {
    csv: String,
}

impl DebugTags {
    pub fn new(csv: &str) -> Self {
        Self { csv: csv.into() }
    }

    /// True when `tag` appears as a whole comma-separated token.
    pub fn enabled(&self, tag: &str) -> bool {
        !tag.is_empty() && self.csv.split(',').any(|token| token == tag)
    }

    pub fn as_str(&self) -> &str {
        &self.csv
    }
}
