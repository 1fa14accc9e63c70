use std::fs;
use std::path::Path;

use anyhow::Error;
use orion_client::event::{MultimediaEvent, PingEvent, PttEvent, UserStatusEvent};
use schemars::schema_for;
use tracing::info;

use crate::engagement::Verbosity;
use crate::sink::RxOutputs;
use crate::status::NodeStatus;

/// Write JSON schemas for the inbound events and the RX node's outputs.
pub fn write_schema(out_dir: &Path) -> Result<Vec<String>, Error> {
    fs::create_dir_all(out_dir)?;

    let schemas = [
        ("event-ptt", serde_json::to_string_pretty(&schema_for!(PttEvent))?),
        ("event-userstatus", serde_json::to_string_pretty(&schema_for!(UserStatusEvent))?),
        ("event-multimedia", serde_json::to_string_pretty(&schema_for!(MultimediaEvent))?),
        ("event-ping", serde_json::to_string_pretty(&schema_for!(PingEvent))?),
        ("rx-outputs", serde_json::to_string_pretty(&schema_for!(RxOutputs))?),
        ("node-status", serde_json::to_string_pretty(&schema_for!(NodeStatus))?),
        ("verbosity", serde_json::to_string_pretty(&schema_for!(Verbosity))?),
    ];

    let mut written = Vec::new();
    for (name, json) in schemas {
        let filename = format!("{name}.schema.json");
        fs::write(out_dir.join(&filename), json)?;
        written.push(filename);
    }
    info!(dir = %out_dir.display(), count = written.len(), "schemas written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_schema() {
        let dir = tempdir().unwrap();
        let written = write_schema(dir.path()).unwrap();
        assert!(written.contains(&"event-ptt.schema.json".to_string()));

        let raw = fs::read_to_string(dir.path().join("rx-outputs.schema.json")).unwrap();
        let schema: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(schema["properties"]["direct"].is_object());
    }
}
