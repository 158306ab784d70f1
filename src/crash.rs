//! Crash dump: a snapshot of last-round state, written to
//! the scenario directory when a fatal error reaches `main` so a
//! post-mortem doesn't depend on whatever happened to be in the log
//! tail.

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::node_id::NodeId;

#[derive(Debug, Error)]
pub enum CrashDumpError {
    #[error("failed to serialize crash dump: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write crash dump to {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Last-round state captured on a fatal round-loop error.
#[derive(Debug, Clone, Serialize)]
pub struct CrashDump {
    pub node: NodeId,
    pub last_round: i32,
    pub pending_buffer_keys: Vec<NodeId>,
    pub connected_peers: Vec<NodeId>,
    pub last_error: String,
}

impl CrashDump {
    /// Writes this dump to `<scenario_dir>/crash_<node_id>.json`,
    /// creating the directory if it doesn't already exist.
    pub fn write(&self, scenario_dir: &Path) -> Result<(), CrashDumpError> {
        fs::create_dir_all(scenario_dir).map_err(|source| CrashDumpError::Write {
            path: scenario_dir.to_path_buf(),
            source,
        })?;

        let file_name = format!("crash_{}_{}.json", self.node.ip(), self.node.port());
        let path = scenario_dir.join(file_name);
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(&path, json).map_err(|source| CrashDumpError::Write { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_dump_file_named_after_the_node() {
        let dir = tempdir();
        let dump = CrashDump {
            node: "127.0.0.1:9000".parse().unwrap(),
            last_round: 3,
            pending_buffer_keys: vec![],
            connected_peers: vec![],
            last_error: "aggregation incompatible lengths".to_string(),
        };
        dump.write(&dir).unwrap();
        let expected = dir.join("crash_127.0.0.1_9000.json");
        assert!(expected.exists());
        fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("nebula-crash-test-{}", std::process::id()));
        dir
    }
}
