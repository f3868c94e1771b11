//! Execution records under `<state_dir>/executions/<id>/`.
//!
//! Records are product artifacts, written regardless of `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::core::types::{ExecStatus, Execution};
use crate::io::config::write_atomic;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMeta {
    pub execution_id: String,
    pub member_id: String,
    pub status: ExecStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub robot_file: String,
    pub robot_sha256: String,
    pub written_at: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionPaths {
    pub dir: PathBuf,
    pub execution_path: PathBuf,
    pub meta_path: PathBuf,
}

impl ExecutionPaths {
    pub fn new(state_dir: &Path, execution_id: &str) -> Self {
        let dir = state_dir.join("executions").join(execution_id);
        Self {
            execution_path: dir.join("execution.json"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Write `execution.json` and `meta.json` for one execution.
pub fn write_execution(
    state_dir: &Path,
    exec: &Execution,
    robot_path: &Path,
) -> Result<ExecutionPaths> {
    let paths = ExecutionPaths::new(state_dir, &exec.id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create execution dir {}", paths.dir.display()))?;

    let (succeeded, failed) = exec.result_counts();
    let meta = ExecutionMeta {
        execution_id: exec.id.clone(),
        member_id: exec.member_id.clone(),
        status: exec.status,
        succeeded,
        failed,
        robot_file: robot_path.display().to_string(),
        robot_sha256: file_sha256(robot_path)?,
        written_at: Utc::now().to_rfc3339(),
    };
    write_json(&paths.execution_path, exec)?;
    write_json(&paths.meta_path, &meta)?;
    Ok(paths)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    Ok(hex::encode(hasher.finalize()))
}
