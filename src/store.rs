use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const RAW_DIR: &str = "raw";
pub const INTERIM_DIR: &str = "interim";
pub const PROCESSED_DIR: &str = "processed";

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Pretty-print `value` to `path`, creating parent directories.
///
/// The document is written to a sibling temp file and renamed into place so a
/// crash mid-write never leaves a truncated file behind.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    let tmp = tmp_path(path);
    fs::write(&tmp, &body).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Run id derived from the input document, so the same input maps to the same
/// checkpoint across invocations.
pub fn content_run_id(input: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(input));
    digest[..16].to_string()
}

pub fn checkpoint_path(data_dir: &Path, run_id: &str) -> Result<PathBuf> {
    ensure!(
        !run_id.is_empty() && run_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        "run id may only contain ASCII letters, digits, '-' and '_': {:?}",
        run_id
    );
    Ok(data_dir.join(INTERIM_DIR).join(format!("descr_summ_{}.json", run_id)))
}

/// Append-only summary accumulator persisted as one JSON object.
///
/// Keys are `summary_N` or `error_N` where `N` is the accumulator length at
/// insertion plus one, so keys are never reused and file order is arrival order.
pub struct Checkpoint {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl Checkpoint {
    /// Load an existing checkpoint, or create an empty one on disk.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let entries: Map<String, Value> = read_json(&path)?;
            Ok(Self { path, entries })
        } else {
            let checkpoint = Self { path, entries: Map::new() };
            checkpoint.save()?;
            Ok(checkpoint)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn push_summary(&mut self, text: String) -> String {
        self.push("summary", text)
    }

    pub fn push_error(&mut self, message: String) -> String {
        self.push("error", message)
    }

    fn push(&mut self, kind: &str, value: String) -> String {
        let key = format!("{}_{}", kind, self.entries.len() + 1);
        self.entries.insert(key.clone(), Value::String(value));
        key
    }

    /// Counts of `(summaries, errors)` currently held.
    pub fn tally(&self) -> (usize, usize) {
        let errors = self.entries.keys().filter(|k| k.starts_with("error_")).count();
        (self.entries.len() - errors, errors)
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.path, &self.entries)
    }
}

/// Scratch directory for tests, unique per test name and process.
#[cfg(test)]
pub fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("additive_pipeline-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}
