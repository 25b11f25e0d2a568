//! # Env-File Configuration Store
//!
//! `{environment}.env` key/value files, parsed with `dotenvy`.
//!
//! Values are loaded once when the store is opened. [`ConfigStore::set`] rewrites
//! only the line holding the key (appending it when absent) so comments, ordering
//! and unrelated entries survive the write-back.

use crate::provider::ConfigStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
pub struct EnvFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl EnvFileStore {
    /// Open and parse the store at `path`
    ///
    /// # Errors
    /// Returns an error if the file is missing or not valid dotenv syntax
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let iter = dotenvy::from_path_iter(&path)
            .with_context(|| format!("Failed to open config store {}", path.display()))?;

        let mut values = BTreeMap::new();
        for item in iter {
            let (key, value) = item
                .with_context(|| format!("Failed to parse config store {}", path.display()))?;
            values.insert(key, value);
        }
        debug!("Loaded {} keys from {}", values.len(), path.display());

        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for EnvFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().await;
        if values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read config store {}", self.path.display()))?;
        let rewritten = upsert_line(&contents, key, value);
        tokio::fs::write(&self.path, rewritten)
            .await
            .with_context(|| format!("Failed to write config store {}", self.path.display()))?;

        values.insert(key.to_string(), value.to_string());
        debug!("Wrote {} to {}", key, self.path.display());
        Ok(())
    }
}

/// Replace the first assignment of `key` (optionally `export`-prefixed) or append one.
fn upsert_line(contents: &str, key: &str, value: &str) -> String {
    let assignment = format!("{key}={value}");
    let mut replaced = false;
    let mut lines: Vec<String> = Vec::new();

    for line in contents.lines() {
        if !replaced && assigns_key(line, key) {
            let export = if line.trim_start().starts_with("export ") {
                "export "
            } else {
                ""
            };
            lines.push(format!("{export}{assignment}"));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(assignment);
    }

    let mut rewritten = lines.join("\n");
    rewritten.push('\n');
    rewritten
}

fn assigns_key(line: &str, key: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    line.strip_prefix(key)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}
