use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::{shard_file_name, validate_shard_key, CacheEntry};

/// Shards are written into a sibling staging directory and swapped into
/// place only once every file is on disk.
pub struct Publisher {
    target: PathBuf,
    staging: PathBuf,
    previous: PathBuf,
}

fn sibling(target: &Path, file_name: &std::ffi::OsStr, suffix: &str) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(file_name);
    name.push(suffix);
    target.with_file_name(name)
}

impl Publisher {
    /// The target must end in a directory name (not `.`, `..` or `/`).
    pub fn new<P: AsRef<Path>>(target: P) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let file_name = target
            .file_name()
            .ok_or_else(|| anyhow!("Output path {} has no directory name", target.display()))?
            .to_os_string();

        Ok(Self {
            staging: sibling(&target, &file_name, ".staging"),
            previous: sibling(&target, &file_name, ".previous"),
            target,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        if fs::try_exists(path).await? {
            fs::remove_dir_all(path)
                .await
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Puts the last good publish back when a run died between the two
    /// renames of the swap. Returns true if anything was restored.
    pub async fn recover(&self) -> Result<bool> {
        if fs::try_exists(&self.target).await? || !fs::try_exists(&self.previous).await? {
            return Ok(false);
        }
        warn!(
            "Restoring {} from an interrupted publish",
            self.target.display()
        );
        fs::rename(&self.previous, &self.target)
            .await
            .with_context(|| format!("Failed to restore {}", self.target.display()))?;
        Ok(true)
    }

    pub async fn publish(&self, shards: BTreeMap<String, Vec<CacheEntry>>) -> Result<usize> {
        for key in shards.keys() {
            validate_shard_key(key)?;
        }

        if let Some(parent) = self.target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        self.recover().await?;
        // Leftovers from a run that died mid-publish.
        Self::remove_if_present(&self.staging).await?;
        Self::remove_if_present(&self.previous).await?;

        fs::create_dir_all(&self.staging)
            .await
            .context("Failed to create staging directory")?;

        let count = shards.len();
        let mut handles = Vec::with_capacity(count);
        for (key, entries) in shards {
            let path = self.staging.join(shard_file_name(&key));
            handles.push(tokio::spawn(async move {
                let body = serde_json::to_vec(&entries)?;
                fs::write(&path, body)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                Ok::<_, anyhow::Error>(())
            }));
        }
        for handle in handles {
            handle.await.context("Shard write task panicked")??;
        }

        if fs::try_exists(&self.target).await? {
            fs::rename(&self.target, &self.previous)
                .await
                .with_context(|| format!("Failed to move aside {}", self.target.display()))?;
        }
        fs::rename(&self.staging, &self.target)
            .await
            .with_context(|| format!("Failed to publish {}", self.target.display()))?;
        Self::remove_if_present(&self.previous).await?;

        debug!("Published {} shards to {}", count, self.target.display());
        Ok(count)
    }
}
