use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use urlencoding::encode;

use crate::{shard_file_name, validate_shard_key, CacheEntry};

/// Somewhere published shards can be read back from.
pub trait ShardSource {
    fn fetch(&self, shard: &str) -> impl Future<Output = Result<Vec<CacheEntry>>> + Send;
}

/// Reads `<site>/organizations/<shard>.json`. No retry.
pub struct HttpShardSource {
    client: Client,
    site_url: String,
}

impl HttpShardSource {
    pub fn new(site_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            site_url: site_url.trim_end_matches('/').to_string(),
        })
    }

    fn shard_url(&self, shard: &str) -> String {
        format!(
            "{}/organizations/{}",
            self.site_url,
            shard_file_name(&encode(shard))
        )
    }
}

impl ShardSource for HttpShardSource {
    fn fetch(&self, shard: &str) -> impl Future<Output = Result<Vec<CacheEntry>>> + Send {
        let url = self.shard_url(shard);
        let request = self.client.get(&url);

        async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("GET {}: HTTP {}", url, status));
            }
            response
                .json::<Vec<CacheEntry>>()
                .await
                .with_context(|| format!("Failed to decode shard {}", url))
        }
    }
}

/// Reads shards straight out of a generator output directory.
pub struct DirShardSource {
    dir: PathBuf,
}

impl DirShardSource {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl ShardSource for DirShardSource {
    fn fetch(&self, shard: &str) -> impl Future<Output = Result<Vec<CacheEntry>>> + Send {
        let checked = validate_shard_key(shard).map(|_| self.dir.join(shard_file_name(shard)));

        async move {
            let path = checked?;
            let body = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_slice(&body)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

/// Chosen at runtime from a `--source` argument.
pub enum AnySource {
    Http(HttpShardSource),
    Dir(DirShardSource),
}

impl AnySource {
    pub fn from_arg(source: &str, timeout_secs: u64) -> Result<Self> {
        if source.starts_with("http://") || source.starts_with("https://") {
            Ok(Self::Http(HttpShardSource::new(source, timeout_secs)?))
        } else {
            Ok(Self::Dir(DirShardSource::new(source)))
        }
    }
}

impl ShardSource for AnySource {
    fn fetch(&self, shard: &str) -> impl Future<Output = Result<Vec<CacheEntry>>> + Send {
        async move {
            match self {
                Self::Http(source) => source.fetch(shard).await,
                Self::Dir(source) => source.fetch(shard).await,
            }
        }
    }
}
