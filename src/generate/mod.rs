use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::{validate_shard_key, CacheEntry, Organization, INDEX_SHARD};

mod client;
mod publish;
pub use client::{CareClient, RetryPolicy};
pub use publish::Publisher;

#[derive(Args)]
pub struct GenerateArgs {
    /// CARE API base URL
    #[arg(short = 'u', long, env = "CARE_API_URL")]
    pub api_url: String,

    /// Directory the shards are published to
    #[arg(short, long, default_value = "public/organizations")]
    pub output: PathBuf,

    /// Organizations requested per call; a larger result set fails the run
    #[arg(short, long, default_value = "1000")]
    pub page_size: usize,

    /// Attempts per API call before the run is aborted
    #[arg(short, long, default_value = "3")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per failed attempt
    #[arg(short, long, default_value = "1000")]
    pub base_delay_ms: u64,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    pub timeout: u64,
}

/// Active organizations only, in API order.
pub fn build_cache(orgs: &[Organization]) -> Vec<CacheEntry> {
    orgs.iter()
        .filter(|org| org.active)
        .map(CacheEntry::from)
        .collect()
}

/// Grandchildren are not cached; the selector treats second-level entries as leaves.
pub fn strip_children(orgs: Vec<Organization>) -> Vec<Organization> {
    orgs.into_iter()
        .map(|org| Organization {
            has_children: false,
            ..org
        })
        .collect()
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(args))
}

/// Fetches both levels and returns the staged shards keyed by parent id.
pub async fn collect_shards(
    client: Arc<CareClient>,
) -> Result<BTreeMap<String, Vec<CacheEntry>>> {
    let mut shards = BTreeMap::new();

    let roots = client
        .fetch_organizations(None)
        .await
        .context("Failed to fetch root organizations")?;
    info!("Fetched {} root organizations", roots.len());
    shards.insert(INDEX_SHARD.to_string(), build_cache(&roots));

    let parents: Vec<Organization> = roots.into_iter().filter(|o| o.has_children).collect();
    for parent in &parents {
        validate_shard_key(&parent.id)?;
    }

    let pb = ProgressBar::new(parents.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut handles = Vec::with_capacity(parents.len());
    for parent in parents {
        let client = Arc::clone(&client);
        let pb = pb.clone();

        handles.push(tokio::spawn(async move {
            let children = client
                .fetch_organizations(Some(&parent))
                .await
                .with_context(|| format!("Failed to fetch children of {}", parent.name))?;
            pb.inc(1);
            Ok::<_, anyhow::Error>((parent.id, build_cache(&strip_children(children))))
        }));
    }

    for handle in handles {
        let (key, entries) = handle.await.context("Fetch task panicked")??;
        match shards.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(entries);
            }
            Entry::Occupied(slot) => bail!("Duplicate shard key {:?}", slot.key()),
        }
    }

    pb.finish_with_message("Done");
    Ok(shards)
}

pub async fn run_async(args: GenerateArgs) -> Result<()> {
    let retry = RetryPolicy {
        max_attempts: args.max_attempts,
        base_delay: Duration::from_millis(args.base_delay_ms),
    };
    let client = Arc::new(CareClient::new(
        &args.api_url,
        retry,
        args.page_size,
        args.timeout,
    )?);

    let publisher = Publisher::new(&args.output)?;
    if publisher.recover().await? {
        info!("Restored previous publish at {}", publisher.target().display());
    }

    let shards = collect_shards(client).await?;
    let entries: usize = shards.values().map(Vec::len).sum();

    let written = publisher.publish(shards).await?;

    info!(
        "Wrote {} shards ({} organizations) to {}",
        written,
        entries,
        publisher.target().display()
    );

    Ok(())
}
