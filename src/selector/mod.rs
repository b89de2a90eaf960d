use anyhow::{anyhow, bail, Result};
use clap::Args;
use tracing::{debug, info};
use urlencoding::encode;

use crate::{CacheEntry, INDEX_SHARD};

mod source;
pub use source::{AnySource, DirShardSource, HttpShardSource, ShardSource};

#[derive(Args)]
pub struct ResolveArgs {
    /// Site base URL serving /organizations/*.json, or a local shard directory
    #[arg(short, long, default_value = "public/organizations")]
    pub source: String,

    /// Facility grid base URL
    #[arg(short, long, env = "GRID_URL")]
    pub grid_url: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    pub timeout: u64,

    /// Organization names from the root level down
    #[arg(required = true)]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ShardState {
    #[default]
    Idle,
    Loading,
    Loaded(Vec<CacheEntry>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardRequest {
    pub id: u64,
    pub shard: String,
}

#[derive(Debug, Clone)]
pub struct ShardResponse {
    pub request_id: u64,
    pub result: std::result::Result<Vec<CacheEntry>, String>,
}

/// Drill-down over the published shards.
///
/// Every shard load is tagged with a request id; only the response to the
/// most recent request is applied.
#[derive(Debug)]
pub struct OrgSelector {
    grid_url: String,
    path: Vec<CacheEntry>,
    candidates: ShardState,
    search: String,
    open: bool,
    issued: u64,
    latest: Option<u64>,
}

impl OrgSelector {
    pub fn new(grid_url: impl Into<String>) -> (Self, ShardRequest) {
        let mut selector = Self {
            grid_url: grid_url.into().trim_end_matches('/').to_string(),
            path: Vec::new(),
            candidates: ShardState::Idle,
            search: String::new(),
            open: false,
            issued: 0,
            latest: None,
        };
        let request = selector.request(INDEX_SHARD.to_string());
        (selector, request)
    }

    fn request(&mut self, shard: String) -> ShardRequest {
        self.issued += 1;
        self.latest = Some(self.issued);
        self.candidates = ShardState::Loading;
        ShardRequest {
            id: self.issued,
            shard,
        }
    }

    fn tail_shard(&self) -> String {
        self.path
            .last()
            .map(|org| org.id.clone())
            .unwrap_or_else(|| INDEX_SHARD.to_string())
    }

    pub fn path(&self) -> &[CacheEntry] {
        &self.path
    }

    pub fn candidates(&self) -> &ShardState {
        &self.candidates
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, text: &str) {
        self.search = text.to_string();
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    /// Appends `entry` to the path. Returns the next shard to load, or
    /// None when `entry` is a leaf.
    pub fn select(&mut self, entry: CacheEntry) -> Option<ShardRequest> {
        let has_children = entry.has_children;
        self.path.push(entry);
        self.open = false;
        self.search.clear();

        if has_children {
            Some(self.request(self.tail_shard()))
        } else {
            self.latest = None;
            self.candidates = ShardState::Idle;
            None
        }
    }

    /// Re-typing the input at `index` drops that level and everything below it.
    pub fn edit(&mut self, index: usize, text: &str) -> ShardRequest {
        self.path.truncate(index);
        self.search = text.to_string();
        self.open = true;
        self.request(self.tail_shard())
    }

    /// Returns false when the response belongs to a superseded request.
    pub fn apply(&mut self, response: ShardResponse) -> bool {
        if self.latest != Some(response.request_id) {
            debug!("Dropping stale shard response {}", response.request_id);
            return false;
        }
        self.latest = None;
        self.candidates = match response.result {
            Ok(entries) => ShardState::Loaded(entries),
            Err(error) => ShardState::Failed(error),
        };
        true
    }

    pub async fn load<S: ShardSource>(&mut self, source: &S, request: ShardRequest) -> bool {
        let result = source
            .fetch(&request.shard)
            .await
            .map_err(|e| format!("{:#}", e));
        self.apply(ShardResponse {
            request_id: request.id,
            result,
        })
    }

    pub fn visible_candidates(&self) -> Vec<&CacheEntry> {
        let ShardState::Loaded(entries) = &self.candidates else {
            return Vec::new();
        };
        let needle = self.search.trim().to_lowercase();
        entries
            .iter()
            .filter(|org| needle.is_empty() || org.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// e.g. "Select district / local body"
    pub fn placeholder(&self) -> String {
        let mut types: Vec<&str> = Vec::new();
        if let ShardState::Loaded(entries) = &self.candidates {
            for org_type in entries.iter().filter_map(|org| org.org_type.as_deref()) {
                if !types.contains(&org_type) {
                    types.push(org_type);
                }
            }
        }
        format!("Select {}", types.join(" / ").replace('_', " "))
    }

    pub fn accepts_more(&self) -> bool {
        self.path.last().map_or(true, |org| org.has_children)
    }

    pub fn continue_url(&self) -> Option<String> {
        self.path.last().map(|org| {
            format!(
                "{}/facilities?organization={}",
                self.grid_url,
                encode(&org.id)
            )
        })
    }
}

/// Walks `names` level by level and returns the facility URL for the last one.
pub async fn resolve<S: ShardSource>(
    source: &S,
    grid_url: &str,
    names: &[String],
) -> Result<String> {
    let (mut selector, request) = OrgSelector::new(grid_url);
    let mut pending = Some(request);

    for name in names {
        let Some(request) = pending.take() else {
            let leaf = selector.path().last().map(|o| o.name.as_str()).unwrap_or("");
            bail!("{} has no sub-organizations, cannot select {}", leaf, name);
        };
        selector.load(source, request).await;

        let entry = match selector.candidates() {
            ShardState::Loaded(entries) => {
                let wanted = name.to_lowercase();
                entries
                    .iter()
                    .find(|org| org.name.to_lowercase() == wanted)
                    .cloned()
                    .ok_or_else(|| anyhow!("No organization named {:?} at this level", name))?
            }
            ShardState::Failed(error) => bail!("Failed to load organizations: {}", error),
            state => bail!("Shard not loaded: {:?}", state),
        };
        debug!("Selected {} ({})", entry.name, entry.id);
        pending = selector.select(entry);
    }

    selector
        .continue_url()
        .ok_or_else(|| anyhow!("No organization selected"))
}

pub fn run(args: ResolveArgs) -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(args))
}

pub async fn run_async(args: ResolveArgs) -> Result<()> {
    let source = AnySource::from_arg(&args.source, args.timeout)?;
    let url = resolve(&source, &args.grid_url, &args.names).await?;
    info!("Resolved {} levels", args.names.len());
    println!("{}", url);
    Ok(())
}
