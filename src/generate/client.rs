use anyhow::{anyhow, Context, Result};
use rand::Rng;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Organization, OrganizationsResponse};

const ORGANIZATIONS_PATH: &str = "/api/v1/govt/organization/";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Full jitter: uniform in `[0, base_delay * 2^failed_attempts]`.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(failed_attempts));
        let ceiling_ms = ceiling.as_millis().min(u64::MAX as u128) as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling_ms))
    }
}

pub struct CareClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
    page_size: usize,
}

impl CareClient {
    pub fn new(
        base_url: &str,
        retry: RetryPolicy,
        page_size: usize,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid organizations API URL: {}", base_url))?;

        Ok(Self {
            client,
            base_url,
            retry,
            page_size,
        })
    }

    fn organizations_url(&self, parent: Option<&Organization>) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(ORGANIZATIONS_PATH);
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.append_pair("limit", &self.page_size.to_string());
            match parent {
                Some(parent) => query.append_pair("parent", &parent.id),
                None => query.append_pair("level_cache", "1"),
            };
        }
        url
    }

    /// Root organizations when `parent` is None, otherwise its direct children.
    pub async fn fetch_organizations(
        &self,
        parent: Option<&Organization>,
    ) -> Result<Vec<Organization>> {
        let url = self.organizations_url(parent);
        if let Some(parent) = parent {
            debug!("Fetching children of {}", parent.name);
        }

        let response = self.fetch_with_retry(&url).await?;

        if response.count > response.results.len() {
            return Err(anyhow!(
                "{} returned {} of {} organizations; raise the page size above {}",
                url,
                response.results.len(),
                response.count,
                self.page_size
            ));
        }

        Ok(response.results)
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<OrganizationsResponse> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.make_request(url).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e.context(format!(
                            "Giving up on {} after {} attempts",
                            url, attempt
                        )));
                    }
                    let wait = self.retry.backoff(attempt);
                    warn!(
                        "Attempt {} failed, retrying in {}ms: {:#}",
                        attempt,
                        wait.as_millis(),
                        e
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn make_request(&self, url: &Url) -> Result<OrganizationsResponse> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(anyhow!(
                "Failed to fetch organizations from {}: HTTP {}",
                url,
                status
            ));
        }

        response
            .json::<OrganizationsResponse>()
            .await
            .with_context(|| format!("Failed to decode organizations from {}", url))
    }
}
