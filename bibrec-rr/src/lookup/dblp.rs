//! DBLP title search (direct-format backend)

use super::{
    drop_preprint_placeholders, http_client, lookup_error, rate_limiter, Candidate,
    LookupService, ServiceOptions,
};
use crate::bibtex::{parse_bibliography, Entry};
use crate::error::Result;
use crate::normalize::normalize_title;
use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use tracing::{debug, warn};

const DBLP_BASE_URL: &str = "https://dblp.org";
const SERVICE_NAME: &str = "dblp";

pub struct DblpService {
    client: reqwest::Client,
    rate_limiter: DefaultDirectRateLimiter,
    base_url: String,
}

impl DblpService {
    pub fn new(options: &ServiceOptions) -> Result<Self> {
        Ok(Self {
            client: http_client(options)?,
            rate_limiter: rate_limiter(options)?,
            base_url: DBLP_BASE_URL.to_string(),
        })
    }

    /// Point the service at another server (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn search(&self, title: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/search/publ/api", self.base_url),
            &[
                ("format", "bibtex"),
                ("h", max_results.to_string().as_str()),
                ("q", title),
            ],
        )
        .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        self.rate_limiter.until_ready().await;
        debug!(url = %url, "DBLP search");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(SERVICE_NAME, format!("status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        let parsed = parse_bibliography(&body);
        if !parsed.failures.is_empty() {
            debug!(count = parsed.failures.len(), "Unreadable DBLP records skipped");
        }

        let candidates = parsed
            .entries
            .into_iter()
            .take(max_results)
            .map(|entry| Candidate {
                service: SERVICE_NAME.to_string(),
                entry,
            })
            .collect();
        Ok(drop_preprint_placeholders(candidates))
    }
}

#[async_trait]
impl LookupService for DblpService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn suggest(&self, entry: &Entry, max_results: usize) -> Vec<Candidate> {
        let title = entry.title().map(normalize_title).unwrap_or_default();
        if title.is_empty() || max_results == 0 {
            return Vec::new();
        }

        match self.search(&title, max_results).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "DBLP lookup failed");
                Vec::new()
            }
        }
    }
}
