//! Crossref lookup (two-step backend)
//!
//! 1. `GET {base}/works?rows=N&query.title=T` returns JSON hits carrying DOIs.
//! 2. Every distinct normalized DOI is fetched independently as BibTeX from
//!    `{base}/works/{doi}/transform`. A failed fetch drops only that DOI.

use super::{
    drop_preprint_placeholders, http_client, lookup_error, rate_limiter, Candidate,
    LookupService, ServiceOptions,
};
use crate::bibtex::{parse_bibliography, Entry};
use crate::error::Result;
use crate::normalize::normalize_title;
use async_trait::async_trait;
use futures::future::join_all;
use governor::DefaultDirectRateLimiter;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, warn};

const CROSSREF_BASE_URL: &str = "https://api.crossref.org/v1";
const SERVICE_NAME: &str = "crossref";
const BIBTEX_MIME: &str = "application/x-bibtex";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

pub struct CrossrefService {
    client: reqwest::Client,
    rate_limiter: DefaultDirectRateLimiter,
    base_url: String,
}

impl CrossrefService {
    pub fn new(options: &ServiceOptions) -> Result<Self> {
        Ok(Self {
            client: http_client(options)?,
            rate_limiter: rate_limiter(options)?,
            base_url: CROSSREF_BASE_URL.to_string(),
        })
    }

    /// Point the service at another server (mirrors, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Step 1: distinct normalized DOIs of the title search hits, in rank order
    async fn search_dois(&self, title: &str, max_results: usize) -> Result<Vec<String>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/works", self.base_url),
            &[("rows", max_results.to_string().as_str()), ("query.title", title)],
        )
        .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        self.rate_limiter.until_ready().await;
        debug!(url = %url, "Crossref search");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(SERVICE_NAME, format!("search status {}", status)));
        }

        let search: SearchResponse = response
            .json()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        let mut seen = HashSet::new();
        Ok(search
            .message
            .items
            .into_iter()
            .filter_map(|item| item.doi)
            .map(|doi| normalize_doi(&doi))
            .filter(|doi| !doi.is_empty() && seen.insert(doi.clone()))
            .collect())
    }

    /// Step 2: one BibTeX record for `doi`
    async fn fetch_record(&self, doi: &str) -> Result<Entry> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| lookup_error(SERVICE_NAME, e))?;
        url.path_segments_mut()
            .map_err(|_| lookup_error(SERVICE_NAME, "base URL cannot carry a path"))?
            .pop_if_empty()
            .push("works")
            .push(doi)
            .push("transform");

        self.rate_limiter.until_ready().await;
        debug!(url = %url, "Crossref record fetch");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, BIBTEX_MIME)
            .send()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_error(
                SERVICE_NAME,
                format!("fetch status {} for {}", status, doi),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| lookup_error(SERVICE_NAME, e))?;

        parse_bibliography(&body)
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| lookup_error(SERVICE_NAME, format!("no BibTeX record for {}", doi)))
    }

    async fn lookup(&self, title: &str, max_results: usize) -> Result<Vec<Candidate>> {
        let dois = self.search_dois(title, max_results).await?;

        let fetches = dois.iter().map(|doi| self.fetch_record(doi));
        let results = join_all(fetches).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for (doi, result) in dois.iter().zip(results) {
            match result {
                Ok(entry) => {
                    let record_doi = entry.get("doi").map(normalize_doi);
                    if let Some(record_doi) = record_doi {
                        if !seen.insert(record_doi) {
                            continue;
                        }
                    }
                    candidates.push(Candidate {
                        service: SERVICE_NAME.to_string(),
                        entry,
                    });
                }
                Err(e) => warn!(doi = %doi, error = %e, "Crossref record fetch failed"),
            }
        }

        Ok(drop_preprint_placeholders(candidates))
    }
}

#[async_trait]
impl LookupService for CrossrefService {
    fn name(&self) -> &'static str {
        SERVICE_NAME
    }

    async fn suggest(&self, entry: &Entry, max_results: usize) -> Vec<Candidate> {
        let title = entry.title().map(normalize_title).unwrap_or_default();
        if title.is_empty() || max_results == 0 {
            return Vec::new();
        }

        match self.lookup(&title, max_results).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "Crossref lookup failed");
                Vec::new()
            }
        }
    }
}

/// Case and encoding normalized DOI
///
/// Trims, lower-cases, strips resolver prefixes and percent-escapes.
pub fn normalize_doi(doi: &str) -> String {
    let lowered = doi.trim().to_lowercase();
    let mut rest = lowered.as_str();
    for prefix in [
        "https://doi.org/",
        "http://doi.org/",
        "https://dx.doi.org/",
        "http://dx.doi.org/",
        "doi:",
    ] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let rest = rest.trim();
    urlencoding::decode(rest)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| rest.to_string())
        .replace('\\', "")
}
