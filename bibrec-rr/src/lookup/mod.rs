//! Lookup services
//!
//! Live bibliographic search backends behind one capability: given an entry,
//! return up to `max_results` ranked candidates. A backend never fails the
//! caller; transport errors and non-success statuses are logged and produce an
//! empty list.
//!
//! # Backends
//! - [`DblpService`]: direct format, one title search returning BibTeX
//! - [`CrossrefService`]: two-step, title search for DOIs then one BibTeX
//!   fetch per distinct DOI

mod crossref;
mod dblp;

pub use crossref::CrossrefService;
pub use dblp::DblpService;

use crate::bibtex::Entry;
use crate::error::{ReconcileError, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Journal value servers use for preprints; such candidates are dropped
pub const PREPRINT_PLACEHOLDER: &str = "CoRR";

const USER_AGENT: &str = concat!(
    "bibrec/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/bibrec/bibrec)"
);

/// A record suggested by a live backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Originating service name
    pub service: String,
    pub entry: Entry,
}

/// Lookup service trait, implemented by every backend
#[async_trait]
pub trait LookupService: Send + Sync {
    /// Service identifier (e.g., "dblp", "crossref")
    fn name(&self) -> &'static str;

    /// Ranked candidates for `entry`
    ///
    /// Never fails: any error yields an empty list plus a warning.
    async fn suggest(&self, entry: &Entry, max_results: usize) -> Vec<Candidate>;
}

/// Closed set of supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Dblp,
    Crossref,
}

impl FromStr for ServiceKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dblp" => Ok(ServiceKind::Dblp),
            "crossref" => Ok(ServiceKind::Crossref),
            other => Err(ReconcileError::Config(format!(
                "Unknown lookup service: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Dblp => write!(f, "dblp"),
            ServiceKind::Crossref => write!(f, "crossref"),
        }
    }
}

/// Transport settings shared by all backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub request_timeout: Duration,
    pub requests_per_second: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            requests_per_second: 5,
        }
    }
}

/// Instantiate the configured backends, in order, without duplicates
pub fn build_services(
    kinds: &[ServiceKind],
    options: &ServiceOptions,
) -> Result<Vec<Arc<dyn LookupService>>> {
    let mut services: Vec<Arc<dyn LookupService>> = Vec::new();
    let mut seen = Vec::new();

    for kind in kinds {
        if seen.contains(kind) {
            continue;
        }
        seen.push(*kind);
        let service: Arc<dyn LookupService> = match kind {
            ServiceKind::Dblp => Arc::new(DblpService::new(options)?),
            ServiceKind::Crossref => Arc::new(CrossrefService::new(options)?),
        };
        services.push(service);
    }

    Ok(services)
}

/// Drop candidates whose journal is the generic preprint placeholder
pub fn drop_preprint_placeholders(candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| c.entry.get("journal") != Some(PREPRINT_PLACEHOLDER))
        .collect()
}

fn http_client(options: &ServiceOptions) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(options.request_timeout)
        .build()
        .map_err(|e| ReconcileError::Internal(format!("Failed to build HTTP client: {}", e)))
}

fn rate_limiter(options: &ServiceOptions) -> Result<DefaultDirectRateLimiter> {
    let per_second = NonZeroU32::new(options.requests_per_second).ok_or_else(|| {
        ReconcileError::Config("requests_per_second must be greater than zero".to_string())
    })?;
    Ok(RateLimiter::direct(Quota::per_second(per_second)))
}

fn lookup_error(service: &str, message: impl fmt::Display) -> ReconcileError {
    ReconcileError::Lookup {
        service: service.to_string(),
        message: message.to_string(),
    }
}
