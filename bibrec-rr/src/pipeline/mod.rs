//! Resolution pipeline
//!
//! Bounded-concurrency producer/consumer engine reconciling unmatched entries
//! against the lookup services.
//!
//! # Flow
//! 1. Entries are split into batches of `n_parallel`; batches run strictly in
//!    sequence.
//! 2. Within a batch every entry is resolved concurrently, each one querying
//!    all services concurrently under a per-call timeout.
//! 3. Finished [`ReferenceChoiceTask`]s are sent in entry order into a bounded
//!    channel of capacity `buffer_size`; the producer waits while it is full.
//! 4. A [`ChoiceResolver`] on a blocking thread turns each task into a
//!    [`ReferenceChoice`]. [`QueueItem::EndOfStream`] ends the stream.
//!
//! When the resolver stops early the cancellation token fires and in-flight
//! lookups are dropped, never awaited.

pub mod resolvers;

pub use resolvers::{
    AutomatedResolver, InteractiveResolver, KeepCurrentResolver, ScriptedDecision,
    ScriptedResolver,
};

use crate::arxiv;
use crate::bibtex::Entry;
use crate::decision::UpdateMethod;
use crate::error::{ReconcileError, Result};
use crate::lookup::{Candidate, LookupService};
use crate::normalize::{normalize_author, normalize_title};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// References and tasks
// ============================================================================

/// Where a reference came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOrigin {
    /// The user's own entry
    Input,
    /// A live backend suggestion
    Candidate { service: String },
    /// Synthesized by the arXiv fallback
    Arxiv,
}

/// Reduced projection of an entry used for review and comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub year: Option<i32>,
    pub title: String,
    pub author: String,
    pub entry: Entry,
    pub origin: ReferenceOrigin,
}

impl Reference {
    fn project(entry: Entry, origin: ReferenceOrigin) -> Self {
        let year = entry.get("year").and_then(|y| y.trim().parse::<i32>().ok());
        let title = entry.title().map(normalize_title).unwrap_or_default();
        let author = entry.get("author").map(normalize_author).unwrap_or_default();
        Self {
            year,
            title,
            author,
            entry,
            origin,
        }
    }

    pub fn from_entry(entry: Entry) -> Self {
        Self::project(entry, ReferenceOrigin::Input)
    }

    pub fn from_candidate(candidate: Candidate) -> Self {
        Self::project(
            candidate.entry,
            ReferenceOrigin::Candidate {
                service: candidate.service,
            },
        )
    }

    pub fn from_arxiv(entry: Entry) -> Self {
        Self::project(entry, ReferenceOrigin::Arxiv)
    }

    /// Same record content regardless of citation key and origin
    pub fn same_record(&self, other: &Reference) -> bool {
        self.entry.entry_type == other.entry.entry_type
            && self.entry.fields().eq(other.entry.fields())
    }
}

/// One unresolved entry with its ranked alternatives
///
/// `candidates[0]` is always the current reference; candidates duplicating it
/// are removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChoiceTask {
    pub current: Reference,
    pub candidates: Vec<Reference>,
}

impl ReferenceChoiceTask {
    pub fn new(current: Reference, suggestions: Vec<Reference>) -> Self {
        let mut candidates = Vec::with_capacity(suggestions.len() + 1);
        candidates.push(current.clone());
        candidates.extend(suggestions.into_iter().filter(|s| !s.same_record(&current)));
        Self {
            current,
            candidates,
        }
    }

    /// Live suggestions, i.e. every candidate after the current reference
    pub fn suggestions(&self) -> &[Reference] {
        &self.candidates[1..]
    }
}

/// Decision for one task; `chosen == current` means keep unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChoice {
    pub current: Reference,
    pub chosen: Reference,
}

impl ReferenceChoice {
    pub fn keep(current: Reference) -> Self {
        Self {
            chosen: current.clone(),
            current,
        }
    }

    pub fn is_keep(&self) -> bool {
        self.chosen == self.current
    }
}

/// Synthesize an arXiv record for the task's entry, or keep it
pub fn arxiv_fallback(task: &ReferenceChoiceTask) -> ReferenceChoice {
    match arxiv::synthesize(&task.current.entry) {
        Some(entry) => ReferenceChoice {
            current: task.current.clone(),
            chosen: Reference::from_arxiv(entry),
        },
        None => ReferenceChoice::keep(task.current.clone()),
    }
}

/// Item flowing through the bounded queue
#[derive(Debug)]
pub enum QueueItem {
    Task(ReferenceChoiceTask),
    EndOfStream,
}

// ============================================================================
// Consumer contract
// ============================================================================

/// Consumer of choice tasks (terminal review, automated policy, script)
///
/// Called synchronously, one task at a time, on a blocking thread.
pub trait ChoiceResolver: Send {
    fn resolve(&mut self, task: &ReferenceChoiceTask) -> ReferenceChoice;

    /// How updates chosen by this resolver are recorded
    fn method(&self) -> UpdateMethod;

    /// True once the resolver wants no further tasks
    fn is_finished(&self) -> bool {
        false
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Candidates requested per service
    pub n_suggestions: usize,
    /// Entries resolved concurrently per batch
    pub n_parallel: usize,
    /// Capacity of the task queue
    pub buffer_size: usize,
    /// Bound on one complete `suggest` call of one service
    ///
    /// A single call may issue several HTTP requests and wait on the rate
    /// limiter between them; each request is bounded by the service itself.
    pub lookup_timeout: Duration,
}

impl PipelineConfig {
    /// Budget for a `suggest` call issuing up to `n_suggestions + 2` requests
    /// of at most `request_timeout` each
    pub fn lookup_budget(request_timeout: Duration, n_suggestions: usize) -> Duration {
        let requests = u32::try_from(n_suggestions.saturating_add(2)).unwrap_or(u32::MAX);
        request_timeout.saturating_mul(requests)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_suggestions: 3,
            n_parallel: 5,
            buffer_size: 15,
            lookup_timeout: Self::lookup_budget(Duration::from_secs(10), 3),
        }
    }
}

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// One choice per consumed task, in input order
    pub choices: Vec<ReferenceChoice>,
    pub method: UpdateMethod,
    /// Resolver stopped before the end of the stream
    pub stopped_early: bool,
}

pub struct ResolutionPipeline {
    services: Vec<Arc<dyn LookupService>>,
    config: PipelineConfig,
}

impl ResolutionPipeline {
    pub fn new(services: Vec<Arc<dyn LookupService>>, config: PipelineConfig) -> Result<Self> {
        if config.n_parallel == 0 {
            return Err(ReconcileError::Config(
                "n_parallel_requests must be greater than zero".to_string(),
            ));
        }
        if config.buffer_size == 0 {
            return Err(ReconcileError::Config(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self { services, config })
    }

    /// Start the producer; tasks arrive on the returned receiver
    ///
    /// The producer stops when `cancel` fires or the receiver is dropped.
    pub fn spawn_producer(
        &self,
        entries: Vec<Entry>,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<QueueItem>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let services = self.services.clone();
        let config = self.config;
        let handle = tokio::spawn(produce(services, config, entries, tx, cancel));
        (rx, handle)
    }

    /// Run producer and resolver to completion
    ///
    /// The resolver runs on a blocking thread so a slow decision never stalls
    /// the producer beyond the queue capacity.
    pub async fn run<R>(&self, entries: Vec<Entry>, resolver: R) -> Result<PipelineOutcome>
    where
        R: ChoiceResolver + 'static,
    {
        let total = entries.len();
        let method = resolver.method();
        let cancel = CancellationToken::new();
        let (mut rx, producer) = self.spawn_producer(entries, cancel.clone());

        let consumer_cancel = cancel.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            let mut resolver = resolver;
            let mut choices = Vec::new();
            let mut stopped_early = false;

            while let Some(item) = rx.blocking_recv() {
                match item {
                    QueueItem::Task(task) => {
                        choices.push(resolver.resolve(&task));
                        if resolver.is_finished() {
                            stopped_early = true;
                            consumer_cancel.cancel();
                            break;
                        }
                    }
                    QueueItem::EndOfStream => break,
                }
            }
            (choices, stopped_early)
        });

        let (choices, stopped_early) = consumer
            .await
            .map_err(|e| ReconcileError::Internal(format!("Resolver task failed: {}", e)))?;

        cancel.cancel();
        if let Err(e) = producer.await {
            warn!(error = %e, "Lookup producer ended abnormally");
        }

        if stopped_early {
            info!(
                resolved = choices.len(),
                remaining = total - choices.len(),
                "Review stopped early, remaining entries kept"
            );
        }

        Ok(PipelineOutcome {
            choices,
            method,
            stopped_early,
        })
    }
}

async fn produce(
    services: Vec<Arc<dyn LookupService>>,
    config: PipelineConfig,
    entries: Vec<Entry>,
    tx: mpsc::Sender<QueueItem>,
    cancel: CancellationToken,
) {
    for (batch_idx, batch) in entries.chunks(config.n_parallel).enumerate() {
        debug!(batch = batch_idx, size = batch.len(), "Resolving batch");

        let lookups = batch
            .iter()
            .map(|entry| resolve_entry(&services, &config, entry));
        let tasks = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(batch = batch_idx, "Batch abandoned");
                return;
            }
            tasks = join_all(lookups) => tasks,
        };

        for task in tasks {
            let sent = tokio::select! {
                _ = cancel.cancelled() => return,
                sent = tx.send(QueueItem::Task(task)) => sent,
            };
            if sent.is_err() {
                debug!("Task queue closed, stopping producer");
                return;
            }
        }
    }

    let _ = tx.send(QueueItem::EndOfStream).await;
}

/// Query every service for one entry and assemble its task
async fn resolve_entry(
    services: &[Arc<dyn LookupService>],
    config: &PipelineConfig,
    entry: &Entry,
) -> ReferenceChoiceTask {
    let calls = services.iter().map(|service| async move {
        match tokio::time::timeout(
            config.lookup_timeout,
            service.suggest(entry, config.n_suggestions),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(_) => {
                warn!(
                    key = %entry.key,
                    service = service.name(),
                    "Lookup timed out"
                );
                Vec::new()
            }
        }
    });

    let suggestions = join_all(calls)
        .await
        .into_iter()
        .flatten()
        .map(Reference::from_candidate)
        .collect();

    ReferenceChoiceTask::new(Reference::from_entry(entry.clone()), suggestions)
}
