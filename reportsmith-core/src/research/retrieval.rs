//! Retrieval fan-out: query every evidence provider for every heading.
//!
//! Sections are processed under a global "sections in flight" cap; within a
//! section all providers are queried concurrently, each behind its own
//! [`Throttle`]. A failing provider only degrades its heading's slice. The pool
//! is returned once every section has finished.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::collaborators::EvidenceProvider;
use super::evidence::{EvidenceHit, EvidenceItem, EvidencePool};
use super::outline::{Outline, SectionHeading};
use crate::config::ThrottleConfig;
use crate::error::ProviderError;
use crate::throttle::Throttle;

/// The query sent to providers for one heading.
pub fn build_query(topic: &str, heading: &SectionHeading) -> String {
    format!("{}: {}", topic.trim(), heading.clean_label())
}

/// A provider together with its throttle and result cap.
#[derive(Clone)]
pub struct ProviderSlot {
    provider: Arc<dyn EvidenceProvider>,
    throttle: Arc<Throttle>,
    max_results: usize,
}

impl ProviderSlot {
    pub fn new(
        provider: Arc<dyn EvidenceProvider>,
        throttle: ThrottleConfig,
        max_results: usize,
    ) -> Self {
        let throttle = Arc::new(Throttle::new(provider.name(), throttle));
        Self {
            provider,
            throttle,
            max_results,
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }
}

/// Typed result of one provider call for one heading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Items { count: usize },
    Empty,
    Failed { error: String },
}

/// One line of the retrieval report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReport {
    pub section: SectionHeading,
    pub provider: String,
    pub outcome: ProviderOutcome,
}

/// What happened during retrieval, provider by provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalReport {
    pub entries: Vec<ProviderReport>,
}

impl RetrievalReport {
    pub fn failures(&self) -> impl Iterator<Item = &ProviderReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, ProviderOutcome::Failed { .. }))
    }

    pub fn for_section<'a>(
        &'a self,
        heading: &'a SectionHeading,
    ) -> impl Iterator<Item = &'a ProviderReport> + 'a {
        self.entries.iter().filter(move |e| &e.section == heading)
    }
}

/// Result of a full fan-out.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub pool: EvidencePool,
    pub report: RetrievalReport,
}

/// Concurrent, throttled evidence collection across sections and providers.
#[derive(Clone)]
pub struct RetrievalFanout {
    slots: Vec<ProviderSlot>,
    sections_in_flight: usize,
}

impl RetrievalFanout {
    pub fn new(sections_in_flight: usize) -> Self {
        Self {
            slots: Vec::new(),
            sections_in_flight: sections_in_flight.max(1),
        }
    }

    /// Register a provider with its own throttle.
    pub fn with_provider(
        mut self,
        provider: Arc<dyn EvidenceProvider>,
        throttle: ThrottleConfig,
        max_results: usize,
    ) -> Self {
        self.add_slot(ProviderSlot::new(provider, throttle, max_results));
        self
    }

    pub fn add_slot(&mut self, slot: ProviderSlot) {
        self.slots.push(slot);
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(ProviderSlot::name).collect()
    }

    pub fn slots(&self) -> &[ProviderSlot] {
        &self.slots
    }

    /// Collect evidence for every heading of `outline`.
    ///
    /// Never fails: provider errors are recorded in the report. Dropping the
    /// returned future, or firing `cancel`, stops all outstanding queries and
    /// releases their permits.
    pub async fn retrieve(
        &self,
        topic: &str,
        outline: &Outline,
        cancel: &CancellationToken,
    ) -> Retrieval {
        if self.slots.is_empty() {
            warn!("No evidence providers registered; every section will use fallback drafting");
        }
        let gate = Semaphore::new(self.sections_in_flight);

        let sections = outline.iter().map(|heading| {
            let gate = &gate;
            async move {
                // The semaphore lives for the whole call and is never closed.
                let _slot = gate.acquire().await.ok();
                self.retrieve_section(topic, heading, cancel).await
            }
        });
        let results = join_all(sections).await;

        let mut pool = EvidencePool::for_outline(outline);
        let mut report = RetrievalReport::default();
        for (heading, (items, entries)) in outline.iter().zip(results) {
            pool.extend(heading, items);
            report.entries.extend(entries);
        }

        info!(
            sections = outline.len(),
            items = pool.total_items(),
            failures = report.failures().count(),
            "Retrieval complete"
        );
        Retrieval { pool, report }
    }

    async fn retrieve_section(
        &self,
        topic: &str,
        heading: &SectionHeading,
        cancel: &CancellationToken,
    ) -> (Vec<EvidenceItem>, Vec<ProviderReport>) {
        let query = build_query(topic, heading);
        debug!(section = %heading, query = %query, "Querying providers");

        let calls = self.slots.iter().map(|slot| {
            let query = query.as_str();
            async move { (slot, Self::query_slot(slot, query, cancel).await) }
        });

        let mut items = Vec::new();
        let mut entries = Vec::new();
        for (slot, result) in join_all(calls).await {
            let outcome = match result {
                Ok(hits) if hits.is_empty() => ProviderOutcome::Empty,
                Ok(hits) => {
                    let count = hits.len();
                    items.extend(
                        hits.into_iter()
                            .map(|hit| EvidenceItem::from_hit(hit, slot.name(), heading)),
                    );
                    ProviderOutcome::Items { count }
                }
                Err(error) => {
                    warn!(
                        section = %heading,
                        provider = slot.name(),
                        error = %error,
                        "Evidence provider failed"
                    );
                    ProviderOutcome::Failed {
                        error: error.to_string(),
                    }
                }
            };
            entries.push(ProviderReport {
                section: heading.clone(),
                provider: slot.name().to_string(),
                outcome,
            });
        }

        info!(section = %heading, items = items.len(), "Section evidence collected");
        (items, entries)
    }

    async fn query_slot(
        slot: &ProviderSlot,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<EvidenceHit>, ProviderError> {
        let mut hits = slot
            .throttle
            .run(cancel, slot.provider.query(query, slot.max_results))
            .await
            .map_err(|e| ProviderError::Request {
                provider: slot.name().to_string(),
                message: e.to_string(),
            })??;
        hits.truncate(slot.max_results);
        Ok(hits)
    }
}
