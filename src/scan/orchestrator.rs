//! Bounded fan-out scan over resource descriptors
//!
//! This module runs one [`Paginator`] per descriptor, with at most
//! `fan_out` descriptors active at once, and folds every item into a single
//! [`ScanResult`]. Items are keyed `<descriptor>/<id>`, so collections that
//! reuse identifiers never overwrite each other. A descriptor that fails is
//! recorded and does not stop its siblings. The orchestrator never retries;
//! retries belong to the executor.

use crate::config::{ConfigError, DescriptorConfig};
use crate::dispatch::{Pagination, Paginator, RequestExecutor, RequestSpec};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One collection to scan
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    /// Unique name used as the key of the descriptor outcome
    pub name: String,
    /// Request for the first page
    pub request: RequestSpec,
    /// Pagination scheme
    pub pagination: Pagination,
    /// Item field holding the resource identifier
    pub id_field: String,
}

impl ResourceDescriptor {
    /// Create a descriptor with page-number pagination and an `id` field
    pub fn new(name: impl Into<String>, request: RequestSpec) -> Self {
        Self {
            name: name.into(),
            request,
            pagination: Pagination::default(),
            id_field: "id".to_string(),
        }
    }

    /// Set the pagination scheme
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Set the identifier field
    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    /// Build a descriptor from configuration
    ///
    /// Page-number collections get `limit=<page_size>` unless the
    /// configured query already sets it.
    pub fn from_config(config: &DescriptorConfig, page_size: u32) -> Self {
        let mut request = RequestSpec::get(config.path.clone());
        for (key, value) in &config.query {
            request = request.with_query(key.clone(), value.clone());
        }
        if matches!(config.pagination, Pagination::PageNumber { .. })
            && request.query_value("limit").is_none()
        {
            request = request.with_query("limit", page_size.to_string());
        }

        Self {
            name: config.name.clone(),
            request,
            pagination: config.pagination.clone(),
            id_field: config.id_field.clone(),
        }
    }

    /// Result key of the item at `position` in this descriptor's stream
    fn item_key(&self, item: &Value, position: usize) -> String {
        match item.get(&self.id_field) {
            Some(Value::String(id)) => format!("{}/{}", self.name, id),
            Some(Value::Number(id)) => format!("{}/{}", self.name, id),
            _ => format!("{}/#{}", self.name, position),
        }
    }
}

/// Terminal state of one descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DescriptorOutcome {
    /// Every page was fetched
    Finished {
        /// Items collected
        items: usize,
    },
    /// A page failed; earlier items are kept
    Failed {
        /// Items collected before the failure
        items_before_failure: usize,
        /// Failure description
        error: String,
    },
    /// The scan was cancelled before this descriptor finished
    Cancelled {
        /// Items collected before cancellation
        items: usize,
    },
}

impl DescriptorOutcome {
    /// Items collected for this descriptor
    pub fn items(&self) -> usize {
        match self {
            DescriptorOutcome::Finished { items }
            | DescriptorOutcome::Cancelled { items }
            | DescriptorOutcome::Failed {
                items_before_failure: items,
                ..
            } => *items,
        }
    }

    /// Check if the descriptor finished
    pub fn is_finished(&self) -> bool {
        matches!(self, DescriptorOutcome::Finished { .. })
    }
}

/// Aggregated result of a scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    /// When the scan started
    pub started_at: DateTime<Utc>,
    /// When the last descriptor reached a terminal state
    pub completed_at: DateTime<Utc>,
    /// Collected items keyed by `<descriptor>/<resource id>`
    pub resources: BTreeMap<String, Value>,
    /// Outcome per descriptor name
    pub descriptors: BTreeMap<String, DescriptorOutcome>,
    /// Whether the scan was cancelled
    pub cancelled: bool,
}

impl ScanResult {
    /// Failed descriptors with their error
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.descriptors
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                DescriptorOutcome::Failed { error, .. } => Some((name.as_str(), error.as_str())),
                _ => None,
            })
    }

    /// Items of one descriptor with the descriptor prefix stripped from the key
    pub fn resources_of<'a>(
        &'a self,
        descriptor: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Value)> + 'a {
        self.resources.iter().filter_map(move |(key, item)| {
            key.strip_prefix(descriptor)
                .and_then(|rest| rest.strip_prefix('/'))
                .map(|id| (id, item))
        })
    }

    /// Every descriptor finished and the scan was not cancelled
    pub fn is_complete_success(&self) -> bool {
        !self.cancelled && self.descriptors.values().all(DescriptorOutcome::is_finished)
    }
}

/// Per-descriptor result sent back to the aggregating task
struct DescriptorReport {
    name: String,
    items: BTreeMap<String, Value>,
    outcome: DescriptorOutcome,
}

/// Runs scans with a bounded number of concurrent descriptors
pub struct ScanOrchestrator {
    executor: Arc<RequestExecutor>,
    fan_out: usize,
}

impl ScanOrchestrator {
    /// Create an orchestrator
    ///
    /// A zero fan-out is rejected instead of never starting a descriptor.
    pub fn new(executor: Arc<RequestExecutor>, fan_out: usize) -> Result<Self, ConfigError> {
        if fan_out == 0 {
            return Err(ConfigError::InvalidValue(
                "scan.fan_out must be greater than 0".to_string(),
            ));
        }
        Ok(Self { executor, fan_out })
    }

    /// Maximum number of concurrently active descriptors
    pub fn fan_out(&self) -> usize {
        self.fan_out
    }

    /// Scan every descriptor to completion
    pub async fn run(&self, descriptors: Vec<ResourceDescriptor>) -> ScanResult {
        self.run_with_cancel(descriptors, CancellationToken::new())
            .await
    }

    /// Scan every descriptor, stopping early once `cancel` fires
    ///
    /// Returns after every descriptor has reached a terminal state. On
    /// cancellation the partial result is returned with `cancelled` set.
    pub async fn run_with_cancel(
        &self,
        descriptors: Vec<ResourceDescriptor>,
        cancel: CancellationToken,
    ) -> ScanResult {
        let started_at = Utc::now();
        info!(
            descriptors = descriptors.len(),
            fan_out = self.fan_out,
            "Starting scan"
        );

        let mut result = ScanResult {
            started_at,
            completed_at: started_at,
            resources: BTreeMap::new(),
            descriptors: BTreeMap::new(),
            cancelled: false,
        };

        let semaphore = Arc::new(Semaphore::new(self.fan_out));
        let mut tasks = JoinSet::new();

        for descriptor in descriptors {
            // Replaced by the task's report; survives only if the task panics
            result.descriptors.insert(
                descriptor.name.clone(),
                DescriptorOutcome::Failed {
                    items_before_failure: 0,
                    error: "scan task did not complete".to_string(),
                },
            );

            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            tasks.spawn(scan_descriptor(executor, semaphore, descriptor, cancel));
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    result.resources.extend(report.items);
                    result.descriptors.insert(report.name, report.outcome);
                }
                Err(e) => {
                    error!(error = %e, "Scan task failed");
                }
            }
        }

        result.completed_at = Utc::now();
        result.cancelled = cancel.is_cancelled();

        info!(
            resources = result.resources.len(),
            failures = result.failures().count(),
            cancelled = result.cancelled,
            elapsed_ms = (result.completed_at - result.started_at).num_milliseconds(),
            "Scan completed"
        );
        result
    }
}

async fn scan_descriptor(
    executor: Arc<RequestExecutor>,
    semaphore: Arc<Semaphore>,
    descriptor: ResourceDescriptor,
    cancel: CancellationToken,
) -> DescriptorReport {
    if let Err(err) = descriptor.pagination.validate() {
        warn!(descriptor = %descriptor.name, error = %err, "Descriptor not scanned");
        return DescriptorReport {
            outcome: DescriptorOutcome::Failed {
                items_before_failure: 0,
                error: err.to_string(),
            },
            name: descriptor.name,
            items: BTreeMap::new(),
        };
    }

    let cancelled = |items: BTreeMap<String, Value>| DescriptorReport {
        outcome: DescriptorOutcome::Cancelled { items: items.len() },
        name: descriptor.name.clone(),
        items,
    };

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return cancelled(BTreeMap::new()),
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return cancelled(BTreeMap::new()),
        },
    };

    debug!(descriptor = %descriptor.name, request = %descriptor.request, "Scanning descriptor");

    let mut pages = Box::pin(
        Paginator::<Value>::new(
            executor,
            descriptor.request.clone(),
            descriptor.pagination.clone(),
        )
        .with_cancellation(cancel.clone())
        .into_pages(),
    );

    let mut items = BTreeMap::new();
    let mut position = 0;
    let outcome = loop {
        match pages.next().await {
            Some(Ok(page)) => {
                for item in page.items {
                    let key = descriptor.item_key(&item, position);
                    position += 1;
                    if items.insert(key, item).is_some() {
                        debug!(descriptor = %descriptor.name, "Duplicate resource id replaced");
                    }
                }
            }
            Some(Err(err)) if err.is_cancelled() => {
                break DescriptorOutcome::Cancelled { items: items.len() };
            }
            Some(Err(err)) => {
                warn!(
                    descriptor = %descriptor.name,
                    items = items.len(),
                    error = %err,
                    "Descriptor scan failed"
                );
                break DescriptorOutcome::Failed {
                    items_before_failure: items.len(),
                    error: err.to_string(),
                };
            }
            None => break DescriptorOutcome::Finished { items: items.len() },
        }
    };

    debug!(descriptor = %descriptor.name, outcome = ?outcome, "Descriptor done");
    DescriptorReport {
        name: descriptor.name,
        items,
        outcome,
    }
}
