//! History Store
//!
//! Append-only message logs, one per [`Partition`]. Order within a partition
//! is arrival order at the hub and is never changed; only the retention
//! policy may drop the oldest entries.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::trace;

use crate::config::RetentionPolicy;
use crate::types::{Message, Partition};

/// One page of history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Newest first
    pub messages: Vec<Message>,
    /// Size of the whole partition
    pub total: usize,
    pub has_more: bool,
}

/// Per-partition message logs.
#[derive(Debug)]
pub struct HistoryStore {
    partitions: HashMap<Partition, VecDeque<Message>>,
    retention: RetentionPolicy,
    max_page_size: usize,
}

impl HistoryStore {
    pub fn new(retention: RetentionPolicy, max_page_size: usize) -> Self {
        Self {
            partitions: HashMap::new(),
            retention,
            max_page_size: max_page_size.max(1),
        }
    }

    /// Append a message to the end of a partition.
    pub fn append(&mut self, partition: Partition, message: Message) {
        let log = self.partitions.entry(partition).or_default();
        log.push_back(message);

        if let RetentionPolicy::MaxMessages { limit } = self.retention {
            let limit = limit.max(1);
            while log.len() > limit {
                if let Some(evicted) = log.pop_front() {
                    trace!(id = %evicted.id, "Evicted message past retention limit");
                }
            }
        }
    }

    /// Number of messages in a partition.
    pub fn len(&self, partition: &Partition) -> usize {
        self.partitions.get(partition).map_or(0, VecDeque::len)
    }

    /// Whole partition, oldest first.
    pub fn all(&self, partition: &Partition) -> Vec<Message> {
        self.partitions
            .get(partition)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Reverse-chronological page.
    ///
    /// Page 1 holds the newest `page_size` messages, newest first, and each
    /// following page continues further back. Pages below 1 read as page 1 and
    /// the size is clamped to `1..=max_page_size`.
    pub fn page(&self, partition: &Partition, page: usize, page_size: usize) -> HistoryPage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, self.max_page_size);
        let total = self.len(partition);
        let start = (page - 1).saturating_mul(page_size);

        let messages = match self.partitions.get(partition) {
            Some(log) if start < total => {
                log.iter().rev().skip(start).take(page_size).cloned().collect()
            }
            _ => Vec::new(),
        };

        HistoryPage {
            messages,
            total,
            has_more: start.saturating_add(page_size) < total,
        }
    }

    /// Case-insensitive substring search over message bodies, oldest first.
    ///
    /// Unknown partitions yield an empty result. An empty query matches everything.
    pub fn search(&self, partition: &Partition, query: &str) -> Vec<Message> {
        let needle = query.to_lowercase();
        self.partitions
            .get(partition)
            .map(|log| {
                log.iter()
                    .filter(|m| m.body.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
