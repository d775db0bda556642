//! Items handed to a specific worker and not yet acknowledged.

use std::collections::HashMap;
use std::time::Instant;

use crate::models::WorkItem;

#[derive(Debug, Clone)]
struct Lease {
    client_id: String,
    item: WorkItem,
    deadline: Instant,
    seq: u64,
}

/// Leases keyed by normalized URL.
#[derive(Debug, Default)]
pub struct LeaseTable {
    leases: HashMap<String, Lease>,
    next_seq: u64,
}

impl LeaseTable {
    pub fn insert(&mut self, client_id: &str, item: WorkItem, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.leases.insert(
            item.url.clone(),
            Lease {
                client_id: client_id.to_string(),
                item,
                deadline,
                seq,
            },
        );
    }

    /// Drop the lease on `url`, returning the holder.
    pub fn remove(&mut self, url: &str) -> Option<String> {
        self.leases.remove(url).map(|lease| lease.client_id)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.leases.contains_key(url)
    }

    /// Remove every lease held by `client_id`, oldest first.
    pub fn release_client(&mut self, client_id: &str) -> Vec<WorkItem> {
        self.take_where(|lease| lease.client_id == client_id)
    }

    /// Remove every lease whose deadline has passed, oldest first.
    pub fn take_expired(&mut self, now: Instant) -> Vec<WorkItem> {
        self.take_where(|lease| lease.deadline <= now)
    }

    pub fn held_by(&self, client_id: &str) -> usize {
        self.leases
            .values()
            .filter(|lease| lease.client_id == client_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    fn take_where(&mut self, predicate: impl Fn(&Lease) -> bool) -> Vec<WorkItem> {
        let urls: Vec<String> = self
            .leases
            .iter()
            .filter(|(_, lease)| predicate(lease))
            .map(|(url, _)| url.clone())
            .collect();

        let mut taken: Vec<Lease> = urls
            .iter()
            .filter_map(|url| self.leases.remove(url))
            .collect();
        taken.sort_by_key(|lease| lease.seq);
        taken.into_iter().map(|lease| lease.item).collect()
    }
}
