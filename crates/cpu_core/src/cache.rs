use std::collections::VecDeque;

use log::info;
use sim_common::Pid;

use crate::tlb::Replacement;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedPage {
    pid: Pid,
    page: u32,
    content: Vec<u8>,
}

/// Page-content cache in front of Memoria. The front of the queue is the
/// next victim.
#[derive(Debug, Clone)]
pub struct PageCache {
    capacity: usize,
    policy: Replacement,
    entries: VecDeque<CachedPage>,
}

impl PageCache {
    /// Creates a cache; a capacity of zero disables it.
    pub fn new(capacity: usize, policy: Replacement) -> Self {
        Self {
            capacity,
            policy,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns true if pages are cached at all.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Returns the cached content of `(pid, page)`.
    pub fn lookup(&mut self, pid: Pid, page: u32) -> Option<&[u8]> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.pid == pid && entry.page == page);
        let Some(mut position) = position else {
            info!("PID: {} - Cache Miss - Page: {}", pid, page);
            return None;
        };
        info!("PID: {} - Cache Hit - Page: {}", pid, page);
        if self.policy == Replacement::Lru {
            if let Some(entry) = self.entries.remove(position) {
                self.entries.push_back(entry);
                position = self.entries.len() - 1;
            }
        }
        Some(self.entries[position].content.as_slice())
    }

    /// Caches a full page and returns the `(pid, page)` that was evicted.
    pub fn insert(&mut self, pid: Pid, page: u32, content: Vec<u8>) -> Option<(Pid, u32)> {
        if !self.is_enabled() {
            return None;
        }
        self.invalidate(pid, page);
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front().map(|entry| (entry.pid, entry.page))
        } else {
            None
        };
        if let Some((old_pid, old_page)) = evicted {
            info!("Cache replace: out PID: {}, page: {}", old_pid, old_page);
        }
        self.entries.push_back(CachedPage { pid, page, content });
        info!("PID: {} - Cache Add - Page: {}", pid, page);
        evicted
    }

    /// Drops the entry for `(pid, page)`. Returns true if one was present.
    pub fn invalidate(&mut self, pid: Pid, page: u32) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.pid == pid && entry.page == page));
        before != self.entries.len()
    }

    /// Drops every cached page.
    pub fn flush(&mut self) {
        self.entries.clear();
    }

    /// Returns the number of cached pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
