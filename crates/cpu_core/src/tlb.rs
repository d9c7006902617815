use std::collections::VecDeque;
use std::str::FromStr;

use log::info;
use sim_common::Pid;

/// Victim selection for the TLB and the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replacement {
    /// Evict the oldest insertion.
    Fifo,
    /// Evict the least recently used entry; hits refresh an entry.
    Lru,
}

impl FromStr for Replacement {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Replacement::Fifo),
            "LRU" => Ok(Replacement::Lru),
            _ => Err(()),
        }
    }
}

/// One cached page-to-frame mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub pid: Pid,
    pub page: u32,
    pub frame: u32,
}

/// Translation lookaside buffer. The front of the queue is always the next
/// victim.
#[derive(Debug, Clone)]
pub struct Tlb {
    capacity: usize,
    policy: Replacement,
    entries: VecDeque<TlbEntry>,
}

impl Tlb {
    /// Creates a TLB; a capacity of zero disables it.
    pub fn new(capacity: usize, policy: Replacement) -> Self {
        Self {
            capacity,
            policy,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns true if the TLB holds any entries at all.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Looks up `(pid, page)`. Under LRU a hit becomes most recently used.
    pub fn lookup(&mut self, pid: Pid, page: u32) -> Option<u32> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.pid == pid && entry.page == page)?;
        let entry = self.entries[position];
        if self.policy == Replacement::Lru {
            self.entries.remove(position);
            self.entries.push_back(entry);
        }
        Some(entry.frame)
    }

    /// Inserts a mapping and returns the evicted entry, if any.
    pub fn insert(&mut self, pid: Pid, page: u32, frame: u32) -> Option<TlbEntry> {
        if !self.is_enabled() {
            return None;
        }
        if let Some(position) = self
            .entries
            .iter()
            .position(|entry| entry.pid == pid && entry.page == page)
        {
            self.entries.remove(position);
        }
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(victim) = evicted {
            info!("TLB replace: out PID: {}, page: {}", victim.pid, victim.page);
        }
        self.entries.push_back(TlbEntry { pid, page, frame });
        info!("TLB add: PID: {}, page: {}, frame: {}", pid, page, frame);
        evicted
    }

    /// Drops every entry.
    pub fn flush(&mut self) {
        self.entries.clear();
    }

    /// Drops every entry that belongs to `pid`.
    pub fn flush_pid(&mut self, pid: Pid) {
        self.entries.retain(|entry| entry.pid != pid);
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
