use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use log::info;
use sim_common::Pid;

use crate::process::{Pcb, ProcessState};

/// Every PCB plus one ordered bucket per state. A pid sits in exactly one
/// bucket, the one matching its `Pcb::state`.
#[derive(Debug)]
pub struct ProcessTable {
    pcbs: BTreeMap<Pid, Pcb>,
    buckets: [VecDeque<Pid>; 7],
    next_pid: Pid,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    /// Creates an empty table; the first pid handed out is 0.
    pub fn new() -> Self {
        Self {
            pcbs: BTreeMap::new(),
            buckets: std::array::from_fn(|_| VecDeque::new()),
            next_pid: 0,
        }
    }

    /// Creates a process in NEW and returns its pid.
    pub fn create(&mut self, file: &str, size: u32, initial_estimate: f64, now: u64) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        self.pcbs
            .insert(pid, Pcb::new(pid, file, size, initial_estimate, now));
        self.buckets[ProcessState::New.index()].push_back(pid);
        info!("## ({}) Process created - State: NEW", pid);
        pid
    }

    /// Returns the PCB for `pid`.
    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.pcbs.get(&pid)
    }

    /// Returns the PCB for `pid`.
    ///
    /// # Panics
    ///
    /// Panics if the pid is unknown; the scheduler only holds live pids.
    pub fn pcb(&self, pid: Pid) -> &Pcb {
        match self.pcbs.get(&pid) {
            Some(pcb) => pcb,
            None => panic!("pid {} is not in the process table", pid),
        }
    }

    /// Mutable form of [`ProcessTable::pcb`].
    pub fn pcb_mut(&mut self, pid: Pid) -> &mut Pcb {
        match self.pcbs.get_mut(&pid) {
            Some(pcb) => pcb,
            None => panic!("pid {} is not in the process table", pid),
        }
    }

    /// Returns the state of `pid`, if it exists.
    pub fn state_of(&self, pid: Pid) -> Option<ProcessState> {
        self.pcbs.get(&pid).map(|pcb| pcb.state)
    }

    /// Moves `pid` to the back of the `to` bucket. Debug builds panic on a
    /// transition the state diagram does not allow.
    pub fn move_to(&mut self, pid: Pid, to: ProcessState, now: u64) {
        let pcb = match self.pcbs.get_mut(&pid) {
            Some(pcb) => pcb,
            None => panic!("pid {} is not in the process table", pid),
        };
        let from = pcb.state;
        debug_assert!(
            from.can_move_to(to),
            "pid {} illegal transition {} -> {}",
            pid,
            from,
            to
        );
        let bucket = &mut self.buckets[from.index()];
        match bucket.iter().position(|candidate| *candidate == pid) {
            Some(position) => {
                bucket.remove(position);
            }
            None => panic!("pid {} is missing from the {} bucket", pid, from),
        }
        pcb.enter(to, now);
        self.buckets[to.index()].push_back(pid);
        info!("## ({}) moved from state {} to state {}", pid, from, to);
    }

    /// Returns the pids in `state`, in queue order.
    pub fn bucket(&self, state: ProcessState) -> &VecDeque<Pid> {
        &self.buckets[state.index()]
    }

    /// Returns the first pid in `state`.
    pub fn head(&self, state: ProcessState) -> Option<Pid> {
        self.buckets[state.index()].front().copied()
    }

    /// Returns the first pid in `state` whose PCB matches `predicate`.
    pub fn first_where<F>(&self, state: ProcessState, mut predicate: F) -> Option<Pid>
    where
        F: FnMut(&Pcb) -> bool,
    {
        self.buckets[state.index()]
            .iter()
            .copied()
            .find(|pid| predicate(&self.pcbs[pid]))
    }

    /// Stable-sorts the `state` bucket.
    pub fn sort_bucket_by<F>(&mut self, state: ProcessState, mut compare: F)
    where
        F: FnMut(&Pcb, &Pcb) -> Ordering,
    {
        let pcbs = &self.pcbs;
        self.buckets[state.index()]
            .make_contiguous()
            .sort_by(|a, b| compare(&pcbs[a], &pcbs[b]));
    }

    /// Removes a process that reached EXIT and returns its final PCB.
    ///
    /// # Panics
    ///
    /// Panics if the pid is unknown or not in EXIT.
    pub fn destroy(&mut self, pid: Pid, now: u64) -> Pcb {
        let mut pcb = match self.pcbs.remove(&pid) {
            Some(pcb) => pcb,
            None => panic!("pid {} is not in the process table", pid),
        };
        if pcb.state != ProcessState::Exit {
            panic!("pid {} destroyed while in {}", pid, pcb.state);
        }
        self.buckets[ProcessState::Exit.index()].retain(|candidate| *candidate != pid);
        pcb.settle(now);
        pcb
    }

    /// Returns how many buckets hold `pid`.
    pub fn occurrences(&self, pid: Pid) -> usize {
        self.buckets
            .iter()
            .filter(|bucket| bucket.contains(&pid))
            .count()
    }

    /// Returns the number of live processes.
    pub fn len(&self) -> usize {
        self.pcbs.len()
    }

    /// Returns true if no process is live.
    pub fn is_empty(&self) -> bool {
        self.pcbs.is_empty()
    }

    /// Returns every live pid in ascending order.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.pcbs.keys().copied()
    }
}
