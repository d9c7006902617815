use std::fmt;

use sim_common::Pid;

/// Process states tracked by the Kernel. The discriminant indexes per-state
/// metrics and buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessState {
    New,
    Ready,
    Exec,
    Blocked,
    SuspendedBlocked,
    SuspendedReady,
    Exit,
}

impl ProcessState {
    /// Every state, in metric order.
    pub const ALL: [ProcessState; 7] = [
        ProcessState::New,
        ProcessState::Ready,
        ProcessState::Exec,
        ProcessState::Blocked,
        ProcessState::SuspendedBlocked,
        ProcessState::SuspendedReady,
        ProcessState::Exit,
    ];

    /// Returns the index of the state in [`ProcessState::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the upper-case state label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::New => "NEW",
            ProcessState::Ready => "READY",
            ProcessState::Exec => "EXEC",
            ProcessState::Blocked => "BLOCKED",
            ProcessState::SuspendedBlocked => "SUSPENDED_BLOCKED",
            ProcessState::SuspendedReady => "SUSPENDED_READY",
            ProcessState::Exit => "EXIT",
        }
    }

    /// Returns whether the state diagram has an edge from `self` to `to`.
    pub fn can_move_to(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (New, Ready)
                | (Ready, Exec)
                | (Exec, Ready | Blocked | Exit)
                | (Blocked, Ready | SuspendedBlocked | Exit)
                | (SuspendedBlocked, SuspendedReady | Exit)
                | (SuspendedReady, Ready)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visit count and cumulative time spent in each state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMetrics {
    pub counts: [u32; 7],
    pub times_ms: [u64; 7],
}

impl StateMetrics {
    /// Returns how many times the process entered `state`.
    pub fn count(&self, state: ProcessState) -> u32 {
        self.counts[state.index()]
    }

    /// Returns the milliseconds the process spent in `state`.
    pub fn time_ms(&self, state: ProcessState) -> u64 {
        self.times_ms[state.index()]
    }
}

impl fmt::Display for StateMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in ProcessState::ALL.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} ({}) ({})", state, self.counts[i], self.times_ms[i])?;
        }
        Ok(())
    }
}

/// CPU burst estimation with an exponential average.
///
/// `elapsed_ms` accumulates across preemptions and is folded into the
/// estimate when the burst ends with a block.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstEstimate {
    pub estimate: f64,
    pub remaining: f64,
    pub elapsed_ms: u64,
    last_mark: u64,
}

impl BurstEstimate {
    /// Creates the estimate for a new process.
    pub fn new(initial: f64) -> Self {
        Self {
            estimate: initial,
            remaining: initial,
            elapsed_ms: 0,
            last_mark: 0,
        }
    }

    /// Marks the start of a run on a CPU.
    pub fn start(&mut self, now: u64) {
        self.last_mark = now;
    }

    /// Adds the time run since the last mark and recomputes the remaining
    /// estimate.
    pub fn refresh(&mut self, now: u64) {
        self.elapsed_ms += now.saturating_sub(self.last_mark);
        self.remaining = self.estimate - self.elapsed_ms as f64;
        self.last_mark = now;
    }

    /// Closes the burst: `estimate = alpha * elapsed + (1 - alpha) * estimate`.
    pub fn complete(&mut self, now: u64, alpha: f64) {
        self.refresh(now);
        self.estimate = alpha * self.elapsed_ms as f64 + (1.0 - alpha) * self.estimate;
        self.elapsed_ms = 0;
        self.remaining = self.estimate;
    }
}

/// Process control block.
#[derive(Debug, Clone)]
pub struct Pcb {
    pub pid: Pid,
    pub pc: u32,
    pub file: String,
    pub size: u32,
    pub state: ProcessState,
    /// A load request for this process is waiting on Memoria.
    pub admitting: bool,
    pub burst: BurstEstimate,
    pub metrics: StateMetrics,
    entered_at: u64,
}

impl Pcb {
    /// Creates a process in NEW.
    pub fn new(pid: Pid, file: &str, size: u32, initial_estimate: f64, now: u64) -> Self {
        let mut metrics = StateMetrics::default();
        metrics.counts[ProcessState::New.index()] = 1;
        Self {
            pid,
            pc: 0,
            file: file.to_string(),
            size,
            state: ProcessState::New,
            admitting: false,
            burst: BurstEstimate::new(initial_estimate),
            metrics,
            entered_at: now,
        }
    }

    /// Records the time spent in the current state and enters `to`.
    pub fn enter(&mut self, to: ProcessState, now: u64) {
        self.settle(now);
        self.metrics.counts[to.index()] += 1;
        self.state = to;
    }

    /// Adds the time spent in the current state so far.
    pub fn settle(&mut self, now: u64) {
        self.metrics.times_ms[self.state.index()] += now.saturating_sub(self.entered_at);
        self.entered_at = now;
    }
}
