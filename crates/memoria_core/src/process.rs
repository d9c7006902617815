use std::fmt;

use sim_common::Pid;

use crate::page_table::PageTableTree;

/// Per-process access counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessMetrics {
    pub page_table_accesses: u64,
    pub instruction_fetches: u64,
    pub swap_outs: u64,
    pub swap_ins: u64,
    pub reads: u64,
    pub writes: u64,
}

impl fmt::Display for ProcessMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PT accesses: {}; Instructions: {}; SWAP out: {}; SWAP in: {}; Reads: {}; Writes: {}",
            self.page_table_accesses,
            self.instruction_fetches,
            self.swap_outs,
            self.swap_ins,
            self.reads,
            self.writes
        )
    }
}

/// Everything Memoria holds for a loaded process.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub pages: u32,
    /// Frame backing each page, indexed by page number.
    pub frames: Vec<u32>,
    pub tables: PageTableTree,
    pub instructions: Vec<String>,
    pub metrics: ProcessMetrics,
}

impl ProcessRecord {
    /// Returns the instruction at `pc`, or `None` past the end.
    pub fn instruction(&self, pc: u32) -> Option<&str> {
        self.instructions.get(pc as usize).map(String::as_str)
    }
}

/// Splits pseudocode text into instruction lines. A trailing `\r` is stripped
/// from every line and a final empty line is dropped.
pub fn split_instructions(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();
    if lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}
