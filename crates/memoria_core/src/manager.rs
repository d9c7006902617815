use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{error, info};
use sim_common::{PagingGeometry, PhysAddr, Pid};

use crate::frames::FrameBitmap;
use crate::page_table::PageTableTree;
use crate::process::{split_instructions, ProcessMetrics, ProcessRecord};
use crate::MemoryError;

/// Instruction returned for any fetch that has no real instruction behind it.
pub const EXIT_INSTRUCTION: &str = "EXIT";

/// Reads and splits a pseudocode file.
pub fn read_program(path: &Path) -> Result<Vec<String>, MemoryError> {
    info!("Reading pseudocode '{}'", path.display());
    std::fs::read_to_string(path)
        .map(|text| split_instructions(&text))
        .map_err(|_| MemoryError::InstructionsUnreadable(path.display().to_string()))
}

/// Writes a dump produced by [`MemoryManager::dump_snapshot`].
pub fn write_dump(path: PathBuf, contents: &[u8]) -> Result<PathBuf, MemoryError> {
    std::fs::write(&path, contents)
        .map_err(|_| MemoryError::DumpFailed(path.display().to_string()))?;
    info!("Memory dump written to {}", path.display());
    Ok(path)
}

/// Owner of simulated RAM, the frame bitmap and every process record.
pub struct MemoryManager {
    geometry: PagingGeometry,
    ram: Vec<u8>,
    frames: FrameBitmap,
    processes: BTreeMap<Pid, ProcessRecord>,
    instructions_path: PathBuf,
    dump_path: PathBuf,
}

impl MemoryManager {
    /// Creates a manager with `memory_size` bytes of zeroed RAM.
    pub fn new(geometry: PagingGeometry, memory_size: u32) -> Self {
        let total_frames = memory_size / geometry.page_size;
        info!(
            "Simulated RAM reserved: {} bytes, {} frames",
            memory_size, total_frames
        );
        Self {
            geometry,
            ram: vec![0; memory_size as usize],
            frames: FrameBitmap::new(total_frames),
            processes: BTreeMap::new(),
            instructions_path: PathBuf::new(),
            dump_path: PathBuf::new(),
        }
    }

    /// Sets the directory pseudocode files are resolved against.
    pub fn with_instructions_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instructions_path = path.into();
        self
    }

    /// Sets the directory memory dumps are written to.
    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = path.into();
        self
    }

    /// Returns the paging geometry.
    pub fn geometry(&self) -> PagingGeometry {
        self.geometry
    }

    /// Loads a process: reads its pseudocode, reserves frames and builds its
    /// page tables. On any failure nothing stays reserved.
    pub fn allocate_process(&mut self, pid: Pid, size: u32, file: &str) -> Result<u32, MemoryError> {
        if self.processes.contains_key(&pid) {
            return Err(MemoryError::AlreadyLoaded(pid));
        }
        let instructions = read_program(&self.program_path(file))?;
        self.install_process(pid, size, instructions)
    }

    /// Reserves frames and builds page tables for a program that was already
    /// read with [`read_program`].
    pub fn install_process(
        &mut self,
        pid: Pid,
        size: u32,
        instructions: Vec<String>,
    ) -> Result<u32, MemoryError> {
        if self.processes.contains_key(&pid) {
            return Err(MemoryError::AlreadyLoaded(pid));
        }
        let needed = self.geometry.pages_for(size);
        let free = self.frames.free_count();
        let frames = self
            .frames
            .claim(needed)
            .ok_or(MemoryError::AllocationFailed { needed, free })?;

        let mut tables = PageTableTree::new(self.geometry);
        for (page, frame) in frames.iter().enumerate() {
            if let Err(err) = tables.map(page as u32, *frame) {
                self.frames.release(&frames);
                return Err(err);
            }
        }

        info!(
            "PID {}: {} levels, {} entries per table, {} pages, {} instructions",
            pid,
            self.geometry.levels,
            self.geometry.entries_per_table,
            needed,
            instructions.len()
        );
        self.processes.insert(
            pid,
            ProcessRecord {
                pid,
                pages: needed,
                frames,
                tables,
                instructions,
                metrics: ProcessMetrics::default(),
            },
        );
        Ok(needed)
    }

    /// Resolves a pseudocode file name against the instructions directory.
    pub fn program_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() || self.instructions_path.as_os_str().is_empty() {
            path.to_path_buf()
        } else {
            self.instructions_path.join(path)
        }
    }

    /// Frees every frame of `pid` and drops its record.
    pub fn release_process(&mut self, pid: Pid) -> Result<ProcessMetrics, MemoryError> {
        let record = self
            .processes
            .remove(&pid)
            .ok_or(MemoryError::NotFound(pid))?;
        self.frames.release(&record.frames);
        info!(
            "## PID: {} - Process destroyed - Metrics - {}",
            pid, record.metrics
        );
        Ok(record.metrics)
    }

    /// Returns one page-table entry, or `None` if the pid, table or entry
    /// does not exist.
    pub fn read_page_table_entry(
        &mut self,
        pid: Pid,
        level: u32,
        table_ref: u64,
        index: u32,
    ) -> Option<u64> {
        let record = match self.processes.get_mut(&pid) {
            Some(record) => record,
            None => {
                error!("PID: {} not found for page table lookup", pid);
                return None;
            }
        };
        record.metrics.page_table_accesses += 1;
        let value = record.tables.entry(level, table_ref, index);
        info!(
            "PID: {} - Page table level: {}, entry: {} -> {:?}",
            pid, level, index, value
        );
        value
    }

    fn ram_range(&self, address: PhysAddr, size: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let start = address as usize;
        let end = start.checked_add(size).ok_or(MemoryError::OutOfRange)?;
        if end > self.ram.len() {
            return Err(MemoryError::OutOfRange);
        }
        Ok(start..end)
    }

    /// Copies `size` bytes out of RAM.
    pub fn read_physical(&mut self, pid: Pid, address: PhysAddr, size: u32) -> Result<Vec<u8>, MemoryError> {
        let range = self.ram_range(address, size as usize)?;
        if let Some(record) = self.processes.get_mut(&pid) {
            record.metrics.reads += 1;
        }
        info!(
            "## PID: {} - Read - Physical address: {} - Size: {}",
            pid, address, size
        );
        Ok(self.ram[range].to_vec())
    }

    /// Copies `data` into RAM.
    pub fn write_physical(&mut self, pid: Pid, address: PhysAddr, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.ram_range(address, data.len())?;
        if let Some(record) = self.processes.get_mut(&pid) {
            record.metrics.writes += 1;
        }
        info!(
            "## PID: {} - Write - Physical address: {} - Size: {}",
            pid,
            address,
            data.len()
        );
        self.ram[range].copy_from_slice(data);
        Ok(())
    }

    /// Returns the instruction at `pc`, or `EXIT` when there is none.
    pub fn fetch_instruction(&mut self, pid: Pid, pc: u32) -> String {
        let record = match self.processes.get_mut(&pid) {
            Some(record) => record,
            None => return EXIT_INSTRUCTION.to_string(),
        };
        record.metrics.instruction_fetches += 1;
        let instruction = record.instruction(pc).unwrap_or(EXIT_INSTRUCTION).to_string();
        info!(
            "## PID: {} - Get instruction: {} - Instruction: {}",
            pid, pc, instruction
        );
        instruction
    }

    /// Writes the contents of every frame of `pid`, in page order, to
    /// `<dump_path>/<pid>-<timestamp>.dmp`.
    pub fn dump_process(&self, pid: Pid, timestamp: u128) -> Result<PathBuf, MemoryError> {
        let (path, contents) = self.dump_snapshot(pid, timestamp)?;
        write_dump(path, &contents)
    }

    /// Copies the frames of `pid` in page order and names the dump file,
    /// without touching the filesystem.
    pub fn dump_snapshot(&self, pid: Pid, timestamp: u128) -> Result<(PathBuf, Vec<u8>), MemoryError> {
        let record = self.processes.get(&pid).ok_or(MemoryError::NotFound(pid))?;
        let page_size = self.geometry.page_size as usize;
        let mut contents = Vec::with_capacity(record.frames.len() * page_size);
        for frame in &record.frames {
            let start = *frame as usize * page_size;
            contents.extend_from_slice(&self.ram[start..start + page_size]);
        }
        let path = self.dump_path.join(format!("{}-{}.dmp", pid, timestamp));
        info!("## PID: {} - Memory dump of {} bytes", pid, contents.len());
        Ok((path, contents))
    }

    /// Returns free memory in bytes.
    pub fn free_space(&self) -> u32 {
        self.frames.free_count() * self.geometry.page_size
    }

    /// Returns the number of frames in use.
    pub fn frames_in_use(&self) -> u32 {
        self.frames.allocated_count()
    }

    /// Returns the number of frames in RAM.
    pub fn total_frames(&self) -> u32 {
        self.frames.total_frames()
    }

    /// Returns the sum of pages over every live record.
    pub fn pages_in_use(&self) -> u32 {
        self.processes.values().map(|record| record.pages).sum()
    }

    /// Returns the record for `pid`.
    pub fn process(&self, pid: Pid) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }
}
