use std::thread;
use std::time::Duration;

use log::{error, info};
use sim_common::{LogicalAddr, PagingGeometry, PhysAddr, Pid};
use sim_protocol::ProtocolError;

use crate::cache::PageCache;
use crate::tlb::Tlb;
use crate::MmuError;

/// Operations the CPU needs from Memoria.
pub trait MemoryPort {
    /// Returns the instruction text at `pc`.
    fn fetch_instruction(&mut self, pid: Pid, pc: u32) -> Result<String, ProtocolError>;
    /// Returns one page-table entry, or `None` if it does not exist.
    fn page_table_entry(
        &mut self,
        pid: Pid,
        level: u32,
        table_ref: u64,
        index: u32,
    ) -> Result<Option<u64>, ProtocolError>;
    /// Reads `size` bytes of physical memory. A refused access is
    /// [`MmuError::Rejected`].
    fn read(&mut self, pid: Pid, address: PhysAddr, size: u32) -> Result<Vec<u8>, MmuError>;
    /// Writes `data` to physical memory. A refused access is
    /// [`MmuError::Rejected`].
    fn write(&mut self, pid: Pid, address: PhysAddr, data: &[u8]) -> Result<(), MmuError>;
}

/// Address translation and cached memory access for one CPU.
pub struct Mmu<M: MemoryPort> {
    memory: M,
    geometry: PagingGeometry,
    tlb: Tlb,
    cache: PageCache,
    cache_delay: Duration,
}

impl<M: MemoryPort> Mmu<M> {
    /// Creates an MMU talking to `memory`.
    pub fn new(memory: M, geometry: PagingGeometry, tlb: Tlb, cache: PageCache) -> Self {
        if tlb.is_enabled() {
            info!("MMU: TLB enabled");
        } else {
            info!("MMU: TLB disabled");
        }
        if cache.is_enabled() {
            info!("MMU: page cache enabled");
        } else {
            info!("MMU: page cache disabled");
        }
        Self {
            memory,
            geometry,
            tlb,
            cache,
            cache_delay: Duration::ZERO,
        }
    }

    /// Sets the delay applied to every page-cache access.
    pub fn with_cache_delay(mut self, delay: Duration) -> Self {
        self.cache_delay = delay;
        self
    }

    /// Returns the memory link.
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// Returns the TLB.
    pub fn tlb(&self) -> &Tlb {
        &self.tlb
    }

    /// Returns the page cache.
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Empties the TLB and the page cache.
    pub fn flush(&mut self) {
        self.tlb.flush();
        self.cache.flush();
        info!("TLB and page cache flushed");
    }

    /// Translates a logical address to a physical one.
    pub fn translate(&mut self, pid: Pid, address: LogicalAddr) -> Result<PhysAddr, MmuError> {
        let page = self.geometry.page_of(address);
        let offset = self.geometry.offset_of(address);
        let frame = self.frame_of(pid, page)?;
        Ok(frame * self.geometry.page_size + offset)
    }

    fn frame_of(&mut self, pid: Pid, page: u32) -> Result<u32, MmuError> {
        if self.tlb.is_enabled() {
            if let Some(frame) = self.tlb.lookup(pid, page) {
                info!("PID: {} - TLB HIT - Page: {}", pid, page);
                return Ok(frame);
            }
            info!("PID: {} - TLB MISS - Page: {}", pid, page);
        }
        let frame = self.walk(pid, page)?;
        self.tlb.insert(pid, page, frame);
        Ok(frame)
    }

    fn walk(&mut self, pid: Pid, page: u32) -> Result<u32, MmuError> {
        let mut table_ref = 0u64;
        for level in 1..=self.geometry.levels {
            let index = self.geometry.index_at_level(page, level);
            table_ref = match self.memory.page_table_entry(pid, level, table_ref, index)? {
                Some(value) => value,
                None => {
                    error!(
                        "PID: {} - SEG_FAULT - Page: {} not mapped (level {})",
                        pid, page, level
                    );
                    return Err(MmuError::SegFault { page, level });
                }
            };
        }
        let frame = u32::try_from(table_ref).map_err(|_| MmuError::SegFault {
            page,
            level: self.geometry.levels,
        })?;
        info!("PID: {} - GET FRAME - Page: {} - Frame: {}", pid, page, frame);
        Ok(frame)
    }

    fn cache_pause(&self) {
        if !self.cache_delay.is_zero() {
            thread::sleep(self.cache_delay);
        }
    }

    /// Splits `[address, address + len)` into per-page `(address, len)` slices.
    fn slices(&self, address: LogicalAddr, len: u32) -> Result<Vec<(LogicalAddr, u32)>, MmuError> {
        let end = address.checked_add(len).ok_or(MmuError::SegFault {
            page: self.geometry.page_of(address),
            level: 0,
        })?;
        let mut slices = Vec::new();
        let mut current = address;
        while current < end {
            let room = self.geometry.page_size - self.geometry.offset_of(current);
            let chunk = room.min(end - current);
            slices.push((current, chunk));
            current += chunk;
        }
        Ok(slices)
    }

    /// Reads `size` bytes starting at a logical address. Any page that fails
    /// to translate fails the whole read.
    pub fn read(&mut self, pid: Pid, address: LogicalAddr, size: u32) -> Result<Vec<u8>, MmuError> {
        let mut out = Vec::with_capacity(size as usize);
        for (current, chunk) in self.slices(address, size)? {
            let page = self.geometry.page_of(current);
            let offset = self.geometry.offset_of(current) as usize;
            if !self.cache.is_enabled() {
                let physical = self.translate(pid, current)?;
                out.extend_from_slice(&self.memory.read(pid, physical, chunk)?);
                continue;
            }
            self.cache_pause();
            if let Some(content) = self.cache.lookup(pid, page) {
                out.extend_from_slice(&content[offset..offset + chunk as usize]);
                continue;
            }
            let base = self.translate(pid, page * self.geometry.page_size)?;
            let content = self.memory.read(pid, base, self.geometry.page_size)?;
            if content.len() != self.geometry.page_size as usize {
                return Err(MmuError::Link(ProtocolError::InvalidLength("page")));
            }
            out.extend_from_slice(&content[offset..offset + chunk as usize]);
            self.cache_pause();
            self.cache.insert(pid, page, content);
        }
        Ok(out)
    }

    /// Writes `data` starting at a logical address, straight through to
    /// Memoria. Cached copies of every touched page are dropped.
    pub fn write(&mut self, pid: Pid, address: LogicalAddr, data: &[u8]) -> Result<(), MmuError> {
        let len = u32::try_from(data.len()).map_err(|_| MmuError::SegFault {
            page: self.geometry.page_of(address),
            level: 0,
        })?;
        let mut written = 0usize;
        for (current, chunk) in self.slices(address, len)? {
            let physical = self.translate(pid, current)?;
            let end = written + chunk as usize;
            self.memory.write(pid, physical, &data[written..end])?;
            written = end;
            if self.cache.is_enabled() {
                self.cache_pause();
                let page = self.geometry.page_of(current);
                if self.cache.invalidate(pid, page) {
                    info!("Cache invalidate: PID: {}, page: {}", pid, page);
                }
            }
        }
        Ok(())
    }
}
