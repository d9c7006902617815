//! Fetch, decode and execute loop for one execution context.

use std::sync::Arc;

use log::{error, info, warn};
use sim_common::Pid;
use sim_protocol::{Message, ProtocolError};
use spin::Mutex;

use crate::instruction::{decode, Instruction};
use crate::mmu::{MemoryPort, Mmu};
use crate::{CpuError, MmuError};

/// Outbound half of the dispatch link to the Kernel.
pub trait KernelLink {
    /// Sends a syscall or cycle notification.
    fn notify(&mut self, message: Message) -> Result<(), ProtocolError>;
}

/// Interrupt raised by the Kernel for a specific pid, shared between the
/// interrupt listener and the instruction cycle.
#[derive(Debug, Clone, Default)]
pub struct InterruptLatch {
    pending: Arc<Mutex<Option<Pid>>>,
}

impl InterruptLatch {
    /// Creates an empty latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an interrupt for `pid`.
    pub fn raise(&self, pid: Pid) {
        *self.pending.lock() = Some(pid);
    }

    /// Consumes the pending interrupt if it targets `pid`.
    pub fn take_for(&self, pid: Pid) -> bool {
        let mut pending = self.pending.lock();
        if *pending == Some(pid) {
            *pending = None;
            true
        } else {
            false
        }
    }

    /// Drops any pending interrupt. An interrupt only applies to the
    /// context that was running when it arrived.
    pub fn clear(&self) {
        *self.pending.lock() = None;
    }

    /// Returns the pid with a pending interrupt.
    pub fn pending(&self) -> Option<Pid> {
        *self.pending.lock()
    }
}

/// Why a context stopped running on this CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    Exited,
    Syscall,
    Preempted,
    SegmentationFault,
}

/// One simulated CPU.
pub struct Cpu<M: MemoryPort> {
    id: u32,
    mmu: Mmu<M>,
    interrupts: InterruptLatch,
    current_pid: Option<Pid>,
}

impl<M: MemoryPort> Cpu<M> {
    /// Creates a CPU around its MMU.
    pub fn new(id: u32, mmu: Mmu<M>, interrupts: InterruptLatch) -> Self {
        Self {
            id,
            mmu,
            interrupts,
            current_pid: None,
        }
    }

    /// Returns the CPU id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns the MMU.
    pub fn mmu(&self) -> &Mmu<M> {
        &self.mmu
    }

    /// Runs `pid` from `pc` until it exits, issues a syscall, faults or is
    /// preempted. Every outcome is reported to the Kernel before returning.
    pub fn run<K: KernelLink + ?Sized>(
        &mut self,
        kernel: &mut K,
        pid: Pid,
        mut pc: u32,
    ) -> Result<CycleEnd, CpuError> {
        info!(
            "CPU {}: context received - PID: {} - PC: {}",
            self.id, pid, pc
        );
        if self.current_pid != Some(pid) {
            self.mmu.flush();
            self.current_pid = Some(pid);
        }
        self.interrupts.clear();

        loop {
            let text = self.mmu.memory_mut().fetch_instruction(pid, pc)?;
            info!("## PID: {} - FETCH - Program Counter: {}", pid, pc);
            let instruction = decode(&text);
            info!("## PID: {} - Executing: {}", pid, text);

            let mut next_pc = pc + 1;
            match instruction {
                Instruction::Noop => {}
                Instruction::Read { address, size } => match self.mmu.read(pid, address, size) {
                    Ok(data) => {
                        info!(
                            "PID: {} - READ - Logical address: {} - Value: {}",
                            pid,
                            address,
                            String::from_utf8_lossy(&data)
                        );
                    }
                    Err(err) => return self.fault(kernel, pid, pc, err),
                },
                Instruction::Write { address, data } => {
                    let mut bytes = data.into_bytes();
                    bytes.push(0);
                    if let Err(err) = self.mmu.write(pid, address, &bytes) {
                        return self.fault(kernel, pid, pc, err);
                    }
                    info!("PID: {} - WRITE - Logical address: {}", pid, address);
                }
                Instruction::Goto { target } => next_pc = target,
                Instruction::Io {
                    device,
                    duration_ms,
                } => {
                    kernel.notify(Message::IoSyscall {
                        device,
                        duration_ms,
                        pc: next_pc,
                    })?;
                    return Ok(CycleEnd::Syscall);
                }
                Instruction::InitProc { file, size } => {
                    kernel.notify(Message::InitProc {
                        file,
                        size,
                        pc: next_pc,
                    })?;
                    return Ok(CycleEnd::Syscall);
                }
                Instruction::DumpMemory => {
                    kernel.notify(Message::DumpMemory { pc: next_pc })?;
                    return Ok(CycleEnd::Syscall);
                }
                Instruction::Exit => {
                    info!("PID: {} - Syscall EXIT", pid);
                    kernel.notify(Message::Exit)?;
                    return Ok(CycleEnd::Exited);
                }
                Instruction::Unknown(raw) => {
                    warn!("PID: {} - Unknown instruction '{}' skipped", pid, raw);
                }
            }
            pc = next_pc;

            if self.interrupts.take_for(pid) {
                info!("## PID: {} - Interrupt received, yielding at PC {}", pid, pc);
                kernel.notify(Message::PreemptionCompleted { pc })?;
                return Ok(CycleEnd::Preempted);
            }
        }
    }

    fn fault<K: KernelLink + ?Sized>(
        &mut self,
        kernel: &mut K,
        pid: Pid,
        pc: u32,
        err: MmuError,
    ) -> Result<CycleEnd, CpuError> {
        match err {
            MmuError::SegFault { page, level } => {
                error!(
                    "PID: {} - SEGMENTATION FAULT at PC {} (page {}, level {})",
                    pid, pc, page, level
                );
                kernel.notify(Message::SegmentationFault { pc })?;
                Ok(CycleEnd::SegmentationFault)
            }
            MmuError::Rejected { address } => {
                error!(
                    "PID: {} - SEGMENTATION FAULT at PC {} (physical address {} rejected)",
                    pid, pc, address
                );
                kernel.notify(Message::SegmentationFault { pc })?;
                Ok(CycleEnd::SegmentationFault)
            }
            MmuError::Link(err) => Err(CpuError::Protocol(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PageCache;
    use crate::tlb::{Replacement, Tlb};
    use sim_common::{PagingGeometry, PhysAddr};

    /// Memory with one program and identity-mapped pages 0..4.
    struct ProgramMemory {
        program: Vec<&'static str>,
        ram: Vec<u8>,
        fetched: Vec<u32>,
        latch: Option<(InterruptLatch, u32)>,
    }

    impl ProgramMemory {
        fn new(program: Vec<&'static str>) -> Self {
            Self {
                program,
                ram: vec![0; 64],
                fetched: Vec::new(),
                latch: None,
            }
        }
    }

    impl MemoryPort for ProgramMemory {
        fn fetch_instruction(&mut self, pid: Pid, pc: u32) -> Result<String, ProtocolError> {
            self.fetched.push(pc);
            if let Some((latch, at)) = &self.latch {
                if *at == pc {
                    latch.raise(pid);
                }
            }
            Ok(self.program.get(pc as usize).unwrap_or(&"EXIT").to_string())
        }

        fn page_table_entry(
            &mut self,
            _pid: Pid,
            _level: u32,
            _table_ref: u64,
            index: u32,
        ) -> Result<Option<u64>, ProtocolError> {
            Ok((index < 4).then_some(index as u64))
        }

        fn read(&mut self, _pid: Pid, address: PhysAddr, size: u32) -> Result<Vec<u8>, MmuError> {
            let start = address as usize;
            Ok(self.ram[start..start + size as usize].to_vec())
        }

        fn write(&mut self, _pid: Pid, address: PhysAddr, data: &[u8]) -> Result<(), MmuError> {
            let start = address as usize;
            if start + data.len() > self.ram.len() {
                return Err(MmuError::Rejected { address });
            }
            self.ram[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingKernel {
        sent: Vec<Message>,
    }

    impl KernelLink for RecordingKernel {
        fn notify(&mut self, message: Message) -> Result<(), ProtocolError> {
            self.sent.push(message);
            Ok(())
        }
    }

    fn cpu(memory: ProgramMemory, latch: InterruptLatch) -> Cpu<ProgramMemory> {
        let mmu = Mmu::new(
            memory,
            PagingGeometry::new(16, 8, 1),
            Tlb::new(4, Replacement::Fifo),
            PageCache::new(2, Replacement::Fifo),
        );
        Cpu::new(0, mmu, latch)
    }

    #[test]
    fn runs_until_exit() {
        let mut cpu = cpu(
            ProgramMemory::new(vec!["NOOP", "WRITE 4 hola", "READ 4 4", "EXIT"]),
            InterruptLatch::new(),
        );
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::Exited));
        assert_eq!(kernel.sent, vec![Message::Exit]);
        assert_eq!(&cpu.mmu.memory_mut().ram[4..9], b"hola\0");
    }

    #[test]
    fn syscalls_report_next_pc() {
        let mut cpu = cpu(
            ProgramMemory::new(vec!["NOOP", "IO DISCO 500"]),
            InterruptLatch::new(),
        );
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::Syscall));
        assert_eq!(
            kernel.sent,
            vec![Message::IoSyscall {
                device: "DISCO".to_string(),
                duration_ms: 500,
                pc: 2
            }]
        );
    }

    #[test]
    fn goto_replaces_program_counter() {
        let mut cpu = cpu(
            ProgramMemory::new(vec!["GOTO 2", "NOOP", "DUMP_MEMORY"]),
            InterruptLatch::new(),
        );
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::Syscall));
        assert_eq!(cpu.mmu.memory_mut().fetched, vec![0, 2]);
        assert_eq!(kernel.sent, vec![Message::DumpMemory { pc: 3 }]);
    }

    #[test]
    fn interrupt_for_running_pid_preempts_after_instruction() {
        let latch = InterruptLatch::new();
        let mut memory = ProgramMemory::new(vec!["NOOP", "NOOP", "NOOP", "EXIT"]);
        memory.latch = Some((latch.clone(), 1));
        let mut cpu = cpu(memory, latch.clone());
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 7, 0), Ok(CycleEnd::Preempted));
        assert_eq!(kernel.sent, vec![Message::PreemptionCompleted { pc: 2 }]);
        assert_eq!(latch.pending(), None);
    }

    #[test]
    fn stale_interrupt_for_other_pid_is_discarded() {
        let latch = InterruptLatch::new();
        latch.raise(3);
        let mut cpu = cpu(ProgramMemory::new(vec!["NOOP", "EXIT"]), latch.clone());
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 4, 0), Ok(CycleEnd::Exited));
        assert_eq!(latch.pending(), None);
    }

    #[test]
    fn interrupt_left_over_from_a_syscall_does_not_preempt_the_next_run() {
        let latch = InterruptLatch::new();
        let mut memory = ProgramMemory::new(vec!["IO DISCO 10", "NOOP", "NOOP", "EXIT"]);
        memory.latch = Some((latch.clone(), 0));
        let mut cpu = cpu(memory, latch.clone());
        let mut kernel = RecordingKernel::default();

        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::Syscall));
        assert_eq!(latch.pending(), Some(1));

        cpu.mmu.memory_mut().latch = None;
        assert_eq!(cpu.run(&mut kernel, 1, 1), Ok(CycleEnd::Exited));
        assert_eq!(
            kernel.sent,
            vec![
                Message::IoSyscall {
                    device: "DISCO".to_string(),
                    duration_ms: 10,
                    pc: 1
                },
                Message::Exit
            ]
        );
        assert_eq!(latch.pending(), None);
    }

    #[test]
    fn unmapped_access_reports_segmentation_fault() {
        let mut cpu = cpu(
            ProgramMemory::new(vec!["NOOP", "READ 200 4", "EXIT"]),
            InterruptLatch::new(),
        );
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::SegmentationFault));
        assert_eq!(kernel.sent, vec![Message::SegmentationFault { pc: 1 }]);
    }

    #[test]
    fn refused_write_reports_segmentation_fault() {
        let mut memory = ProgramMemory::new(vec!["WRITE 40 hola", "EXIT"]);
        memory.ram.truncate(32);
        let mut cpu = cpu(memory, InterruptLatch::new());
        let mut kernel = RecordingKernel::default();
        assert_eq!(cpu.run(&mut kernel, 1, 0), Ok(CycleEnd::SegmentationFault));
        assert_eq!(kernel.sent, vec![Message::SegmentationFault { pc: 0 }]);
    }

    #[test]
    fn switching_pid_flushes_translation_state() {
        let mut cpu = cpu(ProgramMemory::new(vec!["READ 0 1", "EXIT"]), InterruptLatch::new());
        let mut kernel = RecordingKernel::default();
        cpu.run(&mut kernel, 1, 0).expect("run should succeed");
        assert_eq!(cpu.mmu().tlb().len(), 1);
        cpu.run(&mut kernel, 2, 1).expect("run should succeed");
        assert!(cpu.mmu().tlb().is_empty());
        assert!(cpu.mmu().cache().is_empty());
    }
}
