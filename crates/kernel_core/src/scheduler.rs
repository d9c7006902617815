//! Long and short term scheduling driven by one event at a time.

use std::cmp::Ordering;

use log::{error, info, warn};
use sim_common::Pid;
use sim_protocol::{Message, ProtocolError};

use crate::config::{AdmissionPolicy, DispatchPolicy, SchedulerConfig};
use crate::cpus::{CpuLink, CpuRegistry};
use crate::io::{InstanceId, IoRegistry, IoRequest, Submission};
use crate::process::ProcessState;
use crate::table::ProcessTable;

/// Something that happened outside the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    /// A process should enter NEW (initial process or operator request).
    NewProcess { file: String, size: u32 },
    CpuConnected { cpu: u32, link: CpuLink },
    CpuDisconnected { cpu: u32, link: CpuLink },
    /// A syscall or cycle notification on a CPU's dispatch link.
    FromCpu { cpu: u32, message: Message },
    IoConnected { instance: InstanceId, device: String },
    IoCompleted { instance: InstanceId, pid: Pid },
    IoDisconnected { instance: InstanceId },
    /// Reply to a load, remove or dump request.
    FromMemoria(Message),
}

/// Outbound effects of scheduling decisions.
pub trait KernelPort {
    /// Sends an execution context to a CPU.
    fn dispatch(&mut self, cpu: u32, pid: Pid, pc: u32) -> Result<(), ProtocolError>;
    /// Asks a CPU to yield `pid`.
    fn interrupt(&mut self, cpu: u32, pid: Pid) -> Result<(), ProtocolError>;
    /// Hands a request to an I/O instance.
    fn start_io(
        &mut self,
        instance: InstanceId,
        pid: Pid,
        duration_ms: u32,
    ) -> Result<(), ProtocolError>;
    /// Asks Memoria to load a process; the reply arrives as an event.
    fn load_process(&mut self, pid: Pid, file: &str, size: u32);
    /// Asks Memoria to release a process; the reply arrives as an event.
    fn remove_process(&mut self, pid: Pid);
    /// Asks Memoria to dump a process; the reply arrives as an event.
    fn dump_memory(&mut self, pid: Pid);
}

fn report(result: Result<(), ProtocolError>, what: &str) {
    if let Err(err) = result {
        error!("{} failed: {}", what, err);
    }
}

/// Owns every Kernel table and applies events to them.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    processes: ProcessTable,
    cpus: CpuRegistry,
    devices: IoRegistry,
}

impl Scheduler {
    /// Creates a scheduler with empty tables.
    pub fn new(config: SchedulerConfig) -> Self {
        info!(
            "Scheduler: admission {:?}, dispatch {:?}, alpha {}, initial estimate {} ms",
            config.admission, config.dispatch, config.alpha, config.initial_estimate
        );
        Self {
            config,
            processes: ProcessTable::new(),
            cpus: CpuRegistry::new(),
            devices: IoRegistry::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn cpus(&self) -> &CpuRegistry {
        &self.cpus
    }

    pub fn devices(&self) -> &IoRegistry {
        &self.devices
    }

    /// Applies one event at time `now` (milliseconds).
    pub fn handle(&mut self, event: KernelEvent, now: u64, port: &mut dyn KernelPort) {
        match event {
            KernelEvent::NewProcess { file, size } => {
                self.new_process(&file, size, now, port);
            }
            KernelEvent::CpuConnected { cpu, link } => {
                if self.cpus.register(cpu, link) {
                    self.dispatch_to(cpu, now, port);
                }
            }
            KernelEvent::CpuDisconnected { cpu, link } => {
                if let Some(pid) = self.cpus.unregister(cpu, link) {
                    warn!("CPU {} disconnected while running PID {}", cpu, pid);
                    self.force_exit(pid, now, port);
                }
            }
            KernelEvent::FromCpu { cpu, message } => self.on_cpu_message(cpu, message, now, port),
            KernelEvent::IoConnected { instance, device } => {
                if let Some(request) = self.devices.register(&device, instance) {
                    report(
                        port.start_io(instance, request.pid, request.duration_ms),
                        "I/O request",
                    );
                }
            }
            KernelEvent::IoCompleted { instance, pid } => {
                self.on_io_completed(instance, pid, now, port)
            }
            KernelEvent::IoDisconnected { instance } => {
                self.on_io_disconnected(instance, now, port)
            }
            KernelEvent::FromMemoria(message) => self.on_memoria_reply(message, now, port),
        }
    }

    /// Creates a process in NEW and starts its admission if the policy
    /// allows. Returns the new pid.
    pub fn new_process(
        &mut self,
        file: &str,
        size: u32,
        now: u64,
        port: &mut dyn KernelPort,
    ) -> Pid {
        let pid = self
            .processes
            .create(file, size, self.config.initial_estimate, now);
        if self.processes.bucket(ProcessState::SuspendedReady).is_empty() {
            self.consider_admission(pid, ProcessState::New, port);
        }
        pid
    }

    /// Mid-term hook: moves a blocked process to SUSPENDED_BLOCKED. Returns
    /// false if the process is not blocked.
    pub fn suspend(&mut self, pid: Pid, now: u64) -> bool {
        if self.processes.state_of(pid) != Some(ProcessState::Blocked) {
            return false;
        }
        self.processes
            .move_to(pid, ProcessState::SuspendedBlocked, now);
        true
    }

    fn consider_admission(&mut self, pid: Pid, waiting_in: ProcessState, port: &mut dyn KernelPort) {
        if self.processes.pcb(pid).admitting {
            return;
        }
        let eligible = match self.config.admission {
            AdmissionPolicy::Fifo => self.processes.bucket(waiting_in).len() == 1,
            AdmissionPolicy::Pmcp => true,
        };
        if eligible {
            self.request_load(pid, port);
        }
    }

    fn request_load(&mut self, pid: Pid, port: &mut dyn KernelPort) {
        let pcb = self.processes.pcb_mut(pid);
        pcb.admitting = true;
        info!("## ({}) Requesting memory for {} ({} bytes)", pid, pcb.file, pcb.size);
        port.load_process(pid, &pcb.file, pcb.size);
    }

    /// Tries one more admission, SUSPENDED_READY before NEW.
    fn load_next(&mut self, port: &mut dyn KernelPort) {
        let waiting_in = if self
            .processes
            .bucket(ProcessState::SuspendedReady)
            .is_empty()
        {
            ProcessState::New
        } else {
            ProcessState::SuspendedReady
        };
        if let Some(pid) = self.processes.first_where(waiting_in, |pcb| !pcb.admitting) {
            self.request_load(pid, port);
        }
    }

    fn sort_ready(&mut self) {
        if self.config.dispatch.orders_by_burst() {
            self.processes.sort_bucket_by(ProcessState::Ready, |a, b| {
                a.burst
                    .remaining
                    .partial_cmp(&b.burst.remaining)
                    .unwrap_or(Ordering::Equal)
            });
        }
    }

    /// Sends the head of READY to `cpu`, if both exist.
    fn dispatch_to(&mut self, cpu: u32, now: u64, port: &mut dyn KernelPort) {
        if !self.cpus.get(cpu).is_some_and(|slot| slot.is_free()) {
            return;
        }
        let pid = match self.processes.head(ProcessState::Ready) {
            Some(pid) => pid,
            None => return,
        };
        self.processes.move_to(pid, ProcessState::Exec, now);
        let pcb = self.processes.pcb_mut(pid);
        pcb.burst.start(now);
        let pc = pcb.pc;
        self.cpus.assign(cpu, pid);
        info!("## ({}) dispatched to CPU {} at PC {}", pid, cpu, pc);
        report(port.dispatch(cpu, pid, pc), "dispatch");
    }

    fn release_cpu(&mut self, cpu: u32, now: u64, port: &mut dyn KernelPort) {
        self.cpus.release(cpu);
        self.dispatch_to(cpu, now, port);
    }

    /// Runs whenever a process lands in READY from NEW, SUSPENDED_READY or
    /// BLOCKED.
    fn entry_to_ready(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        if let Some(cpu) = self.cpus.find_free() {
            self.sort_ready();
            self.dispatch_to(cpu, now, port);
            return;
        }
        match self.config.dispatch {
            DispatchPolicy::Fifo => {}
            DispatchPolicy::Sjf => self.sort_ready(),
            DispatchPolicy::Srt => {
                self.preempt_for(pid, now, port);
                self.sort_ready();
            }
        }
    }

    /// Interrupts the CPU whose process has the largest remaining estimate
    /// if `pid` would finish sooner.
    fn preempt_for(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        let running = self.cpus.preemptible();
        for &(_, running_pid) in &running {
            self.processes.pcb_mut(running_pid).burst.refresh(now);
        }
        let processes = &self.processes;
        let victim = running.iter().copied().max_by(|a, b| {
            let left = processes.pcb(a.1).burst.remaining;
            let right = processes.pcb(b.1).burst.remaining;
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        });
        let (cpu, victim_pid) = match victim {
            Some(victim) => victim,
            None => return,
        };
        let challenger = self.processes.pcb(pid).burst.remaining;
        let incumbent = self.processes.pcb(victim_pid).burst.remaining;
        if challenger < incumbent {
            info!(
                "## ({}) needs {} ms, interrupting PID {} on CPU {} ({} ms left)",
                pid, challenger, victim_pid, cpu, incumbent
            );
            self.cpus.mark_preempted(cpu);
            report(port.interrupt(cpu, victim_pid), "interrupt");
        }
    }

    fn on_cpu_message(&mut self, cpu: u32, message: Message, now: u64, port: &mut dyn KernelPort) {
        let pid = match self.cpus.get(cpu).and_then(|slot| slot.running) {
            Some(pid) => pid,
            None => {
                warn!(
                    "CPU {} sent {:?} while running nothing",
                    cpu,
                    message.op_code()
                );
                return;
            }
        };
        match message {
            Message::Exit => {
                info!("## ({}) - Requested syscall: EXIT", pid);
                self.exit_running(cpu, pid, now, port);
            }
            Message::SegmentationFault { pc } => {
                error!("## ({}) - Segmentation fault at PC {}", pid, pc);
                self.processes.pcb_mut(pid).pc = pc;
                self.exit_running(cpu, pid, now, port);
            }
            Message::IoSyscall {
                device,
                duration_ms,
                pc,
            } => self.syscall_io(cpu, pid, &device, duration_ms, pc, now, port),
            Message::InitProc { file, size, pc } => {
                info!("## ({}) - Requested syscall: INIT_PROC", pid);
                self.processes.pcb_mut(pid).pc = pc;
                self.new_process(&file, size, now, port);
                report(port.dispatch(cpu, pid, pc), "dispatch");
            }
            Message::DumpMemory { pc } => {
                info!("## ({}) - Requested syscall: DUMP_MEMORY", pid);
                self.block_running(pid, pc, now);
                info!("## ({}) - Blocked by DUMP_MEMORY", pid);
                self.release_cpu(cpu, now, port);
                port.dump_memory(pid);
            }
            Message::PreemptionCompleted { pc } => {
                let pcb = self.processes.pcb_mut(pid);
                pcb.pc = pc;
                pcb.burst.refresh(now);
                self.processes.move_to(pid, ProcessState::Ready, now);
                info!("## ({}) - Preempted by {:?}", pid, self.config.dispatch);
                self.sort_ready();
                self.release_cpu(cpu, now, port);
            }
            other => warn!("Unexpected {:?} from CPU {}", other.op_code(), cpu),
        }
    }

    fn block_running(&mut self, pid: Pid, pc: u32, now: u64) {
        let alpha = self.config.alpha;
        let pcb = self.processes.pcb_mut(pid);
        pcb.pc = pc;
        pcb.burst.complete(now, alpha);
        self.processes.move_to(pid, ProcessState::Blocked, now);
    }

    fn exit_running(&mut self, cpu: u32, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        self.processes.move_to(pid, ProcessState::Exit, now);
        self.release_cpu(cpu, now, port);
        port.remove_process(pid);
    }

    #[allow(clippy::too_many_arguments)]
    fn syscall_io(
        &mut self,
        cpu: u32,
        pid: Pid,
        device: &str,
        duration_ms: u32,
        pc: u32,
        now: u64,
        port: &mut dyn KernelPort,
    ) {
        info!("## ({}) - Requested syscall: IO", pid);
        if !self.devices.contains(device) {
            warn!("## ({}) requested unknown device {}", pid, device);
            self.exit_running(cpu, pid, now, port);
            return;
        }
        self.block_running(pid, pc, now);
        info!("## ({}) - Blocked by IO: {}", pid, device);
        match self.devices.submit(device, IoRequest { pid, duration_ms }) {
            Some(Submission::Started(instance)) => {
                report(port.start_io(instance, pid, duration_ms), "I/O request")
            }
            Some(Submission::Queued) => info!("## ({}) waiting for a free {}", pid, device),
            None => {}
        }
        self.release_cpu(cpu, now, port);
    }

    fn unblock(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        match self.processes.state_of(pid) {
            Some(ProcessState::Blocked) => {
                self.processes.move_to(pid, ProcessState::Ready, now);
                self.entry_to_ready(pid, now, port);
            }
            Some(ProcessState::SuspendedBlocked) => {
                self.processes
                    .move_to(pid, ProcessState::SuspendedReady, now);
                self.consider_admission(pid, ProcessState::SuspendedReady, port);
            }
            Some(state) => warn!("PID {} unblocked while in {}", pid, state),
            None => warn!("Unblock for unknown PID {}", pid),
        }
    }

    /// Moves a process that can no longer make progress to EXIT and asks
    /// Memoria to release it.
    fn force_exit(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        match self.processes.state_of(pid) {
            Some(ProcessState::Exec)
            | Some(ProcessState::Blocked)
            | Some(ProcessState::SuspendedBlocked) => {
                self.processes.move_to(pid, ProcessState::Exit, now);
                port.remove_process(pid);
            }
            Some(state) => warn!("PID {} cannot be forced to EXIT from {}", pid, state),
            None => warn!("Forced EXIT for unknown PID {}", pid),
        }
    }

    fn on_io_completed(
        &mut self,
        instance: InstanceId,
        pid: Pid,
        now: u64,
        port: &mut dyn KernelPort,
    ) {
        let completion = match self.devices.complete(instance) {
            Some(completion) => completion,
            None => {
                warn!("I/O instance {} completed but was idle", instance);
                return;
            }
        };
        if completion.served != pid {
            warn!(
                "I/O instance {} reported PID {} while serving PID {}",
                instance, pid, completion.served
            );
        }
        if let Some(next) = completion.next {
            report(
                port.start_io(instance, next.pid, next.duration_ms),
                "I/O request",
            );
        }
        info!("## ({}) finished IO", completion.served);
        self.unblock(completion.served, now, port);
    }

    fn on_io_disconnected(&mut self, instance: InstanceId, now: u64, port: &mut dyn KernelPort) {
        let gone = match self.devices.disconnect(instance) {
            Some(gone) => gone,
            None => return,
        };
        warn!("I/O device {} lost instance {}", gone.device, instance);
        for pid in gone.interrupted.into_iter().chain(gone.abandoned) {
            self.force_exit(pid, now, port);
        }
    }

    fn on_memoria_reply(&mut self, message: Message, now: u64, port: &mut dyn KernelPort) {
        match message {
            Message::LoadOk { pid } => self.on_loaded(pid, now, port),
            Message::LoadFail { pid } => self.on_load_failed(pid),
            Message::Removed { pid } => self.finalize(pid, now, port),
            Message::ProcessNotFound { pid } => {
                warn!("Memoria had no record of PID {}", pid);
                self.finalize(pid, now, port);
            }
            Message::DumpCompleted { pid } => {
                info!("## ({}) finished DUMP_MEMORY", pid);
                self.unblock(pid, now, port);
            }
            Message::DumpFailed { pid } => {
                error!("## ({}) DUMP_MEMORY failed", pid);
                self.force_exit(pid, now, port);
            }
            other => warn!("Unexpected {:?} from Memoria", other.op_code()),
        }
    }

    fn on_loaded(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        let state = match self.processes.state_of(pid) {
            Some(state) => state,
            None => {
                warn!("Memoria loaded unknown PID {}", pid);
                return;
            }
        };
        self.processes.pcb_mut(pid).admitting = false;
        if state != ProcessState::New && state != ProcessState::SuspendedReady {
            warn!("PID {} loaded while in {}", pid, state);
            return;
        }
        self.processes.move_to(pid, ProcessState::Ready, now);
        self.entry_to_ready(pid, now, port);
        self.load_next(port);
    }

    fn on_load_failed(&mut self, pid: Pid) {
        let state = match self.processes.state_of(pid) {
            Some(state) => state,
            None => {
                warn!("Memoria rejected unknown PID {}", pid);
                return;
            }
        };
        self.processes.pcb_mut(pid).admitting = false;
        info!("## ({}) does not fit in memory yet, waiting in {}", pid, state);
        if self.config.admission == AdmissionPolicy::Pmcp {
            self.processes
                .sort_bucket_by(state, |a, b| a.size.cmp(&b.size));
        }
    }

    fn finalize(&mut self, pid: Pid, now: u64, port: &mut dyn KernelPort) {
        match self.processes.state_of(pid) {
            Some(ProcessState::Exit) => {}
            Some(state) => {
                warn!("Ignoring release of PID {} while in {}", pid, state);
                return;
            }
            None => {
                warn!("Ignoring release of unknown PID {}", pid);
                return;
            }
        }
        let pcb = self.processes.destroy(pid, now);
        info!("## ({}) - Process finished", pid);
        info!("## ({}) - State metrics: {}", pid, pcb.metrics);
        self.load_next(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Dispatch(u32, Pid, u32),
        Interrupt(u32, Pid),
        StartIo(InstanceId, Pid, u32),
        Load(Pid),
        Remove(Pid),
        Dump(Pid),
    }

    #[derive(Default)]
    struct MockPort {
        calls: Vec<Call>,
    }

    impl MockPort {
        fn take(&mut self) -> Vec<Call> {
            std::mem::take(&mut self.calls)
        }
    }

    impl KernelPort for MockPort {
        fn dispatch(&mut self, cpu: u32, pid: Pid, pc: u32) -> Result<(), ProtocolError> {
            self.calls.push(Call::Dispatch(cpu, pid, pc));
            Ok(())
        }

        fn interrupt(&mut self, cpu: u32, pid: Pid) -> Result<(), ProtocolError> {
            self.calls.push(Call::Interrupt(cpu, pid));
            Ok(())
        }

        fn start_io(
            &mut self,
            instance: InstanceId,
            pid: Pid,
            duration_ms: u32,
        ) -> Result<(), ProtocolError> {
            self.calls.push(Call::StartIo(instance, pid, duration_ms));
            Ok(())
        }

        fn load_process(&mut self, pid: Pid, _file: &str, _size: u32) {
            self.calls.push(Call::Load(pid));
        }

        fn remove_process(&mut self, pid: Pid) {
            self.calls.push(Call::Remove(pid));
        }

        fn dump_memory(&mut self, pid: Pid) {
            self.calls.push(Call::Dump(pid));
        }
    }

    fn scheduler(admission: AdmissionPolicy, dispatch: DispatchPolicy) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            admission,
            dispatch,
            alpha: 0.5,
            initial_estimate: 100.0,
        })
    }

    fn connect_cpu(scheduler: &mut Scheduler, port: &mut MockPort, cpu: u32) {
        for link in [CpuLink::Dispatch, CpuLink::Interrupt] {
            scheduler.handle(KernelEvent::CpuConnected { cpu, link }, 0, port);
        }
    }

    fn memoria(scheduler: &mut Scheduler, port: &mut MockPort, message: Message, now: u64) {
        scheduler.handle(KernelEvent::FromMemoria(message), now, port);
    }

    fn cpu(scheduler: &mut Scheduler, port: &mut MockPort, cpu: u32, message: Message, now: u64) {
        scheduler.handle(KernelEvent::FromCpu { cpu, message }, now, port);
    }

    /// Creates a process and loads it, returning its pid.
    fn admitted(scheduler: &mut Scheduler, port: &mut MockPort, size: u32, now: u64) -> Pid {
        let pid = scheduler.new_process("proc", size, now, port);
        memoria(scheduler, port, Message::LoadOk { pid }, now);
        pid
    }

    #[test]
    fn fifo_admission_only_loads_queue_head() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        let first = scheduler.new_process("a", 64, 0, &mut port);
        let second = scheduler.new_process("b", 64, 0, &mut port);
        assert_eq!(port.take(), vec![Call::Load(first)]);

        memoria(&mut scheduler, &mut port, Message::LoadOk { pid: first }, 1);
        assert_eq!(scheduler.processes().state_of(first), Some(ProcessState::Ready));
        assert_eq!(port.take(), vec![Call::Load(second)]);
    }

    #[test]
    fn pmcp_admission_loads_everything_and_sorts_on_failure() {
        let mut scheduler = scheduler(AdmissionPolicy::Pmcp, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        let big = scheduler.new_process("big", 900, 0, &mut port);
        let small = scheduler.new_process("small", 100, 0, &mut port);
        assert_eq!(port.take(), vec![Call::Load(big), Call::Load(small)]);

        memoria(&mut scheduler, &mut port, Message::LoadFail { pid: big }, 1);
        assert_eq!(
            scheduler.processes().bucket(ProcessState::New),
            &std::collections::VecDeque::from([small, big])
        );
        assert!(!scheduler.processes().pcb(big).admitting);
        assert!(scheduler.processes().pcb(small).admitting);
    }

    #[test]
    fn exit_frees_cpu_for_next_ready_process() {
        let mut scheduler = scheduler(AdmissionPolicy::Pmcp, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let first = admitted(&mut scheduler, &mut port, 64, 0);
        let second = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        cpu(&mut scheduler, &mut port, 1, Message::Exit, 10);
        assert_eq!(
            port.take(),
            vec![Call::Dispatch(1, second, 0), Call::Remove(first)]
        );
        assert_eq!(scheduler.processes().state_of(first), Some(ProcessState::Exit));

        memoria(&mut scheduler, &mut port, Message::Removed { pid: first }, 12);
        assert_eq!(scheduler.processes().state_of(first), None);
    }

    #[test]
    fn cpu_connecting_late_picks_up_ready_process() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();
        connect_cpu(&mut scheduler, &mut port, 4);
        assert_eq!(port.take(), vec![Call::Dispatch(4, pid, 0)]);
    }

    #[test]
    fn init_proc_creates_process_and_resumes_caller() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let parent = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        let init = Message::InitProc {
            file: "child".to_string(),
            size: 32,
            pc: 3,
        };
        cpu(&mut scheduler, &mut port, 1, init, 5);
        let child = parent + 1;
        assert_eq!(
            port.take(),
            vec![Call::Load(child), Call::Dispatch(1, parent, 3)]
        );
        assert_eq!(scheduler.processes().state_of(parent), Some(ProcessState::Exec));
        assert_eq!(scheduler.cpus().running(parent), Some(1));

        // The child waits in READY: the only CPU is still busy.
        memoria(&mut scheduler, &mut port, Message::LoadOk { pid: child }, 6);
        assert_eq!(scheduler.processes().state_of(child), Some(ProcessState::Ready));
        assert!(port.take().is_empty());
    }

    #[test]
    fn dump_blocks_until_memoria_answers() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        cpu(&mut scheduler, &mut port, 1, Message::DumpMemory { pc: 2 }, 4);
        assert_eq!(scheduler.processes().state_of(pid), Some(ProcessState::Blocked));
        assert_eq!(port.take(), vec![Call::Dump(pid)]);

        memoria(&mut scheduler, &mut port, Message::DumpCompleted { pid }, 9);
        assert_eq!(port.take(), vec![Call::Dispatch(1, pid, 2)]);
    }

    #[test]
    fn failed_dump_forces_exit() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        cpu(&mut scheduler, &mut port, 1, Message::DumpMemory { pc: 2 }, 4);
        port.take();

        memoria(&mut scheduler, &mut port, Message::DumpFailed { pid }, 9);
        assert_eq!(scheduler.processes().state_of(pid), Some(ProcessState::Exit));
        assert_eq!(port.take(), vec![Call::Remove(pid)]);
    }

    #[test]
    fn io_to_unknown_device_exits_process() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        let io = Message::IoSyscall {
            device: "IMPRESORA".to_string(),
            duration_ms: 100,
            pc: 1,
        };
        cpu(&mut scheduler, &mut port, 1, io, 3);
        assert_eq!(scheduler.processes().state_of(pid), Some(ProcessState::Exit));
        assert_eq!(port.take(), vec![Call::Remove(pid)]);
    }

    #[test]
    fn segmentation_fault_exits_process() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        cpu(&mut scheduler, &mut port, 1, Message::SegmentationFault { pc: 7 }, 3);
        assert_eq!(scheduler.processes().state_of(pid), Some(ProcessState::Exit));
        assert_eq!(scheduler.processes().pcb(pid).pc, 7);
        assert!(scheduler.cpus().get(1).expect("cpu").is_free());
        assert_eq!(port.take(), vec![Call::Remove(pid)]);
    }

    #[test]
    fn not_found_release_still_finalizes() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        cpu(&mut scheduler, &mut port, 1, Message::Exit, 3);
        memoria(&mut scheduler, &mut port, Message::ProcessNotFound { pid }, 4);
        assert!(scheduler.processes().is_empty());
    }

    #[test]
    fn lost_cpu_forces_running_process_to_exit() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        port.take();

        scheduler.handle(
            KernelEvent::CpuDisconnected {
                cpu: 1,
                link: CpuLink::Dispatch,
            },
            5,
            &mut port,
        );
        assert_eq!(scheduler.processes().state_of(pid), Some(ProcessState::Exit));
        assert_eq!(port.take(), vec![Call::Remove(pid)]);
    }

    #[test]
    fn suspended_process_returns_through_admission() {
        let mut scheduler = scheduler(AdmissionPolicy::Fifo, DispatchPolicy::Fifo);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        scheduler.handle(
            KernelEvent::IoConnected {
                instance: 1,
                device: "DISCO".to_string(),
            },
            0,
            &mut port,
        );
        let pid = admitted(&mut scheduler, &mut port, 64, 0);
        let io = Message::IoSyscall {
            device: "disco".to_string(),
            duration_ms: 50,
            pc: 1,
        };
        cpu(&mut scheduler, &mut port, 1, io, 2);
        assert!(scheduler.suspend(pid, 3));
        assert!(!scheduler.suspend(pid, 3));
        port.take();

        scheduler.handle(KernelEvent::IoCompleted { instance: 1, pid }, 60, &mut port);
        assert_eq!(
            scheduler.processes().state_of(pid),
            Some(ProcessState::SuspendedReady)
        );
        assert_eq!(port.take(), vec![Call::Load(pid)]);

        memoria(&mut scheduler, &mut port, Message::LoadOk { pid }, 61);
        assert_eq!(port.take(), vec![Call::Dispatch(1, pid, 1)]);
    }

    #[test]
    fn sjf_orders_ready_by_remaining_estimate() {
        let mut scheduler = scheduler(AdmissionPolicy::Pmcp, DispatchPolicy::Sjf);
        let mut port = MockPort::default();
        connect_cpu(&mut scheduler, &mut port, 1);
        scheduler.handle(
            KernelEvent::IoConnected {
                instance: 1,
                device: "DISCO".to_string(),
            },
            0,
            &mut port,
        );
        let short = admitted(&mut scheduler, &mut port, 64, 0);
        let long = admitted(&mut scheduler, &mut port, 64, 0);
        // `short` runs 10 ms and blocks: estimate 0.5 * 10 + 0.5 * 100 = 55.
        let io = Message::IoSyscall {
            device: "DISCO".to_string(),
            duration_ms: 5,
            pc: 1,
        };
        cpu(&mut scheduler, &mut port, 1, io, 10);
        assert_eq!(scheduler.processes().pcb(short).burst.estimate, 55.0);
        assert_eq!(scheduler.cpus().running(long), Some(1));
        let third = admitted(&mut scheduler, &mut port, 64, 11);
        scheduler.handle(KernelEvent::IoCompleted { instance: 1, pid: short }, 15, &mut port);

        assert_eq!(
            scheduler.processes().bucket(ProcessState::Ready),
            &std::collections::VecDeque::from([short, third])
        );
    }
}
