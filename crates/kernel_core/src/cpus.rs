use log::info;
use sim_common::Pid;

/// The two sockets a CPU opens towards the Kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuLink {
    Dispatch,
    Interrupt,
}

/// Kernel-side view of one CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuSlot {
    pub id: u32,
    pub dispatch: bool,
    pub interrupt: bool,
    /// An interrupt was sent and the CPU has not yielded yet.
    pub preempted: bool,
    pub running: Option<Pid>,
}

impl CpuSlot {
    fn new(id: u32) -> Self {
        Self {
            id,
            dispatch: false,
            interrupt: false,
            preempted: false,
            running: None,
        }
    }

    /// Returns true once both links are registered.
    pub fn is_connected(&self) -> bool {
        self.dispatch && self.interrupt
    }

    /// Returns true if the CPU can take a context now.
    pub fn is_free(&self) -> bool {
        self.is_connected() && self.running.is_none()
    }
}

/// CPUs in registration order.
#[derive(Debug, Default)]
pub struct CpuRegistry {
    cpus: Vec<CpuSlot>,
}

impl CpuRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one link of CPU `id`. Returns true when the CPU just became
    /// fully connected.
    pub fn register(&mut self, id: u32, link: CpuLink) -> bool {
        let position = match self.cpus.iter().position(|cpu| cpu.id == id) {
            Some(position) => position,
            None => {
                self.cpus.push(CpuSlot::new(id));
                self.cpus.len() - 1
            }
        };
        let slot = &mut self.cpus[position];
        let was_connected = slot.is_connected();
        match link {
            CpuLink::Dispatch => slot.dispatch = true,
            CpuLink::Interrupt => slot.interrupt = true,
        }
        info!(
            "CPU {}: {:?} link registered (dispatch: {}, interrupt: {})",
            id, link, slot.dispatch, slot.interrupt
        );
        !was_connected && slot.is_connected()
    }

    /// Drops one link of CPU `id`. Returns the pid it was running when the
    /// dispatch link is lost; that pid can no longer report back.
    pub fn unregister(&mut self, id: u32, link: CpuLink) -> Option<Pid> {
        let position = self.cpus.iter().position(|cpu| cpu.id == id)?;
        let slot = &mut self.cpus[position];
        let orphan = match link {
            CpuLink::Dispatch => {
                slot.dispatch = false;
                slot.preempted = false;
                slot.running.take()
            }
            CpuLink::Interrupt => {
                slot.interrupt = false;
                None
            }
        };
        if !slot.dispatch && !slot.interrupt {
            self.cpus.remove(position);
            info!("CPU {}: removed", id);
        }
        orphan
    }

    /// Returns the CPU with `id`.
    pub fn get(&self, id: u32) -> Option<&CpuSlot> {
        self.cpus.iter().find(|cpu| cpu.id == id)
    }

    /// Returns the first free CPU.
    pub fn find_free(&self) -> Option<u32> {
        self.cpus.iter().find(|cpu| cpu.is_free()).map(|cpu| cpu.id)
    }

    /// Returns the CPU running `pid`.
    pub fn running(&self, pid: Pid) -> Option<u32> {
        self.cpus
            .iter()
            .find(|cpu| cpu.running == Some(pid))
            .map(|cpu| cpu.id)
    }

    /// Returns `(cpu, pid)` for every busy CPU without a pending interrupt.
    pub fn preemptible(&self) -> Vec<(u32, Pid)> {
        self.cpus
            .iter()
            .filter(|cpu| !cpu.preempted)
            .filter_map(|cpu| cpu.running.map(|pid| (cpu.id, pid)))
            .collect()
    }

    /// Records that `pid` now runs on CPU `id`.
    pub fn assign(&mut self, id: u32, pid: Pid) {
        if let Some(slot) = self.cpus.iter_mut().find(|cpu| cpu.id == id) {
            slot.running = Some(pid);
        }
    }

    /// Marks CPU `id` as interrupted.
    pub fn mark_preempted(&mut self, id: u32) {
        if let Some(slot) = self.cpus.iter_mut().find(|cpu| cpu.id == id) {
            slot.preempted = true;
        }
    }

    /// Frees CPU `id` and clears its interrupt flag. Returns the pid it ran.
    pub fn release(&mut self, id: u32) -> Option<Pid> {
        let slot = self.cpus.iter_mut().find(|cpu| cpu.id == id)?;
        slot.preempted = false;
        slot.running.take()
    }

    /// Returns the number of known CPUs.
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Returns true if no CPU is known.
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_is_usable_after_both_links() {
        let mut cpus = CpuRegistry::new();
        assert!(!cpus.register(1, CpuLink::Interrupt));
        assert_eq!(cpus.find_free(), None);
        assert!(cpus.register(1, CpuLink::Dispatch));
        assert_eq!(cpus.find_free(), Some(1));
        assert!(!cpus.register(1, CpuLink::Dispatch));
    }

    #[test]
    fn assign_and_release_track_running_pid() {
        let mut cpus = CpuRegistry::new();
        cpus.register(2, CpuLink::Dispatch);
        cpus.register(2, CpuLink::Interrupt);
        cpus.assign(2, 7);
        cpus.mark_preempted(2);
        assert_eq!(cpus.running(7), Some(2));
        assert_eq!(cpus.find_free(), None);
        assert!(cpus.preemptible().is_empty());

        assert_eq!(cpus.release(2), Some(7));
        let slot = cpus.get(2).expect("cpu should exist");
        assert!(!slot.preempted);
        assert!(slot.is_free());
    }

    #[test]
    fn losing_dispatch_link_orphans_running_pid() {
        let mut cpus = CpuRegistry::new();
        cpus.register(3, CpuLink::Dispatch);
        cpus.register(3, CpuLink::Interrupt);
        cpus.assign(3, 4);
        assert_eq!(cpus.unregister(3, CpuLink::Dispatch), Some(4));
        assert_eq!(cpus.len(), 1);
        assert_eq!(cpus.unregister(3, CpuLink::Interrupt), None);
        assert!(cpus.is_empty());
    }
}
