//! Socket-backed implementations of the CPU's Kernel and Memoria links.

use std::io::{Read, Write};
use std::thread::{self, JoinHandle};

use log::{error, info, warn};
use sim_common::{PhysAddr, Pid};
use sim_protocol::{Connection, Message, ProtocolError};

use crate::cycle::{Cpu, InterruptLatch, KernelLink};
use crate::mmu::MemoryPort;
use crate::{CpuError, MmuError};

fn unexpected(message: Message) -> ProtocolError {
    ProtocolError::UnexpectedMessage(message.op_code())
}

impl<S: Read + Write> MemoryPort for Connection<S> {
    fn fetch_instruction(&mut self, pid: Pid, pc: u32) -> Result<String, ProtocolError> {
        match self.request(&Message::FetchInstruction { pid, pc })? {
            Message::Instruction { text } => Ok(text),
            other => Err(unexpected(other)),
        }
    }

    fn page_table_entry(
        &mut self,
        pid: Pid,
        level: u32,
        table_ref: u64,
        index: u32,
    ) -> Result<Option<u64>, ProtocolError> {
        let request = Message::PageTableEntryRequest {
            pid,
            table_ref,
            level,
            index,
        };
        match self.request(&request)? {
            Message::PageTableEntry { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn read(&mut self, pid: Pid, address: PhysAddr, size: u32) -> Result<Vec<u8>, MmuError> {
        match self.request(&Message::Read { pid, address, size })? {
            Message::ReadResponse { data } => Ok(data),
            Message::AccessRejected { address } => Err(MmuError::Rejected { address }),
            other => Err(unexpected(other).into()),
        }
    }

    fn write(&mut self, pid: Pid, address: PhysAddr, data: &[u8]) -> Result<(), MmuError> {
        let request = Message::Write {
            pid,
            address,
            data: data.to_vec(),
        };
        match self.request(&request)? {
            Message::WriteAck => Ok(()),
            Message::AccessRejected { address } => Err(MmuError::Rejected { address }),
            other => Err(unexpected(other).into()),
        }
    }
}

impl<S: Read + Write> KernelLink for Connection<S> {
    fn notify(&mut self, message: Message) -> Result<(), ProtocolError> {
        self.send(&message)
    }
}

/// Reads interrupts from the Kernel and raises them on `latch` until the
/// link closes.
pub fn listen_interrupts<S: Read + Write>(
    conn: &mut Connection<S>,
    latch: &InterruptLatch,
) -> Result<(), ProtocolError> {
    while let Some(message) = conn.recv()? {
        match message {
            Message::Interrupt { pid } => {
                info!("## Interrupt received for PID {}", pid);
                latch.raise(pid);
            }
            other => warn!("Ignoring {:?} on the interrupt link", other.op_code()),
        }
    }
    info!("Kernel closed the interrupt link");
    Ok(())
}

/// Spawns [`listen_interrupts`] on its own thread.
pub fn spawn_interrupt_listener<S>(mut conn: Connection<S>, latch: InterruptLatch) -> JoinHandle<()>
where
    S: Read + Write + Send + 'static,
{
    thread::spawn(move || {
        if let Err(err) = listen_interrupts(&mut conn, &latch) {
            error!("Interrupt link failed: {}", err);
        }
    })
}

/// Runs every context the Kernel dispatches until the dispatch link closes.
pub fn serve_dispatch<S, M>(conn: &mut Connection<S>, cpu: &mut Cpu<M>) -> Result<(), CpuError>
where
    S: Read + Write,
    M: MemoryPort,
{
    while let Some(message) = conn.recv()? {
        match message {
            Message::Dispatch { pid, pc } => {
                let end = cpu.run(conn, pid, pc)?;
                info!("CPU {}: PID {} left the CPU ({:?})", cpu.id(), pid, end);
            }
            other => warn!("Ignoring {:?} on the dispatch link", other.op_code()),
        }
    }
    info!("Kernel closed the dispatch link");
    Ok(())
}
