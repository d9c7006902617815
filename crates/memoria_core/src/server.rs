//! Memoria's listener: one thread per connection, routed by handshake.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use sim_protocol::handshake::{self, Handshake};
use sim_protocol::{Connection, Message, ProtocolError};
use spin::Mutex;

use crate::manager::{read_program, write_dump, MemoryManager};

/// State shared by every connection thread.
#[derive(Clone)]
pub struct MemoriaServer {
    manager: Arc<Mutex<MemoryManager>>,
    delay: Duration,
}

impl MemoriaServer {
    /// Creates a server around `manager`, answering after `delay`.
    pub fn new(manager: MemoryManager, delay: Duration) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
            delay,
        }
    }

    /// Returns the shared manager handle.
    pub fn manager(&self) -> Arc<Mutex<MemoryManager>> {
        Arc::clone(&self.manager)
    }

    /// Accepts connections until the listener fails.
    pub fn serve(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || server.handle_connection(stream));
                }
                Err(err) => {
                    error!("Accept failed: {}", err);
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream) {
        let mut conn = Connection::new(stream);
        let result = match handshake::accept(&mut conn) {
            Ok(Some(greeting)) => self.route(&mut conn, greeting),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!("Connection dropped: {}", err);
        }
    }

    fn route(&self, conn: &mut Connection, greeting: Handshake) -> Result<(), ProtocolError> {
        match greeting {
            Handshake::CpuDispatch { .. } => {
                let geometry = self.manager.lock().geometry();
                info!(
                    "CPU handshake: page size {}, entries per table {}, levels {}",
                    geometry.page_size, geometry.entries_per_table, geometry.levels
                );
                conn.send(&Message::MemoriaOk {
                    geometry: Some(geometry),
                })?;
                self.serve_cpu(conn)
            }
            Handshake::CpuInterrupt { .. } => {
                conn.send(&Message::MemoriaOk { geometry: None })?;
                while conn.recv()?.is_some() {}
                Ok(())
            }
            Handshake::Kernel => {
                debug!("Kernel handshake");
                conn.send(&Message::MemoriaOk { geometry: None })?;
                if let Some(request) = conn.recv()? {
                    let reply = handle_kernel_request(&self.manager, request, unix_millis());
                    thread::sleep(self.delay);
                    if let Some(reply) = reply {
                        conn.send(&reply)?;
                    }
                }
                Ok(())
            }
            Handshake::Io { device } => {
                warn!("Rejecting I/O device '{}'", device);
                Err(ProtocolError::UnexpectedMessage(sim_protocol::OpCode::IoHandshake))
            }
        }
    }

    fn serve_cpu(&self, conn: &mut Connection) -> Result<(), ProtocolError> {
        while let Some(request) = conn.recv()? {
            let reply = handle_cpu_request(&mut self.manager.lock(), request);
            thread::sleep(self.delay);
            match reply {
                Some(reply) => conn.send(&reply)?,
                None => warn!("Ignoring unexpected CPU message"),
            }
        }
        info!("CPU disconnected");
        Ok(())
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}

/// Answers one request from a CPU session. Returns `None` for messages a CPU
/// should never send.
pub fn handle_cpu_request(manager: &mut MemoryManager, request: Message) -> Option<Message> {
    match request {
        Message::FetchInstruction { pid, pc } => Some(Message::Instruction {
            text: manager.fetch_instruction(pid, pc),
        }),
        Message::PageTableEntryRequest {
            pid,
            table_ref,
            level,
            index,
        } => Some(Message::PageTableEntry {
            value: manager.read_page_table_entry(pid, level, table_ref, index),
        }),
        Message::Read { pid, address, size } => match manager.read_physical(pid, address, size) {
            Ok(data) => Some(Message::ReadResponse { data }),
            Err(err) => {
                error!("PID: {} - Read at {} rejected: {}", pid, address, err);
                Some(Message::AccessRejected { address })
            }
        },
        Message::Write { pid, address, data } => match manager.write_physical(pid, address, &data) {
            Ok(()) => Some(Message::WriteAck),
            Err(err) => {
                error!("PID: {} - Write at {} rejected: {}", pid, address, err);
                Some(Message::AccessRejected { address })
            }
        },
        Message::FreeSpaceRequest => Some(Message::FreeSpace {
            bytes: manager.free_space(),
        }),
        _ => None,
    }
}

/// Answers the single request carried by an ephemeral Kernel connection.
/// Pseudocode reads and dump writes run with the manager unlocked.
pub fn handle_kernel_request(
    manager: &Mutex<MemoryManager>,
    request: Message,
    timestamp: u128,
) -> Option<Message> {
    match request {
        Message::LoadProcess { pid, file, size } => {
            info!("## ({}) - Load requested - file: {} - size: {}", pid, file, size);
            let path = manager.lock().program_path(&file);
            let loaded = read_program(&path)
                .and_then(|instructions| manager.lock().install_process(pid, size, instructions));
            match loaded {
                Ok(_) => {
                    info!("## ({}) - Process loaded", pid);
                    Some(Message::LoadOk { pid })
                }
                Err(err) => {
                    error!("## ({}) - Load failed: {}", pid, err);
                    Some(Message::LoadFail { pid })
                }
            }
        }
        Message::RemoveProcess { pid } => match manager.lock().release_process(pid) {
            Ok(_) => {
                info!("## ({}) - Process removed", pid);
                Some(Message::Removed { pid })
            }
            Err(err) => {
                error!("## ({}) - Remove failed: {}", pid, err);
                Some(Message::ProcessNotFound { pid })
            }
        },
        Message::DumpRequest { pid } => {
            info!("## PID: {} - Memory dump requested", pid);
            let snapshot = manager.lock().dump_snapshot(pid, timestamp);
            match snapshot.and_then(|(path, contents)| write_dump(path, &contents)) {
                Ok(_) => Some(Message::DumpCompleted { pid }),
                Err(err) => {
                    error!("## PID: {} - Dump failed: {}", pid, err);
                    Some(Message::DumpFailed { pid })
                }
            }
        }
        Message::FreeSpaceRequest => Some(Message::FreeSpace {
            bytes: manager.lock().free_space(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_common::PagingGeometry;

    fn manager() -> MemoryManager {
        MemoryManager::new(PagingGeometry::new(32, 4, 2), 256)
    }

    #[test]
    fn cpu_write_then_read_round_trips_through_ram() {
        let mut memory = manager();
        let ack = handle_cpu_request(
            &mut memory,
            Message::Write {
                pid: 1,
                address: 40,
                data: b"hola\0".to_vec(),
            },
        );
        assert_eq!(ack, Some(Message::WriteAck));
        let read = handle_cpu_request(
            &mut memory,
            Message::Read {
                pid: 1,
                address: 40,
                size: 4,
            },
        );
        assert_eq!(
            read,
            Some(Message::ReadResponse {
                data: b"hola".to_vec()
            })
        );
    }

    #[test]
    fn out_of_range_accesses_are_rejected() {
        let mut memory = manager();
        assert_eq!(
            handle_cpu_request(
                &mut memory,
                Message::Write {
                    pid: 1,
                    address: 250,
                    data: vec![7; 8],
                },
            ),
            Some(Message::AccessRejected { address: 250 })
        );
        assert_eq!(
            handle_cpu_request(
                &mut memory,
                Message::Read {
                    pid: 1,
                    address: 250,
                    size: 8,
                },
            ),
            Some(Message::AccessRejected { address: 250 })
        );
        assert_eq!(
            memory.read_physical(1, 248, 8).expect("tail read should succeed"),
            vec![0; 8]
        );
    }

    #[test]
    fn kernel_load_and_dump_leave_the_manager_unlocked() {
        let dir = std::env::temp_dir().join(format!("memoria-server-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir should be created");
        std::fs::write(dir.join("prog.pseudo"), "NOOP\nEXIT\n").expect("pseudocode should be written");
        let memory = Mutex::new(manager().with_instructions_path(&dir).with_dump_path(&dir));
        assert_eq!(
            handle_kernel_request(
                &memory,
                Message::LoadProcess {
                    pid: 6,
                    file: "prog.pseudo".to_string(),
                    size: 64
                },
                0
            ),
            Some(Message::LoadOk { pid: 6 })
        );
        assert!(!memory.is_locked());
        assert_eq!(memory.lock().free_space(), 192);
        assert_eq!(
            handle_kernel_request(&memory, Message::DumpRequest { pid: 6 }, 5),
            Some(Message::DumpCompleted { pid: 6 })
        );
        assert!(!memory.is_locked());
        let dump = std::fs::read(dir.join("6-5.dmp")).expect("dump should be readable");
        assert_eq!(dump.len(), 64);
    }

    #[test]
    fn unknown_pid_fetch_answers_exit() {
        let mut memory = manager();
        assert_eq!(
            handle_cpu_request(&mut memory, Message::FetchInstruction { pid: 4, pc: 0 }),
            Some(Message::Instruction {
                text: "EXIT".to_string()
            })
        );
    }

    #[test]
    fn unknown_pid_page_table_lookup_is_not_found() {
        let mut memory = manager();
        assert_eq!(
            handle_cpu_request(
                &mut memory,
                Message::PageTableEntryRequest {
                    pid: 5,
                    table_ref: 0,
                    level: 1,
                    index: 0
                }
            ),
            Some(Message::PageTableEntry { value: None })
        );
    }

    #[test]
    fn kernel_remove_of_unknown_pid_is_distinct() {
        let memory = Mutex::new(manager());
        assert_eq!(
            handle_kernel_request(&memory, Message::RemoveProcess { pid: 3 }, 0),
            Some(Message::ProcessNotFound { pid: 3 })
        );
    }

    #[test]
    fn kernel_load_without_room_fails() {
        let memory = Mutex::new(manager());
        assert_eq!(
            handle_kernel_request(
                &memory,
                Message::LoadProcess {
                    pid: 2,
                    file: "missing.pseudo".to_string(),
                    size: 1024
                },
                0
            ),
            Some(Message::LoadFail { pid: 2 })
        );
    }

    #[test]
    fn dump_of_unknown_pid_fails() {
        let memory = Mutex::new(manager());
        assert_eq!(
            handle_kernel_request(&memory, Message::DumpRequest { pid: 8 }, 0),
            Some(Message::DumpFailed { pid: 8 })
        );
    }

    #[test]
    fn cpu_messages_are_not_kernel_requests() {
        let memory = Mutex::new(manager());
        assert_eq!(
            handle_kernel_request(&memory, Message::WriteAck, 0),
            None
        );
        assert_eq!(handle_cpu_request(&mut memory.lock(), Message::KernelOk), None);
    }
}
