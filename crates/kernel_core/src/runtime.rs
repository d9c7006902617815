//! Sockets and threads around the scheduler. Connection threads only read
//! and forward; every table is touched by the event loop alone.

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, info, warn};
use sim_common::{milliseconds, Pid};
use sim_protocol::{handshake, Connection, Handshake, Message, ProtocolError};

use crate::config::KernelConfig;
use crate::cpus::CpuLink;
use crate::io::InstanceId;
use crate::scheduler::{KernelEvent, KernelPort, Scheduler};

/// What connection threads post to the event loop.
pub enum Inbound {
    Event(KernelEvent),
    /// Write half of a freshly greeted CPU link.
    AttachCpu {
        cpu: u32,
        link: CpuLink,
        conn: Connection,
    },
    /// Write half of a freshly greeted I/O instance.
    AttachIo {
        instance: InstanceId,
        device: String,
        conn: Connection,
    },
}

/// Sends one request to Memoria over its own connection and returns the
/// reply.
pub fn ask_memoria(ip: &str, port: u16, request: &Message) -> Result<Message, ProtocolError> {
    let mut conn = Connection::connect((ip, port))?;
    handshake::kernel_to_memoria(&mut conn)?;
    let reply = conn.request(request)?;
    conn.shutdown();
    Ok(reply)
}

/// [`KernelPort`] backed by the live sockets.
pub struct SocketPort {
    memoria_ip: String,
    memoria_port: u16,
    inbound: Sender<Inbound>,
    dispatch: BTreeMap<u32, Connection>,
    interrupt: BTreeMap<u32, Connection>,
    io: BTreeMap<InstanceId, Connection>,
}

impl SocketPort {
    fn new(config: &KernelConfig, inbound: Sender<Inbound>) -> Self {
        Self {
            memoria_ip: config.memoria_ip.clone(),
            memoria_port: config.memoria_port,
            inbound,
            dispatch: BTreeMap::new(),
            interrupt: BTreeMap::new(),
            io: BTreeMap::new(),
        }
    }

    /// Runs a Memoria request on a worker thread. `fallback` is posted as
    /// the reply if Memoria cannot be reached.
    fn ask_in_background(&self, request: Message, fallback: Message) {
        let ip = self.memoria_ip.clone();
        let port = self.memoria_port;
        let inbound = self.inbound.clone();
        thread::spawn(move || {
            let reply = match ask_memoria(&ip, port, &request) {
                Ok(reply) => reply,
                Err(err) => {
                    error!("Memoria request {:?} failed: {}", request.op_code(), err);
                    fallback
                }
            };
            let _ = inbound.send(Inbound::Event(KernelEvent::FromMemoria(reply)));
        });
    }
}

fn link<'a, K: Ord>(
    links: &'a mut BTreeMap<K, Connection>,
    key: &K,
) -> Result<&'a mut Connection, ProtocolError> {
    links.get_mut(key).ok_or(ProtocolError::Closed)
}

impl KernelPort for SocketPort {
    fn dispatch(&mut self, cpu: u32, pid: Pid, pc: u32) -> Result<(), ProtocolError> {
        link(&mut self.dispatch, &cpu)?.send(&Message::Dispatch { pid, pc })
    }

    fn interrupt(&mut self, cpu: u32, pid: Pid) -> Result<(), ProtocolError> {
        link(&mut self.interrupt, &cpu)?.send(&Message::Interrupt { pid })
    }

    fn start_io(
        &mut self,
        instance: InstanceId,
        pid: Pid,
        duration_ms: u32,
    ) -> Result<(), ProtocolError> {
        link(&mut self.io, &instance)?.send(&Message::IoUseRequest { pid, duration_ms })
    }

    fn load_process(&mut self, pid: Pid, file: &str, size: u32) {
        let request = Message::LoadProcess {
            pid,
            file: file.to_string(),
            size,
        };
        self.ask_in_background(request, Message::LoadFail { pid });
    }

    fn remove_process(&mut self, pid: Pid) {
        self.ask_in_background(
            Message::RemoveProcess { pid },
            Message::ProcessNotFound { pid },
        );
    }

    fn dump_memory(&mut self, pid: Pid) {
        self.ask_in_background(Message::DumpRequest { pid }, Message::DumpFailed { pid });
    }
}

/// The scheduler plus its sockets, driven by one inbound channel.
pub struct KernelRuntime {
    scheduler: Scheduler,
    port: SocketPort,
    inbound: Receiver<Inbound>,
    sender: Sender<Inbound>,
    instances: Arc<AtomicU64>,
}

impl KernelRuntime {
    /// Creates the runtime; nothing runs until [`KernelRuntime::run`].
    pub fn new(config: &KernelConfig) -> Self {
        let (sender, inbound) = mpsc::channel();
        Self {
            scheduler: Scheduler::new(config.scheduler),
            port: SocketPort::new(config, sender.clone()),
            inbound,
            sender,
            instances: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a handle for posting events.
    pub fn sender(&self) -> Sender<Inbound> {
        self.sender.clone()
    }

    /// Accepts peers on `listener` on a background thread.
    pub fn listen(&self, listener: TcpListener) -> JoinHandle<()> {
        let sender = self.sender.clone();
        let instances = Arc::clone(&self.instances);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        error!("Accept failed: {}", err);
                        continue;
                    }
                };
                let sender = sender.clone();
                let instances = Arc::clone(&instances);
                thread::spawn(move || {
                    let conn = Connection::new(stream);
                    if let Err(err) = serve_connection(conn, &sender, &instances) {
                        warn!("Connection ended with error: {}", err);
                    }
                });
            }
        })
    }

    /// Applies inbound events until every sender is gone.
    pub fn run(self) {
        let KernelRuntime {
            mut scheduler,
            mut port,
            inbound,
            sender,
            ..
        } = self;
        drop(sender);
        for message in inbound.iter() {
            let event = match message {
                Inbound::Event(event) => event,
                Inbound::AttachCpu { cpu, link, conn } => {
                    match link {
                        CpuLink::Dispatch => port.dispatch.insert(cpu, conn),
                        CpuLink::Interrupt => port.interrupt.insert(cpu, conn),
                    };
                    KernelEvent::CpuConnected { cpu, link }
                }
                Inbound::AttachIo {
                    instance,
                    device,
                    conn,
                } => {
                    port.io.insert(instance, conn);
                    KernelEvent::IoConnected { instance, device }
                }
            };
            match &event {
                KernelEvent::CpuDisconnected { cpu, link } => {
                    match link {
                        CpuLink::Dispatch => port.dispatch.remove(cpu),
                        CpuLink::Interrupt => port.interrupt.remove(cpu),
                    };
                }
                KernelEvent::IoDisconnected { instance } => {
                    port.io.remove(instance);
                }
                _ => {}
            }
            scheduler.handle(event, milliseconds(), &mut port);
        }
        info!("Kernel event loop stopped");
    }
}

fn post(sender: &Sender<Inbound>, event: KernelEvent) {
    let _ = sender.send(Inbound::Event(event));
}

fn serve_connection(
    mut conn: Connection,
    sender: &Sender<Inbound>,
    instances: &AtomicU64,
) -> Result<(), ProtocolError> {
    let peer = conn.peer();
    match handshake::accept(&mut conn)? {
        Some(Handshake::CpuDispatch { cpu_id: Some(cpu) }) => {
            serve_cpu(conn, cpu, CpuLink::Dispatch, sender)
        }
        Some(Handshake::CpuInterrupt { cpu_id: Some(cpu) }) => {
            serve_cpu(conn, cpu, CpuLink::Interrupt, sender)
        }
        Some(Handshake::Io { device }) => {
            let instance = instances.fetch_add(1, Ordering::Relaxed);
            serve_io(conn, device, instance, sender)
        }
        Some(other) => {
            warn!("Rejecting {:?} from {}", other, peer);
            Ok(())
        }
        None => Ok(()),
    }
}

fn serve_cpu(
    mut conn: Connection,
    cpu: u32,
    link: CpuLink,
    sender: &Sender<Inbound>,
) -> Result<(), ProtocolError> {
    conn.send(&Message::KernelOk)?;
    info!("CPU {} connected its {:?} link", cpu, link);
    let _ = sender.send(Inbound::AttachCpu {
        cpu,
        link,
        conn: conn.try_clone()?,
    });
    let result = loop {
        match conn.recv() {
            Ok(Some(message)) if link == CpuLink::Dispatch => {
                post(sender, KernelEvent::FromCpu { cpu, message })
            }
            Ok(Some(message)) => {
                warn!("Ignoring {:?} on CPU {} interrupt link", message.op_code(), cpu)
            }
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    info!("CPU {} closed its {:?} link", cpu, link);
    post(sender, KernelEvent::CpuDisconnected { cpu, link });
    result
}

fn serve_io(
    mut conn: Connection,
    device: String,
    instance: InstanceId,
    sender: &Sender<Inbound>,
) -> Result<(), ProtocolError> {
    conn.send(&Message::KernelOk)?;
    info!("I/O device {} connected as instance {}", device, instance);
    let _ = sender.send(Inbound::AttachIo {
        instance,
        device: device.clone(),
        conn: conn.try_clone()?,
    });
    let result = loop {
        match conn.recv() {
            Ok(Some(Message::IoCompleted { pid })) => {
                post(sender, KernelEvent::IoCompleted { instance, pid })
            }
            Ok(Some(message)) => warn!(
                "Ignoring {:?} from I/O device {}",
                message.op_code(),
                device
            ),
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        }
    };
    info!("I/O device {} instance {} disconnected", device, instance);
    post(sender, KernelEvent::IoDisconnected { instance });
    result
}
