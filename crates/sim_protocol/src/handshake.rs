use std::io::{Read, Write};

use sim_common::PagingGeometry;

use crate::connection::Connection;
use crate::message::Message;
use crate::ProtocolError;

/// First message a server receives on a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    CpuDispatch { cpu_id: Option<u32> },
    CpuInterrupt { cpu_id: Option<u32> },
    Io { device: String },
    Kernel,
}

/// Reads the greeting of a new peer. Returns `Ok(None)` if the peer hung up
/// before greeting.
pub fn accept<S: Read + Write>(
    conn: &mut Connection<S>,
) -> Result<Option<Handshake>, ProtocolError> {
    let message = match conn.recv()? {
        Some(message) => message,
        None => return Ok(None),
    };
    let handshake = match message {
        Message::CpuDispatchHandshake { cpu_id } => Handshake::CpuDispatch { cpu_id },
        Message::CpuInterruptHandshake { cpu_id } => Handshake::CpuInterrupt { cpu_id },
        Message::IoHandshake { device } => Handshake::Io { device },
        Message::KernelHandshake => Handshake::Kernel,
        other => return Err(ProtocolError::UnexpectedMessage(other.op_code())),
    };
    Ok(Some(handshake))
}

fn expect_kernel_ok<S: Read + Write>(
    conn: &mut Connection<S>,
    greeting: &Message,
) -> Result<(), ProtocolError> {
    match conn.request(greeting)? {
        Message::KernelOk => Ok(()),
        other => Err(ProtocolError::UnexpectedMessage(other.op_code())),
    }
}

/// CPU dispatch link greeting towards the Kernel.
pub fn cpu_dispatch_to_kernel<S: Read + Write>(
    conn: &mut Connection<S>,
    cpu_id: u32,
) -> Result<(), ProtocolError> {
    expect_kernel_ok(conn, &Message::CpuDispatchHandshake { cpu_id: Some(cpu_id) })
}

/// CPU interrupt link greeting towards the Kernel.
pub fn cpu_interrupt_to_kernel<S: Read + Write>(
    conn: &mut Connection<S>,
    cpu_id: u32,
) -> Result<(), ProtocolError> {
    expect_kernel_ok(conn, &Message::CpuInterruptHandshake { cpu_id: Some(cpu_id) })
}

/// I/O device greeting towards the Kernel.
pub fn io_to_kernel<S: Read + Write>(
    conn: &mut Connection<S>,
    device: &str,
) -> Result<(), ProtocolError> {
    expect_kernel_ok(
        conn,
        &Message::IoHandshake {
            device: device.to_string(),
        },
    )
}

/// CPU greeting towards Memoria; returns the paging geometry.
pub fn cpu_to_memoria<S: Read + Write>(
    conn: &mut Connection<S>,
) -> Result<PagingGeometry, ProtocolError> {
    match conn.request(&Message::CpuDispatchHandshake { cpu_id: None })? {
        Message::MemoriaOk {
            geometry: Some(geometry),
        } => Ok(geometry),
        Message::MemoriaOk { geometry: None } => Err(ProtocolError::MissingField("page_size")),
        other => Err(ProtocolError::UnexpectedMessage(other.op_code())),
    }
}

/// Kernel greeting towards Memoria, sent on every ephemeral connection.
pub fn kernel_to_memoria<S: Read + Write>(conn: &mut Connection<S>) -> Result<(), ProtocolError> {
    match conn.request(&Message::KernelHandshake)? {
        Message::MemoriaOk { .. } => Ok(()),
        other => Err(ProtocolError::UnexpectedMessage(other.op_code())),
    }
}
