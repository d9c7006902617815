use sim_common::{PagingGeometry, Pid};

use crate::frame::Packet;
use crate::opcode::OpCode;
use crate::ProtocolError;

/// Wire value Memoria answers when a page-table entry does not exist.
pub const ENTRY_NOT_FOUND: u64 = u64::MAX;

/// Typed view of every message exchanged at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// CPU dispatch link greeting. The Kernel needs the id; Memoria does not.
    CpuDispatchHandshake { cpu_id: Option<u32> },
    /// CPU interrupt link greeting.
    CpuInterruptHandshake { cpu_id: Option<u32> },
    IoHandshake { device: String },
    KernelHandshake,
    KernelOk,
    /// Memoria's handshake reply; CPUs receive the paging geometry.
    MemoriaOk { geometry: Option<PagingGeometry> },

    IoUseRequest { pid: Pid, duration_ms: u32 },
    Dispatch { pid: Pid, pc: u32 },
    Interrupt { pid: Pid },
    LoadProcess { pid: Pid, file: String, size: u32 },
    RemoveProcess { pid: Pid },
    DumpRequest { pid: Pid },

    LoadOk { pid: Pid },
    LoadFail { pid: Pid },
    Removed { pid: Pid },
    ProcessNotFound { pid: Pid },
    DumpCompleted { pid: Pid },
    DumpFailed { pid: Pid },

    Exit,
    IoSyscall { device: String, duration_ms: u32, pc: u32 },
    InitProc { file: String, size: u32, pc: u32 },
    DumpMemory { pc: u32 },
    PreemptionCompleted { pc: u32 },
    SegmentationFault { pc: u32 },

    IoCompleted { pid: Pid },

    FetchInstruction { pid: Pid, pc: u32 },
    Instruction { text: String },
    Read { pid: Pid, address: u32, size: u32 },
    ReadResponse { data: Vec<u8> },
    Write { pid: Pid, address: u32, data: Vec<u8> },
    WriteAck,
    /// Memoria refused a physical read or write at `address`.
    AccessRejected { address: u32 },
    PageTableEntryRequest { pid: Pid, table_ref: u64, level: u32, index: u32 },
    /// `None` is sent as [`ENTRY_NOT_FOUND`].
    PageTableEntry { value: Option<u64> },
    FreeSpaceRequest,
    FreeSpace { bytes: u32 },
}

impl Message {
    /// Returns the operation code used on the wire.
    pub fn op_code(&self) -> OpCode {
        match self {
            Message::CpuDispatchHandshake { .. } => OpCode::CpuDispatchHandshake,
            Message::CpuInterruptHandshake { .. } => OpCode::CpuInterruptHandshake,
            Message::IoHandshake { .. } => OpCode::IoHandshake,
            Message::KernelHandshake => OpCode::KernelHandshake,
            Message::KernelOk => OpCode::KernelOk,
            Message::MemoriaOk { .. } => OpCode::MemoriaOk,
            Message::IoUseRequest { .. } => OpCode::KernelToIoUseRequest,
            Message::Dispatch { .. } => OpCode::KernelToCpuDispatch,
            Message::Interrupt { .. } => OpCode::KernelToCpuInterrupt,
            Message::LoadProcess { .. } => OpCode::KernelToMemoryLoadProcess,
            Message::RemoveProcess { .. } => OpCode::KernelToMemoryRemoveProcess,
            Message::DumpRequest { .. } => OpCode::KernelToMemoryDumpRequest,
            Message::LoadOk { .. } => OpCode::MemoryToKernelLoadOk,
            Message::LoadFail { .. } => OpCode::MemoryToKernelLoadFail,
            Message::Removed { .. } => OpCode::MemoryToKernelRemoved,
            Message::ProcessNotFound { .. } => OpCode::MemoryToKernelProcessNotFound,
            Message::DumpCompleted { .. } => OpCode::MemoryToKernelDumpCompleted,
            Message::DumpFailed { .. } => OpCode::MemoryToKernelDumpFail,
            Message::Exit => OpCode::CpuToKernelExit,
            Message::IoSyscall { .. } => OpCode::CpuToKernelIo,
            Message::InitProc { .. } => OpCode::CpuToKernelInitProc,
            Message::DumpMemory { .. } => OpCode::CpuToKernelDumpMemory,
            Message::PreemptionCompleted { .. } => OpCode::CpuToKernelPreemptionCompleted,
            Message::SegmentationFault { .. } => OpCode::CpuToKernelSegmentationFault,
            Message::IoCompleted { .. } => OpCode::IoToKernelCompleted,
            Message::FetchInstruction { .. } => OpCode::CpuToMemoriaFetchInstruction,
            Message::Instruction { .. } => OpCode::MemoriaToCpuSendInstruction,
            Message::Read { .. } => OpCode::CpuToMemoriaRead,
            Message::ReadResponse { .. } => OpCode::MemoriaToCpuReadResponse,
            Message::Write { .. } => OpCode::CpuToMemoriaWrite,
            Message::WriteAck => OpCode::MemoriaToCpuWriteAck,
            Message::AccessRejected { .. } => OpCode::MemoriaToCpuAccessRejected,
            Message::PageTableEntryRequest { .. } => OpCode::CpuToMemoriaGetPageTableEntry,
            Message::PageTableEntry { .. } => OpCode::MemoriaToCpuPageTableEntry,
            Message::FreeSpaceRequest | Message::FreeSpace { .. } => OpCode::GetMemoriaFreeSpace,
        }
    }

    /// Encodes the message into a packet.
    pub fn encode(&self) -> Packet {
        let mut packet = Packet::new(self.op_code());
        match self {
            Message::CpuDispatchHandshake { cpu_id } | Message::CpuInterruptHandshake { cpu_id } => {
                if let Some(cpu_id) = cpu_id {
                    packet.push_u32(*cpu_id);
                }
            }
            Message::IoHandshake { device } => {
                packet.push_str(device);
            }
            Message::KernelHandshake
            | Message::KernelOk
            | Message::Exit
            | Message::WriteAck
            | Message::FreeSpaceRequest => {}
            Message::MemoriaOk { geometry } => {
                if let Some(geometry) = geometry {
                    packet
                        .push_u32(geometry.page_size)
                        .push_u32(geometry.entries_per_table)
                        .push_u32(geometry.levels);
                }
            }
            Message::IoUseRequest { pid, duration_ms } => {
                packet.push_u32(*pid).push_u32(*duration_ms);
            }
            Message::Dispatch { pid, pc } | Message::FetchInstruction { pid, pc } => {
                packet.push_u32(*pid).push_u32(*pc);
            }
            Message::LoadProcess { pid, file, size } => {
                packet.push_u32(*pid).push_str(file).push_u32(*size);
            }
            Message::Interrupt { pid }
            | Message::RemoveProcess { pid }
            | Message::DumpRequest { pid }
            | Message::LoadOk { pid }
            | Message::LoadFail { pid }
            | Message::Removed { pid }
            | Message::ProcessNotFound { pid }
            | Message::DumpCompleted { pid }
            | Message::DumpFailed { pid }
            | Message::IoCompleted { pid } => {
                packet.push_u32(*pid);
            }
            Message::IoSyscall {
                device,
                duration_ms,
                pc,
            } => {
                packet.push_str(device).push_u32(*duration_ms).push_u32(*pc);
            }
            Message::InitProc { file, size, pc } => {
                packet.push_str(file).push_u32(*size).push_u32(*pc);
            }
            Message::DumpMemory { pc }
            | Message::PreemptionCompleted { pc }
            | Message::SegmentationFault { pc } => {
                packet.push_u32(*pc);
            }
            Message::Instruction { text } => {
                packet.push_str(text);
            }
            Message::Read { pid, address, size } => {
                packet.push_u32(*pid).push_u32(*address).push_u32(*size);
            }
            Message::ReadResponse { data } => {
                packet.push_bytes(data);
            }
            Message::Write { pid, address, data } => {
                packet
                    .push_u32(*pid)
                    .push_u32(*address)
                    .push_u32(data.len() as u32)
                    .push_bytes(data);
            }
            Message::PageTableEntryRequest {
                pid,
                table_ref,
                level,
                index,
            } => {
                packet
                    .push_u32(*pid)
                    .push_u64(*table_ref)
                    .push_u32(*level)
                    .push_u32(*index);
            }
            Message::PageTableEntry { value } => {
                packet.push_u64(value.unwrap_or(ENTRY_NOT_FOUND));
            }
            Message::FreeSpace { bytes } => {
                packet.push_u32(*bytes);
            }
            Message::AccessRejected { address } => {
                packet.push_u32(*address);
            }
        }
        packet
    }

    /// Decodes a packet into a typed message.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        let op = packet.op_code()?;
        let mut fields = packet.fields();
        let message = match op {
            OpCode::CpuDispatchHandshake => Message::CpuDispatchHandshake {
                cpu_id: optional_u32(&mut fields, "cpu_id")?,
            },
            OpCode::CpuInterruptHandshake => Message::CpuInterruptHandshake {
                cpu_id: optional_u32(&mut fields, "cpu_id")?,
            },
            OpCode::IoHandshake => Message::IoHandshake {
                device: fields.string("device")?,
            },
            OpCode::KernelHandshake => Message::KernelHandshake,
            OpCode::KernelOk => Message::KernelOk,
            OpCode::MemoriaOk => {
                let geometry = if fields.is_empty() {
                    None
                } else {
                    Some(PagingGeometry::new(
                        fields.u32("page_size")?,
                        fields.u32("entries_per_table")?,
                        fields.u32("levels")?,
                    ))
                };
                Message::MemoriaOk { geometry }
            }
            OpCode::KernelToIoUseRequest => Message::IoUseRequest {
                pid: fields.u32("pid")?,
                duration_ms: fields.u32("duration")?,
            },
            OpCode::KernelToCpuDispatch => Message::Dispatch {
                pid: fields.u32("pid")?,
                pc: fields.u32("pc")?,
            },
            OpCode::KernelToCpuInterrupt => Message::Interrupt {
                pid: fields.u32("pid")?,
            },
            OpCode::KernelToMemoryLoadProcess => Message::LoadProcess {
                pid: fields.u32("pid")?,
                file: fields.string("file")?,
                size: fields.u32("size")?,
            },
            OpCode::KernelToMemoryRemoveProcess => Message::RemoveProcess {
                pid: fields.u32("pid")?,
            },
            OpCode::KernelToMemoryDumpRequest => Message::DumpRequest {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelLoadOk => Message::LoadOk {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelLoadFail => Message::LoadFail {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelRemoved => Message::Removed {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelProcessNotFound => Message::ProcessNotFound {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelDumpCompleted => Message::DumpCompleted {
                pid: fields.u32("pid")?,
            },
            OpCode::MemoryToKernelDumpFail => Message::DumpFailed {
                pid: fields.u32("pid")?,
            },
            OpCode::CpuToKernelExit => Message::Exit,
            OpCode::CpuToKernelIo => Message::IoSyscall {
                device: fields.string("device")?,
                duration_ms: fields.u32("duration")?,
                pc: fields.u32("pc")?,
            },
            OpCode::CpuToKernelInitProc => Message::InitProc {
                file: fields.string("file")?,
                size: fields.u32("size")?,
                pc: fields.u32("pc")?,
            },
            OpCode::CpuToKernelDumpMemory => Message::DumpMemory {
                pc: fields.u32("pc")?,
            },
            OpCode::CpuToKernelPreemptionCompleted => Message::PreemptionCompleted {
                pc: fields.u32("pc")?,
            },
            OpCode::CpuToKernelSegmentationFault => Message::SegmentationFault {
                pc: fields.u32("pc")?,
            },
            OpCode::IoToKernelCompleted => Message::IoCompleted {
                pid: fields.u32("pid")?,
            },
            OpCode::CpuToMemoriaFetchInstruction => Message::FetchInstruction {
                pid: fields.u32("pid")?,
                pc: fields.u32("pc")?,
            },
            OpCode::MemoriaToCpuSendInstruction => Message::Instruction {
                text: fields.string("instruction")?,
            },
            OpCode::CpuToMemoriaRead => Message::Read {
                pid: fields.u32("pid")?,
                address: fields.u32("address")?,
                size: fields.u32("size")?,
            },
            OpCode::MemoriaToCpuReadResponse => Message::ReadResponse {
                data: fields.bytes("data")?.to_vec(),
            },
            OpCode::CpuToMemoriaWrite => {
                let pid = fields.u32("pid")?;
                let address = fields.u32("address")?;
                let size = fields.u32("size")?;
                let data = fields.bytes("data")?.to_vec();
                if data.len() != size as usize {
                    return Err(ProtocolError::InvalidLength("data"));
                }
                Message::Write { pid, address, data }
            }
            OpCode::MemoriaToCpuWriteAck => Message::WriteAck,
            OpCode::MemoriaToCpuAccessRejected => Message::AccessRejected {
                address: fields.u32("address")?,
            },
            OpCode::CpuToMemoriaGetPageTableEntry => Message::PageTableEntryRequest {
                pid: fields.u32("pid")?,
                table_ref: fields.u64("table_ref")?,
                level: fields.u32("level")?,
                index: fields.u32("index")?,
            },
            OpCode::MemoriaToCpuPageTableEntry => {
                let value = fields.u64("entry")?;
                Message::PageTableEntry {
                    value: (value != ENTRY_NOT_FOUND).then_some(value),
                }
            }
            OpCode::GetMemoriaFreeSpace => {
                if fields.is_empty() {
                    Message::FreeSpaceRequest
                } else {
                    Message::FreeSpace {
                        bytes: fields.u32("free_space")?,
                    }
                }
            }
            other => return Err(ProtocolError::UnexpectedMessage(other)),
        };
        Ok(message)
    }
}

fn optional_u32(
    fields: &mut crate::frame::FieldReader<'_>,
    name: &'static str,
) -> Result<Option<u32>, ProtocolError> {
    if fields.is_empty() {
        Ok(None)
    } else {
        fields.u32(name).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(message: Message) -> Message {
        Message::decode(&message.encode()).expect("message should decode")
    }

    #[test]
    fn handshake_cpu_id_is_optional() {
        assert_eq!(
            reencode(Message::CpuDispatchHandshake { cpu_id: Some(2) }),
            Message::CpuDispatchHandshake { cpu_id: Some(2) }
        );
        let bare = Message::CpuDispatchHandshake { cpu_id: None }.encode();
        assert!(bare.payload.is_empty());
        assert_eq!(
            Message::decode(&bare),
            Ok(Message::CpuDispatchHandshake { cpu_id: None })
        );
    }

    #[test]
    fn memoria_ok_carries_geometry_for_cpus() {
        let geometry = PagingGeometry::new(64, 4, 3);
        assert_eq!(
            reencode(Message::MemoriaOk {
                geometry: Some(geometry)
            }),
            Message::MemoriaOk {
                geometry: Some(geometry)
            }
        );
        assert_eq!(
            reencode(Message::MemoriaOk { geometry: None }),
            Message::MemoriaOk { geometry: None }
        );
    }

    #[test]
    fn page_table_entry_maps_sentinel_to_none() {
        let missing = Message::PageTableEntry { value: None }.encode();
        assert_eq!(missing.fields().u64("entry"), Ok(u64::MAX));
        assert_eq!(
            Message::decode(&missing),
            Ok(Message::PageTableEntry { value: None })
        );
        assert_eq!(
            reencode(Message::PageTableEntry { value: Some(12) }),
            Message::PageTableEntry { value: Some(12) }
        );
    }

    #[test]
    fn load_request_field_order_is_pid_file_size() {
        let packet = Message::LoadProcess {
            pid: 4,
            file: "proc1".to_string(),
            size: 256,
        }
        .encode();
        let mut fields = packet.fields();
        assert_eq!(fields.u32("pid"), Ok(4));
        assert_eq!(fields.string("file"), Ok("proc1".to_string()));
        assert_eq!(fields.u32("size"), Ok(256));
    }

    #[test]
    fn write_request_checks_declared_size() {
        let mut packet = Packet::new(OpCode::CpuToMemoriaWrite);
        packet.push_u32(1).push_u32(0).push_u32(5).push_bytes(b"abc");
        assert_eq!(
            Message::decode(&packet),
            Err(ProtocolError::InvalidLength("data"))
        );
    }

    #[test]
    fn free_space_request_and_reply_share_op_code() {
        assert_eq!(reencode(Message::FreeSpaceRequest), Message::FreeSpaceRequest);
        assert_eq!(
            reencode(Message::FreeSpace { bytes: 512 }),
            Message::FreeSpace { bytes: 512 }
        );
    }

    #[test]
    fn syscalls_keep_their_fields() {
        let io = Message::IoSyscall {
            device: "DISCO".to_string(),
            duration_ms: 500,
            pc: 7,
        };
        assert_eq!(reencode(io.clone()), io);
        let init = Message::InitProc {
            file: "child".to_string(),
            size: 64,
            pc: 3,
        };
        assert_eq!(reencode(init.clone()), init);
        assert_eq!(reencode(Message::Exit), Message::Exit);
    }

    #[test]
    fn decode_rejects_test_and_unknown_codes() {
        assert_eq!(
            Message::decode(&Packet::new(OpCode::DoNothing)),
            Err(ProtocolError::UnexpectedMessage(OpCode::DoNothing))
        );
        let unknown = Packet {
            op: 500,
            payload: Vec::new(),
        };
        assert_eq!(
            Message::decode(&unknown),
            Err(ProtocolError::UnknownOpCode(500))
        );
    }
}
