use crate::ProtocolError;

/// Operation codes shared by every service. The discriminants are the wire
/// values; `Error` travels as `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpCode {
    DoNothing = 0,

    CpuDispatchHandshake = 1,
    CpuInterruptHandshake = 2,
    IoHandshake = 3,
    KernelHandshake = 4,

    KernelOk = 5,
    MemoriaOk = 6,

    CpuDispatchToKernelTest = 7,
    CpuInterruptToKernelTest = 8,
    IoToKernelTest = 9,
    KernelToMemoriaTest = 10,
    CpuDispatchToMemoriaTest = 11,
    CpuInterruptToMemoriaTest = 12,

    KernelToIoUseRequest = 13,
    KernelToCpuDispatch = 14,
    KernelToCpuInterrupt = 15,
    KernelToMemoryLoadProcess = 16,
    KernelToMemoryRemoveProcess = 17,
    KernelToMemoryDumpRequest = 18,

    MemoryToKernelLoadOk = 19,
    MemoryToKernelLoadFail = 20,
    MemoryToKernelRemoved = 21,
    MemoryToKernelDumpCompleted = 22,
    MemoryToKernelDumpFail = 23,

    CpuToKernelExit = 24,
    CpuToKernelIo = 25,
    CpuToKernelInitProc = 26,
    CpuToKernelDumpMemory = 27,
    CpuToKernelPreemptionCompleted = 28,

    IoToKernelCompleted = 29,

    CpuToMemoriaFetchInstruction = 30,
    MemoriaToCpuSendInstruction = 31,
    CpuToMemoriaRead = 32,
    MemoriaToCpuReadResponse = 33,
    CpuToMemoriaWrite = 34,
    MemoriaToCpuWriteAck = 35,
    KernelToCpuInitProcess = 36,

    CpuToMemoriaGetPageTableEntry = 37,
    MemoriaToCpuPageTableEntry = 38,
    GetMemoriaFreeSpace = 39,

    MemoryToKernelProcessNotFound = 40,
    CpuToKernelSegmentationFault = 41,
    MemoriaToCpuAccessRejected = 42,

    Error = u32::MAX,
}

impl From<OpCode> for u32 {
    fn from(op: OpCode) -> Self {
        op as u32
    }
}

impl TryFrom<u32> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        let op = match value {
            0 => OpCode::DoNothing,
            1 => OpCode::CpuDispatchHandshake,
            2 => OpCode::CpuInterruptHandshake,
            3 => OpCode::IoHandshake,
            4 => OpCode::KernelHandshake,
            5 => OpCode::KernelOk,
            6 => OpCode::MemoriaOk,
            7 => OpCode::CpuDispatchToKernelTest,
            8 => OpCode::CpuInterruptToKernelTest,
            9 => OpCode::IoToKernelTest,
            10 => OpCode::KernelToMemoriaTest,
            11 => OpCode::CpuDispatchToMemoriaTest,
            12 => OpCode::CpuInterruptToMemoriaTest,
            13 => OpCode::KernelToIoUseRequest,
            14 => OpCode::KernelToCpuDispatch,
            15 => OpCode::KernelToCpuInterrupt,
            16 => OpCode::KernelToMemoryLoadProcess,
            17 => OpCode::KernelToMemoryRemoveProcess,
            18 => OpCode::KernelToMemoryDumpRequest,
            19 => OpCode::MemoryToKernelLoadOk,
            20 => OpCode::MemoryToKernelLoadFail,
            21 => OpCode::MemoryToKernelRemoved,
            22 => OpCode::MemoryToKernelDumpCompleted,
            23 => OpCode::MemoryToKernelDumpFail,
            24 => OpCode::CpuToKernelExit,
            25 => OpCode::CpuToKernelIo,
            26 => OpCode::CpuToKernelInitProc,
            27 => OpCode::CpuToKernelDumpMemory,
            28 => OpCode::CpuToKernelPreemptionCompleted,
            29 => OpCode::IoToKernelCompleted,
            30 => OpCode::CpuToMemoriaFetchInstruction,
            31 => OpCode::MemoriaToCpuSendInstruction,
            32 => OpCode::CpuToMemoriaRead,
            33 => OpCode::MemoriaToCpuReadResponse,
            34 => OpCode::CpuToMemoriaWrite,
            35 => OpCode::MemoriaToCpuWriteAck,
            36 => OpCode::KernelToCpuInitProcess,
            37 => OpCode::CpuToMemoriaGetPageTableEntry,
            38 => OpCode::MemoriaToCpuPageTableEntry,
            39 => OpCode::GetMemoriaFreeSpace,
            40 => OpCode::MemoryToKernelProcessNotFound,
            41 => OpCode::CpuToKernelSegmentationFault,
            42 => OpCode::MemoriaToCpuAccessRejected,
            u32::MAX => OpCode::Error,
            other => return Err(ProtocolError::UnknownOpCode(other)),
        };
        Ok(op)
    }
}
