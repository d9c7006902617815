/// Decoded pseudocode instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Noop,
    Write { address: u32, data: String },
    Read { address: u32, size: u32 },
    Goto { target: u32 },
    Io { device: String, duration_ms: u32 },
    InitProc { file: String, size: u32 },
    DumpMemory,
    Exit,
    /// Unrecognized opcode or malformed parameters; carries the raw text.
    Unknown(String),
}

impl Instruction {
    /// Returns true for instructions that hand control back to the Kernel.
    pub fn is_syscall(&self) -> bool {
        matches!(
            self,
            Instruction::Io { .. }
                | Instruction::InitProc { .. }
                | Instruction::DumpMemory
                | Instruction::Exit
        )
    }
}

/// Decodes one line of pseudocode. Tokens are separated by whitespace.
pub fn decode(text: &str) -> Instruction {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let unknown = || Instruction::Unknown(text.to_string());
    let Some((op, params)) = tokens.split_first() else {
        return unknown();
    };
    let number = |index: usize| params.get(index).and_then(|value| value.parse::<u32>().ok());
    let word = |index: usize| params.get(index).map(|value| value.to_string());

    let decoded = match *op {
        "NOOP" => Some(Instruction::Noop),
        "WRITE" => number(0)
            .zip(word(1))
            .map(|(address, data)| Instruction::Write { address, data }),
        "READ" => number(0)
            .zip(number(1))
            .map(|(address, size)| Instruction::Read { address, size }),
        "GOTO" => number(0).map(|target| Instruction::Goto { target }),
        "IO" => word(0)
            .zip(number(1))
            .map(|(device, duration_ms)| Instruction::Io {
                device,
                duration_ms,
            }),
        "INIT_PROC" => word(0)
            .zip(number(1))
            .map(|(file, size)| Instruction::InitProc { file, size }),
        "DUMP_MEMORY" => Some(Instruction::DumpMemory),
        "EXIT" => Some(Instruction::Exit),
        _ => None,
    };
    decoded.unwrap_or_else(unknown)
}
