use outworld_derive::Error;

/// Errors that can occur during VM execution or assembly.
///
/// Execution faults (illegal opcode, code-bound overrun, call-stack misuse)
/// terminate the whole VM, not just the offending channel: they indicate a
/// corrupt or mismatched program, and there is no recovery path beyond the
/// host logging the fault and restarting.
#[derive(Debug, Error)]
pub enum VmError {
    /// Opcode byte outside the dispatch table after the inline-draw checks.
    #[error("illegal opcode 0x{opcode:02X} at offset 0x{offset:04X}")]
    IllegalOpcode { opcode: u8, offset: u16 },
    /// Cursor advanced past the end of the code segment.
    #[error("code read out of bounds: offset {offset}, segment length {len}")]
    CodeOutOfBounds { offset: usize, len: usize },
    /// More than 256 nested calls within one channel turn.
    #[error("call stack overflow on channel {channel} (depth {depth})")]
    CallStackOverflow { channel: u8, depth: usize },
    /// Return executed with no matching call this turn.
    #[error("return with empty call stack on channel {channel}")]
    CallStackUnderflow { channel: u8 },
    /// Channel index operand outside the 64-entry table.
    #[error("channel index {channel} out of range at offset 0x{offset:04X}")]
    InvalidChannel { channel: u8, offset: u16 },
    /// Code segment larger than the 16-bit offset space.
    #[error("code segment of {len} bytes exceeds the 16-bit offset space")]
    SegmentTooLarge { len: usize },
    /// Failed to decode a program image.
    #[error("image decode error: {reason}")]
    ImageError { reason: String },
    /// Failed to decode a VM snapshot.
    #[error("snapshot decode error: {reason}")]
    SnapshotError { reason: String },
    /// Unrecognized instruction mnemonic during assembly.
    #[error("invalid instruction name: {0}")]
    InvalidMnemonic(String),
    /// Wrong number of operands for an instruction.
    #[error("{mnemonic} expects {expected} operands, got {actual}")]
    ArityMismatch {
        mnemonic: String,
        expected: usize,
        actual: usize,
    },
    /// Expected a register operand (e.g., `r0`) but got something else.
    #[error("expected register, got {0}")]
    ExpectedRegister(String),
    /// Register index out of range or malformed.
    #[error("invalid register {0}")]
    InvalidRegister(String),
    /// Operand is not a number, register, or known label.
    #[error("invalid operand {0}")]
    InvalidOperand(String),
    /// Numeric operand does not fit its encoded width.
    #[error("operand {value} does not fit in {width} bits")]
    OperandOutOfRange { value: i64, width: u8 },
    /// Label defined more than once.
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    /// Reference to undefined label.
    #[error("undefined label: {0}")]
    UndefinedLabel(String),
    /// Assembly error with line number context.
    #[error("line {line}: {source}")]
    AssemblyError { line: usize, source: String },
    /// File I/O error during assembly.
    #[error("io error: {0}")]
    IoError(String),
}
