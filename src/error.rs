use std::fmt;

/// Errors raised by the interpreter core.
///
/// Most kinds are fatal and propagate out of the run loop. The two checksum
/// kinds are different: `ChecksumMismatch` is a load-time warning the caller
/// reports and then ignores, and `RestoreChecksumMismatch` refuses a restore
/// while play continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Address outside the loaded story image
    OutOfBounds { addr: u32 },
    /// Write at or above the static memory boundary
    ProtectedMemory { addr: u32 },
    /// Decoded instruction with no handler
    UnsupportedOpcode { opcode: u8, pc: u32 },
    /// Story header version outside 1..=5
    UnsupportedVersion(u8),
    /// Header checksum disagrees with the file contents (warning only)
    ChecksumMismatch { stored: u16, computed: u16 },
    /// Save data does not belong to the loaded story; restore refused
    RestoreChecksumMismatch,
    /// Call nesting or evaluation stack exceeded its bound
    StackOverflow,
    /// Pop from an empty evaluation stack
    StackUnderflow,
    /// Object index outside the version's object table
    InvalidObject(u16),
    /// div or mod with a zero divisor
    DivisionByZero,
    /// Malformed story data: tables, text, or routine headers
    CorruptStory(String),
    /// Malformed or truncated save data
    BadSaveData(String),
    /// Collaborator failure: input source, output sink, or persistent store
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds { addr } => {
                write!(f, "memory access out of bounds at {addr:#06x}")
            }
            Error::ProtectedMemory { addr } => {
                write!(f, "write to protected memory at {addr:#06x}")
            }
            Error::UnsupportedOpcode { opcode, pc } => {
                write!(f, "unsupported opcode {opcode:#04x} at pc {pc:#06x}")
            }
            Error::UnsupportedVersion(v) => write!(f, "unsupported story version {v}"),
            Error::ChecksumMismatch { stored, computed } => write!(
                f,
                "header checksum {stored:#06x} does not match file checksum {computed:#06x}"
            ),
            Error::RestoreChecksumMismatch => {
                write!(f, "save data does not match the loaded story")
            }
            Error::StackOverflow => write!(f, "stack overflow"),
            Error::StackUnderflow => write!(f, "stack underflow"),
            Error::InvalidObject(obj) => write!(f, "invalid object number {obj}"),
            Error::DivisionByZero => write!(f, "division by zero"),
            Error::CorruptStory(msg) => write!(f, "corrupt story data: {msg}"),
            Error::BadSaveData(msg) => write!(f, "bad save data: {msg}"),
            Error::Io(msg) => write!(f, "i/o failure: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
