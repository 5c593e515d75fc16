// Closed error taxonomy shared across the player. Every fallible
// subsystem returns one of these kinds; the orchestrator propagates them
// upward and `main` maps them to a non-zero exit code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// An index or size argument fell outside its declared bounds.
    #[error("value out of range: {0}")]
    Range(String),

    /// A caller-supplied precondition failed (e.g. a zero baud rate).
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    /// An underlying I/O call failed or returned short.
    #[error("I/O error: {0}")]
    Syscall(#[from] std::io::Error),

    /// A worker thread could not be spawned or joined.
    #[error("thread error: {0}")]
    Thread(String),

    /// The zstd library reported a decompression failure.
    #[error("zstd decompression error: {0}")]
    Zstd(String),

    /// The audio subsystem failed to initialize.
    #[error("audio init error: {0}")]
    AudioInit(String),

    /// Audio playback failed after initialization.
    #[error("audio playback error: {0}")]
    AudioPlay(String),

    /// Invalid FSEQ header, variable table, or compression block data.
    #[error("decode error: {0}")]
    Decode(String),

    /// Invalid JSON or channel map schema.
    #[error("invalid channel map: {0}")]
    InvalidFormat(String),

    /// The named serial device does not exist.
    #[error("no serial device: {0}")]
    NoSerialDevice(String),

    /// The serial device could not be opened or configured.
    #[error("serial init error: {0}")]
    SerialInit(String),

    /// The requested compression scheme is not supported for playback.
    #[error("unsupported compression: {0}")]
    Unsupported(String),
}
