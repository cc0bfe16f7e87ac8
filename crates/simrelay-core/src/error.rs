//! Error types for simrelay

use thiserror::Error;

use crate::lifecycle::{EntryPoint, LifecycleState};
use crate::rendezvous::Side;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// A broken host integration: something the relay's callers promised not to do.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// A side was released while it was still unblocked.
    #[error("{0} side released twice without an intervening wait")]
    DoubleRelease(Side),

    /// A lifecycle entry point was invoked from the wrong state.
    #[error("{entry} invoked while the relay is {state}")]
    OutOfOrder {
        entry: EntryPoint,
        state: LifecycleState,
    },
}

/// Errors that can occur in the relay
#[derive(Debug, Error)]
pub enum Error {
    /// Callback ordering or rendezvous misuse
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Memory for the argument transfer could not be reserved
    #[error("Unable to allocate memory for {0}")]
    OutOfMemory(&'static str),

    /// The interpreter thread could not be created
    #[error("Failed to spawn interpreter thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Another interpreter is already initialized in this process
    #[error("An interpreter is already live in this process")]
    InterpreterLive,

    /// The interpreter could not be brought up
    #[error("Interpreter failed to start: {0}")]
    Boot(String),

    /// The interpreter thread died while holding control
    #[error("Interpreter thread faulted: {0}")]
    RunnerFaulted(String),

    /// A yield was attempted after the host asked the program to finish
    #[error("Relay is finishing; the program must return")]
    Finishing,

    /// Bad interpreter command line
    #[error("Argument error: {0}")]
    Arguments(String),

    /// Error raised by the interpreted program
    #[error("Script error: {0}")]
    Script(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Errors after which the process must not continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::OutOfMemory(_) | Error::Spawn(_))
    }

    /// Errors that indicate the host violated the callback ordering.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}
