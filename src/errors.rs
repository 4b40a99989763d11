//! Error taxonomy for the runtime.
//!
//! Decode and compile failures are fatal for the module that caused them and
//! leave the rest of the runtime untouched. Traps and exits are produced by
//! generated code through the exit-sequence protocol and surface as typed
//! runtime errors.

use thiserror::Error;

use crate::exec::context::ExitCode;

/// Failure while reading the Wasm binary format.
#[derive(Debug, Clone, Error)]
#[error("decode error at offset {offset:#x}: {message}")]
pub struct DecodeError {
    pub offset: usize,
    pub message: String,
}

impl DecodeError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Failure while compiling a module to native code.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The module is structurally valid Wasm but violates validation rules.
    #[error("validation error: {0}")]
    Validation(String),

    /// An internal invariant was violated. Always a defect in the compiler,
    /// never in the input module.
    #[error("BUG: {0}")]
    Bug(String),
}

impl CompileError {
    pub fn bug(message: impl Into<String>) -> Self {
        Self::Bug(message.into())
    }
}

/// Structured trap kinds derived from the exit code written by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    Unreachable,
    MemoryOutOfBounds,
    TableOutOfBounds,
    CallStackOverflow,
    IndirectCallNull,
    IndirectCallTypeMismatch,
    IntegerDivByZero,
    IntegerOverflow,
    InvalidConversionToInteger,
}

impl TrapKind {
    pub fn from_exit_code(code: ExitCode) -> Option<Self> {
        match code {
            ExitCode::Unreachable => Some(Self::Unreachable),
            ExitCode::MemoryOutOfBounds => Some(Self::MemoryOutOfBounds),
            ExitCode::TableOutOfBounds => Some(Self::TableOutOfBounds),
            ExitCode::CallStackOverflow => Some(Self::CallStackOverflow),
            ExitCode::IndirectCallNull => Some(Self::IndirectCallNull),
            ExitCode::IndirectCallTypeMismatch => Some(Self::IndirectCallTypeMismatch),
            ExitCode::IntegerDivByZero => Some(Self::IntegerDivByZero),
            ExitCode::IntegerOverflow => Some(Self::IntegerOverflow),
            ExitCode::InvalidConversionToInteger => Some(Self::InvalidConversionToInteger),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unreachable => "unreachable",
            Self::MemoryOutOfBounds => "memory out of bounds",
            Self::TableOutOfBounds => "table out of bounds",
            Self::CallStackOverflow => "call stack overflow",
            Self::IndirectCallNull => "indirect call to null table entry",
            Self::IndirectCallTypeMismatch => "indirect call type mismatch",
            Self::IntegerDivByZero => "integer division by zero",
            Self::IntegerOverflow => "integer overflow",
            Self::InvalidConversionToInteger => "invalid conversion to integer",
        };
        write!(f, "{name}")
    }
}

/// Errors surfaced to a host calling into the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The instance this call targeted has been closed.
    #[error("module closed")]
    ModuleClosed,

    /// The guest requested termination with the given code.
    #[error("exit with code {0}")]
    Exit(u32),

    /// Generated code raised a trap.
    #[error("wasm trap: {0}")]
    Trap(TrapKind),

    /// Instantiation-time validation failure (missing import, limit
    /// mismatch, bad argument count, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// Native execution is only available on ARM64 hosts.
    #[error("native execution is not supported on this host architecture")]
    UnsupportedHost,

    #[error("host function error: {0}")]
    Host(String),
}
