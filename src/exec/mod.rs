//! Execution support: context layouts shared with generated code, the code
//! segment, executable memory, and linear memory.

pub mod code;
pub mod context;
pub mod memory;

pub use code::{CodeSegment, ExecutableCode};
pub use context::{ExecContext, ExitCode};
pub use memory::{GuestStack, LinearMemory};
