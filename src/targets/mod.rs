//! Target backends.
//!
//! The frontend and SSA layer are architecture-neutral; everything
//! ISA-specific sits behind [`Machine`]. ARM64 is the only implementation
//! today; an x86-64 machine would slot in behind the same capability.

pub mod arm64;

use crate::config::Config;
use crate::errors::CompileError;
use crate::ssa::ir::{Function, Signature};

/// Per-function compilation output: relocatable bytes plus the fixups the
/// module linker must resolve against other functions in the segment.
#[derive(Debug, Clone, Default)]
pub struct CompiledCode {
    pub bytes: Vec<u8>,
    /// `(byte offset of the BL word, callee function index)` pairs.
    pub call_fixups: Vec<(u32, u32)>,
}

/// The machine capability: lower SSA, allocate registers, finalize, encode.
pub trait Machine {
    /// Compiles one SSA function to relocatable machine code. `sigs` is the
    /// module's canonical signature table, indexed by the `sig` field of
    /// call instructions.
    fn compile_function(
        &self,
        func: &Function,
        sigs: &[Signature],
        config: &Config,
    ) -> Result<CompiledCode, CompileError>;

    /// Builds the host-side entry trampoline for a signature: saves host
    /// state into the execution context, switches stacks, scatters the
    /// param buffer, calls, gathers results back.
    fn build_entry_preamble(&self, sig: &Signature) -> Result<CompiledCode, CompileError>;

    /// Builds the stub that bridges the native calling convention to the
    /// runtime's host-call dispatcher for one host function. `index` is the
    /// function's index within its host module, recorded in the execution
    /// context for the dispatcher.
    fn build_host_stub(&self, sig: &Signature, index: u32) -> Result<CompiledCode, CompileError>;

    /// Formats compiled code for dump output.
    fn format_code(&self, code: &CompiledCode) -> String;
}
