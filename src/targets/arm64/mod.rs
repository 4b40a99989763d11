//! ARM64 backend: instruction model, encoder, ABI, lowering, register
//! allocation, and finalization.

pub mod abi;
pub mod encode;
pub mod finalize;
pub mod inst;
pub mod lower;
pub mod regalloc;
pub mod regs;

use crate::config::Config;
use crate::errors::CompileError;
use crate::ssa::ir::{Function, Signature};
use crate::ssa::layout::layout_blocks;

use super::{CompiledCode, Machine};

pub struct Arm64Machine;

impl Arm64Machine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Arm64Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for Arm64Machine {
    fn compile_function(
        &self,
        func: &Function,
        sigs: &[Signature],
        config: &Config,
    ) -> Result<CompiledCode, CompileError> {
        let order = layout_blocks(func);
        let mut vcode = lower::lower_function(func, &order, sigs, config)?;
        regalloc::run(&mut vcode)?;
        let code = finalize::finalize(&vcode)?;
        tracing::debug!(func = %func.name, bytes = code.bytes.len(), "compiled function");
        Ok(code)
    }

    fn build_entry_preamble(&self, sig: &Signature) -> Result<CompiledCode, CompileError> {
        let vcode = abi::build_entry_preamble(sig)?;
        finalize::finalize(&vcode)
    }

    fn build_host_stub(&self, sig: &Signature, index: u32) -> Result<CompiledCode, CompileError> {
        let vcode = abi::build_host_stub(sig, index)?;
        finalize::finalize(&vcode)
    }

    fn format_code(&self, code: &CompiledCode) -> String {
        let mut out = String::new();
        for (idx, word) in code.bytes.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            out.push_str(&format!("{:#06x}: {word:08x}\n", idx * 4));
        }
        out
    }
}
