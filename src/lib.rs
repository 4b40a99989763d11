pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod frontend;
pub mod ssa;
pub mod targets;
pub mod wasm;

pub use config::{Config, ModuleConfig};
pub use engine::{CompiledModule, Function, HostModuleBuilder, Instance, Runtime};
pub use errors::{CompileError, DecodeError, RuntimeError, TrapKind};
