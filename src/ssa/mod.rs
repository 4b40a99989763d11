//! SSA intermediate representation: data model, builder, analyses, passes.

pub mod analysis;
pub mod builder;
pub mod ir;
pub mod layout;
pub mod opt;
pub mod types;
pub mod verify;

pub use builder::{FunctionBuilder, Var};
pub use ir::*;
pub use types::Type;
