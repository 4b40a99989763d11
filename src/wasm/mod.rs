//! Wasm binary format: module model, reader, decoder.

pub mod decode;
pub mod module;
pub mod reader;
pub mod types;

pub use decode::decode_module;
pub use module::*;
pub use reader::Reader;
pub use types::*;
