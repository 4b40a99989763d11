//! Wasm binary decoder.
//!
//! Decodes MVP modules plus the encodings added by bulk-memory,
//! reference-types, multi-value, and simd128. Validation here is structural
//! (section order, counts, index ranges); operand-stack typing is enforced by
//! the frontend when bodies are translated.

use std::sync::Arc;

use crate::errors::DecodeError;

use super::module::*;
use super::reader::Reader;
use super::types::*;

const MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

const SECTION_CUSTOM: u8 = 0;
const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_START: u8 = 8;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_DATA_COUNT: u8 = 12;

/// Decodes a complete module from its binary representation.
pub fn decode_module(bytes: &[u8]) -> Result<Module, DecodeError> {
    let shared: Arc<[u8]> = Arc::from(bytes.to_vec().into_boxed_slice());
    let mut reader = Reader::new(bytes);

    if reader.bytes(4)? != MAGIC {
        return Err(DecodeError::new(0, "bad magic number"));
    }
    if reader.bytes(4)? != VERSION {
        return Err(DecodeError::new(4, "unsupported version"));
    }

    let mut module = Module {
        bytes: shared,
        ..Module::default()
    };
    let mut last_section = 0u8;

    while !reader.is_empty() {
        let section_offset = reader.pos();
        let id = reader.byte()?;
        let size = reader.u32_leb()? as usize;
        let body_start = reader.pos();
        if reader.remaining() < size {
            return Err(DecodeError::new(section_offset, "section size past end"));
        }

        if id != SECTION_CUSTOM {
            if id <= last_section {
                return Err(DecodeError::new(
                    section_offset,
                    format!("section {id} out of order"),
                ));
            }
            // The data-count section sits between element and code.
            last_section = if id == SECTION_DATA_COUNT { SECTION_ELEMENT } else { id };
        }

        match id {
            SECTION_CUSTOM => reader.skip(size)?,
            SECTION_TYPE => type_section(&mut reader, &mut module)?,
            SECTION_IMPORT => import_section(&mut reader, &mut module)?,
            SECTION_FUNCTION => function_section(&mut reader, &mut module)?,
            SECTION_TABLE => table_section(&mut reader, &mut module)?,
            SECTION_MEMORY => memory_section(&mut reader, &mut module)?,
            SECTION_GLOBAL => global_section(&mut reader, &mut module)?,
            SECTION_EXPORT => export_section(&mut reader, &mut module)?,
            SECTION_START => {
                module.start = Some(reader.u32_leb()?);
            }
            SECTION_ELEMENT => element_section(&mut reader, &mut module)?,
            SECTION_CODE => code_section(&mut reader, &mut module)?,
            SECTION_DATA => data_section(&mut reader, &mut module)?,
            SECTION_DATA_COUNT => {
                module.data_count = Some(reader.u32_leb()?);
            }
            _ => {
                return Err(DecodeError::new(
                    section_offset,
                    format!("unknown section id {id}"),
                ));
            }
        }

        if reader.pos() != body_start + size {
            return Err(DecodeError::new(
                reader.pos(),
                format!("section {id} size mismatch"),
            ));
        }
    }

    check_module(&module)?;
    tracing::debug!(
        types = module.types.len(),
        funcs = module.num_funcs(),
        imports = module.imports.len(),
        exports = module.exports.len(),
        "decoded module"
    );
    Ok(module)
}

fn val_type(reader: &mut Reader) -> Result<ValType, DecodeError> {
    let offset = reader.pos();
    let byte = reader.byte()?;
    ValType::from_byte(byte)
        .ok_or_else(|| DecodeError::new(offset, format!("invalid value type {byte:#x}")))
}

fn limits(reader: &mut Reader) -> Result<Limits, DecodeError> {
    let offset = reader.pos();
    let flag = reader.byte()?;
    match flag {
        0x00 => Ok(Limits {
            min: reader.u32_leb()?,
            max: None,
        }),
        0x01 => {
            let min = reader.u32_leb()?;
            let max = reader.u32_leb()?;
            if max < min {
                return Err(DecodeError::new(offset, "limits max below min"));
            }
            Ok(Limits {
                min,
                max: Some(max),
            })
        }
        _ => Err(DecodeError::new(offset, format!("invalid limits flag {flag:#x}"))),
    }
}

fn table_type(reader: &mut Reader) -> Result<TableType, DecodeError> {
    let elem_type = val_type(reader)?;
    if !elem_type.is_ref() {
        return Err(DecodeError::new(reader.pos(), "table element type must be a reference"));
    }
    Ok(TableType {
        elem_type,
        limits: limits(reader)?,
    })
}

fn global_type(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
    let ty = val_type(reader)?;
    let offset = reader.pos();
    let mutable = match reader.byte()? {
        0x00 => false,
        0x01 => true,
        flag => return Err(DecodeError::new(offset, format!("invalid mutability {flag:#x}"))),
    };
    Ok(GlobalType {
        val_type: ty,
        mutable,
    })
}

fn type_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let offset = reader.pos();
        if reader.byte()? != 0x60 {
            return Err(DecodeError::new(offset, "expected function type tag 0x60"));
        }
        let num_params = reader.u32_leb()?;
        let mut params = Vec::with_capacity(num_params as usize);
        for _ in 0..num_params {
            params.push(val_type(reader)?);
        }
        let num_results = reader.u32_leb()?;
        let mut results = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            results.push(val_type(reader)?);
        }
        module.types.push(FuncType::new(params, results));
    }
    Ok(())
}

fn import_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let module_name = reader.name()?;
        let name = reader.name()?;
        let offset = reader.pos();
        let desc = match reader.byte()? {
            0x00 => {
                let type_index = reader.u32_leb()?;
                if type_index as usize >= module.types.len() {
                    return Err(DecodeError::new(offset, "import type index out of range"));
                }
                ImportDesc::Func(type_index)
            }
            0x01 => ImportDesc::Table(table_type(reader)?),
            0x02 => ImportDesc::Memory(MemoryType {
                limits: limits(reader)?,
            }),
            0x03 => ImportDesc::Global(global_type(reader)?),
            tag => return Err(DecodeError::new(offset, format!("invalid import kind {tag:#x}"))),
        };
        module.imports.push(Import {
            module: module_name,
            name,
            desc,
        });
    }
    Ok(())
}

fn function_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let offset = reader.pos();
        let type_index = reader.u32_leb()?;
        if type_index as usize >= module.types.len() {
            return Err(DecodeError::new(offset, "function type index out of range"));
        }
        module.func_type_indices.push(type_index);
    }
    Ok(())
}

fn table_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        module.tables.push(table_type(reader)?);
    }
    Ok(())
}

fn memory_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    if count > 1 {
        return Err(DecodeError::new(reader.pos(), "at most one memory is supported"));
    }
    for _ in 0..count {
        module.memories.push(MemoryType {
            limits: limits(reader)?,
        });
    }
    Ok(())
}

/// Decodes a constant expression terminated by `end` (0x0B).
fn const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let offset = reader.pos();
    let opcode = reader.byte()?;
    let expr = match opcode {
        0x41 => ConstExpr::I32(reader.i32_leb()?),
        0x42 => ConstExpr::I64(reader.i64_leb()?),
        0x43 => ConstExpr::F32(reader.f32()?),
        0x44 => ConstExpr::F64(reader.f64()?),
        0x23 => ConstExpr::GlobalGet(reader.u32_leb()?),
        0xD0 => {
            val_type(reader)?;
            ConstExpr::RefNull
        }
        0xD2 => ConstExpr::RefFunc(reader.u32_leb()?),
        0xFD => {
            // v128.const
            let sub = reader.u32_leb()?;
            if sub != 12 {
                return Err(DecodeError::new(offset, "expected v128.const in constant expression"));
            }
            let bytes = reader.bytes(16)?;
            let mut value = [0u8; 16];
            value.copy_from_slice(bytes);
            ConstExpr::V128(u128::from_le_bytes(value))
        }
        _ => {
            return Err(DecodeError::new(
                offset,
                format!("unsupported constant opcode {opcode:#x}"),
            ));
        }
    };
    let end_offset = reader.pos();
    if reader.byte()? != 0x0B {
        return Err(DecodeError::new(end_offset, "constant expression not terminated"));
    }
    Ok(expr)
}

fn global_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let ty = global_type(reader)?;
        let init = const_expr(reader)?;
        module.globals.push(Global { ty, init });
    }
    Ok(())
}

fn export_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let name = reader.name()?;
        let offset = reader.pos();
        let kind = match reader.byte()? {
            0x00 => ExternKind::Func(reader.u32_leb()?),
            0x01 => ExternKind::Table(reader.u32_leb()?),
            0x02 => ExternKind::Memory(reader.u32_leb()?),
            0x03 => ExternKind::Global(reader.u32_leb()?),
            tag => return Err(DecodeError::new(offset, format!("invalid export kind {tag:#x}"))),
        };
        if module.exports.insert(name.clone(), kind).is_some() {
            return Err(DecodeError::new(offset, format!("duplicate export {name:?}")));
        }
    }
    Ok(())
}

fn element_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    for _ in 0..count {
        let offset = reader.pos();
        let flags = reader.u32_leb()?;
        let segment = match flags {
            // Active, table 0, funcref, index vector.
            0 => {
                let expr = const_expr(reader)?;
                let funcs = func_index_vec(reader)?;
                ElementSegment {
                    table_index: 0,
                    offset: Some(expr),
                    func_indices: funcs,
                }
            }
            // Passive, elemkind + index vector.
            1 => {
                expect_elem_kind(reader)?;
                ElementSegment {
                    table_index: 0,
                    offset: None,
                    func_indices: func_index_vec(reader)?,
                }
            }
            // Active with explicit table index.
            2 => {
                let table_index = reader.u32_leb()?;
                let expr = const_expr(reader)?;
                expect_elem_kind(reader)?;
                ElementSegment {
                    table_index,
                    offset: Some(expr),
                    func_indices: func_index_vec(reader)?,
                }
            }
            // Active, expression-encoded elements.
            4 => {
                let expr = const_expr(reader)?;
                ElementSegment {
                    table_index: 0,
                    offset: Some(expr),
                    func_indices: func_expr_vec(reader)?,
                }
            }
            // Passive, expression-encoded elements.
            5 => {
                val_type(reader)?;
                ElementSegment {
                    table_index: 0,
                    offset: None,
                    func_indices: func_expr_vec(reader)?,
                }
            }
            _ => {
                return Err(DecodeError::new(
                    offset,
                    format!("unsupported element segment flags {flags}"),
                ));
            }
        };
        module.elements.push(segment);
    }
    Ok(())
}

fn expect_elem_kind(reader: &mut Reader) -> Result<(), DecodeError> {
    let offset = reader.pos();
    match reader.byte()? {
        0x00 => Ok(()),
        kind => Err(DecodeError::new(offset, format!("invalid element kind {kind:#x}"))),
    }
}

fn func_index_vec(reader: &mut Reader) -> Result<Vec<Option<u32>>, DecodeError> {
    let count = reader.u32_leb()?;
    let mut funcs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        funcs.push(Some(reader.u32_leb()?));
    }
    Ok(funcs)
}

/// Element expressions: `ref.func n end` or `ref.null end`.
fn func_expr_vec(reader: &mut Reader) -> Result<Vec<Option<u32>>, DecodeError> {
    let count = reader.u32_leb()?;
    let mut funcs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        funcs.push(match const_expr(reader)? {
            ConstExpr::RefFunc(index) => Some(index),
            ConstExpr::RefNull => None,
            _ => {
                return Err(DecodeError::new(
                    reader.pos(),
                    "element expression must be ref.func or ref.null",
                ));
            }
        });
    }
    Ok(funcs)
}

fn code_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    if count as usize != module.func_type_indices.len() {
        return Err(DecodeError::new(
            reader.pos(),
            "code entry count does not match function section",
        ));
    }
    for _ in 0..count {
        let size = reader.u32_leb()? as usize;
        let entry_start = reader.pos();

        let num_local_runs = reader.u32_leb()?;
        let mut locals = Vec::new();
        for _ in 0..num_local_runs {
            let run = reader.u32_leb()?;
            let ty = val_type(reader)?;
            if locals.len() + run as usize > 50_000 {
                return Err(DecodeError::new(reader.pos(), "too many locals"));
            }
            locals.extend(std::iter::repeat(ty).take(run as usize));
        }

        let body_start = reader.pos();
        let body_end = entry_start + size;
        if body_end < body_start || body_end > body_start + reader.remaining() {
            return Err(DecodeError::new(entry_start, "code entry size mismatch"));
        }
        reader.skip(body_end - body_start)?;

        module.code.push(FunctionBody {
            locals,
            body_start,
            body_end,
        });
    }
    Ok(())
}

fn data_section(reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    let count = reader.u32_leb()?;
    if let Some(declared) = module.data_count {
        if declared != count {
            return Err(DecodeError::new(reader.pos(), "data count section mismatch"));
        }
    }
    for _ in 0..count {
        let offset = reader.pos();
        let flags = reader.u32_leb()?;
        let segment = match flags {
            0 => {
                let expr = const_expr(reader)?;
                let len = reader.u32_leb()? as usize;
                DataSegment {
                    memory_index: 0,
                    offset: Some(expr),
                    bytes: reader.bytes(len)?.to_vec(),
                }
            }
            1 => {
                let len = reader.u32_leb()? as usize;
                DataSegment {
                    memory_index: 0,
                    offset: None,
                    bytes: reader.bytes(len)?.to_vec(),
                }
            }
            2 => {
                let memory_index = reader.u32_leb()?;
                let expr = const_expr(reader)?;
                let len = reader.u32_leb()? as usize;
                DataSegment {
                    memory_index,
                    offset: Some(expr),
                    bytes: reader.bytes(len)?.to_vec(),
                }
            }
            _ => {
                return Err(DecodeError::new(
                    offset,
                    format!("unsupported data segment flags {flags}"),
                ));
            }
        };
        module.data.push(segment);
    }
    Ok(())
}

/// Cross-section index checks that can only run once all sections are read.
fn check_module(module: &Module) -> Result<(), DecodeError> {
    let num_funcs = module.num_funcs();
    for (name, kind) in &module.exports {
        let ok = match kind {
            ExternKind::Func(index) => *index < num_funcs,
            ExternKind::Global(index) => *index < module.num_globals(),
            ExternKind::Memory(index) => *index == 0 && module.memory().is_some(),
            ExternKind::Table(index) => *index == 0 && module.table().is_some(),
        };
        if !ok {
            return Err(DecodeError::new(0, format!("export {name:?} index out of range")));
        }
    }
    if let Some(start) = module.start {
        if start >= num_funcs {
            return Err(DecodeError::new(0, "start function index out of range"));
        }
    }
    for segment in &module.elements {
        for func in segment.func_indices.iter().flatten() {
            if *func >= num_funcs {
                return Err(DecodeError::new(0, "element function index out of range"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../tests/wasm/t_decode.rs"]
mod tests;
