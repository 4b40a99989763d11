//! Decoded module model.
//!
//! Function bodies are kept as byte ranges into the original binary; the
//! frontend re-walks them during compilation so the decoder never has to
//! build an opcode-level AST.

use std::sync::Arc;

use indexmap::IndexMap;

use super::types::*;

/// What an export refers to, by index into the combined index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    Func(u32),
    Table(u32),
    Memory(u32),
    Global(u32),
}

/// The typed description of an import.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImportDesc {
    /// Type index of the imported function.
    Func(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

#[derive(Debug, Clone)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

/// A constant initializer expression, pre-evaluated where possible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    V128(u128),
    RefNull,
    RefFunc(u32),
    /// The value of an (imported) global at instantiation time.
    GlobalGet(u32),
}

#[derive(Debug, Clone)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

/// A code-section entry: decoded locals plus the raw expression bytes.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    /// Non-parameter locals, expanded from the (count, type) run-length form.
    pub locals: Vec<ValType>,
    /// Range of the body expression within the module bytes, including the
    /// closing `end` opcode.
    pub body_start: usize,
    pub body_end: usize,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    /// `None` for passive segments.
    pub offset: Option<ConstExpr>,
    pub func_indices: Vec<Option<u32>>,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub memory_index: u32,
    /// `None` for passive segments.
    pub offset: Option<ConstExpr>,
    pub bytes: Vec<u8>,
}

/// A fully decoded module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type indices of locally defined functions.
    pub func_type_indices: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: IndexMap<String, ExternKind>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub code: Vec<FunctionBody>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
    /// The original binary, shared with the frontend for body re-walks.
    pub bytes: Arc<[u8]>,
}

impl Module {
    pub fn imported_func_type_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.imports.iter().filter_map(|import| match import.desc {
            ImportDesc::Func(type_index) => Some(type_index),
            _ => None,
        })
    }

    pub fn imported_global_types(&self) -> impl Iterator<Item = GlobalType> + '_ {
        self.imports.iter().filter_map(|import| match import.desc {
            ImportDesc::Global(ty) => Some(ty),
            _ => None,
        })
    }

    pub fn num_imported_funcs(&self) -> u32 {
        self.imported_func_type_indices().count() as u32
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imported_global_types().count() as u32
    }

    /// Total function count, imported plus local.
    pub fn num_funcs(&self) -> u32 {
        self.num_imported_funcs() + self.func_type_indices.len() as u32
    }

    pub fn num_globals(&self) -> u32 {
        self.num_imported_globals() + self.globals.len() as u32
    }

    /// The type index of function `index` in the combined index space.
    pub fn func_type_index(&self, index: u32) -> Option<u32> {
        let imported = self.num_imported_funcs();
        if index < imported {
            self.imported_func_type_indices().nth(index as usize)
        } else {
            self.func_type_indices
                .get((index - imported) as usize)
                .copied()
        }
    }

    pub fn func_type(&self, index: u32) -> Option<&FuncType> {
        self.types.get(self.func_type_index(index)? as usize)
    }

    /// The type of global `index` in the combined index space.
    pub fn global_type(&self, index: u32) -> Option<GlobalType> {
        let imported = self.num_imported_globals();
        if index < imported {
            self.imported_global_types().nth(index as usize)
        } else {
            self.globals
                .get((index - imported) as usize)
                .map(|global| global.ty)
        }
    }

    /// The memory declaration, local or imported.
    pub fn memory(&self) -> Option<MemoryType> {
        if let Some(memory) = self.memories.first() {
            return Some(*memory);
        }
        self.imports.iter().find_map(|import| match import.desc {
            ImportDesc::Memory(memory) => Some(memory),
            _ => None,
        })
    }

    /// The first table declaration, local or imported.
    pub fn table(&self) -> Option<TableType> {
        if let Some(table) = self.tables.first() {
            return Some(*table);
        }
        self.imports.iter().find_map(|import| match import.desc {
            ImportDesc::Table(table) => Some(table),
            _ => None,
        })
    }
}
