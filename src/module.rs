//! Immutable decoded module. Produced once by `decode` + `validate`; never
//! mutated afterwards. Instances reference it through an `Arc`.

use crate::types::{
    Export, FuncIdx, FuncType, GlobalIdx, GlobalType, Import, MemIdx, MemoryType, TableIdx,
    TableType, TypeIdx, ValType,
};

/// A run of identically-typed locals inside a code body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecl {
    pub count: u32,
    pub ty: ValType,
}

/// Constant initializer expression, decoded into typed form at parse time
/// so link-time evaluation never re-parses bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(GlobalIdx),
}

/// Code body for a defined function: declared locals plus the raw
/// instruction stream (terminated by `end`, which is kept in the bytes).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeBody {
    pub locals: Vec<LocalDecl>,
    pub code: Vec<u8>,
}

impl CodeBody {
    /// Total number of declared (non-parameter) local slots.
    pub fn local_count(&self) -> usize {
        self.locals.iter().map(|d| d.count as usize).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

/// Active element segment: fills a table with function indices at a
/// constant offset during instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub table: TableIdx,
    pub offset: ConstExpr,
    pub init: Vec<FuncIdx>,
}

/// Active data segment: fills a memory with bytes at a constant offset
/// during instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub memory: MemIdx,
    pub offset: ConstExpr,
    pub init: Vec<u8>,
}

/// The decoded module. Index spaces are import-first: absolute index `i`
/// names an import for `i < imported_*` and definition `i - imported_*`
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub types: Vec<FuncType>,
    pub imports: Vec<Import>,
    /// Type index for each defined (non-imported) function, in order.
    pub func_types: Vec<TypeIdx>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<FuncIdx>,
    pub elements: Vec<ElementSegment>,
    /// One body per entry in `func_types`.
    pub code: Vec<CodeBody>,
    pub data: Vec<DataSegment>,

    pub imported_funcs: u32,
    pub imported_tables: u32,
    pub imported_memories: u32,
    pub imported_globals: u32,
}

impl Module {
    pub fn total_funcs(&self) -> u32 {
        self.imported_funcs + self.func_types.len() as u32
    }

    pub fn total_tables(&self) -> u32 {
        self.imported_tables + self.tables.len() as u32
    }

    pub fn total_memories(&self) -> u32 {
        self.imported_memories + self.memories.len() as u32
    }

    pub fn total_globals(&self) -> u32 {
        self.imported_globals + self.globals.len() as u32
    }

    /// Type index of the function at absolute index `idx`, walking imports
    /// first and then the function section.
    pub fn func_type_idx(&self, idx: FuncIdx) -> Option<TypeIdx> {
        if idx < self.imported_funcs {
            let mut seen = 0u32;
            for imp in &self.imports {
                if let crate::types::ImportDesc::Func(tidx) = imp.desc {
                    if seen == idx {
                        return Some(tidx);
                    }
                    seen += 1;
                }
            }
            None
        } else {
            self.func_types
                .get((idx - self.imported_funcs) as usize)
                .copied()
        }
    }

    /// Signature of the function at absolute index `idx`.
    pub fn func_type(&self, idx: FuncIdx) -> Option<&FuncType> {
        self.types.get(self.func_type_idx(idx)? as usize)
    }

    fn imported_desc_at<T>(
        &self,
        idx: u32,
        mut pick: impl FnMut(&crate::types::ImportDesc) -> Option<T>,
    ) -> Option<T> {
        let mut seen = 0u32;
        for imp in &self.imports {
            if let Some(v) = pick(&imp.desc) {
                if seen == idx {
                    return Some(v);
                }
                seen += 1;
            }
        }
        None
    }

    /// Type of the global at absolute index `idx`.
    pub fn global_type(&self, idx: GlobalIdx) -> Option<GlobalType> {
        use crate::types::ImportDesc;
        if idx < self.imported_globals {
            self.imported_desc_at(idx, |d| match d {
                ImportDesc::Global(gt) => Some(*gt),
                _ => None,
            })
        } else {
            self.globals
                .get((idx - self.imported_globals) as usize)
                .map(|g| g.ty)
        }
    }

    /// Type of the table at absolute index `idx`.
    pub fn table_type(&self, idx: TableIdx) -> Option<TableType> {
        use crate::types::ImportDesc;
        if idx < self.imported_tables {
            self.imported_desc_at(idx, |d| match d {
                ImportDesc::Table(tt) => Some(*tt),
                _ => None,
            })
        } else {
            self.tables
                .get((idx - self.imported_tables) as usize)
                .copied()
        }
    }

    /// Type of the memory at absolute index `idx`.
    pub fn memory_type(&self, idx: MemIdx) -> Option<MemoryType> {
        use crate::types::ImportDesc;
        if idx < self.imported_memories {
            self.imported_desc_at(idx, |d| match d {
                ImportDesc::Memory(mt) => Some(*mt),
                _ => None,
            })
        } else {
            self.memories
                .get((idx - self.imported_memories) as usize)
                .copied()
        }
    }
}
