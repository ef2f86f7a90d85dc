//! Module validation: index-space and structural checks here, function-body
//! typing in [`func`]. A module that passes validation can be executed
//! without operand type checks.

pub mod func;

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::module::{ConstExpr, Module};
use crate::runtime::memory::MAX_PAGES;
use crate::types::{ExportDesc, ImportDesc, ValType};

type VResult<T> = Result<T, ValidationError>;

/// Type yielded by a constant initializer, after checking that any
/// `global.get` hits an imported immutable global.
fn const_expr_type(m: &Module, e: &ConstExpr) -> VResult<ValType> {
    match e {
        ConstExpr::I32(_) => Ok(ValType::I32),
        ConstExpr::I64(_) => Ok(ValType::I64),
        ConstExpr::F32(_) => Ok(ValType::F32),
        ConstExpr::F64(_) => Ok(ValType::F64),
        ConstExpr::GlobalGet(idx) => {
            if *idx >= m.imported_globals {
                return Err(ValidationError::GlobalInitForwardRef { index: *idx });
            }
            let gt = m
                .global_type(*idx)
                .ok_or(ValidationError::IndexOutOfRange {
                    space: "global",
                    index: *idx,
                })?;
            if gt.mutable {
                return Err(ValidationError::GlobalInitMutable { index: *idx });
            }
            Ok(gt.content)
        }
    }
}

pub fn validate_module(m: &Module) -> VResult<()> {
    /* Function types */
    for (i, ft) in m.types.iter().enumerate() {
        if ft.results.len() > 1 {
            return Err(ValidationError::ResultArity {
                index: i as u32,
                arity: ft.results.len(),
            });
        }
    }
    for &tidx in &m.func_types {
        if tidx as usize >= m.types.len() {
            return Err(ValidationError::IndexOutOfRange {
                space: "type",
                index: tidx,
            });
        }
    }
    for imp in &m.imports {
        if let ImportDesc::Func(tidx) = imp.desc {
            if tidx as usize >= m.types.len() {
                return Err(ValidationError::IndexOutOfRange {
                    space: "type",
                    index: tidx,
                });
            }
        }
    }

    /* Tables and memories: at most one each, page ceiling on memories */
    if m.total_tables() > 1 {
        return Err(ValidationError::MultipleTables);
    }
    if m.total_memories() > 1 {
        return Err(ValidationError::MultipleMemories);
    }
    for idx in 0..m.total_memories() {
        let mt = m.memory_type(idx).ok_or(ValidationError::IndexOutOfRange {
            space: "memory",
            index: idx,
        })?;
        if mt.limits.min > MAX_PAGES || mt.limits.max.is_some_and(|max| max > MAX_PAGES) {
            return Err(ValidationError::MemoryTooLarge {
                pages: mt.limits.max.unwrap_or(mt.limits.min).max(mt.limits.min),
                ceiling: MAX_PAGES,
            });
        }
    }

    /* Globals */
    for g in &m.globals {
        let found = const_expr_type(m, &g.init)?;
        if found != g.ty.content {
            return Err(ValidationError::GlobalInitTypeMismatch {
                expected: g.ty.content,
                found,
            });
        }
    }

    /* Exports: unique names, in-range indices */
    let mut names = HashSet::new();
    for ex in &m.exports {
        if !names.insert(ex.name.as_str()) {
            return Err(ValidationError::DuplicateExport {
                name: ex.name.clone(),
            });
        }
        let (space, index, total) = match ex.desc {
            ExportDesc::Func(i) => ("function", i, m.total_funcs()),
            ExportDesc::Table(i) => ("table", i, m.total_tables()),
            ExportDesc::Memory(i) => ("memory", i, m.total_memories()),
            ExportDesc::Global(i) => ("global", i, m.total_globals()),
        };
        if index >= total {
            return Err(ValidationError::IndexOutOfRange { space, index });
        }
    }

    /* Start function */
    if let Some(start) = m.start {
        let ft = m.func_type(start).ok_or(ValidationError::IndexOutOfRange {
            space: "function",
            index: start,
        })?;
        if !ft.params.is_empty() || !ft.results.is_empty() {
            return Err(ValidationError::BadStartSignature { found: ft.clone() });
        }
    }

    /* Element segments */
    for seg in &m.elements {
        if seg.table >= m.total_tables() {
            return Err(ValidationError::IndexOutOfRange {
                space: "table",
                index: seg.table,
            });
        }
        if const_expr_type(m, &seg.offset)? != ValType::I32 {
            return Err(ValidationError::GlobalInitTypeMismatch {
                expected: ValType::I32,
                found: const_expr_type(m, &seg.offset)?,
            });
        }
        for &fidx in &seg.init {
            if fidx >= m.total_funcs() {
                return Err(ValidationError::IndexOutOfRange {
                    space: "function",
                    index: fidx,
                });
            }
        }
    }

    /* Data segments */
    for seg in &m.data {
        if seg.memory >= m.total_memories() {
            return Err(ValidationError::IndexOutOfRange {
                space: "memory",
                index: seg.memory,
            });
        }
        if const_expr_type(m, &seg.offset)? != ValType::I32 {
            return Err(ValidationError::GlobalInitTypeMismatch {
                expected: ValType::I32,
                found: const_expr_type(m, &seg.offset)?,
            });
        }
    }

    /* Function bodies */
    for (def_index, body) in m.code.iter().enumerate() {
        let func_index = m.imported_funcs + def_index as u32;
        func::validate_body(m, func_index, body)?;
    }

    Ok(())
}
