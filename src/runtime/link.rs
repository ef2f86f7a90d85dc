//! Instantiation. All allocation is staged in local vectors with predicted
//! store addresses and committed only after every import, initializer, and
//! segment bound has checked out, so a failed instantiation leaves the
//! store untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{InstantiateError, LinkError, ResolveError, ValidationError};
use crate::module::{ConstExpr, Module};
use crate::runtime::global::GlobalInstance;
use crate::runtime::instance::{Extern, FuncInstance, InstanceHandle, ModuleInstance};
use crate::runtime::memory::MemoryInstance;
use crate::runtime::registry::HostRegistry;
use crate::runtime::store::Store;
use crate::runtime::table::TableInstance;
use crate::types::{ExportDesc, ImportDesc};
use crate::values::Value;

fn addr_at(addrs: &[usize], index: u32, space: &'static str) -> Result<usize, ValidationError> {
    addrs
        .get(index as usize)
        .copied()
        .ok_or(ValidationError::IndexOutOfRange { space, index })
}

/// Evaluate a constant initializer. `global.get` can only name an imported
/// global, whose store address is already in `globals`.
fn eval_const(
    store: &Store,
    globals: &[usize],
    expr: &ConstExpr,
) -> Result<Value, ValidationError> {
    Ok(match expr {
        ConstExpr::I32(v) => Value::I32(*v),
        ConstExpr::I64(v) => Value::I64(*v),
        ConstExpr::F32(bits) => Value::F32(*bits),
        ConstExpr::F64(bits) => Value::F64(*bits),
        ConstExpr::GlobalGet(idx) => {
            let addr = addr_at(globals, *idx, "global")?;
            store.global(addr).get()
        }
    })
}

/// i32 offset of a segment initializer, read as unsigned.
fn eval_offset(store: &Store, globals: &[usize], expr: &ConstExpr) -> Result<u64, ValidationError> {
    match eval_const(store, globals, expr)? {
        Value::I32(v) => Ok(v as u32 as u64),
        other => Err(ValidationError::GlobalInitTypeMismatch {
            expected: crate::types::ValType::I32,
            found: other.ty(),
        }),
    }
}

pub fn instantiate(
    store: &mut Store,
    module: Arc<Module>,
    registry: &HostRegistry,
    prior: &[InstanceHandle],
) -> Result<InstanceHandle, InstantiateError> {
    let base_func = store.funcs.len();
    let base_table = store.tables.len();
    let base_mem = store.memories.len();
    let base_global = store.globals.len();
    let handle_index = store.instances.len();

    // Per-index-space address vectors, imports first.
    let mut funcs: Vec<usize> = Vec::with_capacity(module.total_funcs() as usize);
    let mut tables: Vec<usize> = Vec::new();
    let mut memories: Vec<usize> = Vec::new();
    let mut globals: Vec<usize> = Vec::new();

    let mut staged_funcs: Vec<FuncInstance> = Vec::new();
    let mut staged_tables: Vec<TableInstance> = Vec::new();
    let mut staged_memories: Vec<MemoryInstance> = Vec::new();
    let mut staged_globals: Vec<GlobalInstance> = Vec::new();

    /* Resolve imports in declaration order: prior instances' exports by
     * field name and kind (first hit wins), then the host registry for
     * functions. */
    for imp in &module.imports {
        let wanted_kind = match &imp.desc {
            ImportDesc::Func(_) => "function",
            ImportDesc::Table(_) => "table",
            ImportDesc::Memory(_) => "memory",
            ImportDesc::Global(_) => "global",
        };
        let hit = prior.iter().find_map(|&h| {
            store
                .instance(h)
                .export(&imp.field)
                .filter(|e| e.kind() == wanted_kind)
        });

        match (&imp.desc, hit) {
            (ImportDesc::Func(tidx), hit) => {
                let expected = module
                    .types
                    .get(*tidx as usize)
                    .ok_or(ValidationError::IndexOutOfRange {
                        space: "type",
                        index: *tidx,
                    })?;
                match hit {
                    Some(Extern::Func(addr)) => {
                        let found = store.func_ty(addr);
                        if found != expected {
                            return Err(LinkError::ImportSignatureMismatch {
                                module: imp.module.clone(),
                                field: imp.field.clone(),
                                expected: expected.clone(),
                                found: found.clone(),
                            }
                            .into());
                        }
                        funcs.push(addr);
                    }
                    _ => match registry.resolve(&imp.module, &imp.field, expected) {
                        Ok(func) => {
                            funcs.push(base_func + staged_funcs.len());
                            staged_funcs.push(FuncInstance::Host {
                                ty: expected.clone(),
                                func,
                            });
                        }
                        Err(ResolveError::NotFound) => {
                            return Err(LinkError::UnresolvedImport {
                                module: imp.module.clone(),
                                field: imp.field.clone(),
                            }
                            .into());
                        }
                        Err(ResolveError::SignatureMismatch { registered, .. }) => {
                            return Err(LinkError::ImportSignatureMismatch {
                                module: imp.module.clone(),
                                field: imp.field.clone(),
                                expected: expected.clone(),
                                found: registered,
                            }
                            .into());
                        }
                    },
                }
            }
            (ImportDesc::Table(tt), Some(Extern::Table(addr))) => {
                let actual = store.table(addr);
                if !tt.limits.satisfied_by(actual.size(), actual.max_size()) {
                    return Err(LinkError::ImportLimitsMismatch {
                        module: imp.module.clone(),
                        field: imp.field.clone(),
                        kind: "table",
                    }
                    .into());
                }
                tables.push(addr);
            }
            (ImportDesc::Memory(mt), Some(Extern::Memory(addr))) => {
                let actual = store.memory(addr);
                if !mt
                    .limits
                    .satisfied_by(actual.size_pages(), actual.max_pages())
                {
                    return Err(LinkError::ImportLimitsMismatch {
                        module: imp.module.clone(),
                        field: imp.field.clone(),
                        kind: "memory",
                    }
                    .into());
                }
                memories.push(addr);
            }
            (ImportDesc::Global(gt), Some(Extern::Global(addr))) => {
                if store.global(addr).ty() != *gt {
                    return Err(LinkError::ImportGlobalTypeMismatch {
                        module: imp.module.clone(),
                        field: imp.field.clone(),
                    }
                    .into());
                }
                globals.push(addr);
            }
            (_, _) => {
                return Err(LinkError::UnresolvedImport {
                    module: imp.module.clone(),
                    field: imp.field.clone(),
                }
                .into());
            }
        }
    }

    /* Stage definitions with predicted addresses. */
    for (def_index, &tidx) in module.func_types.iter().enumerate() {
        let ty = module
            .types
            .get(tidx as usize)
            .ok_or(ValidationError::IndexOutOfRange {
                space: "type",
                index: tidx,
            })?
            .clone();
        funcs.push(base_func + staged_funcs.len());
        staged_funcs.push(FuncInstance::Wasm {
            ty,
            instance: handle_index,
            def_index,
        });
    }
    for tt in &module.tables {
        tables.push(base_table + staged_tables.len());
        staged_tables.push(TableInstance::new(tt)?);
    }
    for mt in &module.memories {
        memories.push(base_mem + staged_memories.len());
        staged_memories.push(MemoryInstance::new(mt)?);
    }
    for g in &module.globals {
        let value = eval_const(store, &globals, &g.init)?;
        globals.push(base_global + staged_globals.len());
        staged_globals.push(GlobalInstance::new(g.ty, value));
    }

    /* Export map. */
    let mut exports = HashMap::new();
    for ex in &module.exports {
        let ext = match ex.desc {
            ExportDesc::Func(i) => Extern::Func(addr_at(&funcs, i, "function")?),
            ExportDesc::Table(i) => Extern::Table(addr_at(&tables, i, "table")?),
            ExportDesc::Memory(i) => Extern::Memory(addr_at(&memories, i, "memory")?),
            ExportDesc::Global(i) => Extern::Global(addr_at(&globals, i, "global")?),
        };
        if exports.insert(ex.name.clone(), ext).is_some() {
            return Err(ValidationError::DuplicateExport {
                name: ex.name.clone(),
            }
            .into());
        }
    }

    /* Verify every segment bound before any write. */
    let mut element_writes: Vec<(usize, usize, Vec<usize>)> = Vec::new();
    for seg in &module.elements {
        let offset = eval_offset(store, &globals, &seg.offset)?;
        let table_addr = addr_at(&tables, seg.table, "table")?;
        let size = if table_addr >= base_table {
            staged_tables[table_addr - base_table].size()
        } else {
            store.table(table_addr).size()
        };
        if offset + seg.init.len() as u64 > size as u64 {
            return Err(LinkError::ElementOutOfBounds { table: seg.table }.into());
        }
        let mut func_addrs = Vec::with_capacity(seg.init.len());
        for &fidx in &seg.init {
            func_addrs.push(addr_at(&funcs, fidx, "function")?);
        }
        element_writes.push((table_addr, offset as usize, func_addrs));
    }

    let mut data_writes: Vec<(usize, usize, usize)> = Vec::new();
    for (seg_index, seg) in module.data.iter().enumerate() {
        let offset = eval_offset(store, &globals, &seg.offset)?;
        let mem_addr = addr_at(&memories, seg.memory, "memory")?;
        let len = if mem_addr >= base_mem {
            staged_memories[mem_addr - base_mem].len()
        } else {
            store.memory(mem_addr).len()
        };
        if offset + seg.init.len() as u64 > len as u64 {
            return Err(LinkError::DataOutOfBounds { memory: seg.memory }.into());
        }
        data_writes.push((mem_addr, offset as usize, seg_index));
    }

    /* Commit. */
    let start = module.start;
    store.funcs.append(&mut staged_funcs);
    store.tables.append(&mut staged_tables);
    store.memories.append(&mut staged_memories);
    store.globals.append(&mut staged_globals);
    store.instances.push(ModuleInstance {
        module: Arc::clone(&module),
        funcs,
        tables,
        memories,
        globals,
        exports,
    });
    let handle = InstanceHandle(handle_index);

    for (table_addr, offset, func_addrs) in element_writes {
        for (i, &fa) in func_addrs.iter().enumerate() {
            store.tables[table_addr].set(offset + i, fa);
        }
    }
    for (mem_addr, offset, seg_index) in data_writes {
        store.memories[mem_addr].write_slice(offset, &module.data[seg_index].init);
    }

    log::debug!(
        "instantiated module as instance {handle_index}: {} funcs, {} tables, {} memories, {} globals",
        store.instance(handle).funcs.len(),
        store.instance(handle).tables.len(),
        store.instance(handle).memories.len(),
        store.instance(handle).globals.len(),
    );

    /* The start function runs once, after commit; a trap surfaces to the
     * embedder but the instance stays in the store. */
    if let Some(start) = start {
        let addr = addr_at(&store.instance(handle).funcs, start, "function")?;
        log::trace!("running start function (index {start})");
        crate::exec::execute(store, addr, Vec::new()).map_err(InstantiateError::StartTrap)?;
    }

    Ok(handle)
}
