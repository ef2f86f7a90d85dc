//! Function and module instances. Instances reference each other through
//! store addresses (plain indices), never owned pointers, so cross-instance
//! imports cannot form reference cycles.

use std::collections::HashMap;
use std::sync::Arc;

use crate::module::Module;
use crate::runtime::registry::HostFunc;
use crate::types::FuncType;

/// Copyable handle to an instance in a [`crate::runtime::Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceHandle(pub(crate) usize);

impl InstanceHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Store-level function: either a body defined by some instance's module,
/// or a host callback.
pub enum FuncInstance {
    Wasm {
        ty: FuncType,
        /// Owning instance, as an index into `Store.instances`.
        instance: usize,
        /// Index into the owning module's code section.
        def_index: usize,
    },
    Host {
        ty: FuncType,
        func: Arc<HostFunc>,
    },
}

impl FuncInstance {
    pub fn ty(&self) -> &FuncType {
        match self {
            FuncInstance::Wasm { ty, .. } => ty,
            FuncInstance::Host { ty, .. } => ty,
        }
    }
}

impl std::fmt::Debug for FuncInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FuncInstance::Wasm {
                ty,
                instance,
                def_index,
            } => f
                .debug_struct("Wasm")
                .field("ty", ty)
                .field("instance", instance)
                .field("def_index", def_index)
                .finish(),
            FuncInstance::Host { ty, .. } => f.debug_struct("Host").field("ty", ty).finish(),
        }
    }
}

/// Typed handle to an exported function, accepted by [`crate::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Func(pub(crate) usize);

impl Func {
    pub(crate) fn addr(&self) -> usize {
        self.0
    }
}

/// Store address of an exported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extern {
    Func(usize),
    Table(usize),
    Memory(usize),
    Global(usize),
}

impl Extern {
    /// The function handle, if this export names a function.
    pub fn as_func(&self) -> Option<Func> {
        match self {
            Extern::Func(addr) => Some(Func(*addr)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Extern::Func(_) => "function",
            Extern::Table(_) => "table",
            Extern::Memory(_) => "memory",
            Extern::Global(_) => "global",
        }
    }
}

/// An instantiated module: per-index-space address vectors (imports first,
/// then definitions) plus the export map.
#[derive(Debug)]
pub struct ModuleInstance {
    pub module: Arc<Module>,
    pub funcs: Vec<usize>,
    pub tables: Vec<usize>,
    pub memories: Vec<usize>,
    pub globals: Vec<usize>,
    pub exports: HashMap<String, Extern>,
}

impl ModuleInstance {
    pub fn export(&self, name: &str) -> Option<Extern> {
        self.exports.get(name).copied()
    }
}
