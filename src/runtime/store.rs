//! The store: owner of every runtime object. Addresses are plain indices
//! into per-kind vectors, so instances can reference each other freely.

use crate::runtime::global::GlobalInstance;
use crate::runtime::instance::{FuncInstance, InstanceHandle, ModuleInstance};
use crate::runtime::memory::MemoryInstance;
use crate::runtime::table::TableInstance;

/// Execution limits. `fuel: None` means unmetered.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub max_call_depth: usize,
    pub fuel: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            fuel: None,
        }
    }
}

#[derive(Default)]
pub struct Store {
    pub(crate) funcs: Vec<FuncInstance>,
    pub(crate) tables: Vec<TableInstance>,
    pub(crate) memories: Vec<MemoryInstance>,
    pub(crate) globals: Vec<GlobalInstance>,
    pub(crate) instances: Vec<ModuleInstance>,
    config: StoreConfig,
    fuel: Option<u64>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            fuel: config.fuel,
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn max_call_depth(&self) -> usize {
        self.config.max_call_depth
    }

    /// Remaining fuel, if metered.
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    /// Replace the fuel budget; `None` disables metering.
    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }

    /// Deduct `amount` from the budget. Returns false once the budget is
    /// exhausted; a no-op when unmetered.
    pub(crate) fn burn_fuel(&mut self, amount: u64) -> bool {
        match self.fuel {
            None => true,
            Some(f) if f >= amount => {
                self.fuel = Some(f - amount);
                true
            }
            Some(_) => {
                self.fuel = Some(0);
                false
            }
        }
    }

    pub fn instance(&self, handle: InstanceHandle) -> &ModuleInstance {
        &self.instances[handle.0]
    }

    pub(crate) fn func(&self, addr: usize) -> &FuncInstance {
        &self.funcs[addr]
    }

    /// Signature of the function at `addr`, for up-front arity checks.
    pub fn func_ty(&self, addr: usize) -> &crate::types::FuncType {
        self.funcs[addr].ty()
    }

    pub fn memory(&self, addr: usize) -> &MemoryInstance {
        &self.memories[addr]
    }

    pub fn memory_mut(&mut self, addr: usize) -> &mut MemoryInstance {
        &mut self.memories[addr]
    }

    pub fn global(&self, addr: usize) -> &GlobalInstance {
        &self.globals[addr]
    }

    pub fn global_mut(&mut self, addr: usize) -> &mut GlobalInstance {
        &mut self.globals[addr]
    }

    pub fn table(&self, addr: usize) -> &TableInstance {
        &self.tables[addr]
    }

    /// Object counts per kind, used by tests to observe that a failed
    /// instantiation allocated nothing.
    pub fn object_counts(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.funcs.len(),
            self.tables.len(),
            self.memories.len(),
            self.globals.len(),
            self.instances.len(),
        )
    }
}
