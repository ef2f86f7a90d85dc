//! Runtime state: the store, instances, host registry, and linker.

pub mod global;
pub mod instance;
pub mod link;
pub mod memory;
pub mod registry;
pub mod store;
pub mod table;

pub use global::GlobalInstance;
pub use instance::{Extern, Func, FuncInstance, InstanceHandle, ModuleInstance};
pub use link::instantiate;
pub use memory::{MemoryInstance, MAX_PAGES, PAGE_SIZE};
pub use registry::{HostFunc, HostRegistry};
pub use store::{Store, StoreConfig};
pub use table::TableInstance;
