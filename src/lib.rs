//! waxel: a minimal embeddable WebAssembly host runtime.
//!
//! The pipeline is bytes → [`Module`] (decode + validate) → instance
//! (link against a [`HostRegistry`] and a [`Store`]) → execution of
//! exported functions. The interpreter runs single-threaded and
//! synchronously; independent stores may live on separate threads.
//!
//! ```no_run
//! use waxel::{HostRegistry, Store, StoreConfig, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bytes = std::fs::read("module.wasm")?;
//! let module = waxel::load_module(&bytes)?;
//!
//! let mut registry = HostRegistry::new();
//! registry.register(
//!     "env",
//!     "echo",
//!     waxel::FuncType::new(vec![waxel::ValType::F32], vec![]),
//!     |args| {
//!         println!("{}", args[0]);
//!         Ok(vec![])
//!     },
//! )?;
//!
//! let mut store = Store::new(StoreConfig::default());
//! let instance = waxel::instantiate(&mut store, module, &registry, &[])?;
//! let results = waxel::invoke(&mut store, instance, "main", &[Value::I32(7)])?;
//! # Ok(()) }
//! ```

pub mod decode;
pub mod error;
pub mod exec;
pub mod module;
pub mod runtime;
pub mod types;
pub mod validate;
pub mod values;

use std::sync::Arc;

pub use error::{
    ArityError, CallError, DecodeError, HostError, InstantiateError, InvokeError, LinkError,
    LoadError, NoSuchExportError, RegistryError, ResolveError, ResourceLimitError, Trap,
    ValidationError,
};
pub use module::Module;
pub use runtime::{
    Extern, Func, HostRegistry, InstanceHandle, Store, StoreConfig, MAX_PAGES, PAGE_SIZE,
};
pub use types::{FuncType, ValType};
pub use values::Value;

/// Decode and validate a binary module. Deterministic: identical bytes
/// always produce an identical module or an identical error.
pub fn load_module(bytes: &[u8]) -> Result<Arc<Module>, LoadError> {
    let module = decode::decode_module(bytes)?;
    validate::validate_module(&module)?;
    log::debug!(
        "loaded module: {} types, {} imports, {} functions, {} exports",
        module.types.len(),
        module.imports.len(),
        module.total_funcs(),
        module.exports.len(),
    );
    Ok(Arc::new(module))
}

/// Link a module against the registry and the exports of `prior` instances,
/// allocating its runtime state in the store. All-or-nothing: on failure the
/// store is left exactly as it was. A start function, if present, runs once
/// after allocation succeeds.
pub fn instantiate(
    store: &mut Store,
    module: Arc<Module>,
    registry: &HostRegistry,
    prior: &[InstanceHandle],
) -> Result<InstanceHandle, InstantiateError> {
    runtime::instantiate(store, module, registry, prior)
}

/// Look up an export by name.
pub fn get_export(
    store: &Store,
    instance: InstanceHandle,
    name: &str,
) -> Result<Extern, NoSuchExportError> {
    store
        .instance(instance)
        .export(name)
        .ok_or_else(|| NoSuchExportError {
            name: name.to_owned(),
        })
}

/// Call an exported function. Argument count and types are checked against
/// the declared signature up front, so a mismatch is an [`ArityError`] and
/// never a trap. A trap aborts this call only; the store stays usable, but
/// module memory is left as it was at the trapping instruction.
pub fn call(store: &mut Store, func: Func, args: &[Value]) -> Result<Vec<Value>, CallError> {
    let ty = store.func_ty(func.addr());
    if args.len() != ty.params.len() || args.iter().zip(&ty.params).any(|(a, &p)| a.ty() != p) {
        return Err(ArityError {
            expected: ty.clone(),
            given: args.iter().map(Value::ty).collect(),
        }
        .into());
    }
    Ok(exec::execute(store, func.addr(), args.to_vec())?)
}

/// Convenience for `get_export` + [`call`] on a function export.
pub fn invoke(
    store: &mut Store,
    instance: InstanceHandle,
    name: &str,
    args: &[Value],
) -> Result<Vec<Value>, InvokeError> {
    let ext = get_export(store, instance, name)?;
    let func = ext.as_func().ok_or_else(|| InvokeError::NotAFunction {
        name: name.to_owned(),
        kind: ext.kind(),
    })?;
    Ok(call(store, func, args)?)
}
