//! Host function registry: named callbacks a module may import.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HostError, RegistryError, ResolveError};
use crate::types::FuncType;
use crate::values::Value;

/// Host callback. Runs synchronously on the calling thread; results are
/// type-checked against the declared signature before re-entering module
/// code.
pub type HostFunc = dyn Fn(&[Value]) -> Result<Vec<Value>, HostError> + Send + Sync;

struct Entry {
    ty: FuncType,
    func: Arc<HostFunc>,
}

#[derive(Default)]
pub struct HostRegistry {
    entries: HashMap<(String, String), Entry>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback under `module.field`. Re-registering the same
    /// name pair is an error, never a silent replacement.
    pub fn register<F>(
        &mut self,
        module: &str,
        field: &str,
        ty: FuncType,
        func: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, HostError> + Send + Sync + 'static,
    {
        let key = (module.to_owned(), field.to_owned());
        if self.entries.contains_key(&key) {
            return Err(RegistryError::DuplicateImport {
                module: module.to_owned(),
                field: field.to_owned(),
            });
        }
        self.entries.insert(
            key,
            Entry {
                ty,
                func: Arc::new(func),
            },
        );
        Ok(())
    }

    /// Exact name match plus full signature equality; no subtyping.
    pub fn resolve(
        &self,
        module: &str,
        field: &str,
        expected: &FuncType,
    ) -> Result<Arc<HostFunc>, ResolveError> {
        let entry = self
            .entries
            .get(&(module.to_owned(), field.to_owned()))
            .ok_or(ResolveError::NotFound)?;
        if entry.ty != *expected {
            return Err(ResolveError::SignatureMismatch {
                registered: entry.ty.clone(),
                expected: expected.clone(),
            });
        }
        Ok(Arc::clone(&entry.func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValType;

    fn echo_ty() -> FuncType {
        FuncType::new(vec![ValType::F32], vec![])
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = HostRegistry::new();
        reg.register("env", "echo", echo_ty(), |_| Ok(vec![])).unwrap();
        assert!(matches!(
            reg.register("env", "echo", echo_ty(), |_| Ok(vec![])),
            Err(RegistryError::DuplicateImport { .. })
        ));
    }

    #[test]
    fn resolve_checks_signature() {
        let mut reg = HostRegistry::new();
        reg.register("env", "echo", echo_ty(), |_| Ok(vec![])).unwrap();
        assert!(reg.resolve("env", "echo", &echo_ty()).is_ok());
        assert!(matches!(
            reg.resolve("env", "echo", &FuncType::new(vec![ValType::I32], vec![])),
            Err(ResolveError::SignatureMismatch { .. })
        ));
        assert!(matches!(
            reg.resolve("env", "missing", &echo_ty()),
            Err(ResolveError::NotFound)
        ));
    }
}
