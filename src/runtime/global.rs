//! Global instance: a typed mutable or immutable cell.

use crate::types::GlobalType;
use crate::values::Value;

#[derive(Debug)]
pub struct GlobalInstance {
    ty: GlobalType,
    value: Value,
}

impl GlobalInstance {
    pub fn new(ty: GlobalType, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Value {
        self.value
    }

    /// Validation guarantees `global.set` only reaches mutable globals of
    /// the right type, so no check here.
    pub fn set(&mut self, value: Value) {
        self.value = value;
    }
}
