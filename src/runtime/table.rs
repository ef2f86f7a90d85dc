//! Table instance: funcref slots holding store-level function addresses.

use crate::error::{ResourceLimitError, Trap};
use crate::types::TableType;

#[derive(Debug)]
pub struct TableInstance {
    elems: Vec<Option<usize>>,
    max: Option<u32>,
}

impl TableInstance {
    pub fn new(ty: &TableType) -> Result<Self, ResourceLimitError> {
        let min = ty.limits.min;
        if let Some(max) = ty.limits.max {
            if min > max {
                return Err(ResourceLimitError::TableExceedsMax { entries: min, max });
            }
        }
        Ok(Self {
            elems: vec![None; min as usize],
            max: ty.limits.max,
        })
    }

    pub fn size(&self) -> u32 {
        self.elems.len() as u32
    }

    pub fn max_size(&self) -> Option<u32> {
        self.max
    }

    /// Slot lookup for `call_indirect`. An index past the end is a trap;
    /// a null slot is reported separately by the caller.
    pub fn get(&self, index: u32) -> Result<Option<usize>, Trap> {
        self.elems
            .get(index as usize)
            .copied()
            .ok_or(Trap::UndefinedElement)
    }

    /// Raw write used when applying element segments (bounds verified by
    /// the caller beforehand).
    pub(crate) fn set(&mut self, index: usize, func_addr: usize) {
        self.elems[index] = Some(func_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Limits, RefType};

    #[test]
    fn out_of_range_is_undefined_element() {
        let table = TableInstance::new(&TableType {
            elem: RefType::FuncRef,
            limits: Limits::new(2, None),
        })
        .unwrap();
        assert_eq!(table.get(0).unwrap(), None);
        assert!(matches!(table.get(2), Err(Trap::UndefinedElement)));
    }

    #[test]
    fn set_then_get() {
        let mut table = TableInstance::new(&TableType {
            elem: RefType::FuncRef,
            limits: Limits::new(4, Some(4)),
        })
        .unwrap();
        table.set(3, 17);
        assert_eq!(table.get(3).unwrap(), Some(17));
    }
}
