//! Linear memory instance: a flat byte vector sized in 64 KiB pages, with
//! bounds-checked little-endian access.

use crate::error::{ResourceLimitError, Trap};
use crate::types::MemoryType;

pub const PAGE_SIZE: usize = 64 * 1024;

/// Format ceiling: a 32-bit address space is 65536 pages.
pub const MAX_PAGES: u32 = 65536;

#[derive(Debug)]
pub struct MemoryInstance {
    data: Vec<u8>,
    max: Option<u32>,
}

impl MemoryInstance {
    pub fn new(ty: &MemoryType) -> Result<Self, ResourceLimitError> {
        let min = ty.limits.min;
        if min > MAX_PAGES {
            return Err(ResourceLimitError::MemoryTooLarge {
                pages: min,
                ceiling: MAX_PAGES,
            });
        }
        if let Some(max) = ty.limits.max {
            if min > max {
                return Err(ResourceLimitError::MemoryExceedsMax { pages: min, max });
            }
        }
        Ok(Self {
            data: vec![0; min as usize * PAGE_SIZE],
            max: ty.limits.max,
        })
    }

    pub fn size_pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `memory.grow`: returns the previous page count, or -1 if the request
    /// exceeds the declared maximum or the format ceiling.
    pub fn grow(&mut self, delta: u32) -> i32 {
        let old = self.size_pages();
        let new = match old.checked_add(delta) {
            Some(n) => n,
            None => return -1,
        };
        if new > self.max.unwrap_or(MAX_PAGES) || new > MAX_PAGES {
            return -1;
        }
        self.data.resize(new as usize * PAGE_SIZE, 0);
        old as i32
    }

    /// Effective-address computation in 64-bit space so `addr + offset`
    /// cannot wrap.
    fn range(&self, addr: u32, offset: u32, len: usize) -> Result<std::ops::Range<usize>, Trap> {
        let start = addr as u64 + offset as u64;
        let end = start + len as u64;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    pub fn load<const N: usize>(&self, addr: u32, offset: u32) -> Result<[u8; N], Trap> {
        let range = self.range(addr, offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }

    pub fn store<const N: usize>(
        &mut self,
        addr: u32,
        offset: u32,
        bytes: [u8; N],
    ) -> Result<(), Trap> {
        let range = self.range(addr, offset, N)?;
        self.data[range].copy_from_slice(&bytes);
        Ok(())
    }

    /// Raw write used when applying data segments (bounds verified by the
    /// caller beforehand).
    pub(crate) fn write_slice(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[cfg(test)]
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn one_page() -> MemoryInstance {
        MemoryInstance::new(&MemoryType {
            limits: Limits::new(1, Some(2)),
        })
        .unwrap()
    }

    #[test]
    fn store_then_load_little_endian() {
        let mut mem = one_page();
        mem.store(8, 0, 0xDDCCBBAAu32.to_le_bytes()).unwrap();
        assert_eq!(mem.data()[8..12], [0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(mem.load::<4>(8, 0).unwrap(), 0xDDCCBBAAu32.to_le_bytes());
    }

    #[test]
    fn access_at_boundary() {
        let mut mem = one_page();
        assert!(mem.store(PAGE_SIZE as u32 - 4, 0, [0u8; 4]).is_ok());
        assert!(matches!(
            mem.store(PAGE_SIZE as u32, 0, [0u8; 4]),
            Err(Trap::MemoryOutOfBounds)
        ));
        // offset pushes the effective address past the end
        assert!(matches!(
            mem.load::<4>(PAGE_SIZE as u32 - 4, 1),
            Err(Trap::MemoryOutOfBounds)
        ));
    }

    #[test]
    fn grow_respects_max() {
        let mut mem = one_page();
        assert_eq!(mem.grow(1), 1);
        assert_eq!(mem.size_pages(), 2);
        assert_eq!(mem.grow(1), -1);
        assert_eq!(mem.size_pages(), 2);
    }

    #[test]
    fn initial_size_over_max_rejected() {
        let err = MemoryInstance::new(&MemoryType {
            limits: Limits::new(3, Some(2)),
        });
        assert!(matches!(
            err,
            Err(ResourceLimitError::MemoryExceedsMax { pages: 3, max: 2 })
        ));
    }
}
