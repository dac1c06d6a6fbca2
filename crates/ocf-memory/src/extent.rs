//! Sequential bump allocators over fixed guest regions

use ocf_core::error::MemoryError;

/// Bump allocator over a fixed guest address range
///
/// The loader places module sections by walking a cursor forward
/// through the code and data regions; nothing is ever freed
/// individually, only `reset` for the transient loader extent.
#[derive(Debug)]
pub struct SequentialExtent {
    name: &'static str,
    base: u32,
    end: u32,
    pos: u32,
}

impl SequentialExtent {
    pub fn new(name: &'static str, base: u32, size: u32) -> Self {
        Self {
            name,
            base,
            end: base + size,
            pos: base,
        }
    }

    /// Allocate `size` bytes aligned to `align` (power of two, or 0/1
    /// for byte alignment)
    pub fn alloc(&mut self, size: u32, align: u32) -> Result<u32, MemoryError> {
        let align = align.max(1);
        debug_assert!(align.is_power_of_two());

        let addr = self
            .pos
            .checked_add(align - 1)
            .ok_or(MemoryError::RegionExhausted {
                region: self.name,
                size,
            })?
            & !(align - 1);

        let new_pos = addr.checked_add(size).ok_or(MemoryError::RegionExhausted {
            region: self.name,
            size,
        })?;

        if new_pos > self.end {
            return Err(MemoryError::RegionExhausted {
                region: self.name,
                size,
            });
        }

        self.pos = new_pos;
        Ok(addr)
    }

    /// Reset the cursor to the base of the extent
    pub fn reset(&mut self) {
        self.pos = self.base;
    }

    /// Current cursor position
    pub fn current_addr(&self) -> u32 {
        self.pos
    }

    /// Base address of the extent
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Bytes consumed so far
    pub fn used(&self) -> u32 {
        self.pos - self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_alignment() {
        let mut extent = SequentialExtent::new("test", 0x0200_0000, 0x1000);

        let a = extent.alloc(3, 1).unwrap();
        assert_eq!(a, 0x0200_0000);

        let b = extent.alloc(16, 0x100).unwrap();
        assert_eq!(b, 0x0200_0100);

        let c = extent.alloc(4, 4).unwrap();
        assert_eq!(c, 0x0200_0110);
    }

    #[test]
    fn test_exhaustion() {
        let mut extent = SequentialExtent::new("test", 0x1000_0000, 0x100);

        extent.alloc(0x100, 1).unwrap();
        let err = extent.alloc(1, 1).unwrap_err();
        assert!(matches!(err, MemoryError::RegionExhausted { .. }));
    }

    #[test]
    fn test_reset() {
        let mut extent = SequentialExtent::new("test", 0xE000_0000, 0x1000);

        extent.alloc(0x800, 1).unwrap();
        assert_eq!(extent.used(), 0x800);
        extent.reset();
        assert_eq!(extent.used(), 0);
        assert_eq!(extent.current_addr(), 0xE000_0000);
    }
}
