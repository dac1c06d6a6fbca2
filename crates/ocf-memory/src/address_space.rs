//! Guest address space implementation

use crate::constants::*;
use crate::pages::PageFlags;
use ocf_core::error::{AccessKind, MemoryError};
use parking_lot::RwLock;
use std::sync::Arc;

/// Guest memory region descriptor
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Base address
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    /// Page flags applied when the region is committed
    pub flags: PageFlags,
    /// Region name
    pub name: &'static str,
}

/// The emulated 32-bit virtual address space
///
/// Backed by one host reservation so guest address arithmetic is a
/// plain offset. Pages start uncommitted; the loader commits regions as
/// modules are placed. All multi-byte accessors are big-endian, which
/// is the only byte order the Espresso uses.
pub struct AddressSpace {
    /// Base pointer for the reserved host mapping
    base: *mut u8,
    /// Page flags for each guest page
    page_flags: RwLock<Vec<PageFlags>>,
    /// Fixed region map
    regions: Vec<MemoryRegion>,
}

// Safety: raw accesses go through check_access against the page table,
// and the page table itself is behind a RwLock.
unsafe impl Send for AddressSpace {}
unsafe impl Sync for AddressSpace {}

impl AddressSpace {
    /// Create a new address space with all regions uncommitted
    pub fn new() -> Result<Arc<Self>, MemoryError> {
        let base = Self::allocate_address_space(ADDRESS_SPACE_SIZE)?;
        let page_flags = RwLock::new(vec![PageFlags::empty(); NUM_PAGES]);

        let regions = vec![
            MemoryRegion {
                base: CODE_BASE,
                size: CODE_SIZE,
                flags: PageFlags::RWX,
                name: "Code",
            },
            MemoryRegion {
                base: DATA_BASE,
                size: DATA_SIZE,
                flags: PageFlags::RW,
                name: "Data",
            },
            MemoryRegion {
                base: STUB_BASE,
                size: STUB_SIZE,
                flags: PageFlags::RX,
                name: "Stubs",
            },
            MemoryRegion {
                base: LOADER_BASE,
                size: LOADER_SIZE,
                flags: PageFlags::RW,
                name: "Loader",
            },
        ];

        let space = Self {
            base,
            page_flags,
            regions,
        };

        // Code, data and stub regions live for the whole session. The
        // loader region is committed per load.
        space.commit(CODE_BASE, CODE_SIZE, PageFlags::RWX)?;
        space.commit(DATA_BASE, DATA_SIZE, PageFlags::RW)?;
        space.commit(STUB_BASE, STUB_SIZE, PageFlags::RWX)?;

        Ok(Arc::new(space))
    }

    #[cfg(unix)]
    fn allocate_address_space(size: usize) -> Result<*mut u8, MemoryError> {
        use libc::{mmap, MAP_ANONYMOUS, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE};

        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::OutOfMemory);
        }

        Ok(ptr as *mut u8)
    }

    #[cfg(windows)]
    fn allocate_address_space(size: usize) -> Result<*mut u8, MemoryError> {
        use windows_sys::Win32::System::Memory::*;

        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };

        if ptr.is_null() {
            return Err(MemoryError::OutOfMemory);
        }

        Ok(ptr as *mut u8)
    }

    /// Mark a range of pages as accessible with the given flags
    pub fn commit(&self, addr: u32, size: u32, flags: PageFlags) -> Result<(), MemoryError> {
        if addr % PAGE_SIZE != 0 {
            return Err(MemoryError::AlignmentError {
                addr,
                align: PAGE_SIZE,
            });
        }

        let start_page = (addr / PAGE_SIZE) as usize;
        let num_pages = size.div_ceil(PAGE_SIZE) as usize;
        let mut page_flags = self.page_flags.write();

        for page in start_page..start_page + num_pages {
            if page >= page_flags.len() {
                return Err(MemoryError::InvalidAddress(addr));
            }
            page_flags[page] = flags;
        }

        Ok(())
    }

    /// Return a range of pages to the uncommitted state
    pub fn uncommit(&self, addr: u32, size: u32) -> Result<(), MemoryError> {
        let start_page = (addr / PAGE_SIZE) as usize;
        let num_pages = size.div_ceil(PAGE_SIZE) as usize;
        let mut page_flags = self.page_flags.write();

        for page in start_page..start_page + num_pages {
            if page < page_flags.len() {
                page_flags[page] = PageFlags::empty();
            }
        }

        Ok(())
    }

    /// Check if a memory access is valid
    pub fn check_access(
        &self,
        addr: u32,
        size: u32,
        required: PageFlags,
    ) -> Result<(), MemoryError> {
        let start_page = (addr / PAGE_SIZE) as usize;
        let end_addr = addr
            .checked_add(size.saturating_sub(1))
            .ok_or(MemoryError::InvalidAddress(addr))?;
        let end_page = (end_addr / PAGE_SIZE) as usize;

        let page_flags = self.page_flags.read();

        for page in start_page..=end_page {
            if page >= page_flags.len() {
                return Err(MemoryError::InvalidAddress(addr));
            }

            if !page_flags[page].contains(required) {
                return Err(MemoryError::AccessViolation {
                    addr,
                    kind: if required.contains(PageFlags::WRITE) {
                        AccessKind::Write
                    } else if required.contains(PageFlags::EXECUTE) {
                        AccessKind::Execute
                    } else {
                        AccessKind::Read
                    },
                });
            }
        }

        Ok(())
    }

    /// Check whether an address lies inside any committed page
    pub fn is_mapped(&self, addr: u32) -> bool {
        self.check_access(addr, 1, PageFlags::READ).is_ok()
    }

    #[inline(always)]
    unsafe fn ptr(&self, addr: u32) -> *mut u8 {
        self.base.add(addr as usize)
    }

    /// Copy data into guest memory
    pub fn write_bytes(&self, addr: u32, data: &[u8]) -> Result<(), MemoryError> {
        self.check_access(addr, data.len() as u32, PageFlags::WRITE)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr(addr), data.len());
        }
        Ok(())
    }

    /// Copy data out of guest memory
    pub fn read_bytes(&self, addr: u32, size: u32) -> Result<Vec<u8>, MemoryError> {
        self.check_access(addr, size, PageFlags::READ)?;
        let mut data = vec![0u8; size as usize];
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr(addr), data.as_mut_ptr(), size as usize);
        }
        Ok(data)
    }

    /// Zero-fill a range of guest memory
    pub fn fill_zero(&self, addr: u32, size: u32) -> Result<(), MemoryError> {
        self.check_access(addr, size, PageFlags::WRITE)?;
        unsafe {
            std::ptr::write_bytes(self.ptr(addr), 0, size as usize);
        }
        Ok(())
    }

    /// Read a big-endian u16
    #[inline]
    pub fn read_be16(&self, addr: u32) -> Result<u16, MemoryError> {
        self.check_access(addr, 2, PageFlags::READ)?;
        let value: u16 = unsafe { std::ptr::read_unaligned(self.ptr(addr) as *const u16) };
        Ok(u16::from_be(value))
    }

    /// Write a big-endian u16
    #[inline]
    pub fn write_be16(&self, addr: u32, value: u16) -> Result<(), MemoryError> {
        self.check_access(addr, 2, PageFlags::WRITE)?;
        unsafe { std::ptr::write_unaligned(self.ptr(addr) as *mut u16, value.to_be()) };
        Ok(())
    }

    /// Read a big-endian u32
    #[inline]
    pub fn read_be32(&self, addr: u32) -> Result<u32, MemoryError> {
        self.check_access(addr, 4, PageFlags::READ)?;
        let value: u32 = unsafe { std::ptr::read_unaligned(self.ptr(addr) as *const u32) };
        Ok(u32::from_be(value))
    }

    /// Write a big-endian u32
    #[inline]
    pub fn write_be32(&self, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.check_access(addr, 4, PageFlags::WRITE)?;
        unsafe { std::ptr::write_unaligned(self.ptr(addr) as *mut u32, value.to_be()) };
        Ok(())
    }

    /// Read a big-endian u64
    #[inline]
    pub fn read_be64(&self, addr: u32) -> Result<u64, MemoryError> {
        self.check_access(addr, 8, PageFlags::READ)?;
        let value: u64 = unsafe { std::ptr::read_unaligned(self.ptr(addr) as *const u64) };
        Ok(u64::from_be(value))
    }

    /// Write a big-endian u64
    #[inline]
    pub fn write_be64(&self, addr: u32, value: u64) -> Result<(), MemoryError> {
        self.check_access(addr, 8, PageFlags::WRITE)?;
        unsafe { std::ptr::write_unaligned(self.ptr(addr) as *mut u64, value.to_be()) };
        Ok(())
    }

    /// Read a NUL-terminated string from guest memory, bounded by `max`
    pub fn read_cstring(&self, addr: u32, max: u32) -> Result<String, MemoryError> {
        let mut out = Vec::new();
        for offset in 0..max {
            let bytes = self.read_bytes(addr + offset, 1)?;
            if bytes[0] == 0 {
                break;
            }
            out.push(bytes[0]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Get memory regions
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, ADDRESS_SPACE_SIZE);
        }

        #[cfg(windows)]
        unsafe {
            use windows_sys::Win32::System::Memory::*;
            VirtualFree(self.base as *mut _, 0, MEM_RELEASE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let mem = AddressSpace::new().unwrap();
        assert_eq!(mem.regions().len(), 4);
    }

    #[test]
    fn test_big_endian_roundtrip() {
        let mem = AddressSpace::new().unwrap();

        mem.write_be32(DATA_BASE, 0x12345678).unwrap();
        assert_eq!(mem.read_be32(DATA_BASE).unwrap(), 0x12345678);

        // Big-endian in memory: most significant byte first
        let raw = mem.read_bytes(DATA_BASE, 4).unwrap();
        assert_eq!(raw, [0x12, 0x34, 0x56, 0x78]);

        mem.write_be64(DATA_BASE + 8, 0xDEADBEEF_CAFEF00D).unwrap();
        assert_eq!(mem.read_be64(DATA_BASE + 8).unwrap(), 0xDEADBEEF_CAFEF00D);
    }

    #[test]
    fn test_uncommitted_access_faults() {
        let mem = AddressSpace::new().unwrap();

        // The fake-data range is never backed
        assert!(mem.read_be32(0xFFF0_0800).is_err());
        assert!(!mem.is_mapped(0xFFF0_0800));
    }

    #[test]
    fn test_loader_region_commit_cycle() {
        let mem = AddressSpace::new().unwrap();

        assert!(mem.write_be32(LOADER_BASE, 1).is_err());
        mem.commit(LOADER_BASE, LOADER_SIZE, PageFlags::RW).unwrap();
        mem.write_be32(LOADER_BASE, 1).unwrap();
        mem.uncommit(LOADER_BASE, LOADER_SIZE).unwrap();
        assert!(mem.read_be32(LOADER_BASE).is_err());
    }

    #[test]
    fn test_read_cstring() {
        let mem = AddressSpace::new().unwrap();
        mem.write_bytes(DATA_BASE, b"coreinit.rpl\0junk").unwrap();
        assert_eq!(mem.read_cstring(DATA_BASE, 64).unwrap(), "coreinit.rpl");
    }
}
