//! Page permission flags

use bitflags::bitflags;

bitflags! {
    /// Access permissions for a guest page
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;

        const RW = Self::READ.bits() | Self::WRITE.bits();
        const RX = Self::READ.bits() | Self::EXECUTE.bits();
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_flags() {
        assert!(PageFlags::RWX.contains(PageFlags::WRITE));
        assert!(!PageFlags::RX.contains(PageFlags::WRITE));
        assert!(PageFlags::empty().is_empty());
    }
}
