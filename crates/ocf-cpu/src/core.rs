//! Espresso core register state

/// Number of cores in the Espresso
pub const NUM_CORES: usize = 3;

/// Register state for a single Espresso core
///
/// Only the architectural state that call marshaling touches is kept
/// here: integer and float register files, link register, and the
/// instruction address pair.
#[derive(Debug, Clone)]
pub struct Core {
    /// Core index (0..3)
    pub id: u32,
    /// General purpose registers
    pub gpr: [u32; 32],
    /// Floating point registers
    pub fpr: [f64; 32],
    /// Condition register
    pub cr: u32,
    /// Link register
    pub lr: u32,
    /// Count register
    pub ctr: u32,
    /// Current instruction address
    pub cia: u32,
    /// Next instruction address
    pub nia: u32,
}

impl Core {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            gpr: [0; 32],
            fpr: [0.0; 32],
            cr: 0,
            lr: 0,
            ctr: 0,
            cia: 0,
            nia: 0,
        }
    }

    /// Read a GPR pair as a 64-bit value, high word in the lower
    /// numbered register
    #[inline]
    pub fn gpr_pair(&self, index: usize) -> u64 {
        (u64::from(self.gpr[index]) << 32) | u64::from(self.gpr[index + 1])
    }

    /// Write a 64-bit value into a GPR pair
    #[inline]
    pub fn set_gpr_pair(&mut self, index: usize, value: u64) {
        self.gpr[index] = (value >> 32) as u32;
        self.gpr[index + 1] = value as u32;
    }
}
