//! Espresso instruction encodings used by the loader and stub writers

/// `blr` encoding
pub const BLR: u32 = 0x4E80_0020;

/// Primary opcode of the `kc` system call instruction
const KC_OPCD: u32 = 17;

/// Primary opcode of the `b` family
const B_OPCD: u32 = 18;

/// Field mask for the 24-bit branch displacement (LI << 2)
pub const B_LI_MASK: u32 = 0x03FF_FFFC;

/// Maximum forward reach of a relative `b`, in bytes
pub const B_MAX_FORWARD: i64 = 0x01FF_FFFC;

/// Maximum backward reach of a relative `b`, in bytes
pub const B_MAX_BACKWARD: i64 = -0x0200_0000;

/// Encode a `kc` instruction carrying a 24-bit system call id
pub fn encode_kc(id: u32) -> u32 {
    (KC_OPCD << 26) | ((id & 0x00FF_FFFF) << 1) | 1
}

/// Decode the system call id from a `kc` instruction, if it is one
pub fn decode_kc(instr: u32) -> Option<u32> {
    if instr >> 26 == KC_OPCD && instr & 1 == 1 {
        Some((instr >> 1) & 0x00FF_FFFF)
    } else {
        None
    }
}

/// Encode a relative `b` from `from` to `target`
///
/// The displacement must fit in the signed 26-bit field; the caller
/// checks reach with [`branch_in_range`] first.
pub fn encode_b_rel(from: u32, target: u32) -> u32 {
    let delta = i64::from(target) - i64::from(from);
    debug_assert!((B_MAX_BACKWARD..=B_MAX_FORWARD).contains(&delta));
    (B_OPCD << 26) | ((delta as u32) & B_LI_MASK)
}

/// Encode an absolute `ba` to `target`
///
/// Only targets below 0x03fffffc are reachable.
pub fn encode_b_abs(target: u32) -> u32 {
    debug_assert!(target < 0x03FF_FFFC);
    (B_OPCD << 26) | (target & B_LI_MASK) | 2
}

/// Whether a relative branch at `from` can reach `target`
pub fn branch_in_range(from: u32, target: u32) -> bool {
    let delta = i64::from(target) - i64::from(from);
    (B_MAX_BACKWARD..=B_MAX_FORWARD).contains(&delta)
}

/// Replace the LI field of an existing branch instruction, preserving
/// opcode, AA and LK bits
pub fn patch_branch_target(instr: u32, from: u32, target: u32) -> u32 {
    let delta = (i64::from(target) - i64::from(from)) as u32;
    (instr & !B_LI_MASK) | (delta & B_LI_MASK)
}

/// rA field of a D-form instruction (bits 16..21 from the top)
pub fn d_form_ra(instr: u32) -> u32 {
    (instr >> 16) & 0x1F
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kc_roundtrip() {
        let instr = encode_kc(0x1234);
        assert_eq!(instr >> 26, 17);
        assert_eq!(decode_kc(instr), Some(0x1234));
        assert_eq!(decode_kc(BLR), None);
    }

    #[test]
    fn test_branch_encoding() {
        // Forward branch of 8 bytes
        let instr = encode_b_rel(0x0200_0000, 0x0200_0008);
        assert_eq!(instr, (18 << 26) | 8);

        // Backward branch
        let instr = encode_b_rel(0x0200_0100, 0x0200_00F0);
        assert_eq!(instr & B_LI_MASK, (-16i32 as u32) & B_LI_MASK);

        // Absolute branch keeps the AA bit
        let instr = encode_b_abs(0x0100_0000);
        assert_eq!(instr & 2, 2);
        assert_eq!(instr & B_LI_MASK, 0x0100_0000);
    }

    #[test]
    fn test_branch_range() {
        assert!(branch_in_range(0x0200_0000, 0x0200_0000 + 0x01FF_FFFC));
        assert!(!branch_in_range(0x0200_0000, 0x0200_0000 + 0x0200_0000));
        assert!(branch_in_range(0x0300_0000, 0x0100_0000));
    }

    #[test]
    fn test_patch_preserves_link_bit() {
        let bl = (18 << 26) | 1;
        let patched = patch_branch_target(bl, 0x0200_0000, 0x0200_0010);
        assert_eq!(patched & 1, 1);
        assert_eq!(patched & B_LI_MASK, 0x10);
    }
}
