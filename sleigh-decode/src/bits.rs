//! Bit-twiddling over the 64-bit values produced by pattern expressions.

const fn build_masks() -> [u64; 9] {
    let mut masks = [0u64; 9];
    let mut i = 1;
    while i < 8 {
        masks[i] = (1u64 << (8 * i)) - 1;
        i += 1;
    }
    masks[8] = !0u64;
    masks
}

/// Byte-size indexed masks; index 0 is the empty mask.
pub const UINTB_MASKS: [u64; 9] = build_masks();

/// Mask covering `size` bytes; sizes above eight saturate to all ones.
pub fn calculate_mask(size: usize) -> u64 {
    UINTB_MASKS[size.min(8)]
}

/// Sign-extends `value` treating `bit` as the sign position.
pub fn sign_extend(value: u64, bit: u32) -> u64 {
    if bit >= 63 {
        return value;
    }
    let sa = 63 - bit;
    (((value << sa) as i64) >> sa) as u64
}

/// Clears every bit of `value` above position `bit`.
pub fn zero_extend(value: u64, bit: u32) -> u64 {
    if bit >= 63 {
        return value;
    }
    let sa = 63 - bit;
    (value << sa) >> sa
}

/// Number of significant bytes in a 32-bit word, counted from its most
/// significant end.
pub(crate) fn leading_byte_span(word: u32) -> usize {
    4 - (word.leading_zeros() as usize / 8).min(4)
}

/// Smallest all-ones mask covering every set bit of `value`.
pub fn covering_mask(value: u64) -> u64 {
    if value == 0 {
        0
    } else {
        u64::MAX >> value.leading_zeros()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extensions() {
        assert_eq!(sign_extend(0b100, 2), 0xffff_ffff_ffff_fffc);
        assert_eq!(sign_extend(0b011, 2), 0b011);
        assert_eq!(zero_extend(0xffff, 3), 0xf);
        assert_eq!(zero_extend(0x1234, 63), 0x1234);
    }

    #[test]
    fn masks_and_spans() {
        assert_eq!(calculate_mask(0), 0);
        assert_eq!(calculate_mask(2), 0xffff);
        assert_eq!(calculate_mask(12), !0);
        assert_eq!(leading_byte_span(0x00ff_0000), 3);
        assert_eq!(leading_byte_span(0), 0);
        assert_eq!(covering_mask(0x1f), 0x1f);
        assert_eq!(covering_mask(0x12), 0x1f);
        assert_eq!(covering_mask(0), 0);
    }
}
