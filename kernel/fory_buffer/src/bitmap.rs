//! Null bitmaps for bulk fixed-width sequences.
//!
//! A bitmap covering `n` slots occupies [`width_in_bytes`]`(n)` bytes, always
//! a multiple of 8 so the queries can scan whole 64-bit words. Bit `i` lives
//! in byte `i / 8` at position `i % 8`; a set bit marks a present value.

/// The number of bytes a bitmap covering `num_bits` slots occupies.
#[must_use]
pub const fn width_in_bytes(num_bits: usize) -> usize {
    num_bits.div_ceil(64) * 8
}

/// Marks slot `index` as present.
pub fn set(bitmap: &mut [u8], index: usize) {
    bitmap[index >> 3] |= 1 << (index & 7);
}

/// Marks slot `index` as absent.
pub fn unset(bitmap: &mut [u8], index: usize) {
    bitmap[index >> 3] &= !(1 << (index & 7));
}

/// Whether slot `index` is present.
#[must_use]
pub fn is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap[index >> 3] & (1 << (index & 7)) != 0
}

/// Marks every slot in the bitmap as present.
pub fn set_all(bitmap: &mut [u8]) { bitmap.fill(0xFF); }

/// Whether any slot is present, scanning whole words.
#[must_use]
pub fn any_set(bitmap: &[u8]) -> bool {
    let mut words = bitmap.chunks_exact(8);
    let found = words.by_ref().any(|word| {
        u64::from_le_bytes(word.try_into().unwrap_or([0; 8])) != 0
    });

    found || words.remainder().iter().any(|byte| *byte != 0)
}

/// Whether any of the first `num_bits` slots is absent.
#[must_use]
pub fn any_unset(bitmap: &[u8], num_bits: usize) -> bool {
    let full_bytes = num_bits >> 3;
    if bitmap[..full_bytes].iter().any(|byte| *byte != 0xFF) {
        return true;
    }

    let tail_bits = num_bits & 7;
    if tail_bits == 0 {
        return false;
    }

    let mask = (1u8 << tail_bits) - 1;
    bitmap[full_bytes] & mask != mask
}

/// The number of absent slots among the first `num_bits`.
#[must_use]
pub fn count_unset(bitmap: &[u8], num_bits: usize) -> usize {
    let full_bytes = num_bits >> 3;
    let mut set = bitmap[..full_bytes]
        .iter()
        .map(|byte| byte.count_ones() as usize)
        .sum::<usize>();

    let tail_bits = num_bits & 7;
    if tail_bits != 0 {
        let mask = (1u8 << tail_bits) - 1;
        set += (bitmap[full_bytes] & mask).count_ones() as usize;
    }

    num_bits - set
}
