/// round x up to a multiple of align
///
/// * align must be a power of 2
#[inline]
pub const fn align_up(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (x + (align - 1)) & !(align - 1)
}

/// [`align_up`] 的 u32 版本，shader table 的各种尺寸都是 u32
#[inline]
pub const fn align_up_u32(x: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (x + (align - 1)) & !(align - 1)
}
