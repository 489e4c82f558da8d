//! Bounds-checked little-endian readers over byte slices.
//! Every accessor returns `None` instead of panicking when the slice is too short,
//! so malformed legacy files surface as errors rather than aborts.

/// Copies `N` bytes starting at `offset` into a fixed array.
#[inline]
fn array_at<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

#[inline]
pub(crate) fn u16_at(bytes: &[u8], offset: usize) -> Option<u16> {
    array_at(bytes, offset).map(u16::from_le_bytes)
}

#[inline]
pub(crate) fn u32_at(bytes: &[u8], offset: usize) -> Option<u32> {
    array_at(bytes, offset).map(u32::from_le_bytes)
}

#[inline]
pub(crate) fn u64_at(bytes: &[u8], offset: usize) -> Option<u64> {
    array_at(bytes, offset).map(u64::from_le_bytes)
}

#[inline]
pub(crate) fn f64_at(bytes: &[u8], offset: usize) -> Option<f64> {
    array_at(bytes, offset).map(f64::from_le_bytes)
}

/// Sector and stream indexes are stored as 32-bit values.
#[inline]
pub(crate) fn index_at(bytes: &[u8], offset: usize) -> Option<usize> {
    u32_at(bytes, offset).map(|value| value as usize)
}

/// Splits a slice into consecutive 32-bit indexes, ignoring a trailing partial chunk.
pub(crate) fn indexes(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as usize)
}
