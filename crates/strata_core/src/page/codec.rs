//! Fixed-width little-endian field access for page images.
//!
//! Callers guarantee offsets are in bounds; every layout is a compile-time
//! constant checked against `PAGE_SIZE`.

pub(crate) fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(bytes)
}

pub(crate) fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Reads an entry count and checks it against a page capacity.
pub(crate) fn read_count(
    buf: &[u8],
    offset: usize,
    capacity: usize,
    what: &str,
) -> crate::error::CoreResult<usize> {
    let count = read_i32(buf, offset);
    usize::try_from(count)
        .ok()
        .filter(|&c| c <= capacity)
        .ok_or_else(|| {
            crate::error::CoreError::page_corruption(format!(
                "{what} entry count {count} outside 0..={capacity}"
            ))
        })
}
