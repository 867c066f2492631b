//! LIST response encoding, grounded in
//! `nvme_build_kv_list_response` (`ctrl_kv.c`).
//!
//! Wire format: a 4-byte little-endian count, followed by one record per
//! key (2-byte little-endian key length, the raw key bytes, then
//! zero-padding up to 4-byte alignment). Encoding stops as soon as the next
//! record would not fit in `max_buffer_size`; the leading count reflects
//! only what was actually written.

use crate::key::Key;

/// Build the LIST response body for `keys` within `max_buffer_size` bytes.
/// Returns the encoded bytes and the number of keys actually serialized.
///
/// `max_buffer_size < 4` is the one case the caller must reject before
/// calling this; this function assumes the
/// caller already checked that.
pub fn build_list_response(keys: &[Key], max_buffer_size: usize) -> (Vec<u8>, usize) {
    let mut out = Vec::with_capacity(max_buffer_size.min(keys.len() * 8 + 4));
    out.extend_from_slice(&0u32.to_le_bytes());
    let mut remaining = max_buffer_size.saturating_sub(4);
    let mut written = 0usize;

    for key in keys {
        let key_len = key.len();
        let pad = (4 - (key_len % 4)) % 4;
        let record_len = 2 + key_len + pad;
        if remaining < record_len {
            break;
        }
        out.extend_from_slice(&(key_len as u16).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend(std::iter::repeat(0u8).take(pad));
        remaining -= record_len;
        written += 1;
    }

    out[0..4].copy_from_slice(&(written as u32).to_le_bytes());
    (out, written)
}
