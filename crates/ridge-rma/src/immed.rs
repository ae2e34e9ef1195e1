//! Folding tiny payloads into a packet header.
//!
//! Operations whose entire payload fits in `IMMED_BYTES` never touch the
//! extended-header, request or transfer machinery. The header is sent alone.

use crate::error::IssueError;

/// Copy `len` bytes of `src` into the front of `dest`.
///
/// Empty buffers or a zero length make this a no-op. Word-sized lengths go
/// through a fixed-width copy; everything else is copied bytewise.
pub fn copy(src: &[u8], dest: &mut [u8], len: usize) -> Result<(), IssueError> {
    if src.is_empty() || dest.is_empty() || len == 0 {
        return Ok(());
    }
    if len > src.len() || len > dest.len() {
        return Err(IssueError::OutOfBounds {
            offset: 0,
            end: len as i64,
            have: src.len().min(dest.len()),
        });
    }

    match len {
        1 => dest[0] = src[0],
        2 => copy_fixed::<2>(src, dest),
        4 => copy_fixed::<4>(src, dest),
        8 => copy_fixed::<8>(src, dest),
        _ => dest[..len].copy_from_slice(&src[..len]),
    }
    Ok(())
}

/// Both sides hold at least `N` bytes; the caller checked.
fn copy_fixed<const N: usize>(src: &[u8], dest: &mut [u8]) {
    let mut word = [0u8; N];
    word.copy_from_slice(&src[..N]);
    dest[..N].copy_from_slice(&word);
}
