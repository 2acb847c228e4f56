//! Self-similar content pattern.
//!
//! A seed is written at offset 0 and the filled prefix is copied onto itself
//! until the buffer is full. The same buffer is what gets written and what
//! reads are compared against, so writer and verifier can never disagree on
//! the expected bytes for a given identifier.

/// Size of the pattern buffer and of every I/O chunk. Must be a power of two.
pub const PATTERN_BUF_SIZE: usize = 1024 * 1024;

/// Seed bytes taken from a file identifier.
pub type Seed = [u8; 4];

/// Checksum sub-field of an identifier.
#[inline]
pub fn seed_for(id: u32) -> Seed {
    id.to_le_bytes()
}

/// Fill a buffer of `len` bytes by repeated doubling of `seed`.
///
/// `len` must be a power-of-two multiple of `seed.len()`; [`PATTERN_BUF_SIZE`]
/// always is for the 4-byte identifier seed. A zero `len` yields an empty buffer.
pub fn generate_pattern(seed: &[u8], len: usize) -> Vec<u8> {
    assert!(!seed.is_empty(), "pattern seed must not be empty");
    assert!(
        len == 0 || (len % seed.len() == 0 && (len / seed.len()).is_power_of_two()),
        "pattern length {} is not a power-of-two multiple of the seed length {}",
        len,
        seed.len()
    );

    let mut buf = vec![0u8; len];
    if len == 0 {
        return buf;
    }

    let mut size = seed.len();
    buf[..size].copy_from_slice(seed);
    while size < len {
        let (filled, rest) = buf.split_at_mut(size);
        rest[..size].copy_from_slice(filled);
        size *= 2;
    }
    buf
}

/// One differing byte found by [`mismatches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Offset within the compared slices
    pub offset: usize,
    pub expected: u8,
    pub actual: u8,
}

/// Every position where `expected` and `actual` differ, up to the shorter length.
pub fn mismatches<'a>(expected: &'a [u8], actual: &'a [u8]) -> impl Iterator<Item = Mismatch> + 'a {
    expected
        .iter()
        .zip(actual.iter())
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(offset, (&expected, &actual))| Mismatch {
            offset,
            expected,
            actual,
        })
}
