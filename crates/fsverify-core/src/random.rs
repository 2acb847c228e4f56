//! Sources of identifiers and size draws.

use crate::error::{Result, VerifyError};

/// Anything that can hand out 32-bit random values.
///
/// Closures implement it too, which lets tests pin identifiers.
pub trait IdSource {
    fn next_u32(&mut self) -> Result<u32>;
}

impl<F> IdSource for F
where
    F: FnMut() -> u32,
{
    fn next_u32(&mut self) -> Result<u32> {
        Ok(self())
    }
}

/// Operating system randomness via `getrandom`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl IdSource for OsRandom {
    fn next_u32(&mut self) -> Result<u32> {
        getrandom::u32().map_err(|err| VerifyError::Entropy {
            reason: err.to_string(),
        })
    }
}

/// Replays `values` in order, then repeats the last one. For tests.
#[derive(Debug, Clone)]
pub struct Sequence {
    values: Vec<u32>,
    next: usize,
}

impl Sequence {
    pub fn new(values: impl Into<Vec<u32>>) -> Self {
        let values = values.into();
        assert!(!values.is_empty(), "sequence needs at least one value");
        Self { values, next: 0 }
    }
}

impl IdSource for Sequence {
    fn next_u32(&mut self) -> Result<u32> {
        let value = self.values[self.next.min(self.values.len() - 1)];
        self.next += 1;
        Ok(value)
    }
}
