//! # fsverify-core
//!
//! Self-verifying test files for filesystem stress testing.
//!
//! Each [`TestFile`] owns one uniquely named file whose content is a repeating
//! pattern derived from the file's random identifier. The file can be
//! re-read at any time and compared byte for byte against the regenerated
//! pattern, so silent data corruption is detected without storing checksums.
//!
//! ## Lifecycle
//!
//! ```text
//! Directory::create_file  ->  lock().write()  ->  lock().check() ...  ->  lock().delete()
//!  (exclusive create,          (pattern, sync,     (compare against       (unlink + remove,
//!   linked at chain head)       cache drop)         the pattern)           refused if corrupt)
//! ```
//!
//! Mutating operations live on [`FileGuard`], so they can only be called with
//! the file's lock held.

pub mod directory;
pub mod error;
pub mod io;
pub mod lock;
pub mod pattern;
pub mod random;
pub mod test_file;

pub use directory::{DeleteSummary, Directory};
pub use error::{classify_io, ErrorKind, IoOp, Result, VerifyError};
pub use pattern::{generate_pattern, seed_for, PATTERN_BUF_SIZE};
pub use random::{IdSource, OsRandom, Sequence};
pub use test_file::{CheckOutcome, Deletion, FileGuard, FileState, TestFile, WriteReport};
