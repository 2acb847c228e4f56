//! Self-verifying test files.
//!
//! A [`TestFile`] reserves a uniquely named empty file at construction, fills
//! it with the identifier's pattern on [`FileGuard::write`], re-reads and
//! compares it on [`FileGuard::check`], and removes it on
//! [`FileGuard::delete`] unless corruption was ever seen, in which case the
//! file stays on disk as evidence.
//!
//! The immutable identity (id, name, path, target size) is readable without
//! the lock. Everything that changes lives behind the per-file lock and is
//! only reachable through a [`FileGuard`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{MutexGuard, Weak};

use fsverify_config::{log_file_debug, log_file_error, log_file_info, log_file_warn, FileConfig};

use crate::directory::{Directory, Release};
use crate::error::{classify_io, ErrorKind, IoOp, Result, VerifyError};
use crate::io::{self as fio, CacheHint};
use crate::lock::EntityLock;
use crate::pattern::{generate_pattern, mismatches, seed_for, Seed, PATTERN_BUF_SIZE};
use crate::random::IdSource;

/// Random slack added to every target size so few files land on a power of two.
pub const SIZE_JITTER: u64 = 4096;

/// `ctime`-style layout used for `created_at`.
const CREATED_AT_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// Mutable per-file state, guarded by the file's lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileState {
    /// Local time of the first write
    pub created_at: Option<String>,
    /// Completed verification passes
    pub check_count: u64,
    /// Sticky: the data sync or close after a write failed
    pub sync_failed: bool,
    /// Sticky: a pattern mismatch was observed
    pub has_error: bool,
}

/// Result of a verification pass that did not hit a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The file is already known to be corrupt; storage was not read.
    Skipped,
    /// Every expected byte matched.
    Clean { bytes: u64 },
    /// End of file before `expected` bytes; what was there matched.
    Short { expected: u64, actual: u64 },
    /// More data than `expected`; the expected prefix matched.
    Long { expected: u64, actual: u64 },
    /// Pattern mismatch starting in the chunk at `offset`.
    ///
    /// `masked` is set when the file's data sync had already failed, which
    /// explains damage without implicating the filesystem.
    Corrupt {
        offset: u64,
        mismatches: u64,
        masked: bool,
    },
}

impl CheckOutcome {
    /// Only an unexplained mismatch counts as a failed check.
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckOutcome::Corrupt { masked: false, .. })
    }
}

/// What happened during [`FileGuard::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub bytes_written: u64,
    /// The write loop stopped early on ENOSPC/EDQUOT
    pub device_full: bool,
    /// Current value of the sticky flag after this write
    pub sync_failed: bool,
    /// Outcome of the verification pass when `immediate_check` is enabled
    pub immediate: Option<CheckOutcome>,
}

impl WriteReport {
    pub fn corruption_detected(&self) -> bool {
        self.immediate.as_ref().is_some_and(CheckOutcome::is_failure)
    }
}

/// What happened during [`FileGuard::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Removed,
    /// Someone else already removed the file from storage.
    AlreadyGone,
    /// The file is quarantined and was left in place.
    Refused,
}

/// One stress-test file.
#[derive(Debug)]
pub struct TestFile {
    id: u32,
    name: String,
    path: PathBuf,
    target_size: u64,
    directory: Weak<Directory>,
    state: EntityLock<FileState>,
}

impl TestFile {
    /// Reserve a new uniquely named empty file in `directory`.
    ///
    /// Draws the target size first (exponent, then jitter), then identifiers
    /// until an exclusive create succeeds. A name that already exists is
    /// never reused; any other create failure is fatal. The new file is not
    /// linked into the directory's chain.
    ///
    /// Settings that fail [`FileConfig::validate`] are rejected before any draw.
    pub fn create(
        directory: &Directory,
        config: &FileConfig,
        rng: &mut impl IdSource,
    ) -> Result<TestFile> {
        config.validate()?;
        let target_size = pick_target_size(config, rng)?;

        loop {
            let id = rng.next_u32()?;
            let name = name_for(id);
            let path = directory.path().join(&name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&path)
            {
                Ok(file) => {
                    if let Err(e) = fio::close(file) {
                        log_file_warn!("Close after create failed", path = display(path.display()), error = display(&e));
                    }
                    log_file_debug!("Created file", path = display(path.display()), target_size = target_size);
                    return Ok(TestFile {
                        id,
                        state: EntityLock::new(name.clone(), FileState::default()),
                        name,
                        path,
                        target_size,
                        directory: directory.downgrade(),
                    });
                }
                Err(e) if classify_io(IoOp::Create, &e) == ErrorKind::Tolerated => {
                    log_file_debug!("Name taken, drawing another", name = name.as_str());
                }
                Err(e) => return Err(VerifyError::io(IoOp::Create, path, e)),
            }
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Fixed-width hex rendering of the id; also the on-disk file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target_size(&self) -> u64 {
        self.target_size
    }

    pub fn seed(&self) -> Seed {
        seed_for(self.id)
    }

    pub(crate) fn belongs_to(&self, directory: &Weak<Directory>) -> bool {
        self.directory.ptr_eq(directory)
    }

    /// Blocking acquire of the file's lock.
    pub fn lock(&self) -> Result<FileGuard<'_>> {
        let state = self.state.lock()?;
        Ok(FileGuard { file: self, state })
    }

    /// Non-blocking acquire; `Ok(None)` when another guard is alive.
    pub fn try_lock(&self) -> Result<Option<FileGuard<'_>>> {
        Ok(self
            .state
            .try_lock()?
            .map(|state| FileGuard { file: self, state }))
    }
}

/// `2^(min + r % (max - min + 1)) + (r' % 4096)`, for validated settings.
fn pick_target_size(config: &FileConfig, rng: &mut impl IdSource) -> Result<u64> {
    let min = config.min_size_bits();
    let span = config.max_size_bits().saturating_sub(min) + 1;
    let bits = min + rng.next_u32()? % span;
    let jitter = u64::from(rng.next_u32()?) % SIZE_JITTER;
    Ok((1u64 << bits) + jitter)
}

/// The raw calls [`FileGuard::write`] makes against the open file.
trait WriteSink {
    /// Write all of `buf`; on error, also report how much made it out.
    fn put(&mut self, file: &mut File, buf: &[u8]) -> std::result::Result<usize, (usize, io::Error)>;

    fn sync(&mut self, file: &File) -> io::Result<()>;
}

struct OsSink;

impl WriteSink for OsSink {
    fn put(&mut self, file: &mut File, buf: &[u8]) -> std::result::Result<usize, (usize, io::Error)> {
        fio::write_all_counted(file, buf)
    }

    fn sync(&mut self, file: &File) -> io::Result<()> {
        file.sync_data()
    }
}

fn name_for(id: u32) -> String {
    format!("{:08x}", id)
}

/// Exclusive access to a [`TestFile`]. Dropping it releases the lock.
pub struct FileGuard<'a> {
    file: &'a TestFile,
    state: MutexGuard<'a, FileState>,
}

impl<'a> FileGuard<'a> {
    pub fn file(&self) -> &'a TestFile {
        self.file
    }

    pub fn state(&self) -> &FileState {
        &self.state
    }

    /// Fill the file with its pattern up to the target size and sync it.
    ///
    /// A full device stops the write early without flagging the file. A failed
    /// data sync or close sets the sticky `sync_failed` flag. Any other write
    /// error is fatal.
    pub fn write(&mut self, config: &FileConfig) -> Result<WriteReport> {
        self.write_with(config, &mut OsSink)
    }

    fn write_with(&mut self, config: &FileConfig, sink: &mut impl WriteSink) -> Result<WriteReport> {
        let test_file = self.file;
        let path = test_file.path();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| VerifyError::io(IoOp::Open, path, e))?;

        if self.state.created_at.is_none() {
            self.state.created_at = Some(chrono::Local::now().format(CREATED_AT_FORMAT).to_string());
        }

        let pattern = generate_pattern(&test_file.seed(), PATTERN_BUF_SIZE);
        let target = test_file.target_size;
        let mut offset = 0u64;
        let mut device_full = false;

        while offset < target {
            let chunk = (target - offset).min(PATTERN_BUF_SIZE as u64) as usize;
            match sink.put(&mut file, &pattern[..chunk]) {
                Ok(n) => offset += n as u64,
                Err((n, e)) if classify_io(IoOp::Write, &e) == ErrorKind::Tolerated => {
                    offset += n as u64;
                    device_full = true;
                    log_file_warn!(
                        "Out of disk space, probably a race with another writer",
                        path = display(path.display()),
                        written = offset,
                        target = target,
                    );
                    break;
                }
                Err((_, e)) => return Err(VerifyError::io(IoOp::Write, path, e)),
            }
        }

        if offset > target {
            log_file_error!("Bug: wrote more than the target size", path = display(path.display()), written = offset, target = target);
        }

        if let Err(e) = sink.sync(&file) {
            log_file_warn!("fdatasync failed", path = display(path.display()), error = display(&e));
            self.state.sync_failed = true;
        }

        fio::advise(&file, CacheHint::DontNeed);

        let immediate = if config.immediate_check() && !self.state.has_error {
            file.seek(SeekFrom::Start(0))
                .map_err(|e| VerifyError::io(IoOp::Read, path, e))?;
            let outcome = self.verify(&mut file, &pattern);
            self.state.check_count += 1;
            Some(outcome?)
        } else {
            None
        };

        if let Err(e) = fio::close(file) {
            log_file_warn!("close failed", path = display(path.display()), error = display(&e));
            self.state.sync_failed = true;
        }

        Ok(WriteReport {
            bytes_written: offset,
            device_full,
            sync_failed: self.state.sync_failed,
            immediate,
        })
    }

    /// Re-read the file and compare it against the pattern.
    ///
    /// Already-corrupt files are skipped without touching storage. Otherwise
    /// the check counter advances once, whatever the result. An unmasked
    /// mismatch is returned as [`VerifyError::Corruption`].
    pub fn check(&mut self) -> Result<CheckOutcome> {
        let test_file = self.file;
        debug_assert!(test_file.state.is_locked().unwrap_or(true));

        let path = test_file.path();
        if self.state.has_error {
            return Ok(CheckOutcome::Skipped);
        }

        let pattern = generate_pattern(&test_file.seed(), PATTERN_BUF_SIZE);
        let result = File::open(path)
            .map_err(|e| VerifyError::io(IoOp::Open, path, e))
            .and_then(|mut file| {
                let outcome = self.verify(&mut file, &pattern);
                if let Err(e) = fio::close(file) {
                    log_file_debug!("close after check failed", path = display(path.display()), error = display(&e));
                }
                outcome
            });
        self.state.check_count += 1;

        match result? {
            CheckOutcome::Corrupt {
                offset,
                mismatches,
                masked: false,
            } => Err(VerifyError::Corruption {
                path: path.to_path_buf(),
                offset,
                mismatches,
            }),
            outcome => Ok(outcome),
        }
    }

    /// Compare an open file, from its current position, against `pattern`.
    fn verify(&mut self, file: &mut File, pattern: &[u8]) -> Result<CheckOutcome> {
        let test_file = self.file;
        let path = test_file.path();
        let target = test_file.target_size;

        fio::advise(file, CacheHint::NoReuse);

        let mut buf = vec![0u8; pattern.len()];
        let mut offset = 0u64;
        let mut short = false;
        let mut masked: Option<(u64, u64)> = None;

        while offset < target {
            let want = (target - offset).min(buf.len() as u64) as usize;
            let got = fio::read_full(file, &mut buf[..want])
                .map_err(|e| VerifyError::io(IoOp::Read, path, e))?;

            if pattern[..got] != buf[..got] {
                let count = self.report_mismatch(offset, &pattern[..got], &buf[..got]);
                if !self.state.sync_failed {
                    fio::advise(file, CacheHint::DontNeed);
                    return Ok(CheckOutcome::Corrupt {
                        offset,
                        mismatches: count,
                        masked: false,
                    });
                }
                let (_, total) = masked.get_or_insert((offset, 0));
                *total += count;
            }

            offset += got as u64;
            if got < want {
                short = true;
                break;
            }
        }

        let mut actual = offset;
        if short {
            log_file_warn!("File smaller than expected", path = display(path.display()), expected = target, got = offset);
        } else {
            let mut probe = [0u8; 1];
            let extra = file
                .read(&mut probe)
                .map_err(|e| VerifyError::io(IoOp::Read, path, e))?;
            if extra > 0 {
                actual = file.metadata().map(|m| m.len()).unwrap_or(offset + extra as u64);
                log_file_warn!("File larger than expected", path = display(path.display()), expected = target, got = actual);
            }
        }

        fio::advise(file, CacheHint::DontNeed);

        Ok(match masked {
            Some((offset, mismatches)) => CheckOutcome::Corrupt {
                offset,
                mismatches,
                masked: true,
            },
            None if short => CheckOutcome::Short {
                expected: target,
                actual,
            },
            None if actual > target => CheckOutcome::Long {
                expected: target,
                actual,
            },
            None => CheckOutcome::Clean { bytes: offset },
        })
    }

    /// Quarantine the file and log every differing byte of the chunk.
    fn report_mismatch(&mut self, chunk_offset: u64, expected: &[u8], actual: &[u8]) -> u64 {
        self.state.has_error = true;
        let test_file = self.file;
        let path = test_file.path();

        log_file_error!(
            "File corruption",
            path = display(path.display()),
            created_at = self.state.created_at.as_deref().unwrap_or("unknown"),
            around = chunk_offset,
            pattern = test_file.name(),
            checks = self.state.check_count,
            sync_failed = self.state.sync_failed,
        );

        let mut count = 0u64;
        for m in mismatches(expected, actual) {
            count += 1;
            log_file_error!(
                "Byte mismatch",
                pos = chunk_offset + m.offset as u64,
                expected = display(format!("{:02x}", m.expected)),
                got = display(format!("{:02x}", m.actual)),
            );
        }
        count
    }

    /// Unlink the file from its directory and remove it from storage.
    ///
    /// Quarantined files are refused and stay both on disk and in the chain.
    /// A file whose name has since been taken over by a newer file in the
    /// same directory leaves storage alone: the bytes belong to the newcomer.
    /// Consumes the guard: the lock is released on return either way.
    pub fn delete(self) -> Result<Deletion> {
        let test_file = self.file;
        let path = test_file.path();
        if self.state.has_error {
            log_file_info!("Refusing to delete corrupted file", path = display(path.display()));
            return Ok(Deletion::Refused);
        }

        if let Some(directory) = test_file.directory.upgrade() {
            if directory.release(test_file)? == Release::Superseded {
                log_file_warn!("Name now owned by a newer file, not removing", path = display(path.display()));
                return Ok(Deletion::AlreadyGone);
            }
        }

        match fs::remove_file(path) {
            Ok(()) => Ok(Deletion::Removed),
            Err(e) if classify_io(IoOp::Remove, &e) == ErrorKind::Tolerated => {
                log_file_warn!("File was already deleted", path = display(path.display()));
                Ok(Deletion::AlreadyGone)
            }
            Err(e) => Err(VerifyError::io(IoOp::Remove, path, e)),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_sync_failed(&mut self) {
        self.state.sync_failed = true;
    }
}

impl std::fmt::Debug for FileGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileGuard")
            .field("name", &self.file.name)
            .field("state", &*self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::Sequence;
    use std::io::Write;
    use std::os::unix::fs::FileExt;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Directory>) {
        let temp = TempDir::new().unwrap();
        let dir = Directory::create(temp.path().join("d")).unwrap();
        (temp, dir)
    }

    fn small() -> FileConfig {
        FileConfig::new(10, 10, false)
    }

    fn flip_byte(path: &Path, pos: u64) {
        let file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        let mut byte = [0u8; 1];
        file.read_exact_at(&mut byte, pos).unwrap();
        byte[0] ^= 0xff;
        file.write_all_at(&byte, pos).unwrap();
    }

    #[test]
    fn test_create_reserves_empty_file() {
        let (_temp, dir) = setup();
        let mut rng = Sequence::new([0, 7, 0xDEADBEEF]);
        let file = TestFile::create(&dir, &small(), &mut rng).unwrap();

        assert_eq!(file.name(), "deadbeef");
        assert_eq!(file.target_size(), 1024 + 7);
        assert_eq!(fs::metadata(file.path()).unwrap().len(), 0);
        assert_eq!(file.lock().unwrap().state(), &FileState::default());
    }

    #[test]
    fn test_create_skips_taken_name() {
        let (_temp, dir) = setup();
        fs::write(dir.path().join("0000abcd"), b"occupied").unwrap();

        let mut rng = Sequence::new([0, 0, 0xabcd, 0xabcd, 0x1234]);
        let file = TestFile::create(&dir, &small(), &mut rng).unwrap();

        assert_eq!(file.name(), "00001234");
        assert_eq!(fs::read(dir.path().join("0000abcd")).unwrap(), b"occupied");
    }

    #[test]
    fn test_create_in_missing_directory_is_fatal() {
        let (_temp, dir) = setup();
        fs::remove_dir(dir.path()).unwrap();
        let err = TestFile::create(&dir, &small(), &mut Sequence::new([1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_write_fills_pattern() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 100, 0x01020304])).unwrap();
        let report = file.lock().unwrap().write(&small()).unwrap();

        assert_eq!(report.bytes_written, 1124);
        assert!(!report.device_full);
        assert!(report.immediate.is_none());

        let data = fs::read(file.path()).unwrap();
        assert_eq!(data.len(), 1124);
        assert!(data.chunks(4).all(|c| c == &[4u8, 3, 2, 1][..c.len()]));
    }

    #[test]
    fn test_created_at_set_on_first_write_only() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 5])).unwrap();
        let mut guard = file.lock().unwrap();
        assert!(guard.state().created_at.is_none());

        guard.write(&small()).unwrap();
        let first = guard.state().created_at.clone().unwrap();
        assert!(!first.ends_with('\n'));

        guard.write(&small()).unwrap();
        assert_eq!(guard.state().created_at.as_deref(), Some(first.as_str()));
    }

    #[test]
    fn test_short_and_long_files_are_not_corruption() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 9])).unwrap();
        let mut guard = file.lock().unwrap();
        guard.write(&small()).unwrap();

        let handle = OpenOptions::new().write(true).open(file.path()).unwrap();
        handle.set_len(500).unwrap();
        assert_eq!(
            guard.check().unwrap(),
            CheckOutcome::Short {
                expected: 1024,
                actual: 500
            }
        );

        guard.write(&small()).unwrap();
        let mut append = OpenOptions::new().append(true).open(file.path()).unwrap();
        append.write_all(b"trailing").unwrap();
        assert_eq!(
            guard.check().unwrap(),
            CheckOutcome::Long {
                expected: 1024,
                actual: 1032
            }
        );
        assert!(!guard.state().has_error);
        assert_eq!(guard.state().check_count, 2);
    }

    #[test]
    fn test_corruption_masked_by_sync_failure() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 0xDEADBEEF])).unwrap();
        let mut guard = file.lock().unwrap();
        guard.write(&small()).unwrap();
        guard.force_sync_failed();

        flip_byte(file.path(), 10);
        flip_byte(file.path(), 11);

        let outcome = guard.check().unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::Corrupt {
                offset: 0,
                mismatches: 2,
                masked: true
            }
        );
        assert!(!outcome.is_failure());
        assert!(guard.state().has_error);
    }

    #[test]
    fn test_corruption_in_later_chunk() {
        let (_temp, dir) = setup();
        let config = FileConfig::new(21, 21, false);
        let file = TestFile::create(&dir, &config, &mut Sequence::new([0, 1, 42])).unwrap();
        let mut guard = file.lock().unwrap();
        guard.write(&config).unwrap();

        let pos = PATTERN_BUF_SIZE as u64 + 3;
        flip_byte(file.path(), pos);

        match guard.check() {
            Err(VerifyError::Corruption {
                offset, mismatches, ..
            }) => {
                assert_eq!(offset, PATTERN_BUF_SIZE as u64);
                assert_eq!(mismatches, 1);
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_immediate_check_detects_nothing_on_clean_write() {
        let (_temp, dir) = setup();
        let config = FileConfig::new(10, 10, true);
        let file = TestFile::create(&dir, &config, &mut Sequence::new([0, 0, 77])).unwrap();
        let mut guard = file.lock().unwrap();
        let report = guard.write(&config).unwrap();

        assert_eq!(report.immediate, Some(CheckOutcome::Clean { bytes: 1024 }));
        assert!(!report.corruption_detected());
        assert_eq!(guard.state().check_count, 1);
    }

    #[test]
    fn test_check_missing_file_is_fatal_and_counted() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 3])).unwrap();
        fs::remove_file(file.path()).unwrap();

        let mut guard = file.lock().unwrap();
        let err = guard.check().unwrap_err();
        assert!(matches!(err, VerifyError::Io { op: IoOp::Open, .. }));
        assert_eq!(guard.state().check_count, 1);
    }

    #[test]
    fn test_delete_tolerates_missing_file() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 3])).unwrap();
        fs::remove_file(file.path()).unwrap();
        assert_eq!(file.lock().unwrap().delete().unwrap(), Deletion::AlreadyGone);
    }

    #[test]
    fn test_try_lock_reports_held() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 3])).unwrap();
        let guard = file.lock().unwrap();
        assert!(file.try_lock().unwrap().is_none());
        drop(guard);
        assert!(file.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_target_size_span() {
        let config = FileConfig::new(10, 12, false);
        assert_eq!(pick_target_size(&config, &mut Sequence::new([0, 0])).unwrap(), 1024);
        assert_eq!(pick_target_size(&config, &mut Sequence::new([2, 4095])).unwrap(), 4096 + 4095);
        assert_eq!(pick_target_size(&config, &mut Sequence::new([3, 4096])).unwrap(), 1024);
    }

    #[test]
    fn test_create_rejects_invalid_settings() {
        let (_temp, dir) = setup();
        for config in [FileConfig::new(10, 64, false), FileConfig::new(12, 10, false)] {
            let err = TestFile::create(&dir, &config, &mut Sequence::new([0, 0, 1])).unwrap_err();
            assert!(matches!(err, VerifyError::InvalidConfig(_)), "{err}");
            assert_eq!(err.kind(), ErrorKind::Fatal);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    struct Exhausted;

    impl IdSource for Exhausted {
        fn next_u32(&mut self) -> Result<u32> {
            Err(VerifyError::Entropy {
                reason: "exhausted".into(),
            })
        }
    }

    #[test]
    fn test_create_propagates_random_source_failure() {
        let (_temp, dir) = setup();
        let err = TestFile::create(&dir, &small(), &mut Exhausted).unwrap_err();
        assert!(matches!(err, VerifyError::Entropy { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Writes through until `budget` bytes are out, then fails like a full volume.
    struct FullAfter {
        budget: usize,
    }

    impl WriteSink for FullAfter {
        fn put(&mut self, file: &mut File, buf: &[u8]) -> std::result::Result<usize, (usize, io::Error)> {
            let allowed = buf.len().min(self.budget);
            let written = fio::write_all_counted(file, &buf[..allowed])?;
            self.budget -= written;
            if written < buf.len() {
                Err((written, io::Error::from_raw_os_error(libc::ENOSPC)))
            } else {
                Ok(written)
            }
        }

        fn sync(&mut self, file: &File) -> io::Result<()> {
            file.sync_data()
        }
    }

    struct FailingSync;

    impl WriteSink for FailingSync {
        fn put(&mut self, file: &mut File, buf: &[u8]) -> std::result::Result<usize, (usize, io::Error)> {
            fio::write_all_counted(file, buf)
        }

        fn sync(&mut self, _file: &File) -> io::Result<()> {
            Err(io::Error::from_raw_os_error(libc::EIO))
        }
    }

    #[test]
    fn test_device_full_stops_write_early() {
        let (_temp, dir) = setup();
        let config = FileConfig::new(10, 10, true);
        let file = TestFile::create(&dir, &config, &mut Sequence::new([0, 0, 11])).unwrap();
        let mut guard = file.lock().unwrap();

        let report = guard.write_with(&config, &mut FullAfter { budget: 600 }).unwrap();
        let short = CheckOutcome::Short {
            expected: 1024,
            actual: 600,
        };

        assert!(report.device_full);
        assert_eq!(report.bytes_written, 600);
        assert!(!report.sync_failed);
        assert_eq!(report.immediate, Some(short.clone()));
        assert!(!report.corruption_detected());
        assert!(!guard.state().has_error);
        assert_eq!(fs::metadata(file.path()).unwrap().len(), 600);

        assert_eq!(guard.check().unwrap(), short);
        assert_eq!(guard.state().check_count, 2);
    }

    #[test]
    fn test_failed_sync_sets_sticky_flag() {
        let (_temp, dir) = setup();
        let file = TestFile::create(&dir, &small(), &mut Sequence::new([0, 0, 12])).unwrap();
        let mut guard = file.lock().unwrap();

        let report = guard.write_with(&small(), &mut FailingSync).unwrap();
        assert!(report.sync_failed);
        assert!(!report.device_full);
        assert_eq!(report.bytes_written, 1024);
        assert!(guard.state().sync_failed);
        assert!(!guard.state().has_error);

        // A later clean write does not clear it
        let report = guard.write(&small()).unwrap();
        assert!(report.sync_failed);
        assert!(guard.state().sync_failed);
        assert_eq!(guard.check().unwrap(), CheckOutcome::Clean { bytes: 1024 });
    }
}
