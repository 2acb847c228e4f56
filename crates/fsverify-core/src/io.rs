//! Thin wrappers over the raw file descriptor calls the test protocol needs.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, IntoRawFd};

/// Cache hint issued around writes and verification passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    /// Drop cached pages so the next read goes to storage.
    DontNeed,
    /// Pages about to be read will not be reused.
    NoReuse,
}

/// Advisory only: failures are logged at debug level and otherwise ignored.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn advise(file: &File, hint: CacheHint) {
    use nix::fcntl::{posix_fadvise, PosixFadviseAdvice};

    let advice = match hint {
        CacheHint::DontNeed => PosixFadviseAdvice::POSIX_FADV_DONTNEED,
        CacheHint::NoReuse => PosixFadviseAdvice::POSIX_FADV_NOREUSE,
    };
    if let Err(errno) = posix_fadvise(file.as_raw_fd(), 0, 0, advice) {
        tracing::debug!(?hint, %errno, "posix_fadvise failed");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn advise(file: &File, hint: CacheHint) {
    let _ = (file.as_raw_fd(), hint);
}

/// Close the descriptor and report the result, which `Drop for File` swallows.
pub fn close(file: File) -> io::Result<()> {
    let fd = file.into_raw_fd();
    nix::unistd::close(fd).map_err(io::Error::from)
}

/// Write all of `buf`, retrying short writes and `EINTR`.
///
/// On error, returns how many bytes made it out before the failure.
pub fn write_all_counted(file: &mut File, buf: &[u8]) -> Result<usize, (usize, io::Error)> {
    let mut written = 0;
    while written < buf.len() {
        match file.write(&buf[written..]) {
            Ok(0) => {
                return Err((written, io::Error::from(io::ErrorKind::WriteZero)));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err((written, e)),
        }
    }
    Ok(written)
}

/// Fill `buf` from the current position until it is full or end of file.
///
/// Returns the number of bytes read; fewer than `buf.len()` means EOF.
pub fn read_full(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// ENOSPC or EDQUOT: the volume (or the user's share of it) is full.
pub fn is_device_full(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSPC) | Some(libc::EDQUOT))
}
