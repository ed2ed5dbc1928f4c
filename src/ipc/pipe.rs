//! OS pipe plumbing for wake signaling and message frames.
//!
//! The only unsafe code in the crate lives here, confined to raw `libc`
//! calls on file descriptors this module owns: `pipe2`, `read`, `write`,
//! `fcntl` and `close`.
//!
//! Two kinds of pipe are built on the same wrapper:
//!
//! - **Wake pipes** carry single marker bytes; both ends are nonblocking and
//!   write failures are ignored (a full pipe still wakes the reader).
//! - **Data pipes** carry length-prefixed message frames; the read end is
//!   nonblocking so the loop can drain opportunistically, the write end
//!   blocks so frames are never torn.

#![allow(unsafe_code)]

use std::io;
use std::os::unix::io::RawFd;

/// Owned file descriptor, closed on drop.
pub(crate) struct PipeFd(RawFd);

impl PipeFd {
    pub(crate) fn raw(&self) -> RawFd {
        self.0
    }

    /// Duplicates the descriptor (close-on-exec) so it can be handed to a
    /// peer link.
    pub(crate) fn dup(&self) -> io::Result<Self> {
        let fd = unsafe { libc::fcntl(self.0, libc::F_DUPFD_CLOEXEC, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(fd))
    }
}

impl Drop for PipeFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

impl std::fmt::Debug for PipeFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PipeFd({})", self.0)
    }
}

fn set_nonblock(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn pipe_pair() -> io::Result<(PipeFd, PipeFd)> {
    let mut fds = [0i32; 2];
    let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((PipeFd(fds[0]), PipeFd(fds[1])))
}

/// Creates a wake pipe: both ends nonblocking.
pub(crate) fn wake_pipe() -> io::Result<(PipeFd, PipeFd)> {
    let (read, write) = pipe_pair()?;
    set_nonblock(read.raw())?;
    set_nonblock(write.raw())?;
    Ok((read, write))
}

/// Creates a data pipe: nonblocking read end, blocking write end.
pub(crate) fn data_pipe() -> io::Result<(PipeFd, PipeFd)> {
    let (read, write) = pipe_pair()?;
    set_nonblock(read.raw())?;
    Ok((read, write))
}

/// Reads whatever is available, returning the number of bytes (zero when the
/// pipe is drained or the writer is gone).
pub(crate) fn try_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
        if n >= 0 {
            #[allow(clippy::cast_sign_loss)]
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Ok(0),
            io::ErrorKind::Interrupted => {}
            _ => return Err(err),
        }
    }
}

/// Writes the whole buffer to a blocking descriptor.
pub(crate) fn write_all(fd: RawFd, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        #[allow(clippy::cast_sign_loss)]
        let written = n as usize;
        buf = &buf[written..];
    }
    Ok(())
}

/// Writes one wake byte, ignoring failures: a full pipe has pending wakes
/// already, and a closed reader means the peer is gone.
pub(crate) fn write_wake_byte(fd: RawFd, byte: u8) {
    let buf = [byte];
    unsafe {
        libc::write(fd, buf.as_ptr().cast::<libc::c_void>(), 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_pipe_roundtrips_a_byte() {
        let (read, write) = wake_pipe().unwrap();
        write_wake_byte(write.raw(), b'.');
        let mut buf = [0u8; 16];
        assert_eq!(try_read(read.raw(), &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'.');
    }

    #[test]
    fn drained_wake_pipe_reads_zero() {
        let (read, _write) = wake_pipe().unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(try_read(read.raw(), &mut buf).unwrap(), 0);
    }

    #[test]
    fn data_pipe_write_all_is_seen_by_reader() {
        let (read, write) = data_pipe().unwrap();
        write_all(write.raw(), b"frame-bytes").unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(try_read(read.raw(), &mut buf).unwrap(), 11);
        assert_eq!(&buf[..11], b"frame-bytes");
    }

    #[test]
    fn dup_outlives_the_original() {
        let (read, write) = wake_pipe().unwrap();
        let dup = write.dup().unwrap();
        drop(write);
        write_wake_byte(dup.raw(), b'-');
        let mut buf = [0u8; 4];
        assert_eq!(try_read(read.raw(), &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'-');
    }
}
