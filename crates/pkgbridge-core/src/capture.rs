//! Process-wide stdout/stderr capture.
//!
//! File descriptors 1 and 2 are swapped for pipe write ends while a session is
//! live; one reader thread per stream drains its pipe until EOF. Sessions hold
//! the console lock for their whole lifetime, so only one thread at a time can
//! own the process streams. The same thread may nest sessions; the innermost
//! one owns the streams and stopping it hands them back to the enclosing one.

use std::io::Write as _;

use once_cell::sync::Lazy;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::debug;

static CONSOLE: Lazy<ReentrantMutex<()>> = Lazy::new(|| ReentrantMutex::new(()));

/// Serializes everything that touches the process streams.
pub fn console_lock() -> ReentrantMutexGuard<'static, ()> {
    CONSOLE.lock()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }

    /// Appends stdout then stderr, each separated by a newline from whatever
    /// precedes it.
    pub fn append_to(&self, buf: &mut String) {
        for part in [&self.stdout, &self.stderr] {
            if part.is_empty() {
                continue;
            }
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(part);
        }
    }
}

/// One redirection of the process streams. Not `Send`: it must be stopped on
/// the thread that started it.
pub struct CaptureSession {
    enabled: bool,
    finished: bool,
    redirect: Option<sys::Redirect>,
    _console: Option<ReentrantMutexGuard<'static, ()>>,
}

impl CaptureSession {
    /// Starts capturing when `enabled`; otherwise returns a session whose
    /// operations are all no-ops. Failing to set up the pipes also yields a
    /// disabled session.
    pub fn start(enabled: bool) -> Self {
        if !enabled {
            return Self::disabled();
        }
        let console = console_lock();
        flush_std_streams();
        match sys::Redirect::install() {
            Ok(redirect) => Self {
                enabled: true,
                finished: false,
                redirect: Some(redirect),
                _console: Some(console),
            },
            Err(err) => {
                debug!(error = %err, "stream capture unavailable, running uncaptured");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            finished: false,
            redirect: None,
            _console: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops the session and returns what each stream received. Returns empty
    /// output when disabled or already stopped.
    pub fn finish(&mut self) -> CapturedOutput {
        if !self.enabled || self.finished {
            return CapturedOutput::default();
        }
        self.finished = true;
        flush_std_streams();
        let Some(redirect) = self.redirect.take() else {
            return CapturedOutput::default();
        };
        let (stdout, stderr) = redirect.restore();
        self._console = None;
        CapturedOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        }
    }

    pub fn stop_and_append_to(&mut self, buf: &mut String) {
        if !self.enabled || self.finished {
            return;
        }
        self.finish().append_to(buf);
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.enabled && !self.finished {
            let _ = self.finish();
        }
    }
}

fn flush_std_streams() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io::{self, Read as _};
    use std::os::unix::io::{FromRawFd as _, RawFd};
    use std::thread::{self, JoinHandle};

    use tracing::debug;

    pub(super) struct Redirect {
        stdout: Stream,
        stderr: Stream,
    }

    impl Redirect {
        pub(super) fn install() -> io::Result<Self> {
            let stdout = Stream::install(libc::STDOUT_FILENO)?;
            let stderr = match Stream::install(libc::STDERR_FILENO) {
                Ok(s) => s,
                Err(err) => {
                    let _ = stdout.restore();
                    return Err(err);
                }
            };
            Ok(Self { stdout, stderr })
        }

        /// Puts the saved descriptors back (which closes the pipe write ends)
        /// and waits for both readers to drain.
        pub(super) fn restore(self) -> (Vec<u8>, Vec<u8>) {
            let stderr = self.stderr.restore();
            let stdout = self.stdout.restore();
            (stdout, stderr)
        }
    }

    struct Stream {
        target: RawFd,
        saved: RawFd,
        reader: JoinHandle<Vec<u8>>,
    }

    impl Stream {
        fn install(target: RawFd) -> io::Result<Self> {
            let (read_fd, write_fd) = cloexec_pipe()?;

            let saved = unsafe { libc::fcntl(target, libc::F_DUPFD_CLOEXEC, 0) };
            if saved < 0 {
                let err = io::Error::last_os_error();
                close(read_fd);
                close(write_fd);
                return Err(err);
            }

            if unsafe { libc::dup2(write_fd, target) } < 0 {
                let err = io::Error::last_os_error();
                close(read_fd);
                close(write_fd);
                close(saved);
                return Err(err);
            }
            // `target` is now the only write end.
            close(write_fd);

            let spawned = thread::Builder::new()
                .name(format!("pkgbridge-capture-fd{target}"))
                .spawn(move || {
                    let mut pipe = unsafe { File::from_raw_fd(read_fd) };
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf);
                    buf
                });
            match spawned {
                Ok(reader) => Ok(Self {
                    target,
                    saved,
                    reader,
                }),
                Err(err) => {
                    unsafe { libc::dup2(saved, target) };
                    close(saved);
                    close(read_fd);
                    Err(err)
                }
            }
        }

        fn restore(self) -> Vec<u8> {
            if unsafe { libc::dup2(self.saved, self.target) } < 0 {
                // Readers only see EOF once the write end is gone.
                debug!(
                    fd = self.target,
                    error = %io::Error::last_os_error(),
                    "failed to restore stream, closing it"
                );
                close(self.target);
            }
            close(self.saved);
            self.reader.join().unwrap_or_default()
        }
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(super) fn cloexec_pipe() -> io::Result<(RawFd, RawFd)> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((fds[0], fds[1]))
    }

    // No pipe2 here: a fork between pipe() and fcntl() can inherit the ends.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(super) fn cloexec_pipe() -> io::Result<(RawFd, RawFd)> {
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        set_cloexec(fds[0]);
        set_cloexec(fds[1]);
        Ok((fds[0], fds[1]))
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn set_cloexec(fd: RawFd) {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
            }
        }
    }

    fn close(fd: RawFd) {
        unsafe { libc::close(fd) };
    }
}

#[cfg(not(unix))]
mod sys {
    use std::io;

    pub(super) struct Redirect;

    impl Redirect {
        pub(super) fn install() -> io::Result<Self> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream capture needs POSIX file descriptors",
            ))
        }

        pub(super) fn restore(self) -> (Vec<u8>, Vec<u8>) {
            (Vec::new(), Vec::new())
        }
    }
}
