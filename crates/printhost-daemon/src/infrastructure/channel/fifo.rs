//! Named-pipe channel endpoint.
//!
//! Two FIFOs connect the bridge to the print server:
//!
//! ```text
//!   print server ──writes──▶ <output> ──reads──▶ bridge
//!   print server ◀──reads── <input>  ◀──writes── bridge
//! ```
//!
//! Both are created with `mkfifo` if missing and opened read-write in
//! non-blocking mode.  Opening read-write means `open` never waits for the
//! other side, and the read half never reports end-of-stream when the print
//! server closes its end between connections.  Reads wait with `poll(2)`.
//!
//! The write half waits the same way when the pipe is full, so a print
//! server that falls behind slows the bridge down instead of losing printer
//! replies.  Only a cleared `running` flag abandons a blocked write.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::debug;

use super::{ChannelEndpoint, ChannelPair, ChannelReader};

/// How often a write blocked on a full pipe re-checks the `running` flag.
const WRITE_POLL: Duration = Duration::from_millis(200);

/// Creates a FIFO at `path` unless one already exists.
///
/// # Errors
///
/// Fails if `path` exists but is not a FIFO, or if `mkfifo` fails.
pub fn ensure_fifo(path: &Path) -> io::Result<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a FIFO", path.display()),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "FIFO path contains NUL"))?;
    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        // Lost a race with another creator; that FIFO is just as good.
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(err);
        }
    }
    debug!("created FIFO {}", path.display());
    Ok(())
}

fn open_fifo(path: &Path) -> io::Result<File> {
    ensure_fifo(path)?;
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Opens the read side of the FIFO at `path`, creating it if needed.
pub fn open_fifo_reader(path: &Path) -> io::Result<FifoReader> {
    Ok(FifoReader {
        file: open_fifo(path)?,
    })
}

/// Polling reader over a non-blocking FIFO.
pub struct FifoReader {
    file: File,
}

impl ChannelReader for FifoReader {
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if !poll_fd(&self.file, libc::POLLIN, timeout)? {
            return Ok(None);
        }

        match self.file.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Waits up to `timeout` for `events` on `file`.  `false` on timeout or
/// signal interruption.
fn poll_fd(file: &File, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut fds = libc::pollfd {
        fd: file.as_raw_fd(),
        events,
        revents: 0,
    };
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

    // SAFETY: `fds` is a single valid pollfd for the duration of the call.
    let ready = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    if ready < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ready > 0)
}

/// Write side.  A full pipe is waited out with `poll(2)`; the write only
/// gives up with `ErrorKind::WouldBlock` once `running` is cleared.
struct FifoWriter {
    file: File,
    running: Arc<AtomicBool>,
}

impl Write for FifoWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.file.write(buf) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.running.load(Ordering::Relaxed) {
                        return Err(e);
                    }
                    poll_fd(&self.file, libc::POLLOUT, WRITE_POLL)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                result => return result,
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Channel endpoint over two named pipes.
#[derive(Debug, Clone)]
pub struct FifoChannel {
    /// Written by the bridge, read by the print server.
    input: PathBuf,
    /// Written by the print server, read by the bridge.
    output: PathBuf,
    running: Arc<AtomicBool>,
}

impl FifoChannel {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Lets writes blocked on a full `input` pipe give up once `running` is
    /// cleared.  Without it they wait for the print server indefinitely.
    pub fn with_running(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }
}

impl ChannelEndpoint for FifoChannel {
    fn open(&mut self) -> io::Result<ChannelPair> {
        let reader = open_fifo_reader(&self.output)?;
        let writer = FifoWriter {
            file: open_fifo(&self.input)?,
            running: Arc::clone(&self.running),
        };
        Ok(ChannelPair {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    fn describe(&self) -> String {
        format!("{} / {}", self.input.display(), self.output.display())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("printhost_fifo_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn open_drain_side(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .unwrap()
    }

    /// Reads from a non-blocking FIFO until `len` bytes arrived or 10 s passed.
    fn drain(file: &mut File, len: usize) -> Vec<u8> {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut received = Vec::with_capacity(len);
        let mut chunk = [0u8; 8192];
        while received.len() < len && std::time::Instant::now() < deadline {
            match file.read(&mut chunk) {
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("drain failed: {e}"),
            }
        }
        received
    }

    #[test]
    fn test_ensure_fifo_creates_and_is_idempotent() {
        // Arrange
        let dir = temp_dir();
        let path = dir.join("pipe");

        // Act
        ensure_fifo(&path).unwrap();
        ensure_fifo(&path).unwrap();

        // Assert
        let meta = std::fs::metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_ensure_fifo_rejects_regular_file() {
        let dir = temp_dir();
        let path = dir.join("not-a-pipe");
        std::fs::write(&path, b"x").unwrap();

        let err = ensure_fifo(&path).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reader_times_out_then_reads_written_bytes() {
        let dir = temp_dir();
        let path = dir.join("events");
        let mut reader = open_fifo_reader(&path).unwrap();
        let mut buf = [0u8; 32];

        let idle = reader
            .read_timeout(&mut buf, Duration::from_millis(20))
            .unwrap();
        assert_eq!(idle, None);

        let mut writer = OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"hello\n").unwrap();

        let n = reader
            .read_timeout(&mut buf, Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello\n");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_channel_round_trip_through_both_pipes() {
        let dir = temp_dir();
        let mut channel = FifoChannel::new(dir.join("input"), dir.join("output"));
        let mut pair = channel.open().unwrap();

        // Bridge → print server
        pair.writer.write_all(b"ok\n").unwrap();
        let mut server_in = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(dir.join("input"))
            .unwrap();
        let mut got = [0u8; 8];
        let n = server_in.read(&mut got).unwrap();
        assert_eq!(&got[..n], b"ok\n");

        // Print server → bridge
        let mut server_out = OpenOptions::new()
            .write(true)
            .open(dir.join("output"))
            .unwrap();
        server_out.write_all(b"M105\n").unwrap();
        let mut buf = [0u8; 16];
        let n = pair
            .reader
            .read_timeout(&mut buf, Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"M105\n");
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_write_larger_than_pipe_waits_for_reader_and_loses_nothing() {
        // Arrange: 100 KiB is well past the 64 KiB pipe capacity
        let dir = temp_dir();
        let mut channel = FifoChannel::new(dir.join("input"), dir.join("output"));
        let pair = channel.open().unwrap();
        let payload: Vec<u8> = (0..100 * 1024).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        // Act: the write fills the pipe before anybody reads
        let mut writer = pair.writer;
        let write_thread = std::thread::spawn(move || writer.write_all(&payload));
        std::thread::sleep(Duration::from_millis(100));
        let mut server_in = open_drain_side(&dir.join("input"));
        let received = drain(&mut server_in, expected.len());

        // Assert
        write_thread.join().unwrap().unwrap();
        assert_eq!(received.len(), expected.len());
        assert!(received == expected);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_blocked_write_gives_up_after_running_cleared() {
        // Arrange: nobody ever reads the input pipe
        let dir = temp_dir();
        let running = Arc::new(AtomicBool::new(true));
        let mut channel = FifoChannel::new(dir.join("input"), dir.join("output"))
            .with_running(Arc::clone(&running));
        let mut writer = channel.open().unwrap().writer;
        let write_thread =
            std::thread::spawn(move || writer.write_all(&vec![0x55u8; 256 * 1024]));
        std::thread::sleep(Duration::from_millis(100));
        assert!(!write_thread.is_finished());

        // Act
        running.store(false, Ordering::Relaxed);

        // Assert
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !write_thread.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let err = write_thread.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        let _ = std::fs::remove_dir_all(dir);
    }
}
