// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Duplex routing between the real terminal, the shell PTY and the dialog UI
//!
//! One background thread drains the real stdin and hands every chunk to
//! exactly one destination: the shell while a recording is active, the
//! dialog pipe otherwise. The route and the shell writer live behind the
//! same mutex that is held while a chunk is delivered, so a route switch
//! lands strictly between two chunks. A chunk goes to the route in force
//! when it is dispatched, and is never split or delivered twice.
//!
//! Shell output travels the other way through a [`TeeWriter`], which copies
//! every chunk to all of its sinks.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Read buffer used by both copy loops
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// How long a polled source waits before re-checking for shutdown
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Destination for bytes read from the real stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteTarget {
    Shell = 0,
    Dialog = 1,
}

struct Destinations {
    target: RouteTarget,
    shell: Option<Box<dyn Write + Send>>,
    /// `None` once the source is exhausted, so the dialog reads EOF
    dialog: Option<DialogWriter>,
}

impl Destinations {
    fn dispatch(&mut self, chunk: &[u8]) {
        if self.target == RouteTarget::Shell {
            if let Some(shell) = self.shell.as_mut() {
                match shell.write_all(chunk).and_then(|_| shell.flush()) {
                    Ok(()) => {
                        trace!(bytes = chunk.len(), "Routed input to shell");
                        return;
                    }
                    Err(e) => {
                        // The shell is going away; its exit ends the session
                        warn!(error = %e, "Shell input write failed, detaching shell");
                        self.shell = None;
                        self.target = RouteTarget::Dialog;
                        return;
                    }
                }
            }
            debug!("Shell route selected without an attached shell, using dialog");
        }

        match self.dialog.as_mut().map(|dialog| dialog.write_all(chunk)) {
            Some(Ok(())) => trace!(bytes = chunk.len(), "Routed input to dialog"),
            _ => trace!(bytes = chunk.len(), "Dialog reader gone, dropping input"),
        }
    }
}

/// Routes one input source between the shell and the dialog pipe
pub struct CopyRouter {
    state: Arc<Mutex<Destinations>>,
    stop: Arc<AtomicBool>,
    routed: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<io::Result<u64>>>>,
}

impl fmt::Debug for CopyRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyRouter")
            .field("target", &self.target())
            .field("routed_bytes", &self.routed_bytes())
            .finish()
    }
}

impl CopyRouter {
    /// Start draining `source` on a background thread
    ///
    /// Input goes to `dialog` until a shell is attached. Sources that report
    /// `TimedOut`, `WouldBlock` or `Interrupted` are retried, which gives
    /// [`CopyRouter::shutdown`] a chance to stop the loop.
    pub fn spawn<R>(source: R, dialog: DialogWriter) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let state = Arc::new(Mutex::new(Destinations {
            target: RouteTarget::Dialog,
            shell: None,
            dialog: Some(dialog),
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let routed = Arc::new(AtomicU64::new(0));

        let handle = {
            let state = state.clone();
            let stop = stop.clone();
            let routed = routed.clone();
            thread::Builder::new()
                .name("shellcap-stdin-router".to_string())
                .spawn(move || route_loop(source, &state, &stop, &routed))?
        };

        debug!("Started stdin router");
        Ok(Self {
            state,
            stop,
            routed,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Destinations> {
        // A panic while dispatching cannot leave the route half-updated
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Hand input to `writer` from the next chunk on
    pub fn attach_shell(&self, writer: Box<dyn Write + Send>) {
        let mut state = self.lock();
        state.shell = Some(writer);
        state.target = RouteTarget::Shell;
        debug!("Attached shell to stdin router");
    }

    /// Send input back to the dialog and release the shell writer
    pub fn detach_shell(&self) -> Option<Box<dyn Write + Send>> {
        let mut state = self.lock();
        state.target = RouteTarget::Dialog;
        let shell = state.shell.take();
        debug!(had_shell = shell.is_some(), "Detached shell from stdin router");
        shell
    }

    /// Switch the route. Returns once no chunk is mid-delivery.
    pub fn set_target(&self, target: RouteTarget) {
        self.lock().target = target;
        debug!(?target, "Switched input route");
    }

    pub fn target(&self) -> RouteTarget {
        self.lock().target
    }

    /// Total bytes dispatched so far
    pub fn routed_bytes(&self) -> u64 {
        self.routed.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the copy loop and wait for it
    ///
    /// Only returns promptly for polled sources; a source blocked in `read`
    /// is left to end with the process.
    pub fn shutdown(&self) -> io::Result<u64> {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .handle
            .lock()
            .map_err(|_| io::Error::other("router handle lock poisoned"))?
            .take();
        let Some(handle) = handle else {
            return Ok(self.routed_bytes());
        };
        let routed = handle
            .join()
            .map_err(|_| io::Error::other("stdin router thread panicked"))??;
        debug!(bytes = routed, "Stopped stdin router");
        Ok(routed)
    }
}

fn route_loop<R: Read>(
    source: R,
    state: &Mutex<Destinations>,
    stop: &AtomicBool,
    routed: &AtomicU64,
) -> io::Result<u64> {
    let result = drain_source(source, state, stop, routed);
    // No more input can arrive; a blocked prompt must see EOF
    let closed = state
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .dialog
        .take()
        .is_some();
    debug!(closed, "Stdin router finished, dialog pipe closed");
    result
}

fn drain_source<R: Read>(
    mut source: R,
    state: &Mutex<Destinations>,
    stop: &AtomicBool,
    routed: &AtomicU64,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        if stop.load(Ordering::Acquire) {
            debug!("Stdin router stop requested");
            break;
        }
        let n = match source.read(&mut buf) {
            Ok(0) => {
                debug!("Stdin reached EOF");
                break;
            }
            Ok(n) => n,
            Err(e) if is_retryable(&e) => continue,
            Err(e) => {
                warn!(error = %e, "Stdin read failed");
                return Err(e);
            }
        };

        state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .dispatch(&buf[..n]);
        total += n as u64;
        routed.store(total, Ordering::Release);
    }
    Ok(total)
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Whether a read error means the other end of a PTY hung up
///
/// Linux reports a closed PTY slave as `EIO` rather than EOF.
pub fn is_pty_eof(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

/// Copy `reader` into `writer` until EOF, one flushed chunk at a time
pub fn copy_chunks<R: Read + ?Sized, W: Write + ?Sized>(
    reader: &mut R,
    writer: &mut W,
) -> io::Result<u64> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if is_pty_eof(&e) => break,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        total += n as u64;
    }
    Ok(total)
}

/// Readable source that gives up after [`POLL_INTERVAL`] without data
///
/// A timeout surfaces as `ErrorKind::TimedOut`, letting the router check its
/// stop flag instead of blocking in `read` forever.
#[cfg(unix)]
pub struct PolledReader<R> {
    inner: R,
    timeout: Duration,
}

#[cfg(unix)]
impl<R: Read + std::os::fd::AsFd> PolledReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            timeout: POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(unix)]
impl PolledReader<std::fs::File> {
    /// Unbuffered handle on the process's stdin
    pub fn stdin() -> io::Result<Self> {
        use std::os::fd::AsFd;
        let fd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::new(std::fs::File::from(fd)))
    }
}

#[cfg(unix)]
impl<R: Read + std::os::fd::AsFd> Read for PolledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

        let millis = u16::try_from(self.timeout.as_millis()).unwrap_or(u16::MAX);
        let ready = {
            let mut fds = [PollFd::new(self.inner.as_fd(), PollFlags::POLLIN)];
            poll(&mut fds, PollTimeout::from(millis)).map_err(io::Error::from)?
        };
        if ready == 0 {
            return Err(io::ErrorKind::TimedOut.into());
        }
        self.inner.read(buf)
    }
}

/// Create the pipe that carries input to the dialog UI
pub fn dialog_pipe() -> (DialogWriter, DialogReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        DialogWriter { tx },
        DialogReader {
            rx,
            pending: Vec::new(),
            pos: 0,
        },
    )
}

/// Sending half of the dialog pipe
#[derive(Debug, Clone)]
pub struct DialogWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Write for DialogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving half of the dialog pipe
///
/// Reads block until input arrives and return EOF once every writer is gone.
/// Must not be read from inside an async runtime.
#[derive(Debug)]
pub struct DialogReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl DialogReader {
    /// Throw away anything typed so far
    pub fn discard_pending(&mut self) -> usize {
        let mut dropped = self.pending.len() - self.pos;
        self.pending.clear();
        self.pos = 0;
        while let Ok(chunk) = self.rx.try_recv() {
            dropped += chunk.len();
        }
        dropped
    }
}

impl Read for DialogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Writes every chunk to each sink in turn
///
/// All sinks see the same chunks in the same order. Each sink is flushed
/// after every chunk so the terminal shows output as it is produced.
pub struct TeeWriter {
    sinks: Vec<Box<dyn Write + Send>>,
}

impl TeeWriter {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for TeeWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in &mut self.sinks {
            sink.write_all(buf)?;
            sink.flush()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Cloneable handle on a single writer
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedWriter").finish_non_exhaustive()
    }
}

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("shared writer lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("shared writer lock poisoned"))?
            .flush()
    }
}

/// Growable in-memory sink whose contents stay readable from a clone
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("capture buffer lock poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
