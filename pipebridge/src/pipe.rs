// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Synchronous in-process byte pipe with error-carrying close.
//!
//! [`pipe`] returns a connected [`PipeReader`]/[`PipeWriter`] pair. A write
//! deposits bytes and blocks until the reader has consumed all of them, so the
//! pipe is an unbuffered handoff rather than a queue. Either end can be closed
//! carrying an error; the other end's pending and future operations then fail
//! with that error, replayed on every subsequent call. Closing without an
//! error signals clean end-of-stream.
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//!
//! let (mut reader, mut writer) = pipebridge::pipe();
//! std::thread::spawn(move || {
//!     writer.write_all(b"hello").unwrap();
//!     // dropping the writer closes it cleanly
//! });
//!
//! let mut out = String::new();
//! reader.read_to_string(&mut out).unwrap();
//! assert_eq!(out, "hello");
//! ```

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

/// Create a connected pipe pair.
///
/// Each call produces a fresh pipe owned by its two ends; nothing is shared
/// between pipes. Dropping the last handle to an end closes that end cleanly.
pub fn pipe() -> (PipeReader, PipeWriter) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::default()),
        cond: Condvar::new(),
    });
    (
        PipeReader {
            half: Arc::new(ReadHalf {
                shared: Arc::clone(&shared),
            }),
        },
        PipeWriter {
            half: Arc::new(WriteHalf { shared }),
        },
    )
}

/// Rebuild an [`io::Error`] from a recorded close error, preserving its kind
/// and chaining the original as the source.
pub(crate) fn replay(err: &Arc<io::Error>) -> io::Error {
    io::Error::new(err.kind(), Arc::clone(err))
}

fn closed_pipe(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, msg)
}

#[derive(Default)]
struct State {
    /// Bytes deposited by the in-flight write, not yet taken by the reader.
    pending: VecDeque<u8>,
    write_closed: bool,
    read_closed: bool,
    write_err: Option<Arc<io::Error>>,
    read_err: Option<Arc<io::Error>>,
}

impl State {
    fn read_side_error(&self) -> io::Error {
        match &self.read_err {
            Some(err) => replay(err),
            None => closed_pipe("pipe reader closed"),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap();
        // One write in flight at a time: wait for a previous deposit to drain.
        while !state.pending.is_empty() && !state.read_closed && !state.write_closed {
            state = self.cond.wait(state).unwrap();
        }
        if state.write_closed {
            return Err(closed_pipe("write on closed pipe"));
        }
        if state.read_closed {
            return Err(state.read_side_error());
        }
        state.pending.extend(buf);
        self.cond.notify_all();
        // Unbuffered handoff: block until the reader has taken every byte.
        while !state.pending.is_empty() && !state.read_closed && !state.write_closed {
            state = self.cond.wait(state).unwrap();
        }
        let consumed = buf.len() - state.pending.len();
        if !state.pending.is_empty() {
            // An end closed mid-handoff; reclaim the unread remainder.
            state.pending.clear();
            self.cond.notify_all();
            if consumed == 0 {
                return Err(if state.read_closed {
                    state.read_side_error()
                } else {
                    closed_pipe("write on closed pipe")
                });
            }
        }
        Ok(consumed)
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock().unwrap();
        loop {
            if state.read_closed {
                return Err(closed_pipe("read on closed pipe"));
            }
            if !state.pending.is_empty() {
                let n = buf.len().min(state.pending.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.pending.pop_front().unwrap();
                }
                if state.pending.is_empty() {
                    // The deposit drained; release the writer blocked on it.
                    self.cond.notify_all();
                }
                return Ok(n);
            }
            if state.write_closed {
                return match &state.write_err {
                    Some(err) => Err(replay(err)),
                    None => Ok(0),
                };
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// First close wins; later closes of the same end are no-ops.
    fn close_write(&self, err: Option<io::Error>) {
        let mut state = self.state.lock().unwrap();
        if state.write_closed {
            return;
        }
        state.write_closed = true;
        state.write_err = err.map(Arc::new);
        self.cond.notify_all();
    }

    fn close_read(&self, err: Option<io::Error>) {
        let mut state = self.state.lock().unwrap();
        if state.read_closed {
            return;
        }
        state.read_closed = true;
        state.read_err = err.map(Arc::new);
        self.cond.notify_all();
    }
}

struct ReadHalf {
    shared: Arc<Shared>,
}

impl Drop for ReadHalf {
    fn drop(&mut self) {
        self.shared.close_read(None);
    }
}

struct WriteHalf {
    shared: Arc<Shared>,
}

impl Drop for WriteHalf {
    fn drop(&mut self) {
        self.shared.close_write(None);
    }
}

/// Pull end of a [`pipe`].
///
/// Reads block until the writer deposits bytes or closes. Cloning yields a
/// second handle to the *same* end (useful as a close-only control handle for
/// a background worker); the pipe still has exactly one logical reader, and
/// the end closes when the last handle is dropped or [`close`](Self::close)
/// is called.
#[derive(Clone)]
pub struct PipeReader {
    half: Arc<ReadHalf>,
}

impl PipeReader {
    /// Close the read end cleanly. Pending and future writes on the other end
    /// fail with [`io::ErrorKind::BrokenPipe`]. Never fails; closing an
    /// already-closed end is a no-op.
    pub fn close(&self) {
        self.half.shared.close_read(None);
    }

    /// Close the read end carrying `err`. Pending and future writes on the
    /// other end fail with a replay of `err`.
    pub fn close_with_error(&self, err: io::Error) {
        self.half.shared.close_read(Some(err));
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.half.shared.read(buf)
    }
}

/// Push end of a [`pipe`].
///
/// A write blocks until the reader has consumed all of its bytes. Cloning
/// yields a second handle to the same end; concurrent writes from multiple
/// handles are not supported.
#[derive(Clone)]
pub struct PipeWriter {
    half: Arc<WriteHalf>,
}

impl PipeWriter {
    /// Close the write end cleanly, signalling end-of-stream to the reader.
    /// Never fails; closing an already-closed end is a no-op.
    pub fn close(&self) {
        self.half.shared.close_write(None);
    }

    /// Close the write end carrying `err`. Once pending bytes are drained,
    /// reads on the other end fail with a replay of `err`.
    pub fn close_with_error(&self, err: io::Error) {
        self.half.shared.close_write(Some(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.half.shared.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        // The handoff holds no buffered state of its own.
        Ok(())
    }
}
