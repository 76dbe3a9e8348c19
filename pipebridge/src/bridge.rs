// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Adapters that bridge push-style and pull-style byte stream transforms.
//!
//! Some transforms are naturally push-style: they implement [`Write`] and emit
//! derived bytes into an inner sink (an encoder wrapping an output stream).
//! Others are naturally pull-style: they implement [`Read`] and transform
//! bytes pulled from an inner source (a decoder wrapping an input stream).
//! Callers sometimes need the opposite style. This module runs the
//! mismatched-style transform on a background thread and bridges it to the
//! caller through an in-process [`pipe`](mod@crate::pipe):
//!
//! - [`reader_from_writer`] - turn a [`Write`]-based transform into a [`Read`]
//! - [`writer_from_reader`] - turn a [`Read`]-based transform into a
//!   [`BridgeWriter`]
//!
//! Transform and I/O failures surface as errors on the caller's next `read`,
//! `write`, or [`BridgeWriter::close`] call; there is no separate error
//! channel. [`BridgeWriter::close`] does not return until the background
//! thread has delivered and flushed every byte to the destination, so the
//! destination is complete the moment close returns.

use crate::pipe::{self, PipeReader, PipeWriter};
use log::{debug, trace};
use std::io::{self, BufWriter, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A push-style byte sink whose buffered state must be flushed by an explicit
/// finalization step, separate from [`Write::flush`].
///
/// Block-oriented encoders hold back an incomplete final block during writes;
/// [`finish`](Self::finish) emits it. The adapters call `finish` exactly once,
/// after the last write and before the bridged stream signals end-of-stream.
pub trait FinishWrite: Write {
    /// Flush all buffered transform state into the inner sink.
    fn finish(&mut self) -> io::Result<()>;
}

/// A `BufWriter` holds no state beyond plain buffered bytes, so finishing it
/// is a flush. This also lets a stateless `Write` transform be used with
/// [`reader_from_writer`] by wrapping it.
impl<W: Write> FinishWrite for BufWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Turn a [`Write`]-based transform into a [`Read`].
///
/// `make_writer` receives the write end of a fresh pipe and must return the
/// transform writing its output into that end. A background thread then copies
/// `source` into the transform and finishes it; the returned read end yields
/// the transform's output, byte for byte, as it is produced.
///
/// A failure reading `source`, writing the transform, or finishing it closes
/// the pipe carrying that error, which the returned reader reports on its
/// next `read`. Reads never succeed with silently truncated output.
///
/// # Example
///
/// ```
/// use std::io::Read;
///
/// // BufWriter is the identity transform; a real caller passes an encoder.
/// let source = std::io::Cursor::new(b"hello input".to_vec());
/// let mut bridged = pipebridge::reader_from_writer(source, std::io::BufWriter::new);
///
/// let mut out = Vec::new();
/// bridged.read_to_end(&mut out).unwrap();
/// assert_eq!(out, b"hello input");
/// ```
pub fn reader_from_writer<S, T, F>(source: S, make_writer: F) -> PipeReader
where
    S: Read + Send + 'static,
    T: FinishWrite + Send + 'static,
    F: FnOnce(PipeWriter) -> T,
{
    let (reader, writer) = pipe::pipe();
    let control = writer.clone();
    let transform = make_writer(writer);

    thread::spawn(move || {
        // The captures are consumed by the pump and never observed again,
        // so crossing the unwind boundary with them is sound.
        match panic::catch_unwind(AssertUnwindSafe(|| pump_into(source, transform))) {
            Ok(Ok(n)) => {
                trace!("reader_from_writer worker finished, {n} bytes copied");
                control.close();
            }
            Ok(Err(err)) => {
                debug!("reader_from_writer worker failed: {err}");
                control.close_with_error(err);
            }
            Err(payload) => {
                control.close_with_error(worker_panicked());
                panic::resume_unwind(payload);
            }
        }
    });

    reader
}

/// Turn a [`Read`]-based transform into a [`BridgeWriter`].
///
/// `make_reader` receives the read end of a fresh pipe and must return the
/// transform pulling its input from that end. A background thread copies the
/// transform's output into `destination` and flushes it. Bytes written to the
/// returned writer are transformed and delivered to `destination` in order.
///
/// The returned writer must be closed: [`BridgeWriter::close`] signals
/// end-of-input and blocks until the background thread has delivered every
/// byte, so the destination is complete and stable once it returns. A failure
/// in the transform or in `destination` surfaces on the caller's next `write`
/// or on `close`.
///
/// # Example
///
/// ```
/// use std::io::Write;
///
/// // BufReader is the identity transform; a real caller passes a decoder.
/// let mut bridged = pipebridge::writer_from_reader(std::io::stdout(), std::io::BufReader::new);
/// bridged.write_all(b"hello input\n").unwrap();
/// bridged.close().unwrap();
/// ```
pub fn writer_from_reader<D, T, F>(destination: D, make_reader: F) -> BridgeWriter
where
    D: Write + Send + 'static,
    T: Read + Send + 'static,
    F: FnOnce(PipeReader) -> T,
{
    let (reader, writer) = pipe::pipe();
    let control = reader.clone();
    let transform = make_reader(reader);

    let worker = thread::spawn(move || {
        match panic::catch_unwind(AssertUnwindSafe(|| pump_out(transform, destination))) {
            Ok(Ok(n)) => {
                trace!("writer_from_reader worker finished, {n} bytes delivered");
                control.close();
                Ok(n)
            }
            Ok(Err(err)) => {
                debug!("writer_from_reader worker failed: {err}");
                let err = Arc::new(err);
                control.close_with_error(pipe::replay(&err));
                Err(pipe::replay(&err))
            }
            Err(payload) => {
                control.close_with_error(worker_panicked());
                panic::resume_unwind(payload);
            }
        }
    });

    BridgeWriter {
        writer,
        worker: Some(worker),
    }
}

/// Copy `source` through a push-style transform, then finish it.
fn pump_into<S: Read, T: FinishWrite>(mut source: S, mut transform: T) -> io::Result<u64> {
    let n = io::copy(&mut source, &mut transform)?;
    transform.finish()?;
    Ok(n)
}

/// Copy a pull-style transform's output into `destination`, then flush it.
fn pump_out<T: Read, D: Write>(mut transform: T, mut destination: D) -> io::Result<u64> {
    let n = io::copy(&mut transform, &mut destination)?;
    destination.flush()?;
    Ok(n)
}

fn worker_panicked() -> io::Error {
    io::Error::other("stream bridge worker panicked")
}

/// Push-style output of [`writer_from_reader`].
///
/// Writes pass through to the pipe feeding the background transform.
/// [`close`](Self::close) is a completion rendezvous: it signals end-of-input
/// and then waits for the background thread, so a successful close guarantees
/// the destination already holds the complete transformed output. Closing the
/// pipe end alone would only stop the producer side; it says nothing about
/// whether the consumer side has finished draining into the destination.
pub struct BridgeWriter {
    writer: PipeWriter,
    worker: Option<JoinHandle<io::Result<u64>>>,
}

impl BridgeWriter {
    /// Signal end-of-input and wait until the background thread has delivered
    /// and flushed all transformed bytes to the destination.
    ///
    /// Returns any transform or destination error the background thread hit;
    /// a panic on the background thread is resumed on the caller. Calling
    /// `close` again after it has returned is a no-op that returns `Ok(())`.
    pub fn close(&mut self) -> io::Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        self.writer.close();
        match worker.join() {
            Ok(result) => result.map(|_| ()),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl Write for BridgeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Drop for BridgeWriter {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.writer.close();
            // Drop cannot report errors and must not panic; the outcome is
            // only observable through an explicit close.
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Push-style transform: uppercases ASCII into the inner sink.
    struct UpperWriter<W: Write>(W);

    impl<W: Write> Write for UpperWriter<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let upper: Vec<u8> = buf.iter().map(|b| b.to_ascii_uppercase()).collect();
            self.0.write_all(&upper)?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl<W: Write> FinishWrite for UpperWriter<W> {
        fn finish(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    /// Pull-style transform: lowercases ASCII pulled from the inner source.
    struct LowerReader<R: Read>(R);

    impl<R: Read> Read for LowerReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.0.read(buf)?;
            buf[..n].make_ascii_lowercase();
            Ok(n)
        }
    }

    /// Transform whose finalization step fails.
    struct FailingFinish<W: Write>(W);

    impl<W: Write> Write for FailingFinish<W> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl<W: Write> FinishWrite for FailingFinish<W> {
        fn finish(&mut self) -> io::Result<()> {
            Err(io::Error::other("finish failed"))
        }
    }

    /// Source that yields some bytes, then an error.
    struct FailingReader {
        data: io::Cursor<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.data.read(buf)?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "source died"));
            }
            Ok(n)
        }
    }

    /// Destination backed by a shared buffer the test can inspect after the
    /// writer has been moved onto the background thread.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reader_from_writer_matches_synchronous_transform() {
        let source = io::Cursor::new(b"hello input".to_vec());
        let mut bridged = reader_from_writer(source, UpperWriter);

        let mut out = Vec::new();
        bridged.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"HELLO INPUT");
    }

    #[test]
    fn test_reader_from_writer_empty_input() {
        let mut bridged = reader_from_writer(io::empty(), UpperWriter);
        let mut out = Vec::new();
        assert_eq!(bridged.read_to_end(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_reader_from_writer_source_error_surfaces_on_read() {
        let source = FailingReader {
            data: io::Cursor::new(b"partial".to_vec()),
        };
        let mut bridged = reader_from_writer(source, UpperWriter);

        let err = bridged.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(err.to_string().contains("source died"));
    }

    #[test]
    fn test_reader_from_writer_finish_error_surfaces_on_read() {
        let source = io::Cursor::new(b"data".to_vec());
        let mut bridged = reader_from_writer(source, FailingFinish);

        let err = bridged.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("finish failed"));
    }

    #[test]
    fn test_writer_from_reader_delivers_all_bytes() {
        let dest = SharedBuf::default();
        let mut bridged = writer_from_reader(dest.clone(), LowerReader);

        bridged.write_all(b"HELLO ").unwrap();
        bridged.write_all(b"INPUT").unwrap();
        bridged.close().unwrap();

        assert_eq!(dest.contents(), b"hello input");
    }

    #[test]
    fn test_writer_from_reader_close_is_idempotent() {
        let dest = SharedBuf::default();
        let mut bridged = writer_from_reader(dest.clone(), LowerReader);

        bridged.write_all(b"ONCE").unwrap();
        bridged.close().unwrap();
        bridged.close().unwrap();

        assert_eq!(dest.contents(), b"once");
    }

    #[test]
    fn test_writer_from_reader_write_after_close_fails() {
        let dest = SharedBuf::default();
        let mut bridged = writer_from_reader(dest, LowerReader);

        bridged.close().unwrap();
        let err = bridged.write(b"late").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_writer_from_reader_destination_error_surfaces_on_close() {
        struct BrokenDest;
        impl Write for BrokenDest {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut bridged = writer_from_reader(BrokenDest, LowerReader);
        // The write may still succeed if it lands before the worker hits the
        // destination failure; close must report the error either way.
        let _ = bridged.write_all(b"DOOMED");
        let err = bridged.close().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_writer_from_reader_transform_error_fails_later_writes() {
        struct BrokenTransform;
        impl Read for BrokenTransform {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::InvalidData, "malformed"))
            }
        }

        let mut bridged = writer_from_reader(SharedBuf::default(), |_reader| BrokenTransform);

        // The worker fails immediately; writes start failing once the pipe's
        // read end closes carrying the transform error.
        let mut write_err = None;
        for _ in 0..50 {
            match bridged.write(b"x") {
                Ok(_) => thread::sleep(Duration::from_millis(1)),
                Err(err) => {
                    write_err = Some(err);
                    break;
                }
            }
        }
        let err = match write_err {
            Some(err) => err,
            None => bridged.close().unwrap_err(),
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_reader_from_writer_panicking_transform_surfaces_error() {
        struct PanickingWriter;
        impl Write for PanickingWriter {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                panic!("transform blew up");
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        impl FinishWrite for PanickingWriter {
            fn finish(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let source = io::Cursor::new(b"data".to_vec());
        let mut bridged = reader_from_writer(source, |_writer| PanickingWriter);

        // A panic on the background thread must close the pipe carrying an
        // error, never read as a short-but-clean stream.
        let err = bridged.read_to_end(&mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[test]
    #[should_panic(expected = "transform blew up")]
    fn test_writer_from_reader_close_resumes_worker_panic() {
        struct PanickingTransform;
        impl Read for PanickingTransform {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                panic!("transform blew up");
            }
        }

        let mut bridged = writer_from_reader(SharedBuf::default(), |_reader| PanickingTransform);
        let _ = bridged.close();
    }

    #[test]
    fn test_bridge_writer_drop_completes_delivery() {
        let dest = SharedBuf::default();
        {
            let mut bridged = writer_from_reader(dest.clone(), LowerReader);
            bridged.write_all(b"DROPPED").unwrap();
        }
        assert_eq!(dest.contents(), b"dropped");
    }

    #[test]
    fn test_adapters_compose_back_to_back() {
        // Push-style upper transform exposed as a reader, feeding a
        // pull-style lower transform exposed as a writer.
        let source = io::Cursor::new(b"hello input".to_vec());
        let mut upper = reader_from_writer(source, UpperWriter);

        let dest = SharedBuf::default();
        let mut bridged = writer_from_reader(dest.clone(), LowerReader);
        io::copy(&mut upper, &mut bridged).unwrap();
        bridged.close().unwrap();

        assert_eq!(dest.contents(), b"hello input");
    }
}
