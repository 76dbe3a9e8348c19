// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared test support for the pipebridge integration tests.
//!
//! The main fixture is a streaming base64 codec built on the `base64` crate:
//! a push-style [`Base64Encoder`] (a [`FinishWrite`] that buffers an
//! incomplete final triple until finished) and a pull-style [`Base64Decoder`]
//! (a [`Read`] that decodes quads as they arrive). Base64 is the reversible,
//! byte-expanding, buffered-state transform the adapters exist to flip around:
//! the encoder needs its finalization step for the padded final block, and the
//! decoder fails cleanly on malformed input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pipebridge::FinishWrite;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Base64-encode `data` in one shot, for expected values.
pub fn encode(data: &[u8]) -> Vec<u8> {
    STANDARD.encode(data).into_bytes()
}

/// Push-style base64 encoder writing encoded text into an inner sink.
///
/// Complete 3-byte groups are encoded as they arrive; a trailing partial
/// group is held back until [`FinishWrite::finish`], which emits the padded
/// final block. Encoding aligned prefixes and concatenating is equivalent to
/// encoding the whole input at once.
pub struct Base64Encoder<W: Write> {
    inner: W,
    partial: Vec<u8>,
}

impl<W: Write> Base64Encoder<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            partial: Vec::new(),
        }
    }
}

impl<W: Write> Write for Base64Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(buf);
        let whole = self.partial.len() - self.partial.len() % 3;
        if whole > 0 {
            let encoded = STANDARD.encode(&self.partial[..whole]);
            self.inner.write_all(encoded.as_bytes())?;
            self.partial.drain(..whole);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> FinishWrite for Base64Encoder<W> {
    fn finish(&mut self) -> io::Result<()> {
        if !self.partial.is_empty() {
            let encoded = STANDARD.encode(&self.partial);
            self.partial.clear();
            self.inner.write_all(encoded.as_bytes())?;
        }
        self.inner.flush()
    }
}

/// Pull-style base64 decoder reading encoded text from an inner source.
///
/// Decodes each complete 4-character quad as it arrives; at end-of-stream any
/// leftover input must form a valid final block, otherwise the read fails
/// with [`io::ErrorKind::InvalidData`]. Invalid characters fail the same way.
pub struct Base64Decoder<R: Read> {
    inner: R,
    encoded: Vec<u8>,
    decoded: VecDeque<u8>,
    eof: bool,
}

impl<R: Read> Base64Decoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoded: Vec::new(),
            decoded: VecDeque::new(),
            eof: false,
        }
    }

    fn decode_into_buffer(&mut self, upto: usize) -> io::Result<()> {
        let block = STANDARD
            .decode(&self.encoded[..upto])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.encoded.drain(..upto);
        self.decoded.extend(block);
        Ok(())
    }
}

impl<R: Read> Read for Base64Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.decoded.is_empty() {
                let n = buf.len().min(self.decoded.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = self.decoded.pop_front().unwrap();
                }
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }

            let mut chunk = [0u8; 1024];
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                if !self.encoded.is_empty() {
                    self.decode_into_buffer(self.encoded.len())?;
                }
            } else {
                self.encoded.extend_from_slice(&chunk[..n]);
                let whole = self.encoded.len() - self.encoded.len() % 4;
                if whole > 0 {
                    self.decode_into_buffer(whole)?;
                }
            }
        }
    }
}

/// Push-style base64 decoder writing decoded bytes into an inner sink.
///
/// The mirror image of [`Base64Decoder`], for driving the pull-style bridge
/// with a decoding transform. Complete quads are decoded as they arrive;
/// [`FinishWrite::finish`] decodes the remainder and fails with
/// [`io::ErrorKind::InvalidData`] if it does not form a valid final block.
pub struct Base64DecodeWriter<W: Write> {
    inner: W,
    partial: Vec<u8>,
}

impl<W: Write> Base64DecodeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            partial: Vec::new(),
        }
    }

    fn decode_to_inner(&mut self, upto: usize) -> io::Result<()> {
        let block = STANDARD
            .decode(&self.partial[..upto])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.partial.drain(..upto);
        self.inner.write_all(&block)
    }
}

impl<W: Write> Write for Base64DecodeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.partial.extend_from_slice(buf);
        let whole = self.partial.len() - self.partial.len() % 4;
        if whole > 0 {
            self.decode_to_inner(whole)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write> FinishWrite for Base64DecodeWriter<W> {
    fn finish(&mut self) -> io::Result<()> {
        if !self.partial.is_empty() {
            let rest = self.partial.len();
            self.decode_to_inner(rest)?;
        }
        self.inner.flush()
    }
}

/// Destination backed by a shared buffer, inspectable after the writer has
/// moved onto the bridge's background thread. An optional per-write delay
/// widens any window between close returning and the last delivery landing.
#[derive(Clone, Default)]
pub struct SharedBuf {
    buf: Arc<Mutex<Vec<u8>>>,
    write_delay: Duration,
}

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            buf: Arc::default(),
            write_delay: delay,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.buf.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
