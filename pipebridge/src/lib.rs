// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bridges between push-style and pull-style byte stream transforms.
//!
//! A transform that consumes a sink (an encoder implementing [`std::io::Write`]
//! around an output stream) can be driven through a pull-style interface with
//! [`reader_from_writer`]; a transform that produces a source (a decoder
//! implementing [`std::io::Read`] around an input stream) can be driven
//! through a push-style interface with [`writer_from_reader`]. Each adapter
//! runs the transform on one background thread and connects it to the caller
//! through an in-process byte [`pipe()`].
//!
//! # Byte pipe
//!
//! The [`pipe`](mod@pipe) module provides the underlying primitive: a
//! synchronous, unbuffered-handoff pipe whose ends can be closed carrying an
//! error, which the opposite end then reports from its pending and future
//! operations. It is usable on its own.
//!
//! # Example
//!
//! ```
//! use std::io::Read;
//!
//! // An identity transform; a real caller passes an encoder or decoder.
//! let source = std::io::Cursor::new(b"hello input".to_vec());
//! let mut bridged = pipebridge::reader_from_writer(source, std::io::BufWriter::new);
//!
//! let mut out = Vec::new();
//! bridged.read_to_end(&mut out).unwrap();
//! assert_eq!(out, b"hello input");
//! ```

pub mod bridge;
pub mod pipe;

pub use bridge::{BridgeWriter, FinishWrite, reader_from_writer, writer_from_reader};
pub use pipe::{PipeReader, PipeWriter, pipe};
