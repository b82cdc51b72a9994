//! Batches: one transport delivery holding back-to-back messages.
//!
//! An [`InboundBatch`] is what the transport hands to
//! [`Connection::message`](crate::Connection::message). [`BatchReader`]
//! walks the message spans of a batch buffer by following each header's
//! `size`, without dispatching anything.
//!
//! # Example
//!
//! ```
//! use westfield_core::protocol::{BatchReader, Header};
//!
//! let mut buf = Vec::new();
//! buf.extend_from_slice(&Header::new(1, 0, 12).encode());
//! buf.extend_from_slice(&2u32.to_ne_bytes());
//! buf.extend_from_slice(&Header::new(2, 1, 8).encode());
//!
//! let spans: Vec<_> = BatchReader::new(&buf).collect::<Result<_, _>>().unwrap();
//! assert_eq!(spans.len(), 2);
//! assert_eq!(spans[1].0, 12);
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

use super::wire_format::{read_header, Header};
use crate::codec::Handle;
use crate::error::Result;

/// Raw bytes plus the ordered out-of-band handle list of one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundBatch {
    /// Concatenated messages.
    pub buffer: Bytes,
    /// Handles shared by the messages, consumed in order.
    pub handles: VecDeque<Handle>,
}

impl InboundBatch {
    /// Create a batch.
    pub fn new(buffer: impl Into<Bytes>, handles: impl IntoIterator<Item = Handle>) -> Self {
        Self {
            buffer: buffer.into(),
            handles: handles.into_iter().collect(),
        }
    }

    /// Create a batch without handles.
    pub fn from_bytes(buffer: impl Into<Bytes>) -> Self {
        Self::new(buffer, std::iter::empty())
    }

    /// Total bytes in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Iterator over `(offset, header)` for each message in a buffer.
///
/// Yields an error and then stops at the first invalid header.
pub struct BatchReader<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> BatchReader<'a> {
    /// Create a reader at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// Offset of the next unread message.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet walked.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

impl Iterator for BatchReader<'_> {
    type Item = Result<(usize, Header)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }
        match read_header(self.buf, self.offset) {
            Ok(header) => {
                let at = self.offset;
                self.offset += header.size as usize;
                Some(Ok((at, header)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WireError;
    use crate::protocol::HEADER_SIZE;

    /// Helper to create a message with `words` argument words.
    fn make_message_bytes(object_id: u32, opcode: u16, words: usize) -> Vec<u8> {
        let size = HEADER_SIZE + words * 4;
        let mut buf = Header::new(object_id, opcode, size as u16).encode().to_vec();
        buf.resize(size, 0xab);
        buf
    }

    #[test]
    fn test_single_message() {
        let buf = make_message_bytes(1, 0, 1);
        let mut reader = BatchReader::new(&buf);
        let (offset, header) = reader.next().unwrap().unwrap();
        assert_eq!(offset, 0);
        assert_eq!(header, Header::new(1, 0, 12));
        assert!(reader.next().is_none());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_multiple_messages_land_on_batch_end() {
        let mut buf = Vec::new();
        for i in 0..5u32 {
            buf.extend(make_message_bytes(i + 1, i as u16, i as usize));
        }
        let mut reader = BatchReader::new(&buf);
        let headers: Vec<_> = reader.by_ref().map(|r| r.unwrap().1).collect();
        assert_eq!(headers.len(), 5);
        assert_eq!(headers[3], Header::new(4, 3, 20));
        assert_eq!(reader.offset(), buf.len());
    }

    #[test]
    fn test_oversized_message_stops_reader() {
        let mut buf = make_message_bytes(1, 0, 0);
        buf.extend_from_slice(&Header::new(2, 0, 0xfff0).encode());
        buf.extend(make_message_bytes(3, 0, 0));

        let results: Vec<_> = BatchReader::new(&buf).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(WireError::MalformedMessage(_))));
    }

    #[test]
    fn test_trailing_partial_header() {
        let mut buf = make_message_bytes(1, 0, 0);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let results: Vec<_> = BatchReader::new(&buf).collect();
        assert!(results[1].is_err());
    }

    #[test]
    fn test_empty_batch() {
        let batch = InboundBatch::from_bytes(Vec::new());
        assert!(batch.is_empty());
        assert!(BatchReader::new(&batch.buffer).next().is_none());
    }
}
