//! Outgoing message encoding and the flush queue.
//!
//! Marshalled messages accumulate in an [`OutboundQueue`] until the
//! connection flushes, at which point the whole queue is handed to the
//! transport callback in one call.
//!
//! ```text
//! marshall ─┐
//! marshall ─┼─► OutboundQueue ─► flush ─► on_flush(Vec<OutboundMessage>)
//! marshall ─┘
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::codec::{Arg, Handle};
use crate::error::{Result, WireError};
use crate::protocol::{Header, InboundBatch, HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Transport callback receiving every message queued since the last flush.
pub type FlushCallback = Arc<dyn Fn(Vec<OutboundMessage>) + Send + Sync>;

/// One encoded message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Header and arguments.
    pub buffer: Bytes,
    /// Out-of-band handles, in argument order.
    pub handles: Vec<Handle>,
}

impl OutboundMessage {
    /// Encode `args` for `object_id`/`opcode`.
    ///
    /// The size is computed before the buffer is allocated; messages that do
    /// not fit the 16-bit size field fail with `MessageTooLarge`.
    ///
    /// # Example
    ///
    /// ```
    /// use westfield_core::codec;
    /// use westfield_core::outbound::OutboundMessage;
    ///
    /// let msg = OutboundMessage::encode(1, 1, &[codec::uint(0xff00_0000)]).unwrap();
    /// assert_eq!(msg.size(), 12);
    /// ```
    pub fn encode(object_id: u32, opcode: u16, args: &[Arg]) -> Result<Self> {
        let size = Self::encoded_size(args)?;

        let mut buf = BytesMut::with_capacity(size);
        buf.extend_from_slice(&Header::new(object_id, opcode, size as u16).encode());
        let mut handles = Vec::new();
        for arg in args {
            arg.write(&mut buf, &mut handles);
        }
        debug_assert_eq!(buf.len(), size);

        Ok(Self {
            buffer: buf.freeze(),
            handles,
        })
    }

    /// Size a message with `args` would have, header included.
    ///
    /// Fails with `MessageTooLarge` when it does not fit the size field.
    pub fn encoded_size(args: &[Arg]) -> Result<usize> {
        let size = HEADER_SIZE + args.iter().map(Arg::size).sum::<usize>();
        if size > MAX_MESSAGE_SIZE {
            return Err(WireError::MessageTooLarge(size));
        }
        Ok(size)
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Join flushed messages into one delivery for the peer.
    pub fn concat(messages: Vec<OutboundMessage>) -> InboundBatch {
        let total = messages.iter().map(OutboundMessage::size).sum();
        let mut buffer = BytesMut::with_capacity(total);
        let mut handles = Vec::new();
        for message in messages {
            buffer.extend_from_slice(&message.buffer);
            handles.extend(message.handles);
        }
        InboundBatch::new(buffer.freeze(), handles)
    }
}

/// Messages marshalled since the last flush.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: Vec<OutboundMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: OutboundMessage) {
        self.messages.push(message);
    }

    /// Take everything queued, leaving the queue empty.
    ///
    /// Returns `None` when there is nothing to flush.
    pub fn drain(&mut self) -> Option<Vec<OutboundMessage>> {
        if self.messages.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.messages))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, HandleKind};
    use crate::protocol::BatchReader;

    #[test]
    fn test_encode_header_matches_args() {
        let msg = OutboundMessage::encode(
            0xff00_0001,
            0,
            &[codec::uint(0xffff_0001), codec::string("wl_shm"), codec::uint(1)],
        )
        .unwrap();
        assert_eq!(msg.size(), 8 + 4 + 12 + 4);
        let header = Header::decode(&msg.buffer).unwrap();
        assert_eq!(header, Header::new(0xff00_0001, 0, 28));
    }

    #[test]
    fn test_encode_too_large() {
        let big = vec![0u8; MAX_MESSAGE_SIZE];
        let err = OutboundMessage::encode(1, 0, &[codec::array(big)]).unwrap_err();
        assert!(matches!(err, WireError::MessageTooLarge(_)));
    }

    #[test]
    fn test_concat_preserves_order_and_handles() {
        let a = OutboundMessage::encode(
            2,
            0,
            &[codec::handle(Handle::new(1, HandleKind::ArrayBuffer))],
        )
        .unwrap();
        let b = OutboundMessage::encode(
            3,
            1,
            &[
                codec::uint(9),
                codec::handle(Handle::new(2, HandleKind::MessagePort)),
            ],
        )
        .unwrap();
        let batch = OutboundMessage::concat(vec![a, b]);
        let ids: Vec<_> = BatchReader::new(&batch.buffer)
            .map(|r| r.unwrap().1.object_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
        let fds: Vec<_> = batch.handles.iter().map(|h| h.fd).collect();
        assert_eq!(fds, vec![1, 2]);
    }

    #[test]
    fn test_queue_drain() {
        let mut queue = OutboundQueue::new();
        assert!(queue.drain().is_none());
        queue.push(OutboundMessage::encode(1, 0, &[]).unwrap());
        queue.push(OutboundMessage::encode(1, 1, &[]).unwrap());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain().map(|m| m.len()), Some(2));
        assert!(queue.is_empty());
    }
}
