//! Message cursor for decoding one wire message.
//!
//! A [`Message`] wraps the body of a single message (the bytes after its
//! header) and tracks a running `consumed` count, starting at the header
//! size, that every read checks against the declared message size. Handles
//! are taken from the front of the batch's handle list.

use std::collections::VecDeque;

use bytes::Bytes;

use super::wire_format::{align_word, Header, HEADER_SIZE, WORD_SIZE};
use crate::codec::{Fixed, Handle};
use crate::error::{Result, WireError};

/// A single inbound message being decoded.
#[derive(Debug)]
pub struct Message {
    header: Header,
    body: Bytes,
    offset: usize,
    consumed: usize,
    handles: VecDeque<Handle>,
}

impl Message {
    /// Create a cursor over a message body.
    ///
    /// `body` holds the bytes following the header; `handles` is the
    /// remaining out-of-band handle list of the enclosing batch.
    pub fn new(header: Header, body: Bytes, handles: VecDeque<Handle>) -> Self {
        Self {
            header,
            body,
            offset: 0,
            consumed: HEADER_SIZE,
            handles,
        }
    }

    /// Get the message header.
    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Get the target object id.
    #[inline]
    pub fn object_id(&self) -> u32 {
        self.header.object_id
    }

    /// Get the opcode.
    #[inline]
    pub fn opcode(&self) -> u16 {
        self.header.opcode
    }

    /// Get the declared message size.
    #[inline]
    pub fn size(&self) -> usize {
        self.header.size as usize
    }

    /// Bytes consumed so far, header included.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Bytes left before the message boundary.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size().saturating_sub(self.consumed)
    }

    /// Handles not yet taken from the batch.
    #[inline]
    pub fn handles_left(&self) -> usize {
        self.handles.len()
    }

    /// Give back the untaken handles so the next message can use them.
    pub fn into_handles(self) -> VecDeque<Handle> {
        self.handles
    }

    fn claim(&mut self, len: usize, what: &str) -> Result<()> {
        let end = self.consumed + len;
        if end > self.size() || self.offset + len > self.body.len() {
            return Err(WireError::malformed(format!(
                "Message too short reading {} on object {} opcode {}: needs {} bytes, {} left",
                what,
                self.header.object_id,
                self.header.opcode,
                len,
                self.remaining()
            )));
        }
        self.consumed = end;
        Ok(())
    }

    fn word(&mut self, what: &str) -> Result<[u8; 4]> {
        self.claim(WORD_SIZE, what)?;
        let at = self.offset;
        self.offset += WORD_SIZE;
        Ok([
            self.body[at],
            self.body[at + 1],
            self.body[at + 2],
            self.body[at + 3],
        ])
    }

    /// Take `len` bytes plus padding up to the next word boundary.
    fn padded(&mut self, len: usize, what: &str) -> Result<Bytes> {
        let footprint = align_word(len);
        self.claim(footprint, what)?;
        let bytes = self.body.slice(self.offset..self.offset + len);
        self.offset += footprint;
        Ok(bytes)
    }

    pub fn uint(&mut self) -> Result<u32> {
        self.word("uint").map(u32::from_ne_bytes)
    }

    pub fn int(&mut self) -> Result<i32> {
        self.word("int").map(i32::from_ne_bytes)
    }

    pub fn fixed(&mut self) -> Result<Fixed> {
        self.word("fixed")
            .map(|w| Fixed::from_raw(i32::from_ne_bytes(w)))
    }

    /// Read a non-null object id.
    ///
    /// The id is not checked against the registry here; see
    /// [`crate::codec::read`] for the resolving variant.
    pub fn object(&mut self) -> Result<u32> {
        match self.object_optional()? {
            Some(id) => Ok(id),
            None => Err(WireError::malformed(format!(
                "Null object for non-nullable argument on object {}",
                self.header.object_id
            ))),
        }
    }

    /// Read an object id where 0 means no object.
    pub fn object_optional(&mut self) -> Result<Option<u32>> {
        let id = u32::from_ne_bytes(self.word("object")?);
        Ok((id != 0).then_some(id))
    }

    /// Read the id chosen by the peer for a new object.
    pub fn new_id(&mut self) -> Result<u32> {
        let id = u32::from_ne_bytes(self.word("new_id")?);
        if id == 0 {
            return Err(WireError::malformed("new_id argument is 0"));
        }
        Ok(id)
    }

    pub fn string(&mut self) -> Result<String> {
        self.string_optional()?
            .ok_or_else(|| WireError::malformed("Null string for non-nullable argument"))
    }

    /// Read a string; a zero length word means absent.
    ///
    /// The on-wire length counts the NUL terminator, which is stripped.
    pub fn string_optional(&mut self) -> Result<Option<String>> {
        let len = u32::from_ne_bytes(self.word("string length")?) as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.padded(len, "string")?;
        if raw[len - 1] != 0 {
            return Err(WireError::malformed("String is not NUL terminated"));
        }
        let text = std::str::from_utf8(&raw[..len - 1])
            .map_err(|e| WireError::malformed(format!("String is not valid UTF-8: {}", e)))?;
        Ok(Some(text.to_owned()))
    }

    /// Read an array; a zero length array reads as empty.
    pub fn array(&mut self) -> Result<Bytes> {
        Ok(self.array_optional()?.unwrap_or_default())
    }

    /// Read an array; a zero length word means absent.
    pub fn array_optional(&mut self) -> Result<Option<Bytes>> {
        let len = u32::from_ne_bytes(self.word("array length")?) as usize;
        if len == 0 {
            return Ok(None);
        }
        self.padded(len, "array").map(Some)
    }

    /// Take the next out-of-band handle.
    pub fn handle(&mut self) -> Result<Handle> {
        self.handles.pop_front().ok_or(WireError::MissingHandle)
    }
}
