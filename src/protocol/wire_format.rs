//! Wire format encoding and decoding.
//!
//! Every message starts with an 8-byte header:
//! ```text
//! ┌───────────┬──────────┬──────────┐
//! │ Object ID │ Opcode   │ Size     │
//! │ 4 bytes   │ 2 bytes  │ 2 bytes  │
//! │ uint32    │ uint16   │ uint16   │
//! └───────────┴──────────┴──────────┘
//! ```
//!
//! Opcode and size share one 32-bit word, `(size << 16) | opcode`. `Size`
//! counts the whole message, header included. All words are native-endian,
//! and messages are packed back to back inside a batch.

use crate::error::{Result, WireError};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Largest message the 16-bit size field can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Every message footprint is a multiple of this.
pub const WORD_SIZE: usize = 4;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Target object id.
    pub object_id: u32,
    /// Request or event opcode, per target interface.
    pub opcode: u16,
    /// Total message length in bytes, header included.
    pub size: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(object_id: u32, opcode: u16, size: u16) -> Self {
        Self {
            object_id,
            opcode,
            size,
        }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use westfield_core::protocol::Header;
    ///
    /// let header = Header::new(1, 0, 12);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 8);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let size_opcode = (u32::from(self.size) << 16) | u32::from(self.opcode);
        buf[0..4].copy_from_slice(&self.object_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&size_opcode.to_ne_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use westfield_core::protocol::Header;
    ///
    /// let bytes = Header::new(0xff00_0001, 1, 16).encode();
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.object_id, 0xff00_0001);
    /// assert_eq!(header.opcode, 1);
    /// assert_eq!(header.size, 16);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let object_id = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let size_opcode = u32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Some(Self {
            object_id,
            opcode: (size_opcode & 0xffff) as u16,
            size: (size_opcode >> 16) as u16,
        })
    }

    /// Validate the header against the bytes left in its batch.
    ///
    /// Checks:
    /// - Size covers at least the header
    /// - Size is word aligned
    /// - Size doesn't exceed the remaining batch bytes
    pub fn validate(&self, remaining: usize) -> Result<()> {
        let size = self.size as usize;
        if size < HEADER_SIZE {
            return Err(WireError::malformed(format!(
                "Message size {} is smaller than the header",
                size
            )));
        }

        if size % WORD_SIZE != 0 {
            return Err(WireError::malformed(format!(
                "Message size {} is not word aligned",
                size
            )));
        }

        if size > remaining {
            return Err(WireError::malformed(format!(
                "Message size {} exceeds remaining batch bytes {}",
                size, remaining
            )));
        }

        Ok(())
    }

    /// Payload length (size minus header).
    #[inline]
    pub fn body_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}

/// Write a header at `offset` inside `buf`.
pub fn write_header(buf: &mut [u8], offset: usize, object_id: u32, opcode: u16, size: u16) {
    Header::new(object_id, opcode, size).encode_into(&mut buf[offset..]);
}

/// Read and validate the header at `offset` inside `buf`.
///
/// Fails with `MalformedMessage` when fewer than 8 bytes remain or the
/// declared size does not fit the rest of the buffer.
pub fn read_header(buf: &[u8], offset: usize) -> Result<Header> {
    let rest = buf.get(offset..).unwrap_or_default();
    let header = Header::decode(rest).ok_or_else(|| {
        WireError::malformed(format!(
            "Truncated header: {} bytes left at offset {}",
            rest.len(),
            offset
        ))
    })?;
    header.validate(rest.len())?;
    Ok(header)
}

/// Round `len` up to the next word boundary.
#[inline]
pub fn align_word(len: usize) -> usize {
    (len + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}
