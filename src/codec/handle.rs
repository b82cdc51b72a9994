//! Out-of-band handles.
//!
//! Handles travel beside the byte stream (transferable buffers, ports,
//! native descriptors) and take no room in a message. Each batch carries
//! one ordered handle list shared by all of its messages.

/// What a handle refers to on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    ArrayBuffer,
    ImageBitmap,
    MessagePort,
    Other,
}

/// An out-of-band handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Transport specific descriptor number.
    pub fd: u32,
    pub kind: HandleKind,
}

impl Handle {
    /// Create a new handle.
    pub fn new(fd: u32, kind: HandleKind) -> Self {
        Self { fd, kind }
    }
}
