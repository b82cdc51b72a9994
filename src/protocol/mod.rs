//! Protocol module - wire format, batches, and message cursors.
//!
//! This module implements the framing layer:
//! - 8-byte header encoding/decoding
//! - Batch splitting by declared message size
//! - Message cursor with bounds-checked argument reads

mod batch;
mod message;
mod wire_format;

pub use batch::{BatchReader, InboundBatch};
pub use message::Message;
pub use wire_format::{
    align_word, read_header, write_header, Header, HEADER_SIZE, MAX_MESSAGE_SIZE, WORD_SIZE,
};
