//! Argument encode descriptors.
//!
//! Each constructor returns an [`Arg`] that knows its kind, its on-wire
//! footprint and how to write itself. The kinds are not tagged on the wire;
//! both peers agree on the order from the interface signature.
//!
//! # Example
//!
//! ```
//! use westfield_core::codec::{self, ArgKind};
//!
//! let args = [codec::uint(7), codec::string("wl_seat"), codec::new_object()];
//! assert_eq!(args[1].kind(), ArgKind::String);
//! // length word + "wl_seat\0"
//! assert_eq!(args[1].size(), 12);
//! ```

use bytes::{Bytes, BytesMut};

use super::{ArgKind, Fixed, Handle};
use crate::protocol::align_word;

/// One argument value, used both for encoding and as decode output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Uint(u32),
    Int(i32),
    Fixed(Fixed),
    /// `None` is the null object.
    Object(Option<u32>),
    /// Id of the object created by this message, 0 until marshalled.
    NewObject(u32),
    /// `None` is the absent string.
    String(Option<String>),
    /// `None` is the absent array.
    Array(Option<Bytes>),
    /// `None` sends nothing.
    Handle(Option<Handle>),
}

impl Arg {
    /// The wire kind of this argument.
    pub fn kind(&self) -> ArgKind {
        match self {
            Arg::Uint(_) => ArgKind::Uint,
            Arg::Int(_) => ArgKind::Int,
            Arg::Fixed(_) => ArgKind::Fixed,
            Arg::Object(_) => ArgKind::Object,
            Arg::NewObject(_) => ArgKind::NewObject,
            Arg::String(_) => ArgKind::String,
            Arg::Array(_) => ArgKind::Array,
            Arg::Handle(_) => ArgKind::Handle,
        }
    }

    /// Bytes this argument takes inside the message.
    pub fn size(&self) -> usize {
        match self {
            Arg::String(Some(s)) => 4 + align_word(s.len() + 1),
            Arg::Array(Some(a)) => 4 + align_word(a.len()),
            Arg::Handle(_) => 0,
            _ => 4,
        }
    }

    /// Write the in-band bytes into `buf` and any handle into `handles`.
    pub fn write(&self, buf: &mut BytesMut, handles: &mut Vec<Handle>) {
        match self {
            Arg::Uint(v) | Arg::NewObject(v) => buf.extend_from_slice(&v.to_ne_bytes()),
            Arg::Int(v) => buf.extend_from_slice(&v.to_ne_bytes()),
            Arg::Fixed(v) => buf.extend_from_slice(&v.raw().to_ne_bytes()),
            Arg::Object(id) => buf.extend_from_slice(&id.unwrap_or(0).to_ne_bytes()),
            Arg::String(None) | Arg::Array(None) => buf.extend_from_slice(&0u32.to_ne_bytes()),
            Arg::String(Some(s)) => {
                let len = s.len() + 1;
                buf.extend_from_slice(&(len as u32).to_ne_bytes());
                buf.extend_from_slice(s.as_bytes());
                pad(buf, align_word(len) - s.len());
            }
            Arg::Array(Some(a)) => {
                buf.extend_from_slice(&(a.len() as u32).to_ne_bytes());
                buf.extend_from_slice(a);
                pad(buf, align_word(a.len()) - a.len());
            }
            Arg::Handle(Some(h)) => handles.push(h.clone()),
            Arg::Handle(None) => {}
        }
    }
}

fn pad(buf: &mut BytesMut, zeros: usize) {
    buf.extend_from_slice(&[0u8; 4][..zeros]);
}

pub fn uint(value: u32) -> Arg {
    Arg::Uint(value)
}

/// Absent encodes as 0.
pub fn uint_optional(value: Option<u32>) -> Arg {
    Arg::Uint(value.unwrap_or(0))
}

pub fn int(value: i32) -> Arg {
    Arg::Int(value)
}

/// Absent encodes as 0.
pub fn int_optional(value: Option<i32>) -> Arg {
    Arg::Int(value.unwrap_or(0))
}

pub fn fixed(value: impl Into<Fixed>) -> Arg {
    Arg::Fixed(value.into())
}

/// Absent encodes as 0.
pub fn fixed_optional(value: Option<Fixed>) -> Arg {
    Arg::Fixed(value.unwrap_or_default())
}

pub fn object(id: u32) -> Arg {
    Arg::Object(Some(id))
}

pub fn object_optional(id: Option<u32>) -> Arg {
    Arg::Object(id)
}

/// Placeholder for the id of the object a constructor request creates.
///
/// [`Connection::marshall_constructor`](crate::Connection::marshall_constructor)
/// fills in the id.
pub fn new_object() -> Arg {
    Arg::NewObject(0)
}

pub fn string(value: impl Into<String>) -> Arg {
    Arg::String(Some(value.into()))
}

pub fn string_optional(value: Option<impl Into<String>>) -> Arg {
    Arg::String(value.map(Into::into))
}

pub fn array(value: impl Into<Bytes>) -> Arg {
    Arg::Array(Some(value.into()))
}

pub fn array_optional(value: Option<impl Into<Bytes>>) -> Arg {
    Arg::Array(value.map(Into::into))
}

pub fn handle(value: Handle) -> Arg {
    Arg::Handle(Some(value))
}

pub fn handle_optional(value: Option<Handle>) -> Arg {
    Arg::Handle(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HandleKind;

    fn encode(arg: &Arg) -> (Vec<u8>, Vec<Handle>) {
        let mut buf = BytesMut::new();
        let mut handles = Vec::new();
        arg.write(&mut buf, &mut handles);
        (buf.to_vec(), handles)
    }

    #[test]
    fn test_string_size_includes_nul_and_padding() {
        assert_eq!(string("").size(), 8);
        assert_eq!(string("abc").size(), 8);
        assert_eq!(string("abcd").size(), 12);
        assert_eq!(string_optional(None::<String>).size(), 4);
    }

    #[test]
    fn test_string_bytes() {
        let (bytes, _) = encode(&string("hey"));
        let mut expected = 4u32.to_ne_bytes().to_vec();
        expected.extend_from_slice(b"hey\0");
        assert_eq!(bytes, expected);

        let (bytes, _) = encode(&string("hello"));
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[4..12], b"hello\0\0\0");
    }

    #[test]
    fn test_array_bytes_padded() {
        let (bytes, _) = encode(&array(vec![1u8, 2, 3, 4, 5]));
        assert_eq!(bytes.len(), array(vec![1u8, 2, 3, 4, 5]).size());
        assert_eq!(&bytes[0..4], &5u32.to_ne_bytes());
        assert_eq!(&bytes[4..12], &[1, 2, 3, 4, 5, 0, 0, 0]);
        assert_eq!(array_optional(None::<Bytes>).size(), 4);
    }

    #[test]
    fn test_footprints_are_word_multiples() {
        for len in 0..16 {
            let s = "x".repeat(len);
            assert_eq!(string(s.clone()).size() % 4, 0);
            assert_eq!(encode(&string(s)).0.len() % 4, 0);
            assert_eq!(array(vec![7u8; len]).size() % 4, 0);
        }
    }

    #[test]
    fn test_optional_numbers_encode_zero() {
        assert_eq!(encode(&uint_optional(None)).0, vec![0; 4]);
        assert_eq!(encode(&int_optional(None)).0, vec![0; 4]);
        assert_eq!(encode(&fixed_optional(None)).0, vec![0; 4]);
        assert_eq!(encode(&object_optional(None)).0, vec![0; 4]);
    }

    #[test]
    fn test_handle_is_out_of_band() {
        let h = Handle::new(11, HandleKind::ImageBitmap);
        let arg = handle(h.clone());
        assert_eq!(arg.size(), 0);
        let (bytes, handles) = encode(&arg);
        assert!(bytes.is_empty());
        assert_eq!(handles, vec![h]);
        assert!(encode(&handle_optional(None)).1.is_empty());
    }

    #[test]
    fn test_new_object_placeholder() {
        assert_eq!(new_object(), Arg::NewObject(0));
        assert_eq!(new_object().kind(), ArgKind::NewObject);
    }
}
