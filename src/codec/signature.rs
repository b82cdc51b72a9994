//! Argument kinds, signatures, and kind-driven decoding.
//!
//! A signature is the ordered list of argument kinds of one opcode, written
//! as a string of kind letters. A `?` makes the following argument
//! nullable.
//!
//! | letter | kind |
//! |---|---|
//! | `u` | uint |
//! | `i` | int |
//! | `f` | fixed |
//! | `o` | object |
//! | `n` | new_object |
//! | `s` | string |
//! | `a` | array |
//! | `h` | handle |
//!
//! # Example
//!
//! ```
//! use westfield_core::codec::{ArgKind, Signature};
//!
//! let sig = Signature::parse("us?on").unwrap();
//! assert_eq!(sig.len(), 4);
//! assert_eq!(sig.args()[2], (ArgKind::Object, true));
//! ```

use std::fmt;

use super::Arg;
use crate::error::{Result, WireError};
use crate::protocol::Message;

/// Wire kind of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Uint,
    Int,
    Fixed,
    Object,
    NewObject,
    String,
    Array,
    Handle,
}

impl ArgKind {
    /// Parse a signature letter.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'u' => ArgKind::Uint,
            'i' => ArgKind::Int,
            'f' => ArgKind::Fixed,
            'o' => ArgKind::Object,
            'n' => ArgKind::NewObject,
            's' => ArgKind::String,
            'a' => ArgKind::Array,
            'h' => ArgKind::Handle,
            _ => return None,
        })
    }

    /// Signature letter.
    pub fn as_char(self) -> char {
        match self {
            ArgKind::Uint => 'u',
            ArgKind::Int => 'i',
            ArgKind::Fixed => 'f',
            ArgKind::Object => 'o',
            ArgKind::NewObject => 'n',
            ArgKind::String => 's',
            ArgKind::Array => 'a',
            ArgKind::Handle => 'h',
        }
    }
}

/// Parsed signature: `(kind, optional)` per argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    args: Vec<(ArgKind, bool)>,
}

impl Signature {
    /// Parse a signature string such as `"usun"` or `"?os"`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut args = Vec::with_capacity(text.len());
        let mut optional = false;
        for c in text.chars() {
            if c == '?' {
                optional = true;
                continue;
            }
            let kind = ArgKind::from_char(c).ok_or_else(|| {
                WireError::Config(format!("Invalid signature character '{}' in {:?}", c, text))
            })?;
            args.push((kind, optional));
            optional = false;
        }
        if optional {
            return Err(WireError::Config(format!(
                "Dangling '?' in signature {:?}",
                text
            )));
        }
        Ok(Self { args })
    }

    /// Arguments in order.
    pub fn args(&self) -> &[(ArgKind, bool)] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, optional) in &self.args {
            if *optional {
                f.write_str("?")?;
            }
            write!(f, "{}", kind.as_char())?;
        }
        Ok(())
    }
}

/// Answers whether an object id is live on the decoding connection.
pub trait ObjectResolver {
    fn contains(&self, id: u32) -> bool;
}

/// Decode one argument of `kind` from `message`.
///
/// Object arguments must name a live object in `objects`, otherwise the
/// read fails with `UnknownObject`.
pub fn read(
    kind: ArgKind,
    message: &mut Message,
    objects: &dyn ObjectResolver,
    optional: bool,
) -> Result<Arg> {
    Ok(match kind {
        ArgKind::Uint => Arg::Uint(message.uint()?),
        ArgKind::Int => Arg::Int(message.int()?),
        ArgKind::Fixed => Arg::Fixed(message.fixed()?),
        ArgKind::Object => {
            let id = if optional {
                message.object_optional()?
            } else {
                Some(message.object()?)
            };
            if let Some(id) = id {
                if !objects.contains(id) {
                    return Err(WireError::UnknownObject(id));
                }
            }
            Arg::Object(id)
        }
        ArgKind::NewObject => Arg::NewObject(message.new_id()?),
        ArgKind::String if optional => Arg::String(message.string_optional()?),
        ArgKind::String => Arg::String(Some(message.string()?)),
        ArgKind::Array if optional => Arg::Array(message.array_optional()?),
        ArgKind::Array => Arg::Array(Some(message.array()?)),
        ArgKind::Handle => Arg::Handle(Some(message.handle()?)),
    })
}

/// Decode every argument of `signature` in order.
pub fn read_signature(
    message: &mut Message,
    objects: &dyn ObjectResolver,
    signature: &Signature,
) -> Result<Vec<Arg>> {
    signature
        .args()
        .iter()
        .map(|&(kind, optional)| read(kind, message, objects, optional))
        .collect()
}
