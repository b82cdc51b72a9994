//! Codec module - argument encoding and decoding.
//!
//! Arguments are untagged on the wire; an opcode's signature fixes their
//! order and kinds:
//!
//! - [`Arg`] - encode descriptor (and decode output) for every kind
//! - [`Signature`] / [`read`] - kind-driven decoding with bounds checks
//! - [`Fixed`] - signed 24.8 fixed-point numbers
//! - [`Handle`] - out-of-band handles carried beside the bytes
//!
//! # Example
//!
//! ```
//! use westfield_core::codec;
//!
//! let args = vec![codec::uint(1), codec::string("wl_shm"), codec::uint(2)];
//! let size: usize = args.iter().map(|a| a.size()).sum();
//! assert_eq!(size, 4 + 4 + 8 + 4);
//! ```

mod args;
mod fixed;
mod handle;
mod signature;

pub use args::{
    array, array_optional, fixed, fixed_optional, handle, handle_optional, int, int_optional,
    new_object, object, object_optional, string, string_optional, uint, uint_optional, Arg,
};
pub use fixed::Fixed;
pub use handle::{Handle, HandleKind};
pub use signature::{read, read_signature, ArgKind, ObjectResolver, Signature};
