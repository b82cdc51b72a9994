//! Object module - dispatch trait, object references and ids.
//!
//! Provides:
//! - [`Dispatch`] - implemented by every proxy and resource
//! - [`ObjectRef`] - generation-checked reference to one object incarnation
//! - [`IdAllocator`] - per-connection id allocation and recycling
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::object::{unknown_opcode, BoxFuture, Dispatch};
//! use westfield_core::{Connection, Message, Result};
//!
//! struct Surface;
//!
//! impl Dispatch for Surface {
//!     fn interface(&self) -> &'static str {
//!         "wl_surface"
//!     }
//!
//!     fn dispatch<'a>(
//!         &'a self,
//!         connection: &'a Connection,
//!         message: &'a mut Message,
//!     ) -> BoxFuture<'a, Result<()>> {
//!         Box::pin(async move {
//!             match message.opcode() {
//!                 0 => {
//!                     connection.destroy(message.object_id());
//!                     Ok(())
//!                 }
//!                 op => Err(unknown_opcode(self.interface(), op)),
//!             }
//!         })
//!     }
//! }
//! ```

mod ids;
mod table;

use std::future::Future;
use std::pin::Pin;

use crate::connection::Connection;
use crate::error::{Result, WireError};
use crate::protocol::Message;

pub use ids::{
    IdAllocator, IdRange, Role, CLIENT_ID_MAX, CLIENT_ID_MIN, DISPLAY_ID, SERVER_ID_MAX,
    SERVER_ID_MIN,
};
pub(crate) use table::ObjectTable;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object id on the wire.
pub type ObjectId = u32;

/// Callback fired once when an object is destroyed.
pub type DestroyListener = Box<dyn FnOnce(ObjectId) + Send>;

/// A registered proxy or resource.
///
/// The connection calls [`Dispatch::dispatch`] for every message addressed to
/// the object and awaits it before decoding the next one.
pub trait Dispatch: Send + Sync + 'static {
    /// Interface name, for logs and observers.
    fn interface(&self) -> &'static str;

    /// Handle one message; `message.opcode()` selects the request or event.
    fn dispatch<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Error for an opcode the interface does not define.
pub fn unknown_opcode(interface: &str, opcode: u16) -> WireError {
    WireError::malformed(format!("Unknown opcode {} for {}", opcode, interface))
}

/// One incarnation of an object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    id: ObjectId,
    generation: u32,
}

impl ObjectRef {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Destruction state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Active,
    /// Destroy listeners are running.
    Destroying,
    Destroyed,
}

/// Handle for removing a destroy listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Connection-wide notifications for object creation and destruction.
pub trait ObjectObserver: Send + Sync {
    fn created(&self, _id: ObjectId, _interface: &'static str) {}

    fn destroyed(&self, _id: ObjectId, _interface: &'static str) {}
}
