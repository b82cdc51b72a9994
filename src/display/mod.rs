//! Bootstrap display protocol.
//!
//! Two objects exist before anything else can be created: the display,
//! always at id 1, and the registry it hands out. Together they let a client
//! discover the server's globals and bind to them.
//!
//! ```text
//! client                                   server
//!   display.get_registry(new_id) ───────────►
//!   ◄──────────── registry.global(name, interface, version)  (per global)
//!   registry.bind(name, interface, version, new_id) ─────────►
//!   display.sync(new_id) ────────────────────►
//!   ◄──────────── callback.done(serial), display.delete_id(callback)
//! ```
//!
//! - [`server`] - display, registry and callback resources plus [`Globals`]
//! - [`client`] - [`Display`] and [`RegistryProxy`]
//! - [`clients`] - [`ServerDisplay`], the live client set of one server

pub mod client;
pub mod clients;
pub mod server;

pub use client::{Display, RegistryListener, RegistryProxy};
pub use clients::{Client, ClientHook, ClientId, ServerDisplay};
pub use server::{post_error, DisplayResource, Global, Globals};

/// `display.sync(new_id callback)` request.
pub const DISPLAY_SYNC: u16 = 0;
/// `display.get_registry(new_id registry)` request.
pub const DISPLAY_GET_REGISTRY: u16 = 1;
/// `display.error(object, uint code, string message)` event.
pub const DISPLAY_ERROR: u16 = 0;
/// `display.delete_id(uint id)` event.
pub const DISPLAY_DELETE_ID: u16 = 1;

/// `registry.bind(uint name, string interface, uint version, new_id)` request.
pub const REGISTRY_BIND: u16 = 0;
/// `registry.global(uint name, string interface, uint version)` event.
pub const REGISTRY_GLOBAL: u16 = 0;
/// `registry.global_remove(uint name)` event.
pub const REGISTRY_GLOBAL_REMOVE: u16 = 1;

/// `callback.done(uint serial)` event.
pub const CALLBACK_DONE: u16 = 0;

/// Global names are handed out above this value.
pub const GLOBAL_NAME_BASE: u32 = 0xffff_0000;

/// Codes carried by `display.error`.
pub mod error_code {
    /// Server couldn't find object.
    pub const INVALID_OBJECT: u32 = 0;
    /// Method doesn't exist on the specified interface.
    pub const INVALID_METHOD: u32 = 1;
    /// Server is out of memory.
    pub const NO_MEMORY: u32 = 2;
    /// Implementation error in the compositor.
    pub const IMPLEMENTATION: u32 = 3;
}
