//! # westfield-core
//!
//! Protocol core for Wayland-style object-capability RPC.
//!
//! Two peers share a table of remotely addressable objects and exchange
//! requests and events addressed to them. This crate is the
//! transport-independent engine underneath generated interface code.
//!
//! ## Architecture
//!
//! - **Codec**: untagged argument encoding with word alignment and padding
//! - **Framing**: 8-byte headers, back-to-back messages per batch
//! - **Objects**: id arena, per-peer id ranges, recycling, destroy listeners
//! - **Connection**: ordered inbound dispatch, outbound flush batching, idle handlers
//! - **Display**: the bootstrap display/registry objects for global discovery
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use westfield_core::display::{Display, DisplayResource, Globals};
//! use westfield_core::transport::pair;
//! use westfield_core::ConnectionConfig;
//!
//! #[tokio::main]
//! async fn main() -> westfield_core::Result<()> {
//!     let link = pair(ConnectionConfig::server(), ConnectionConfig::client());
//!
//!     let globals = Globals::new();
//!     globals.create_global("wl_compositor", 4, |_, _, _| Ok(()));
//!     DisplayResource::attach(&link.server, &globals)?;
//!
//!     let display = Display::connect(link.client.clone())?;
//!     let registry = display.get_registry(Arc::new(MyListener))?;
//!     display.roundtrip().await?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod object;
pub mod outbound;
pub mod protocol;
pub mod transport;

mod connection;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, ErrorHook, IdleHandlerId};
pub use error::{Result, WireError};
pub use protocol::{InboundBatch, Message};
