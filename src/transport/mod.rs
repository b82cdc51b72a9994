//! Transport module - glue between connections and a byte transport.
//!
//! The protocol core never touches sockets; it calls
//! [`Connection::message`](crate::Connection::message) per received batch
//! and hands flushed messages to a callback. This module provides the
//! in-process version of that glue over tokio channels.

mod channel;

pub use channel::{connect, forward_flushes, pair, pump, BatchReceiver, BatchSender, ChannelPair};
