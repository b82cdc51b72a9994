//! Loopback - server and client in one process.
//!
//! This example demonstrates:
//! - Advertising a global and binding it through the registry
//! - Writing a resource and a proxy for a small custom interface
//! - Waiting for answers with `roundtrip`
//!
//! ```text
//! RUST_LOG=westfield_core=trace cargo run --example loopback
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use westfield_core::codec;
use westfield_core::display::{Display, DisplayResource, Globals, RegistryListener};
use westfield_core::object::{unknown_opcode, BoxFuture, Dispatch, ObjectId};
use westfield_core::transport::pair;
use westfield_core::{Connection, ConnectionConfig, Message, Result};

/// `counter.add(uint amount)` request.
const COUNTER_ADD: u16 = 0;
/// `counter.total(uint value)` event.
const COUNTER_TOTAL: u16 = 0;

/// Server side: keeps a running total per bound counter.
struct CounterResource {
    total: AtomicU32,
}

impl CounterResource {
    /// Add to the total, wrapping like the atomic does.
    fn add(&self, amount: u32) -> u32 {
        self.total
            .fetch_add(amount, Ordering::AcqRel)
            .wrapping_add(amount)
    }
}

impl Dispatch for CounterResource {
    fn interface(&self) -> &'static str {
        "counter"
    }

    fn dispatch<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                COUNTER_ADD => {
                    let total = self.add(message.uint()?);
                    connection.marshall(message.object_id(), COUNTER_TOTAL, &[codec::uint(total)])
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

/// Client side: remembers the last total the server reported.
struct CounterProxy {
    id: ObjectId,
    last: AtomicU32,
}

impl Dispatch for CounterProxy {
    fn interface(&self) -> &'static str {
        "counter"
    }

    fn dispatch<'a>(
        &'a self,
        _connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                COUNTER_TOTAL => {
                    let total = message.uint()?;
                    tracing::info!("counter total is now {}", total);
                    self.last.store(total, Ordering::Release);
                    Ok(())
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

struct PrintGlobals;

impl RegistryListener for PrintGlobals {
    fn global(&self, name: u32, interface: &str, version: u32) {
        tracing::info!("global {:#x}: {} v{}", name, interface, version);
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let link = pair(ConnectionConfig::server(), ConnectionConfig::client());

    // Server: one global, bound into a fresh CounterResource per client.
    let globals = Globals::new();
    let name = globals.create_global("counter", 1, |connection, id, _version| {
        connection.register_remote(
            id,
            Arc::new(CounterResource {
                total: AtomicU32::new(0),
            }),
        )?;
        Ok(())
    });
    DisplayResource::attach(&link.server, &globals)?;

    // Client: discover, bind, and talk to the counter.
    let display = Display::connect(link.client.clone())?;
    let registry = display.get_registry(Arc::new(PrintGlobals))?;
    display.roundtrip().await?;

    let counter = registry.bind(name, "counter", 1, |id| CounterProxy {
        id,
        last: AtomicU32::new(0),
    })?;
    for amount in [1, 2, 3] {
        link.client
            .marshall(counter.id, COUNTER_ADD, &[codec::uint(amount)])?;
    }
    display.roundtrip().await?;
    println!("final total: {}", counter.last.load(Ordering::Acquire));

    display.close();
    link.server.closed().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_total_wraps() {
        let counter = CounterResource {
            total: AtomicU32::new(u32::MAX - 1),
        };
        assert_eq!(counter.add(3), 1);
        assert_eq!(counter.add(2), 3);
    }
}
