//! Integration tests for westfield-core.
//!
//! These tests run a server and a client connection back to back over the
//! in-process channel transport and drive the display protocol end to end.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use proptest::prelude::*;
use westfield_core::codec::{self, Arg, ArgKind, ObjectResolver, Signature};
use westfield_core::display::{
    error_code, Display, DisplayResource, Globals, RegistryListener, ServerDisplay,
};
use westfield_core::object::{unknown_opcode, BoxFuture, Dispatch};
use westfield_core::outbound::OutboundMessage;
use westfield_core::protocol::{read_header, BatchReader, HEADER_SIZE};
use westfield_core::transport::{connect, pair, ChannelPair};
use westfield_core::{Connection, ConnectionConfig, Message, Result, WireError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Collect {
    globals: Mutex<Vec<(u32, String, u32)>>,
    removed: Mutex<Vec<u32>>,
}

impl RegistryListener for Collect {
    fn global(&self, name: u32, interface: &str, version: u32) {
        self.globals
            .lock()
            .unwrap()
            .push((name, interface.to_string(), version));
    }

    fn global_remove(&self, name: u32) {
        self.removed.lock().unwrap().push(name);
    }
}

/// Object with no requests or events.
struct Inert(&'static str);

impl Dispatch for Inert {
    fn interface(&self) -> &'static str {
        self.0
    }

    fn dispatch<'a>(
        &'a self,
        _connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        let error = unknown_opcode(self.0, message.opcode());
        Box::pin(async move { Err(error) })
    }
}

struct NoObjects;

impl ObjectResolver for NoObjects {
    fn contains(&self, _id: u32) -> bool {
        false
    }
}

fn link() -> ChannelPair {
    pair(ConnectionConfig::server(), ConnectionConfig::client())
}

// ---------------------------------------------------------------------------
// Display protocol
// ---------------------------------------------------------------------------

/// A fresh registry receives every existing global before the sync answer.
#[tokio::test]
async fn test_registry_announces_globals() {
    let link = link();
    let globals = Globals::new();
    let compositor = globals.create_global("wl_compositor", 4, |_, _, _| Ok(()));
    let shm = globals.create_global("wl_shm", 1, |_, _, _| Ok(()));
    DisplayResource::attach(&link.server, &globals).unwrap();

    let display = Display::connect(link.client.clone()).unwrap();
    let listener = Arc::new(Collect::default());
    let registry = display.get_registry(listener.clone()).unwrap();
    assert_eq!(registry.id(), 2);

    assert_eq!(display.roundtrip().await.unwrap(), 1);
    assert_eq!(
        *listener.globals.lock().unwrap(),
        vec![
            (compositor, "wl_compositor".to_string(), 4),
            (shm, "wl_shm".to_string(), 1),
        ]
    );
    assert_eq!(compositor, 0xffff_0001);
    assert_eq!(globals.registry_count(), 1);
}

/// Sync serials increase and the callback id returns to the client.
#[tokio::test]
async fn test_sync_serials_and_id_recycling() {
    let link = link();
    let globals = Globals::new();
    let resource = DisplayResource::attach(&link.server, &globals).unwrap();
    let display = Display::connect(link.client.clone()).unwrap();

    assert_eq!(display.roundtrip().await.unwrap(), 1);
    assert_eq!(display.roundtrip().await.unwrap(), 2);
    assert_eq!(resource.serial(), 2);

    // Let the pump finish the batch that carried delete_id.
    tokio::task::yield_now().await;
    assert_eq!(link.client.object_count(), 1);
    assert_eq!(link.server.object_count(), 1);
    assert_eq!(link.client.next_id().unwrap(), 2);
}

/// Binding a global runs its bind callback with the client's id.
#[tokio::test]
async fn test_bind_creates_resource() {
    let link = link();
    let globals = Globals::new();
    let bound = Arc::new(Mutex::new(Vec::new()));
    let record = bound.clone();
    let name = globals.create_global("wl_compositor", 4, move |connection, id, version| {
        connection.register_remote(id, Arc::new(Inert("wl_compositor")))?;
        record.lock().unwrap().push((id, version));
        Ok(())
    });
    DisplayResource::attach(&link.server, &globals).unwrap();

    let display = Display::connect(link.client.clone()).unwrap();
    let registry = display.get_registry(Arc::new(Collect::default())).unwrap();
    let proxy = registry
        .bind(name, "wl_compositor", 3, |_| Inert("wl_compositor"))
        .unwrap();
    display.roundtrip().await.unwrap();

    assert_eq!(*bound.lock().unwrap(), vec![(3, 3)]);
    assert!(link.server.contains(3));
    assert_eq!(proxy.interface(), "wl_compositor");
    assert!(link.client.contains(3));
}

/// Destroying a global reaches every registry as global_remove.
#[tokio::test]
async fn test_destroy_global_sends_global_remove() {
    let link = link();
    let globals = Globals::new();
    let name = globals.create_global("wl_output", 2, |_, _, _| Ok(()));
    DisplayResource::attach(&link.server, &globals).unwrap();

    let display = Display::connect(link.client.clone()).unwrap();
    let listener = Arc::new(Collect::default());
    display.get_registry(listener.clone()).unwrap();
    display.roundtrip().await.unwrap();

    assert!(globals.destroy_global(name));
    assert!(!globals.destroy_global(name));
    display.roundtrip().await.unwrap();

    assert_eq!(*listener.removed.lock().unwrap(), vec![name]);
    assert!(globals.is_empty());
}

/// Globals created after get_registry are announced as they appear.
#[tokio::test]
async fn test_late_global_is_announced() {
    let link = link();
    let globals = Globals::new();
    DisplayResource::attach(&link.server, &globals).unwrap();

    let display = Display::connect(link.client.clone()).unwrap();
    let listener = Arc::new(Collect::default());
    display.get_registry(listener.clone()).unwrap();
    display.roundtrip().await.unwrap();
    assert!(listener.globals.lock().unwrap().is_empty());

    let name = globals.create_global("wl_seat", 7, |_, _, _| Ok(()));
    display.roundtrip().await.unwrap();
    assert_eq!(
        *listener.globals.lock().unwrap(),
        vec![(name, "wl_seat".to_string(), 7)]
    );
}

/// Binding an unknown global is a protocol error that ends both sides.
#[tokio::test]
async fn test_bind_unknown_global_closes_with_protocol_error() {
    let link = link();
    let globals = Globals::new();
    DisplayResource::attach(&link.server, &globals).unwrap();

    let display = Display::connect(link.client.clone()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    display.on_error(move |error| sink.lock().unwrap().push(error.clone()));

    let registry = display.get_registry(Arc::new(Collect::default())).unwrap();
    registry
        .bind(0xdead, "wl_nothing", 1, |_| Inert("wl_nothing"))
        .unwrap();
    display.flush();

    let err = display.closed().await.unwrap_err();
    match &err {
        WireError::ProtocolError {
            object_id, code, ..
        } => {
            assert_eq!(*object_id, 1);
            assert_eq!(*code, error_code::INVALID_OBJECT);
        }
        other => panic!("unexpected close reason: {:?}", other),
    }
    assert_eq!(*seen.lock().unwrap(), vec![err.clone()]);
    assert_eq!(link.server.closed().await, Err(err));

    // Closing the server destroyed its registry resource.
    assert_eq!(globals.registry_count(), 0);
    link.server_task.await.unwrap().unwrap();
    link.client_task.await.unwrap().unwrap();
}

/// Closing the client hangs up the server side cleanly.
#[tokio::test]
async fn test_client_close_propagates() {
    let link = link();
    let globals = Globals::new();
    DisplayResource::attach(&link.server, &globals).unwrap();
    let display = Display::connect(link.client.clone()).unwrap();
    display.roundtrip().await.unwrap();

    display.close();
    display.closed().await.unwrap();
    link.server.closed().await.unwrap();
    assert_eq!(link.server.object_count(), 0);
}

/// A server display tracks each client from creation until its connection closes.
#[tokio::test]
async fn test_server_display_tracks_clients() {
    let server = ServerDisplay::new();
    let name = server.globals().create_global("wl_shm", 1, |_, _, _| Ok(()));
    let left = Arc::new(Mutex::new(Vec::new()));
    let sink = left.clone();
    server.on_client_destroyed(move |client| sink.lock().unwrap().push(client.id()));

    let client = server.create_client().unwrap();
    let link = connect(client.connection().clone(), Connection::client());
    let display = Display::connect(link.client.clone()).unwrap();
    let listener = Arc::new(Collect::default());
    display.get_registry(listener.clone()).unwrap();

    assert_eq!(display.roundtrip().await.unwrap(), 1);
    assert_eq!(client.display().serial(), 1);
    assert_eq!(
        *listener.globals.lock().unwrap(),
        vec![(name, "wl_shm".to_string(), 1)]
    );
    assert_eq!(server.client_count(), 1);

    display.close();
    link.server_task.await.unwrap().unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while server.client_count() != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(*left.lock().unwrap(), vec![client.id()]);
    assert_eq!(server.globals().registry_count(), 0);
}

// ---------------------------------------------------------------------------
// Wire format properties
// ---------------------------------------------------------------------------

fn arg_strategy() -> impl Strategy<Value = Arg> {
    prop_oneof![
        any::<u32>().prop_map(codec::uint),
        any::<i32>().prop_map(codec::int),
        any::<i32>().prop_map(|raw| codec::fixed(codec::Fixed::from_raw(raw))),
        "[a-zA-Z0-9_ ]{0,24}".prop_map(codec::string),
        prop::collection::vec(any::<u8>(), 0..24).prop_map(codec::array),
    ]
}

fn decode(buffer: Bytes, signature: &Signature) -> Result<Vec<Arg>> {
    let header = read_header(&buffer, 0)?;
    let body = buffer.slice(HEADER_SIZE..header.size as usize);
    let mut message = Message::new(header, body, Default::default());
    codec::read_signature(&mut message, &NoObjects, signature)
}

proptest! {
    /// Encoded arguments decode back to the same values and stay word aligned.
    #[test]
    fn prop_args_round_trip(
        id in 1u32..0xff00_0000,
        opcode in any::<u16>(),
        args in prop::collection::vec(arg_strategy(), 0..8)
    ) {
        let text: String = args.iter().map(|arg| arg.kind().as_char()).collect();
        let signature = Signature::parse(&text).unwrap();
        let message = OutboundMessage::encode(id, opcode, &args).unwrap();

        let expected: usize = HEADER_SIZE + args.iter().map(Arg::size).sum::<usize>();
        prop_assert_eq!(message.size(), expected);
        prop_assert_eq!(message.size() % 4, 0);
        prop_assert!(args.iter().all(|arg| arg.kind() != ArgKind::Handle));

        let decoded = decode(message.buffer.clone(), &signature).unwrap();
        prop_assert_eq!(decoded, args);
    }

    /// Concatenated messages split back into the same headers in order.
    #[test]
    fn prop_batch_headers_survive_concatenation(
        messages in prop::collection::vec(
            (1u32..1000, 0u16..16, prop::collection::vec(arg_strategy(), 0..4)),
            1..16
        )
    ) {
        let encoded: Vec<OutboundMessage> = messages
            .iter()
            .map(|(id, opcode, args)| OutboundMessage::encode(*id, *opcode, args).unwrap())
            .collect();
        let sizes: Vec<usize> = encoded.iter().map(OutboundMessage::size).collect();
        let batch = OutboundMessage::concat(encoded);

        let headers: Vec<_> = BatchReader::new(&batch.buffer)
            .collect::<Result<Vec<_>>>()
            .unwrap();
        prop_assert_eq!(headers.len(), messages.len());

        let mut offset = 0;
        for ((at, header), ((id, opcode, _), size)) in
            headers.iter().zip(messages.iter().zip(&sizes))
        {
            prop_assert_eq!(*at, offset);
            prop_assert_eq!(header.object_id, *id);
            prop_assert_eq!(header.opcode, *opcode);
            prop_assert_eq!(header.size as usize, *size);
            offset += size;
        }
        prop_assert_eq!(offset, batch.len());
    }
}
