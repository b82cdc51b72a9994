//! Server side of the bootstrap protocol.
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::display::{DisplayResource, Globals};
//! use westfield_core::Connection;
//!
//! let globals = Globals::new();
//! globals.create_global("wl_compositor", 4, |connection, id, version| {
//!     connection.register_remote(id, Arc::new(CompositorResource::new(version)))?;
//!     Ok(())
//! });
//!
//! // For every accepted client:
//! let connection = Connection::server();
//! DisplayResource::attach(&connection, &globals)?;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    error_code, CALLBACK_DONE, DISPLAY_ERROR, DISPLAY_GET_REGISTRY, DISPLAY_SYNC,
    GLOBAL_NAME_BASE, REGISTRY_BIND, REGISTRY_GLOBAL, REGISTRY_GLOBAL_REMOVE,
};
use crate::codec;
use crate::connection::Connection;
use crate::error::{Result, WireError};
use crate::object::{unknown_opcode, BoxFuture, Dispatch, ObjectId, DISPLAY_ID};
use crate::protocol::Message;

/// Called when a client binds a global: `(connection, new_id, version)`.
///
/// The callback registers the resource for `new_id` itself.
pub type BindCallback = Arc<dyn Fn(&Connection, ObjectId, u32) -> Result<()> + Send + Sync>;

/// A bindable singleton advertised through the registry.
#[derive(Clone)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
    bind: BindCallback,
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Global")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("version", &self.version)
            .finish()
    }
}

struct RegistryEntry {
    key: u64,
    connection: Connection,
    id: ObjectId,
}

struct GlobalsInner {
    last_name: u32,
    globals: BTreeMap<u32, Global>,
    registries: Vec<RegistryEntry>,
    next_key: u64,
}

/// Globals of one server, shared by all of its client connections.
#[derive(Clone)]
pub struct Globals {
    inner: Arc<Mutex<GlobalsInner>>,
}

impl Default for Globals {
    fn default() -> Self {
        Self::new()
    }
}

impl Globals {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GlobalsInner {
                last_name: GLOBAL_NAME_BASE,
                globals: BTreeMap::new(),
                registries: Vec::new(),
                next_key: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GlobalsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Advertise a new global to every registry and return its name.
    pub fn create_global<F>(&self, interface: &str, version: u32, bind: F) -> u32
    where
        F: Fn(&Connection, ObjectId, u32) -> Result<()> + Send + Sync + 'static,
    {
        let (name, registries) = {
            let mut inner = self.lock();
            inner.last_name += 1;
            let name = inner.last_name;
            inner.globals.insert(
                name,
                Global {
                    name,
                    interface: interface.to_string(),
                    version,
                    bind: Arc::new(bind),
                },
            );
            (name, registry_targets(&inner))
        };
        tracing::debug!("Created global {} {} v{}", name, interface, version);

        for (connection, id) in registries {
            announce(&connection, id, name, interface, version);
            connection.flush();
        }
        name
    }

    /// Retract a global from every registry. Returns false for unknown names.
    pub fn destroy_global(&self, name: u32) -> bool {
        let registries = {
            let mut inner = self.lock();
            if inner.globals.remove(&name).is_none() {
                return false;
            }
            registry_targets(&inner)
        };
        tracing::debug!("Removed global {}", name);

        for (connection, id) in registries {
            if let Err(e) = connection.marshall(id, REGISTRY_GLOBAL_REMOVE, &[codec::uint(name)]) {
                tracing::warn!("Failed to send global_remove {}: {}", name, e);
            }
            connection.flush();
        }
        true
    }

    /// Look up a global by name.
    pub fn get(&self, name: u32) -> Option<Global> {
        self.lock().globals.get(&name).cloned()
    }

    /// Every global, in name order.
    pub fn list(&self) -> Vec<Global> {
        self.lock().globals.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().globals.is_empty()
    }

    /// Live registry resources across all connections.
    pub fn registry_count(&self) -> usize {
        self.lock().registries.len()
    }

    fn add_registry(&self, connection: &Connection, id: ObjectId) -> u64 {
        let mut inner = self.lock();
        inner.next_key += 1;
        let key = inner.next_key;
        inner.registries.push(RegistryEntry {
            key,
            connection: connection.clone(),
            id,
        });
        key
    }

    fn remove_registry(&self, key: u64) {
        self.lock().registries.retain(|entry| entry.key != key);
    }

    /// Send `global` for every existing global to one registry.
    fn publish(&self, connection: &Connection, id: ObjectId) -> Result<()> {
        for global in self.list() {
            connection.marshall(
                id,
                REGISTRY_GLOBAL,
                &[
                    codec::uint(global.name),
                    codec::string(global.interface.as_str()),
                    codec::uint(global.version),
                ],
            )?;
        }
        Ok(())
    }

    fn bind(
        &self,
        connection: &Connection,
        name: u32,
        interface: &str,
        version: u32,
        id: ObjectId,
    ) -> Result<()> {
        let Some(global) = self.get(name) else {
            tracing::warn!("Client bound unknown global {} ({})", name, interface);
            post_error(
                connection,
                DISPLAY_ID,
                error_code::INVALID_OBJECT,
                &format!("invalid global {} ({})", interface, name),
            );
            return Ok(());
        };
        if global.interface != interface || version == 0 || version > global.version {
            tracing::warn!(
                "Client bound {} v{} as {} v{}",
                global.interface,
                global.version,
                interface,
                version
            );
            post_error(
                connection,
                DISPLAY_ID,
                error_code::INVALID_OBJECT,
                &format!(
                    "invalid interface or version for global {}: {} v{}, have {} v{}",
                    name, interface, version, global.interface, global.version
                ),
            );
            return Ok(());
        }
        (global.bind)(connection, id, version)
    }
}

fn registry_targets(inner: &GlobalsInner) -> Vec<(Connection, ObjectId)> {
    inner
        .registries
        .iter()
        .map(|entry| (entry.connection.clone(), entry.id))
        .collect()
}

fn announce(connection: &Connection, id: ObjectId, name: u32, interface: &str, version: u32) {
    let args = [
        codec::uint(name),
        codec::string(interface),
        codec::uint(version),
    ];
    if let Err(e) = connection.marshall(id, REGISTRY_GLOBAL, &args) {
        tracing::warn!("Failed to announce global {}: {}", name, e);
    }
}

/// Send a fatal `display.error` to the client, flush it and close.
///
/// The local close future resolves with the matching `ProtocolError`.
pub fn post_error(connection: &Connection, object_id: ObjectId, code: u32, message: &str) {
    tracing::warn!(
        "Posting error on object {} (code {}): {}",
        object_id,
        code,
        message
    );
    let args = [
        codec::object(object_id),
        codec::uint(code),
        codec::string(message),
    ];
    if let Err(e) = connection.marshall(DISPLAY_ID, DISPLAY_ERROR, &args) {
        tracing::warn!("Failed to encode display error: {}", e);
    }
    connection.flush();
    connection.close_with_error(WireError::ProtocolError {
        object_id,
        code,
        message: message.to_string(),
    });
}

/// The display object (id 1) on the server.
pub struct DisplayResource {
    globals: Globals,
    serial: AtomicU32,
}

impl DisplayResource {
    /// Register the display on a fresh server connection.
    pub fn attach(connection: &Connection, globals: &Globals) -> Result<Arc<Self>> {
        let display = Arc::new(Self {
            globals: globals.clone(),
            serial: AtomicU32::new(0),
        });
        connection.register(DISPLAY_ID, display.clone())?;
        Ok(display)
    }

    /// Last serial sent in a `done` event.
    pub fn serial(&self) -> u32 {
        self.serial.load(Ordering::Acquire)
    }

    fn sync(&self, connection: &Connection, callback: ObjectId) -> Result<()> {
        connection.register_remote(callback, Arc::new(CallbackResource))?;
        let serial = self.serial.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        connection.marshall(callback, CALLBACK_DONE, &[codec::uint(serial)])?;
        connection.destroy(callback);
        Ok(())
    }

    fn get_registry(&self, connection: &Connection, id: ObjectId) -> Result<()> {
        connection.register_remote(
            id,
            Arc::new(RegistryResource {
                globals: self.globals.clone(),
            }),
        )?;
        let key = self.globals.add_registry(connection, id);
        let globals = self.globals.clone();
        connection.add_destroy_listener(id, move |_| globals.remove_registry(key))?;
        self.globals.publish(connection, id)
    }
}

impl Dispatch for DisplayResource {
    fn interface(&self) -> &'static str {
        "wl_display"
    }

    fn dispatch<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                DISPLAY_SYNC => {
                    let callback = message.new_id()?;
                    self.sync(connection, callback)
                }
                DISPLAY_GET_REGISTRY => {
                    let registry = message.new_id()?;
                    self.get_registry(connection, registry)
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

/// Registry resource created by `get_registry`.
struct RegistryResource {
    globals: Globals,
}

impl Dispatch for RegistryResource {
    fn interface(&self) -> &'static str {
        "wl_registry"
    }

    fn dispatch<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                REGISTRY_BIND => {
                    let name = message.uint()?;
                    let interface = message.string()?;
                    let version = message.uint()?;
                    let id = message.new_id()?;
                    self.globals
                        .bind(connection, name, &interface, version, id)
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

/// Sync callback; lives only long enough to send `done`.
struct CallbackResource;

impl Dispatch for CallbackResource {
    fn interface(&self) -> &'static str {
        "wl_callback"
    }

    fn dispatch<'a>(
        &'a self,
        _connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        let opcode = message.opcode();
        Box::pin(async move { Err(unknown_opcode("wl_callback", opcode)) })
    }
}
