//! Server display: every client connection of one server.
//!
//! [`ServerDisplay`] owns the shared [`Globals`] and a table of live
//! clients. Each [`ServerDisplay::create_client`] builds a server
//! connection with the display already attached; the client leaves the
//! table once its connection has closed.
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::display::ServerDisplay;
//!
//! let display = ServerDisplay::new();
//! display.on_client_created(|client| tracing::info!("client {:?} connected", client.id()));
//! display.globals().create_global("wl_seat", 7, bind_seat);
//!
//! // Per accepted transport:
//! let client = display.create_client()?;
//! wire_transport(client.connection());
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;

use super::server::{DisplayResource, Globals};
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{Result, WireError};
use crate::object::Role;

/// Identifies one client of a [`ServerDisplay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(u64);

/// Called with a client when it joins or leaves.
pub type ClientHook = Arc<dyn Fn(&Client) + Send + Sync>;

/// One connected client.
#[derive(Clone)]
pub struct Client {
    id: ClientId,
    connection: Connection,
    display: Arc<DisplayResource>,
}

impl Client {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The client's display resource.
    pub fn display(&self) -> &Arc<DisplayResource> {
        &self.display
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .finish()
    }
}

#[derive(Default)]
struct ClientTable {
    clients: BTreeMap<ClientId, Client>,
    next_id: u64,
    on_created: Option<ClientHook>,
    on_destroyed: Option<ClientHook>,
}

struct Inner {
    globals: Globals,
    config: ConnectionConfig,
    table: Mutex<ClientTable>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ClientTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: ClientId) {
        let (client, hook) = {
            let mut table = self.lock();
            let Some(client) = table.clients.remove(&id) else {
                return;
            };
            (client, table.on_destroyed.clone())
        };
        tracing::debug!("Client {:?} disconnected", id);
        if let Some(hook) = hook {
            hook(&client);
        }
    }
}

/// The server half of the display protocol across all clients.
#[derive(Clone)]
pub struct ServerDisplay {
    inner: Arc<Inner>,
}

impl Default for ServerDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerDisplay {
    /// Display with fresh globals and default server connections.
    pub fn new() -> Self {
        Self::with_config(Globals::new(), ConnectionConfig::server())
    }

    /// Display sharing `globals`; client connections use `config` as a
    /// server.
    pub fn with_config(globals: Globals, config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                globals,
                config: config.role(Role::Server),
                table: Mutex::new(ClientTable::default()),
            }),
        }
    }

    pub fn globals(&self) -> &Globals {
        &self.inner.globals
    }

    /// Called after a client is added.
    pub fn on_client_created<F>(&self, hook: F)
    where
        F: Fn(&Client) + Send + Sync + 'static,
    {
        self.inner.lock().on_created = Some(Arc::new(hook));
    }

    /// Called once a client's connection has closed, before it is dropped.
    pub fn on_client_destroyed<F>(&self, hook: F)
    where
        F: Fn(&Client) + Send + Sync + 'static,
    {
        self.inner.lock().on_destroyed = Some(Arc::new(hook));
    }

    /// Create a server connection with the display attached and track it.
    ///
    /// Needs a tokio runtime, which watches the connection for close.
    pub fn create_client(&self) -> Result<Client> {
        let runtime = Handle::try_current().map_err(|e| {
            WireError::Config(format!("create_client needs a tokio runtime: {}", e))
        })?;

        let connection = Connection::new(self.inner.config.clone());
        let display = DisplayResource::attach(&connection, &self.inner.globals)?;

        let (client, hook) = {
            let mut table = self.inner.lock();
            table.next_id += 1;
            let client = Client {
                id: ClientId(table.next_id),
                connection: connection.clone(),
                display,
            };
            table.clients.insert(client.id, client.clone());
            (client, table.on_created.clone())
        };
        tracing::debug!("Client {:?} connected", client.id);

        let id = client.id;
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            // Both clean and failed closes end the client.
            let _ = connection.closed().await;
            if let Some(inner) = inner.upgrade() {
                inner.remove(id);
            }
        });

        if let Some(hook) = hook {
            hook(&client);
        }
        Ok(client)
    }

    /// Look up a live client.
    pub fn client(&self, id: ClientId) -> Option<Client> {
        self.inner.lock().clients.get(&id).cloned()
    }

    /// Every live client, oldest first.
    pub fn clients(&self) -> Vec<Client> {
        self.inner.lock().clients.values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Flush the outbound queue of every client.
    pub fn flush_clients(&self) {
        for client in self.clients() {
            client.connection.flush();
        }
    }
}
