//! Client side of the bootstrap protocol.
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::display::{Display, RegistryListener};
//! use westfield_core::Connection;
//!
//! struct Printer;
//!
//! impl RegistryListener for Printer {
//!     fn global(&self, name: u32, interface: &str, version: u32) {
//!         println!("{} {} v{}", name, interface, version);
//!     }
//! }
//!
//! let display = Display::connect(Connection::client())?;
//! let registry = display.get_registry(Arc::new(Printer))?;
//! display.roundtrip().await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use super::{
    CALLBACK_DONE, DISPLAY_DELETE_ID, DISPLAY_ERROR, DISPLAY_GET_REGISTRY, DISPLAY_SYNC,
    REGISTRY_BIND, REGISTRY_GLOBAL, REGISTRY_GLOBAL_REMOVE,
};
use crate::codec;
use crate::connection::{Connection, ErrorHook};
use crate::error::{Result, WireError};
use crate::object::{unknown_opcode, BoxFuture, Dispatch, ObjectId, DISPLAY_ID};
use crate::protocol::Message;

/// Receives registry events.
pub trait RegistryListener: Send + Sync {
    /// A global became available.
    fn global(&self, name: u32, interface: &str, version: u32);

    /// A global went away.
    fn global_remove(&self, _name: u32) {}
}

/// The display object (id 1) on the client.
pub struct Display {
    connection: Connection,
    proxy: Arc<DisplayProxy>,
}

impl Display {
    /// Register the display proxy on a fresh client connection.
    pub fn connect(connection: Connection) -> Result<Self> {
        let proxy = Arc::new(DisplayProxy {
            error_handler: Mutex::new(None),
        });
        connection.register(DISPLAY_ID, proxy.clone())?;
        Ok(Self { connection, proxy })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Be told about a peer `error` event before the connection closes.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(&WireError) + Send + Sync + 'static,
    {
        *self
            .proxy
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Queue a `sync`; the receiver resolves with the serial from `done`.
    pub fn sync(&self) -> Result<oneshot::Receiver<u32>> {
        let (tx, rx) = oneshot::channel();
        self.connection.marshall_constructor(
            DISPLAY_ID,
            DISPLAY_SYNC,
            &[codec::new_object()],
            |_| CallbackProxy {
                done: Mutex::new(Some(tx)),
            },
        )?;
        Ok(rx)
    }

    /// Send a `sync`, flush, and wait for the server to answer it.
    ///
    /// Must not be awaited from inside an object handler: the answer is
    /// dispatched by the same drain loop.
    pub async fn roundtrip(&self) -> Result<u32> {
        let done = self.sync()?;
        self.connection.flush();
        done.await.map_err(|_| WireError::ConnectionClosed)
    }

    /// Ask for the registry; `listener` receives its events.
    pub fn get_registry(&self, listener: Arc<dyn RegistryListener>) -> Result<RegistryProxy> {
        let events = self.connection.marshall_constructor(
            DISPLAY_ID,
            DISPLAY_GET_REGISTRY,
            &[codec::new_object()],
            |id| RegistryEvents { id, listener },
        )?;
        Ok(RegistryProxy {
            connection: self.connection.clone(),
            id: events.id,
        })
    }

    pub fn flush(&self) {
        self.connection.flush();
    }

    pub fn close(&self) {
        self.connection.close();
    }

    /// Resolves when the connection ends; a server `error` resolves with
    /// [`WireError::ProtocolError`].
    pub async fn closed(&self) -> Result<()> {
        self.connection.closed().await
    }
}

struct DisplayProxy {
    error_handler: Mutex<Option<ErrorHook>>,
}

impl DisplayProxy {
    fn protocol_error(&self, connection: &Connection, message: &mut Message) -> Result<()> {
        // The object may already be gone on this side, so the id is not resolved.
        let object_id = message.object_optional()?.unwrap_or(0);
        let code = message.uint()?;
        let text = message.string()?;
        let error = WireError::ProtocolError {
            object_id,
            code,
            message: text,
        };
        tracing::warn!("{}", error);

        let handler = self
            .error_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(&error);
        }
        connection.close_with_error(error);
        Ok(())
    }
}

impl Dispatch for DisplayProxy {
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
                DISPLAY_ERROR => self.protocol_error(connection, message),
                DISPLAY_DELETE_ID => {
                    let id = message.uint()?;
                    if connection.contains(id) {
                        tracing::debug!("Ignoring delete_id for live object {}", id);
                    } else if !connection.recycle_id(id) {
                        tracing::debug!("Ignoring delete_id for {}", id);
                    }
                    Ok(())
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

struct CallbackProxy {
    done: Mutex<Option<oneshot::Sender<u32>>>,
}

impl Dispatch for CallbackProxy {
    fn interface(&self) -> &'static str {
        "wl_callback"
    }

    fn dispatch<'a>(
        &'a self,
        connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                CALLBACK_DONE => {
                    let serial = message.uint()?;
                    let done = self
                        .done
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    if let Some(done) = done {
                        // Receiver dropped means nobody is waiting.
                        let _ = done.send(serial);
                    }
                    connection.destroy(message.object_id());
                    Ok(())
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

struct RegistryEvents {
    id: ObjectId,
    listener: Arc<dyn RegistryListener>,
}

impl Dispatch for RegistryEvents {
    fn interface(&self) -> &'static str {
        "wl_registry"
    }

    fn dispatch<'a>(
        &'a self,
        _connection: &'a Connection,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match message.opcode() {
                REGISTRY_GLOBAL => {
                    let name = message.uint()?;
                    let interface = message.string()?;
                    let version = message.uint()?;
                    self.listener.global(name, &interface, version);
                    Ok(())
                }
                REGISTRY_GLOBAL_REMOVE => {
                    let name = message.uint()?;
                    self.listener.global_remove(name);
                    Ok(())
                }
                op => Err(unknown_opcode(self.interface(), op)),
            }
        })
    }
}

/// Client handle on the registry.
#[derive(Clone)]
pub struct RegistryProxy {
    connection: Connection,
    id: ObjectId,
}

impl RegistryProxy {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Bind global `name`; `proxy` builds the local object for the new id.
    pub fn bind<D, F>(&self, name: u32, interface: &str, version: u32, proxy: F) -> Result<Arc<D>>
    where
        D: Dispatch,
        F: FnOnce(ObjectId) -> D,
    {
        self.connection.marshall_constructor(
            self.id,
            REGISTRY_BIND,
            &[
                codec::uint(name),
                codec::string(interface),
                codec::uint(version),
                codec::new_object(),
            ],
            proxy,
        )
    }
}
