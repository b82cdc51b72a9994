//! Connection: object table, inbound dispatch and outbound flushing.
//!
//! A [`Connection`] owns everything one peer knows about a session:
//! 1. The object table and the local id allocator
//! 2. The inbound batch FIFO, drained one message at a time
//! 3. The outbound queue, handed to the transport on flush
//! 4. One-shot idle handlers, run whenever the inbound FIFO empties
//!
//! Handlers run strictly in arrival order. A handler may suspend; the next
//! message is not decoded until it finishes. Calling [`Connection::message`]
//! while a drain is in progress only queues the batch, and the running drain
//! picks it up.
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::{Connection, ConnectionConfig, InboundBatch};
//!
//! let connection = Connection::new(ConnectionConfig::server());
//! connection.on_flush(move |messages| {
//!     transport.send(OutboundMessage::concat(messages));
//! });
//!
//! while let Some(batch) = transport.recv().await {
//!     connection.message(batch).await?;
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::watch;

use crate::codec::{self, Arg, Handle, ObjectResolver};
use crate::config::ConnectionConfig;
use crate::display::DISPLAY_DELETE_ID;
use crate::error::{Result, WireError};
use crate::object::{
    BoxFuture, Dispatch, IdAllocator, Lifecycle, ListenerId, ObjectId, ObjectObserver, ObjectRef,
    ObjectTable, Role, DISPLAY_ID,
};
use crate::outbound::{FlushCallback, OutboundMessage, OutboundQueue};
use crate::protocol::{read_header, InboundBatch, Message, HEADER_SIZE};

/// Application hook told about fatal errors before the connection closes.
pub type ErrorHook = Arc<dyn Fn(&WireError) + Send + Sync>;

type IdleHandler = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handle for removing an idle handler before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleHandlerId(u64);

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Open,
    /// Objects are being destroyed.
    Closing,
    Closed,
}

/// A batch in the inbound FIFO, with its read position.
struct PendingBatch {
    buffer: Bytes,
    handles: VecDeque<Handle>,
    offset: usize,
}

struct State {
    phase: ConnectionState,
    objects: ObjectTable,
    ids: IdAllocator,
    inbound: VecDeque<PendingBatch>,
    outbound: OutboundQueue,
    idle: Vec<(IdleHandlerId, IdleHandler)>,
    next_idle: u64,
    on_flush: Option<FlushCallback>,
    on_error: Option<ErrorHook>,
    observers: Vec<Arc<dyn ObjectObserver>>,
}

struct Inner {
    config: ConnectionConfig,
    state: Mutex<State>,
    /// Serializes flushes so transport callbacks never interleave.
    flush_lock: Mutex<()>,
    closed: watch::Sender<Option<Result<()>>>,
}

/// One side of a protocol session.
///
/// This is cheaply cloneable; clones share the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create an open connection with an empty object table.
    pub fn new(config: ConnectionConfig) -> Self {
        let state = State {
            phase: ConnectionState::Open,
            objects: ObjectTable::new(config.max_object_index),
            ids: IdAllocator::new(config.role),
            inbound: VecDeque::new(),
            outbound: OutboundQueue::new(),
            idle: Vec::new(),
            next_idle: 0,
            on_flush: None,
            on_error: None,
            observers: Vec::new(),
        };
        let (closed, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                flush_lock: Mutex::new(()),
                closed,
            }),
        }
    }

    /// Create a client side connection with default settings.
    pub fn client() -> Self {
        Self::new(ConnectionConfig::client())
    }

    /// Create a server side connection with default settings.
    pub fn server() -> Self {
        Self::new(ConnectionConfig::server())
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn role(&self) -> Role {
        self.inner.config.role
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().phase
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    /// Install the transport callback that receives flushed messages.
    ///
    /// The callback must not call [`Connection::flush`].
    pub fn on_flush<F>(&self, callback: F)
    where
        F: Fn(Vec<OutboundMessage>) + Send + Sync + 'static,
    {
        self.lock().on_flush = Some(Arc::new(callback));
    }

    /// Install the hook told about fatal errors before the connection closes.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&WireError) + Send + Sync + 'static,
    {
        self.lock().on_error = Some(Arc::new(hook));
    }

    /// Observe every object created on or destroyed from this connection.
    pub fn add_observer(&self, observer: Arc<dyn ObjectObserver>) {
        self.lock().observers.push(observer);
    }

    /// Run `handler` once, the next time the inbound FIFO drains.
    pub fn add_idle_handler<F, Fut>(&self, handler: F) -> IdleHandlerId
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        state.next_idle += 1;
        let id = IdleHandlerId(state.next_idle);
        state
            .idle
            .push((id, Box::new(move || Box::pin(handler()) as BoxFuture<'static, ()>)));
        id
    }

    /// Drop an idle handler that has not run yet.
    pub fn remove_idle_handler(&self, id: IdleHandlerId) -> bool {
        let mut state = self.lock();
        let before = state.idle.len();
        state.idle.retain(|(handler_id, _)| *handler_id != id);
        state.idle.len() != before
    }

    // ------------------------------------------------------------------
    // Object registry
    // ------------------------------------------------------------------

    /// Insert `object` under `id`.
    ///
    /// Fails with `ConnectionClosed` once closing, `DuplicateObject` if the
    /// id is taken and `InvalidId` for 0 or ids beyond the arena bound.
    pub fn register(&self, id: ObjectId, object: Arc<dyn Dispatch>) -> Result<ObjectRef> {
        let interface = object.interface();
        let (object_ref, observers) = {
            let mut state = self.lock();
            if state.phase != ConnectionState::Open {
                return Err(WireError::ConnectionClosed);
            }
            let object_ref = state.objects.insert(id, object)?;
            (object_ref, state.observers.clone())
        };
        tracing::trace!("Registered {}@{}", interface, id);
        for observer in &observers {
            observer.created(id, interface);
        }
        Ok(object_ref)
    }

    /// Register an object whose id was chosen by the peer (a decoded `new_id`).
    ///
    /// The id must lie in the peer's range.
    pub fn register_remote(&self, id: ObjectId, object: Arc<dyn Dispatch>) -> Result<ObjectRef> {
        if !self.role().remote_range().contains(id) {
            return Err(WireError::InvalidId(id));
        }
        self.register(id, object)
    }

    /// Remove `id` from the table without running destroy listeners.
    ///
    /// On a server, removing a client-allocated id queues `delete_id` so the
    /// client can reuse it, and removing a server id recycles it at once. A
    /// client only recycles its ids when the server's `delete_id` arrives.
    pub fn unregister(&self, id: ObjectId) {
        self.remove_entry(id, true);
    }

    fn remove_entry(&self, id: ObjectId, release_id: bool) {
        let notify_peer = {
            let mut state = self.lock();
            if state.phase == ConnectionState::Closed || state.objects.remove(id).is_none() {
                return;
            }
            if !release_id || state.phase != ConnectionState::Open {
                return;
            }
            let role = self.role();
            if role != Role::Server {
                false
            } else if role.remote_range().contains(id) {
                id != DISPLAY_ID
            } else {
                state.ids.recycle(id);
                false
            }
        };
        if notify_peer {
            if let Err(e) = self.marshall(DISPLAY_ID, DISPLAY_DELETE_ID, &[codec::uint(id)]) {
                tracing::warn!("Failed to queue delete_id for {}: {}", id, e);
            }
        }
    }

    /// Resolve `id` to its object.
    pub fn lookup(&self, id: ObjectId) -> Result<Arc<dyn Dispatch>> {
        self.lock().objects.object(id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.lock().objects.contains(id)
    }

    /// Reference to the current incarnation of `id`.
    pub fn object_ref(&self, id: ObjectId) -> Option<ObjectRef> {
        self.lock().objects.object_ref(id)
    }

    /// Lifecycle of one incarnation; references taken before a destroy stay
    /// `Destroyed` even after the id is reused.
    pub fn lifecycle(&self, object: ObjectRef) -> Lifecycle {
        self.lock().objects.lifecycle(object)
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    /// Allocate an id from the local range.
    pub fn next_id(&self) -> Result<ObjectId> {
        self.lock().ids.next_id()
    }

    /// Make a local id available again.
    pub fn recycle_id(&self, id: ObjectId) -> bool {
        self.lock().ids.recycle(id)
    }

    /// Call `listener` once when `id` is destroyed.
    pub fn add_destroy_listener<F>(&self, id: ObjectId, listener: F) -> Result<ListenerId>
    where
        F: FnOnce(ObjectId) + Send + 'static,
    {
        let mut guard = self.lock();
        let state = &mut *guard;
        let listener_id = state.objects.next_listener_id();
        match state.objects.get_mut(id) {
            Some(entry) if entry.lifecycle == Lifecycle::Active => {
                entry.listeners.push((listener_id, Box::new(listener)));
                Ok(listener_id)
            }
            _ => Err(WireError::UnknownObject(id)),
        }
    }

    pub fn remove_destroy_listener(&self, id: ObjectId, listener: ListenerId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.objects.get_mut(id) else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|(lid, _)| *lid != listener);
        entry.listeners.len() != before
    }

    /// Destroy `id`: fire its listeners once, then unregister it.
    ///
    /// Destroying an unknown or already destroyed id does nothing.
    pub fn destroy(&self, id: ObjectId) {
        self.destroy_object(id, true);
    }

    fn destroy_object(&self, id: ObjectId, release_id: bool) {
        let (listeners, interface, observers) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(entry) = state.objects.get_mut(id) else {
                return;
            };
            if entry.lifecycle != Lifecycle::Active {
                return;
            }
            entry.lifecycle = Lifecycle::Destroying;
            (
                std::mem::take(&mut entry.listeners),
                entry.object.interface(),
                state.observers.clone(),
            )
        };

        for (_, listener) in listeners {
            listener(id);
        }
        for observer in &observers {
            observer.destroyed(id, interface);
        }
        tracing::trace!("Destroyed {}@{}", interface, id);
        self.remove_entry(id, release_id);
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Encode a message and queue it for the next flush.
    ///
    /// Does nothing once the connection is closing.
    pub fn marshall(&self, id: ObjectId, opcode: u16, args: &[Arg]) -> Result<()> {
        let message = OutboundMessage::encode(id, opcode, args)?;
        let mut state = self.lock();
        if state.phase == ConnectionState::Open {
            state.outbound.push(message);
        }
        Ok(())
    }

    /// Send a constructor message and register the proxy it creates.
    ///
    /// A fresh local id is allocated, `proxy` builds the object for it, and
    /// the object is registered before the message is encoded with the id
    /// in place of the [`codec::new_object`] placeholder. An oversized
    /// message fails before any id is taken.
    pub fn marshall_constructor<D, F>(
        &self,
        id: ObjectId,
        opcode: u16,
        args: &[Arg],
        proxy: F,
    ) -> Result<Arc<D>>
    where
        D: Dispatch,
        F: FnOnce(ObjectId) -> D,
    {
        OutboundMessage::encoded_size(args)?;
        let new_id = self.next_id()?;
        let object = Arc::new(proxy(new_id));
        if let Err(e) = self.register(new_id, object.clone()) {
            self.recycle_id(new_id);
            return Err(e);
        }

        let mut args = args.to_vec();
        if let Some(slot) = args.iter_mut().find_map(|arg| match arg {
            Arg::NewObject(slot) if *slot == 0 => Some(slot),
            _ => None,
        }) {
            *slot = new_id;
        }

        match OutboundMessage::encode(id, opcode, &args) {
            Ok(message) => {
                let mut state = self.lock();
                if state.phase == ConnectionState::Open {
                    state.outbound.push(message);
                }
                Ok(object)
            }
            Err(e) => {
                // Unwind like a destroy so listeners and observers stay paired.
                self.destroy_object(new_id, false);
                self.recycle_id(new_id);
                Err(e)
            }
        }
    }

    /// Hand every queued message to the flush callback.
    ///
    /// Without a callback the messages stay queued.
    pub fn flush(&self) {
        let _flushing = self
            .inner
            .flush_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (messages, callback) = {
            let mut state = self.lock();
            if state.phase == ConnectionState::Closed {
                return;
            }
            let Some(callback) = state.on_flush.clone() else {
                return;
            };
            let Some(messages) = state.outbound.drain() else {
                return;
            };
            (messages, callback)
        };
        tracing::trace!("Flushing {} messages", messages.len());
        callback(messages);
    }

    /// Messages waiting for the next flush.
    pub fn pending_outbound(&self) -> usize {
        self.lock().outbound.len()
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Feed one transport batch to the connection.
    ///
    /// Messages are dispatched in order. When the FIFO drains, queued output
    /// is flushed and idle handlers run. A fatal error is reported to the
    /// error hook, closes the connection and is returned.
    pub async fn message(&self, batch: InboundBatch) -> Result<()> {
        {
            let mut state = self.lock();
            if state.phase != ConnectionState::Open {
                return Ok(());
            }
            if batch.len() > self.inner.config.max_batch_bytes {
                drop(state);
                let error = WireError::malformed(format!(
                    "Batch of {} bytes exceeds limit {}",
                    batch.len(),
                    self.inner.config.max_batch_bytes
                ));
                self.fail(error.clone());
                return Err(error);
            }
            let draining = !state.inbound.is_empty();
            state.inbound.push_back(PendingBatch {
                buffer: batch.buffer,
                handles: batch.handles,
                offset: 0,
            });
            if draining {
                tracing::trace!("Batch queued behind running drain");
                return Ok(());
            }
        }

        if let Err(error) = self.drain().await {
            self.fail(error.clone());
            return Err(error);
        }
        if self.is_closed() {
            return Ok(());
        }

        self.flush();
        self.run_idle_handlers().await;
        Ok(())
    }

    async fn drain(&self) -> Result<()> {
        loop {
            let (object, mut message) = {
                let mut guard = self.lock();
                let state = &mut *guard;
                if state.phase != ConnectionState::Open {
                    return Ok(());
                }
                let Some(batch) = state.inbound.front_mut() else {
                    return Ok(());
                };
                if batch.offset >= batch.buffer.len() {
                    state.inbound.pop_front();
                    continue;
                }

                let header = read_header(&batch.buffer, batch.offset)?;
                let object = state.objects.object(header.object_id)?;
                let end = batch.offset + header.size as usize;
                let body = batch.buffer.slice(batch.offset + HEADER_SIZE..end);
                batch.offset = end;
                let handles = std::mem::take(&mut batch.handles);
                (object, Message::new(header, body, handles))
            };

            let (object_id, opcode) = (message.object_id(), message.opcode());
            tracing::trace!("Dispatching {}@{} opcode {}", object.interface(), object_id, opcode);
            let result = object.dispatch(self, &mut message).await;

            let handles = message.into_handles();
            {
                let mut state = self.lock();
                if let Some(batch) = state.inbound.front_mut() {
                    batch.handles = handles;
                }
            }
            result.map_err(|e| e.into_dispatch_error(object_id, opcode))?;
        }
    }

    async fn run_idle_handlers(&self) {
        let handlers = std::mem::take(&mut self.lock().idle);
        for (_, handler) in handlers {
            handler().await;
        }
    }

    // ------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------

    /// Close cleanly, destroying every object, highest id first.
    pub fn close(&self) {
        self.close_with(Ok(()));
    }

    /// Close because of `error`; [`Connection::closed`] resolves with it.
    pub fn close_with_error(&self, error: WireError) {
        self.close_with(Err(error));
    }

    fn fail(&self, error: WireError) {
        tracing::error!("Closing connection after fatal error: {}", error);
        let hook = self.lock().on_error.clone();
        if let Some(hook) = hook {
            hook(&error);
        }
        self.close_with(Err(error));
    }

    fn close_with(&self, outcome: Result<()>) {
        let ids = {
            let mut state = self.lock();
            if state.phase != ConnectionState::Open {
                return;
            }
            state.phase = ConnectionState::Closing;
            state.inbound.clear();
            state.objects.ids_descending()
        };
        tracing::debug!("Closing connection, destroying {} objects", ids.len());

        for id in ids {
            self.destroy_object(id, false);
        }

        {
            let mut state = self.lock();
            state.phase = ConnectionState::Closed;
            state.outbound.clear();
            state.idle.clear();
            state.on_flush = None;
            state.on_error = None;
        }
        self.inner.closed.send_replace(Some(outcome));
    }

    /// Wait until the connection is closed.
    ///
    /// Resolves with `Ok(())` after a clean close, and with the error that
    /// ended it otherwise (including a peer's `ProtocolError`).
    pub async fn closed(&self) -> Result<()> {
        let mut rx = self.inner.closed.subscribe();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WireError::ConnectionClosed)?;
        match &*outcome {
            Some(result) => result.clone(),
            None => Err(WireError::ConnectionClosed),
        }
    }
}

impl ObjectResolver for Connection {
    fn contains(&self, id: u32) -> bool {
        Connection::contains(self, id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Connection")
            .field("role", &self.inner.config.role)
            .field("state", &state.phase)
            .field("objects", &state.objects.len())
            .field("inbound", &state.inbound.len())
            .field("outbound", &state.outbound.len())
            .finish()
    }
}
