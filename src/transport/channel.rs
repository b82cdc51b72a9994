//! In-process transport over unbounded tokio channels.
//!
//! Each flush becomes one [`InboundBatch`] on the channel, and a pump task
//! feeds received batches to the connection one at a time.
//!
//! # Example
//!
//! ```ignore
//! use westfield_core::transport::pair;
//! use westfield_core::ConnectionConfig;
//!
//! let link = pair(ConnectionConfig::server(), ConnectionConfig::client());
//! // set up display objects on link.server / link.client, then:
//! link.client.flush();
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::outbound::OutboundMessage;
use crate::protocol::InboundBatch;

/// Sending half carrying batches to a peer.
pub type BatchSender = mpsc::UnboundedSender<InboundBatch>;

/// Receiving half a pump reads from.
pub type BatchReceiver = mpsc::UnboundedReceiver<InboundBatch>;

/// Route every flush of `connection` into `tx` as one batch.
pub fn forward_flushes(connection: &Connection, tx: BatchSender) {
    connection.on_flush(move |messages| {
        let count = messages.len();
        if tx.send(OutboundMessage::concat(messages)).is_err() {
            tracing::debug!("Peer gone, dropped {} flushed messages", count);
        }
    });
}

/// Feed batches from `rx` into `connection` until either side ends.
///
/// Returns the fatal error that closed the connection, if any. When the
/// peer's sender goes away the connection is closed cleanly.
pub async fn pump(connection: Connection, mut rx: BatchReceiver) -> Result<()> {
    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => connection.message(batch).await?,
                None => {
                    tracing::debug!("Peer hung up, closing connection");
                    connection.close();
                    return Ok(());
                }
            },
            _ = connection.closed() => return Ok(()),
        }
    }
}

/// Two connections wired back to back, with their pump tasks.
pub struct ChannelPair {
    pub server: Connection,
    pub client: Connection,
    pub server_task: JoinHandle<Result<()>>,
    pub client_task: JoinHandle<Result<()>>,
}

/// Create a server and a client connection linked by channels.
///
/// Must be called from within a tokio runtime.
pub fn pair(server_config: ConnectionConfig, client_config: ConnectionConfig) -> ChannelPair {
    connect(Connection::new(server_config), Connection::new(client_config))
}

/// Link two existing connections by channels and spawn their pumps.
///
/// Must be called from within a tokio runtime.
pub fn connect(server: Connection, client: Connection) -> ChannelPair {
    let (to_server, server_rx) = mpsc::unbounded_channel();
    let (to_client, client_rx) = mpsc::unbounded_channel();
    forward_flushes(&client, to_server);
    forward_flushes(&server, to_client);

    let server_task = tokio::spawn(pump(server.clone(), server_rx));
    let client_task = tokio::spawn(pump(client.clone(), client_rx));

    ChannelPair {
        server,
        client,
        server_task,
        client_task,
    }
}
