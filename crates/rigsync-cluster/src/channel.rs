//! One replication channel over a TCP stream.
//!
//! Outbound messages go through a bounded queue drained by a single
//! writer task, so messages queued from any task reach the peer in the
//! order they were queued. A peer that stops reading fills its queue and
//! further sends fail with [`ReplicationError::Lagging`] instead of
//! buffering without limit. Inbound frames are read by whoever owns the
//! [`MessageReader`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{Message, read_frame, write_frame};

/// Messages a peer may fall behind before its channel is considered lagging.
pub const QUEUE_CAPACITY: usize = 256;

/// Cloneable handle that queues messages for one peer.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    id: u64,
    peer: SocketAddr,
    tx: mpsc::Sender<Message>,
    stop: Arc<watch::Sender<bool>>,
}

impl ChannelSender {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queue a message without waiting.
    ///
    /// Fails with [`ReplicationError::Lagging`] when the queue is full and
    /// with [`ReplicationError::Closed`] once the writer has stopped.
    pub fn send(&self, message: Message) -> ReplicationResult<()> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => ReplicationError::Lagging(QUEUE_CAPACITY),
            TrySendError::Closed(_) => ReplicationError::Closed,
        })
    }

    /// Stop the writer now, even if it is blocked on a stalled peer.
    ///
    /// Queued messages are discarded and the write half is shut down, so
    /// the peer sees end of stream.
    pub fn close(&self) {
        self.stop.send_replace(true);
    }
}

/// Inbound half of a channel.
pub struct MessageReader {
    peer: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
}

impl MessageReader {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Next decodable message, `None` at end of stream.
    ///
    /// Frames that do not decode are logged and skipped.
    pub async fn next(&mut self) -> ReplicationResult<Option<Message>> {
        loop {
            let Some(body) = read_frame(&mut self.reader).await? else {
                return Ok(None);
            };
            match Message::decode(&body) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => warn!(peer = %self.peer, error = %e, "skipping undecodable frame"),
            }
        }
    }
}

/// Split a connected stream into a sender, a reader and the writer task.
///
/// The writer task ends when every [`ChannelSender`] clone is dropped, a
/// write fails or [`ChannelSender::close`] is called.
pub fn open(stream: TcpStream, id: u64) -> ReplicationResult<(ChannelSender, MessageReader, JoinHandle<()>)> {
    let peer = stream.peer_addr()?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "cannot disable nagle");
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let (stop, stopped) = watch::channel(false);
    let writer = tokio::spawn(run_writer(peer, write_half, rx, stopped));
    Ok((
        ChannelSender {
            id,
            peer,
            tx,
            stop: Arc::new(stop),
        },
        MessageReader {
            peer,
            reader: BufReader::new(read_half),
        },
        writer,
    ))
}

async fn run_writer(
    peer: SocketAddr,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Message>,
    mut stopped: watch::Receiver<bool>,
) {
    let drain = async {
        while let Some(message) = rx.recv().await {
            let result = match message.encode() {
                Ok(body) => write_frame(&mut writer, &body).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(%peer, error = %e, "replication write failed");
                break;
            }
        }
    };
    // Dropping every sender must not cut the drain short.
    let closed = async {
        if stopped.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = drain => {}
        _ = closed => debug!(%peer, "replication writer closed"),
    }
    debug!(%peer, "replication writer stopped");
}
