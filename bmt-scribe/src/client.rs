use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::protocol;
use crate::{Error, LogEntry, Result, ResultCode};

/// A connection to a Scribe collector.
///
/// The client owns exactly one TCP connection and issues one `Log` call at a time. Calls are
/// paired with their replies by sequence id, which makes out-of-order replies a protocol error.
#[derive(Debug)]
pub struct ScribeClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: SocketAddr,
    seqid: i32,
}

impl ScribeClient {
    /// Opens a connection to the collector at `addr`.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        tracing::debug!(%peer, "connected to collector");

        Ok(Self {
            framed: Framed::new(stream, protocol::frame_codec()),
            peer,
            seqid: 0,
        })
    }

    /// Returns the address of the collector this client is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends the entries as a single batch and waits for the collector to acknowledge it.
    ///
    /// The collector acknowledges the batch as a whole. [`ResultCode::TryLater`] means the batch
    /// was dropped and may be resent by the caller.
    pub async fn log(&mut self, entries: &[LogEntry]) -> Result<ResultCode> {
        self.seqid = self.seqid.wrapping_add(1);
        let seqid = self.seqid;

        self.framed
            .send(protocol::encode_log_call(seqid, entries))
            .await?;

        let frame = self.framed.next().await.ok_or(Error::ConnectionClosed)??;
        protocol::decode_log_reply(frame.freeze(), seqid)
    }
}
