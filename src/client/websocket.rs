//! WebSocket client for the depth diff stream.
//!
//! This module provides the [`StreamClient`] for streaming incremental depth
//! updates. The read half is driven through [`StreamClient::next`]; the write
//! half is a shareable [`StreamWriter`] implementing [`Transport`], so
//! subscriptions can be changed while another task is reading.
//!
//! # Example
//!
//! ```rust,no_run
//! use depth_sync::client::StreamClient;
//! use depth_sync::client::subscription::Transport;
//!
//! # async fn example() -> depth_sync::Result<()> {
//! let mut stream = StreamClient::connect("wss://stream.binance.com:9443/ws").await?;
//! stream
//!     .writer()
//!     .subscribe(&["btcusdt@depth@100ms".to_string()])
//!     .await?;
//!
//! while let Some(msg) = stream.next().await {
//!     if let Some(update) = msg?.depth_update() {
//!         println!("{} {}..={}", update.symbol, update.first_update_id, update.last_update_id);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::Error;
use crate::types::messages::{StreamCommand, StreamMessage, StreamMethod};

use super::subscription::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a stream connection.
///
/// Cheap to share behind an `Arc`; commands from several tasks are
/// serialized on the socket.
#[derive(Debug)]
pub struct StreamWriter {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    message_id: AtomicU64,
    /// Commands awaiting acknowledgement, by request id
    pending: Mutex<FxHashMap<u64, StreamCommand>>,
}

impl StreamWriter {
    /// Send a command to the stream server, returning its request id
    pub async fn send_command(&self, method: StreamMethod, params: Vec<String>) -> Result<u64, Error> {
        let id = self.message_id.fetch_add(1, Ordering::Relaxed);
        let cmd = StreamCommand { method, params, id };
        let json = serde_json::to_string(&cmd)?;

        self.pending.lock().insert(id, cmd);
        if let Err(e) = self.sink.lock().await.send(Message::Text(json)).await {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }
        Ok(id)
    }

    async fn pong(&self, data: Vec<u8>) -> Result<(), Error> {
        self.sink.lock().await.send(Message::Pong(data)).await?;
        Ok(())
    }

    /// Close the connection
    pub async fn close(&self) -> Result<(), Error> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamWriter {
    async fn subscribe(&self, streams: &[String]) -> Result<(), Error> {
        self.send_command(StreamMethod::Subscribe, streams.to_vec())
            .await
            .map(|_| ())
    }

    async fn unsubscribe(&self, streams: &[String]) -> Result<(), Error> {
        self.send_command(StreamMethod::Unsubscribe, streams.to_vec())
            .await
            .map(|_| ())
    }
}

/// WebSocket client for the depth diff stream
///
/// # Thread Safety
///
/// Reading requires `&mut self` and is meant for a single task. The
/// [`writer`](Self::writer) can be cloned into other tasks.
#[derive(Debug)]
pub struct StreamClient {
    writer: Arc<StreamWriter>,
    read: SplitStream<WsStream>,
}

impl StreamClient {
    /// Connect to a stream endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed or the connection fails.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let url = Url::parse(url)?;
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();
        debug!(url = %url, "stream connected");

        Ok(Self {
            writer: Arc::new(StreamWriter {
                sink: tokio::sync::Mutex::new(write),
                message_id: AtomicU64::new(1),
                pending: Mutex::new(FxHashMap::default()),
            }),
            read,
        })
    }

    /// Shareable write half
    pub fn writer(&self) -> Arc<StreamWriter> {
        Arc::clone(&self.writer)
    }

    /// Receive the next message from the stream
    ///
    /// Pings are answered automatically. Command acknowledgements clear the
    /// matching pending command; rejections are logged and also returned.
    ///
    /// # Returns
    ///
    /// The next message, or `None` if the connection is closed.
    pub async fn next(&mut self) -> Option<Result<StreamMessage, Error>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => {
                    return match serde_json::from_str::<StreamMessage>(&text) {
                        Ok(msg) => {
                            self.track_command_reply(&msg);
                            Some(Ok(msg))
                        }
                        Err(e) => Some(Err(Error::from(e))),
                    };
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.writer.pong(data).await {
                        return Some(Err(e));
                    }
                }
                Ok(Message::Close(_)) => {
                    return Some(Err(Error::ConnectionClosed));
                }
                Ok(_) => {
                    // Ignore other message types (Binary, Pong, Frame)
                    continue;
                }
                Err(e) => {
                    return Some(Err(e.into()));
                }
            }
        }
    }

    fn track_command_reply(&self, msg: &StreamMessage) {
        match msg {
            StreamMessage::CommandAck(ack) => {
                if let Some(cmd) = self.writer.pending.lock().remove(&ack.id) {
                    debug!(id = ack.id, method = ?cmd.method, "command acknowledged");
                }
            }
            StreamMessage::CommandError(err) => {
                let cmd = err.id.and_then(|id| self.writer.pending.lock().remove(&id));
                warn!(
                    code = err.error.code,
                    msg = %err.error.msg,
                    command = ?cmd,
                    "stream command rejected"
                );
            }
            _ => {}
        }
    }

    /// Close the WebSocket connection
    pub async fn close(&mut self) -> Result<(), Error> {
        self.writer.close().await
    }
}
