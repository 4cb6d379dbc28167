use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::bus::{deliver, spawn_delivery, Bus, BusError, MessageHandler};

/// Upper bound on a single frame so a corrupt length prefix cannot exhaust memory.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Wire frame. On the socket each frame is a big-endian `u32` length followed
/// by the postcard encoding of this enum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Frame {
    Subscribe { topic: String },
    Publish { topic: String, payload: Vec<u8> },
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<(), BusError> {
    let bytes = postcard::to_stdvec(frame)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(BusError::FrameTooLarge {
            len: bytes.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(bytes.len() as u32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, BusError> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(BusError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(postcard::from_bytes(&buf)?)
}

type Routes = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>>;

/// Bus client speaking the framed protocol over a single TCP connection.
pub struct TcpBus {
    addr: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    routes: Routes,
    reader: JoinHandle<()>,
}

impl TcpBus {
    /// Connects once. Failure here is fatal for the caller; nothing retries.
    pub async fn connect(addr: &str) -> Result<Self, BusError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| BusError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let routes: Routes = Arc::default();
        let reader = tokio::spawn(Self::read_loop(read_half, Arc::clone(&routes), addr.to_string()));
        info!(%addr, "connected to bus");

        Ok(Self {
            addr: addr.to_string(),
            writer: tokio::sync::Mutex::new(write_half),
            routes,
            reader,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn remove_route(&self, topic: &str, tx: &mpsc::Sender<Vec<u8>>) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = routes.get_mut(topic) {
            senders.retain(|sender| !sender.same_channel(tx));
            if senders.is_empty() {
                routes.remove(topic);
            }
        }
    }

    /// Live subscriptions on `topic` held by this client.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    async fn read_loop(read_half: OwnedReadHalf, routes: Routes, addr: String) {
        let mut reader = BufReader::new(read_half);
        loop {
            match read_frame(&mut reader).await {
                Ok(Frame::Publish { topic, payload }) => {
                    let mut routes = routes.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(senders) = routes.get_mut(&topic) {
                        deliver(&topic, senders, &payload);
                    }
                }
                Ok(Frame::Subscribe { topic }) => {
                    warn!(%addr, %topic, "ignoring subscribe frame sent by the bus");
                }
                // Length-prefixed, so the stream is still aligned after a bad body.
                Err(BusError::Codec(e)) => {
                    warn!(%addr, error = %e, "dropping undecodable frame");
                }
                Err(BusError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!(%addr, "bus closed the connection");
                    break;
                }
                Err(e) => {
                    error!(%addr, error = %e, "bus read failed");
                    break;
                }
            }
        }
    }
}

impl Drop for TcpBus {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Bus for TcpBus {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        let tx = spawn_delivery(topic, handler);
        let first_for_topic = {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            let senders = routes.entry(topic.to_string()).or_default();
            senders.push(tx.clone());
            senders.len() == 1
        };
        if first_for_topic {
            let frame = Frame::Subscribe {
                topic: topic.to_string(),
            };
            if let Err(e) = write_frame(&mut *self.writer.lock().await, &frame).await {
                // The bus never heard of this topic; forget the route so a retry sends the frame again.
                self.remove_route(topic, &tx);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let frame = Frame::Publish {
            topic: topic.to_string(),
            payload,
        };
        write_frame(&mut *self.writer.lock().await, &frame).await
    }
}
