//! Remote console client
//!
//! Every packet is a little-endian `i32` length followed by the request id,
//! the packet type, a NUL-terminated body and one more NUL. The length counts
//! everything after itself.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

const PACKET_AUTH: i32 = 3;
const PACKET_AUTH_RESPONSE: i32 = 2;
const PACKET_COMMAND: i32 = 2;

/// id + type + two terminators
const PACKET_OVERHEAD: usize = 10;

/// Largest frame we accept from a server
const MAX_PACKET_LEN: usize = 64 * 1024;

/// Remote console failures
#[derive(Debug, Error)]
pub enum RconError {
    #[error("rcon connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("rcon authentication rejected")]
    AuthRejected,

    #[error("malformed rcon packet: {0}")]
    Malformed(String),

    #[error("rcon response id {got} does not match request id {expected}")]
    UnexpectedId { expected: i32, got: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Packet {
    id: i32,
    kind: i32,
    body: String,
}

impl Packet {
    fn encode(&self) -> Vec<u8> {
        let len = self.body.len() + PACKET_OVERHEAD;
        let mut buf = Vec::with_capacity(len + 4);
        buf.extend_from_slice(&(len as i32).to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(self.body.as_bytes());
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, RconError> {
        let len = reader.read_i32_le().await?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| (PACKET_OVERHEAD..=MAX_PACKET_LEN).contains(len))
            .ok_or_else(|| RconError::Malformed(format!("frame length {len}")))?;

        let mut frame = vec![0u8; len];
        reader.read_exact(&mut frame).await?;

        let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
        let kind = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if frame[len - 2..] != [0, 0] {
            return Err(RconError::Malformed("missing terminators".to_string()));
        }
        let body = String::from_utf8_lossy(&frame[8..len - 2]).into_owned();
        Ok(Self { id, kind, body })
    }
}

/// Something that runs console commands on a server
#[async_trait]
pub trait Console: Send {
    /// Run `command` and return its output
    async fn command(&mut self, command: &str) -> Result<String, RconError>;
}

/// An authenticated remote console session
pub struct RconClient<S> {
    stream: S,
    next_id: i32,
}

impl RconClient<TcpStream> {
    /// Connect to `address` and authenticate
    pub async fn connect(address: &str, password: &str) -> Result<Self, RconError> {
        let stream = TcpStream::connect(address).await?;
        Self::authenticate(stream, password).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> RconClient<S> {
    /// Authenticate over an established stream
    pub async fn authenticate(stream: S, password: &str) -> Result<Self, RconError> {
        let mut client = Self { stream, next_id: 1 };
        let id = client.send(PACKET_AUTH, password).await?;

        // Some servers send an empty response value ahead of the auth result.
        loop {
            let reply = Packet::read_from(&mut client.stream).await?;
            if reply.kind != PACKET_AUTH_RESPONSE {
                continue;
            }
            if reply.id == -1 {
                return Err(RconError::AuthRejected);
            }
            if reply.id != id {
                return Err(RconError::UnexpectedId {
                    expected: id,
                    got: reply.id,
                });
            }
            debug!("rcon authenticated");
            return Ok(client);
        }
    }

    async fn send(&mut self, kind: i32, body: &str) -> Result<i32, RconError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let packet = Packet {
            id,
            kind,
            body: body.to_string(),
        };
        self.stream.write_all(&packet.encode()).await?;
        self.stream.flush().await?;
        Ok(id)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Console for RconClient<S> {
    async fn command(&mut self, command: &str) -> Result<String, RconError> {
        let id = self.send(PACKET_COMMAND, command).await?;
        let reply = Packet::read_from(&mut self.stream).await?;
        if reply.id != id {
            return Err(RconError::UnexpectedId {
                expected: id,
                got: reply.id,
            });
        }
        debug!(command, response = %reply.body, "rcon command");
        Ok(reply.body)
    }
}
