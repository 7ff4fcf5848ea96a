//! Point-to-point transport between participants.
//!
//! A [`Channel`] is a bidirectional, reliable, ordered byte pipe between two
//! named endpoints, with typed codecs layered on top. Messages on one channel
//! are delivered in send order; nothing is guaranteed across distinct
//! channels. Any I/O error is fatal: the peer is assumed gone and the error
//! propagates up until the run aborts.
//!
//! Backends: [`local`] (in-process rendezvous, used by tests and
//! single-process runs) and [`socket`] (TCP).

pub mod local;
pub mod mesh_exchange;
pub mod socket;
pub mod wire;

use crate::error::{CouplingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport class of an m2n link, chosen in the configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process mailbox rendezvous.
    Local,
    /// TCP socket; `address` is the acceptor's bind address (`host:port`).
    Socket { address: String },
}

impl TransportKind {
    /// Derive a backend with a per-acceptor port offset. Point-to-point
    /// setups need one listening address per accepting rank; the offset
    /// keeps them from colliding. A no-op for the local backend.
    pub fn with_port_offset(&self, offset: u16) -> Result<TransportKind> {
        match self {
            TransportKind::Local => Ok(TransportKind::Local),
            TransportKind::Socket { address } => {
                let (host, port) = address.rsplit_once(':').ok_or_else(|| {
                    CouplingError::Config(format!("socket address `{address}` has no port"))
                })?;
                let port: u16 = port.parse().map_err(|_| {
                    CouplingError::Config(format!("socket address `{address}`: invalid port"))
                })?;
                Ok(TransportKind::Socket {
                    address: format!("{host}:{}", port + offset),
                })
            }
        }
    }
}

/// Blocking typed byte channel between two endpoints.
///
/// The typed codecs are provided methods over the raw byte operations, so
/// every backend speaks the identical wire format: native-endian fixed
/// primitives, `i32` count prefixes for variable payloads.
pub trait Channel: Send {
    /// Name of the remote endpoint, for diagnostics.
    fn peer(&self) -> &str;

    /// Send one message of raw bytes.
    fn send_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive exactly `len` bytes. Blocks until they arrive.
    fn recv_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    fn send_i32(&mut self, v: i32) -> Result<()> {
        self.send_bytes(&v.to_ne_bytes())
    }

    fn recv_i32(&mut self) -> Result<i32> {
        let b = self.recv_bytes(4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn send_f64(&mut self, v: f64) -> Result<()> {
        self.send_bytes(&v.to_ne_bytes())
    }

    fn recv_f64(&mut self) -> Result<f64> {
        let b = self.recv_bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&b);
        Ok(f64::from_ne_bytes(raw))
    }

    fn send_bool(&mut self, v: bool) -> Result<()> {
        self.send_bytes(&[v as u8])
    }

    fn recv_bool(&mut self) -> Result<bool> {
        let b = self.recv_bytes(1)?;
        Ok(b[0] != 0)
    }

    fn send_string(&mut self, s: &str) -> Result<()> {
        self.send_i32(s.len() as i32)?;
        if !s.is_empty() {
            self.send_bytes(s.as_bytes())?;
        }
        Ok(())
    }

    fn recv_string(&mut self) -> Result<String> {
        let raw = self.recv_i32()?;
        let n = wire::decode_count(self.peer(), raw)?;
        if n == 0 {
            return Ok(String::new());
        }
        let bytes = self.recv_bytes(n)?;
        String::from_utf8(bytes).map_err(|_| CouplingError::Protocol {
            peer: self.peer().to_string(),
            expected: "utf-8 string".to_string(),
            got: "invalid utf-8".to_string(),
        })
    }

    fn send_f64s(&mut self, v: &[f64]) -> Result<()> {
        self.send_i32(v.len() as i32)?;
        if !v.is_empty() {
            self.send_bytes(wire::to_bytes(v))?;
        }
        Ok(())
    }

    fn recv_f64s(&mut self) -> Result<Vec<f64>> {
        let raw = self.recv_i32()?;
        let n = wire::decode_count(self.peer(), raw)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.recv_bytes(n * 8)?;
        Ok(wire::from_bytes(&bytes))
    }

    fn send_i32s(&mut self, v: &[i32]) -> Result<()> {
        self.send_i32(v.len() as i32)?;
        if !v.is_empty() {
            self.send_bytes(wire::to_bytes(v))?;
        }
        Ok(())
    }

    fn recv_i32s(&mut self) -> Result<Vec<i32>> {
        let raw = self.recv_i32()?;
        let n = wire::decode_count(self.peer(), raw)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.recv_bytes(n * 4)?;
        Ok(wire::from_bytes(&bytes))
    }
}

/// An accepted connection: one open channel per requester rank.
pub struct Connection {
    pub channels: BTreeMap<usize, Box<dyn Channel>>,
}

impl Connection {
    /// Channel to the given remote rank.
    pub fn channel(&mut self, rank: usize) -> Result<&mut Box<dyn Channel>> {
        self.channels
            .get_mut(&rank)
            .ok_or(CouplingError::UnknownRemoteRank(rank))
    }

    /// Channel to remote rank 0 (the peer group's master).
    pub fn master(&mut self) -> Result<&mut Box<dyn Channel>> {
        self.channel(0)
    }
}

/// Accept channels from every listed requester rank.
///
/// The acceptor side of connection establishment; the peer's ranks call
/// [`request_connection`]. Each incoming channel announces its requester
/// rank first, and the returned [`Connection`] is keyed by it.
pub fn accept_connection(
    kind: &TransportKind,
    acceptor: &str,
    requester: &str,
    expected_ranks: &[usize],
) -> Result<Connection> {
    log::debug!("`{acceptor}` accepting {} channel(s) from `{requester}`", expected_ranks.len());
    match kind {
        TransportKind::Local => local::accept(acceptor, requester, expected_ranks),
        TransportKind::Socket { address } => {
            socket::accept(address, acceptor, requester, expected_ranks)
        }
    }
}

/// Open a channel to an accepting endpoint, announcing `my_rank`.
pub fn request_connection(
    kind: &TransportKind,
    acceptor: &str,
    requester: &str,
    my_rank: usize,
) -> Result<Box<dyn Channel>> {
    log::debug!("`{requester}` (rank {my_rank}) requesting channel to `{acceptor}`");
    match kind {
        TransportKind::Local => local::request(acceptor, requester, my_rank),
        TransportKind::Socket { address } => socket::request(address, acceptor, my_rank),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_offset_derivation() {
        let kind = TransportKind::Socket {
            address: "127.0.0.1:4000".to_string(),
        };
        assert_eq!(
            kind.with_port_offset(3).unwrap(),
            TransportKind::Socket {
                address: "127.0.0.1:4003".to_string()
            }
        );
        assert_eq!(
            TransportKind::Local.with_port_offset(3).unwrap(),
            TransportKind::Local
        );
    }
}
